//! FellWalker: gradient-ascent walk-to-peak segmentation.
//!
//! Every unmasked, above-floor pixel not yet assigned starts a walk that
//! repeatedly steps to its steepest-ascent neighbor until it reaches a local
//! maximum; that maximum seeds (or already owns) a clump, and every pixel
//! visited on the way is assigned to it. Walks are memoized: a walk that
//! reaches an already-assigned pixel adopts its clump without re-walking.
//! Termination is guaranteed because each step strictly increases intensity
//! or lands on a memoized pixel.
//!
//! Two noise defenses: when a walk stalls on a strict local maximum whose
//! value is within the significance threshold of a steeper pixel inside a
//! Chebyshev ball of radius `max_jump`, the walk jumps there and continues;
//! and after all walks complete, any clump whose peak-to-saddle dip toward
//! its highest-peak neighbor is below `min_dip_rms * RMS` is merged into
//! that neighbor.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{ExtractConfig, FellWalkerConfig};
use crate::grid::WorkGrid;
use crate::noise::NoiseField;

use super::{above_floor, find_root, union_labels, RawSegmentation};

pub(crate) fn run(
    work: &WorkGrid,
    noise: &NoiseField,
    config: &FellWalkerConfig,
    common: &ExtractConfig,
) -> RawSegmentation {
    let len = work.geom.len();
    let mut assignment = vec![0u32; len];
    let mut clump_peaks: Vec<f64> = Vec::new();
    let mut clump_peak_pixels: Vec<usize> = Vec::new();
    // Plateau-guard rejects: walked but permanently background.
    let mut rejected = vec![false; len];

    let mut path: Vec<usize> = Vec::new();
    let mut neighbors: Vec<usize> = Vec::new();
    let mut ball: Vec<usize> = Vec::new();

    for start in 0..len {
        if assignment[start] != 0
            || rejected[start]
            || !above_floor(work, noise, common.noise_level, start)
        {
            continue;
        }

        path.clear();
        let mut current = start;
        let id = loop {
            if assignment[current] != 0 {
                // Memoized: adopt the clump this pixel already belongs to.
                break assignment[current];
            }
            if rejected[current] {
                break 0;
            }
            path.push(current);

            // Steepest ascending neighbor.
            work.geom
                .neighbors_into(current, common.connectivity, &mut neighbors);
            let mut best: Option<usize> = None;
            let mut best_value = work.values[current];
            for &next in &neighbors {
                let v = work.values[next];
                if v.is_finite() && v > best_value {
                    best_value = v;
                    best = Some(next);
                }
            }
            if let Some(next) = best {
                current = next;
                continue;
            }

            // Strict local maximum. Jump across nearby noise maxima: take the
            // highest steeper pixel in the ball whose rise stays within the
            // significance threshold.
            let threshold = common.noise_level * noise.rms_at(current);
            work.geom
                .chebyshev_ball_into(current, config.max_jump, &mut ball);
            let mut jump: Option<usize> = None;
            let mut jump_value = work.values[current];
            for &candidate in &ball {
                let v = work.values[candidate];
                if v.is_finite() && v > jump_value && v - work.values[current] <= threshold {
                    jump_value = v;
                    jump = Some(candidate);
                }
            }
            if let Some(next) = jump {
                current = next;
                continue;
            }

            // Genuine peak: optionally reject plateau walks, else seed a new
            // clump here.
            if config.flat_slope > 0.0 && path.len() > 1 {
                let rise = work.values[current] - work.values[start];
                if rise / (path.len() as f64) < config.flat_slope {
                    break 0;
                }
            }
            clump_peaks.push(work.values[current]);
            clump_peak_pixels.push(current);
            break clump_peaks.len() as u32;
        };

        if id == 0 {
            for &flat in &path {
                rejected[flat] = true;
            }
        } else {
            for &flat in &path {
                assignment[flat] = id;
            }
        }
    }

    let walked_clumps = clump_peaks.len();
    merge_shallow_clumps(
        work,
        noise,
        config,
        common,
        &mut assignment,
        &mut clump_peaks,
        &clump_peak_pixels,
    );

    debug!(
        backend = "fellwalker",
        walked_clumps,
        merged_clumps = walked_clumps - count_live_ids(&assignment),
        "walks finished"
    );

    RawSegmentation::segmentation(assignment, false)
}

fn count_live_ids(assignment: &[u32]) -> usize {
    let mut ids: Vec<u32> = assignment.iter().copied().filter(|&id| id != 0).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}

/// Merge each clump whose dip to its highest-peak neighbor is below
/// `min_dip_rms * RMS` into that neighbor, repeating until stable.
///
/// The dip of clump `a` toward neighbor `b` is `peak_a - saddle(a, b)`, where
/// the saddle is the highest boundary crossing (the max over adjacent pixel
/// pairs of the lower of the two values).
fn merge_shallow_clumps(
    work: &WorkGrid,
    noise: &NoiseField,
    config: &FellWalkerConfig,
    common: &ExtractConfig,
    assignment: &mut [u32],
    clump_peaks: &mut [f64],
    clump_peak_pixels: &[usize],
) {
    let clump_count = clump_peaks.len();
    if clump_count < 2 {
        return;
    }

    // Union-find over raw ids; label 0 unused.
    let mut parents: Vec<u32> = (0..clump_count as u32 + 1).collect();
    let mut neighbors = Vec::new();

    loop {
        // Saddle heights between each pair of (current) clumps.
        let mut saddles: HashMap<(u32, u32), f64> = HashMap::new();
        for flat in 0..assignment.len() {
            let a = resolved(assignment, &mut parents, flat);
            if a == 0 {
                continue;
            }
            work.geom
                .neighbors_into(flat, common.connectivity, &mut neighbors);
            for &next in &neighbors {
                let b = resolved(assignment, &mut parents, next);
                if b == 0 || b == a {
                    continue;
                }
                let crossing = work.values[flat].min(work.values[next]);
                let key = if a < b { (a, b) } else { (b, a) };
                let entry = saddles.entry(key).or_insert(f64::NEG_INFINITY);
                if crossing > *entry {
                    *entry = crossing;
                }
            }
        }
        if saddles.is_empty() {
            break;
        }

        // Live ids in ascending peak order, so shallow clumps merge upward
        // deterministically.
        let mut live: Vec<u32> = (1..=clump_count as u32)
            .filter(|&id| find_root(&mut parents, id) == id)
            .collect();
        live.sort_by(|&a, &b| {
            clump_peaks[a as usize - 1]
                .partial_cmp(&clump_peaks[b as usize - 1])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut merged_any = false;
        for &id in &live {
            if find_root(&mut parents, id) != id {
                continue;
            }
            // Highest-peak neighboring clump.
            let mut best_neighbor: Option<u32> = None;
            let mut best_saddle = f64::NEG_INFINITY;
            for (&(a, b), &saddle) in &saddles {
                let other = if a == id {
                    b
                } else if b == id {
                    a
                } else {
                    continue;
                };
                let better = match best_neighbor {
                    None => true,
                    Some(current) => {
                        let peak_other = clump_peaks[other as usize - 1];
                        let peak_current = clump_peaks[current as usize - 1];
                        peak_other > peak_current
                            || (peak_other == peak_current && other < current)
                    }
                };
                if better {
                    best_neighbor = Some(other);
                    best_saddle = saddle;
                }
            }
            let Some(neighbor) = best_neighbor else {
                continue;
            };
            let peak = clump_peaks[id as usize - 1];
            if clump_peaks[neighbor as usize - 1] < peak {
                // Only merge into a clump at least as high; the lower one
                // will be considered on its own turn.
                continue;
            }
            let min_dip = config.min_dip_rms * noise.rms_at(clump_peak_pixels[id as usize - 1]);
            if peak - best_saddle < min_dip {
                let root = union_labels(&mut parents, id, neighbor);
                let absorbed = if root == find_root(&mut parents, neighbor) {
                    id
                } else {
                    neighbor
                };
                // The surviving clump keeps the higher peak.
                let peak_max = clump_peaks[id as usize - 1]
                    .max(clump_peaks[neighbor as usize - 1]);
                clump_peaks[root as usize - 1] = peak_max;
                clump_peaks[absorbed as usize - 1] = peak_max;
                merged_any = true;
            }
        }
        if !merged_any {
            break;
        }
    }

    for flat in 0..assignment.len() {
        if assignment[flat] != 0 {
            assignment[flat] = find_root(&mut parents, assignment[flat]);
        }
    }
}

#[inline]
fn resolved(assignment: &[u32], parents: &mut [u32], flat: usize) -> u32 {
    let id = assignment[flat];
    if id == 0 {
        0
    } else {
        find_root(parents, id)
    }
}
