//! Reinhold: scan-line peak detection with face linking and region growing.
//!
//! The grid is treated as a bundle of 1-D lines along one scan axis. Each
//! line is searched for local maxima above the significance floor; maxima on
//! neighboring lines that sit within one pixel of each other along the scan
//! axis and agree in value within a tolerance are linked into "faces" -
//! connected sheets of peak points tracing the crests of extended structure.
//! Faces then seed flood fills over the unassigned above-floor pixels, in
//! descending order of their strongest point, so brighter structure claims
//! contested territory first.
//!
//! Scan-line detection is cheap but jagged at clump boundaries, so the raw
//! ownership map is finished with a configurable number of majority-vote
//! cellular-automata smoothing rounds.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{ExtractConfig, ReinholdConfig};
use crate::grid::{Connectivity, WorkGrid};
use crate::noise::NoiseField;

use super::{above_floor, find_root, union_labels, RawSegmentation};

pub(crate) fn run(
    work: &WorkGrid,
    noise: &NoiseField,
    config: &ReinholdConfig,
    common: &ExtractConfig,
) -> RawSegmentation {
    let geom = &work.geom;
    let len = geom.len();
    let ndim = geom.ndim();
    let scan_axis = config.scan_axis.unwrap_or(0);

    // Pass 1: local maxima along the scan axis, one candidate per plateau.
    let mut candidates: Vec<usize> = Vec::new();
    // Per-pixel candidate index + 1; 0 = not a candidate.
    let mut candidate_at = vec![0u32; len];
    let mut coords = vec![0usize; ndim];
    for flat in 0..len {
        if !above_floor(work, noise, common.noise_level, flat) {
            continue;
        }
        geom.coords_into(flat, &mut coords);
        let v = work.values[flat];
        let before = line_value(work, &coords, scan_axis, -1);
        let after = line_value(work, &coords, scan_axis, 1);
        if v > before && v >= after {
            candidate_at[flat] = candidates.len() as u32 + 1;
            candidates.push(flat);
        }
    }

    if candidates.is_empty() {
        return RawSegmentation::segmentation(vec![0u32; len], true);
    }

    // Pass 2: link candidates on neighboring lines into faces. Two candidates
    // join when their lines are face-adjacent, their scan positions differ by
    // at most one pixel and their values agree within the tolerance.
    let mut parents: Vec<u32> = (0..candidates.len() as u32).collect();
    for (index, &flat) in candidates.iter().enumerate() {
        geom.coords_into(flat, &mut coords);
        let tolerance = config.value_tolerance_rms * noise.rms_at(flat);
        for axis in 0..ndim {
            if axis == scan_axis {
                continue;
            }
            for line_step in [-1i64, 1] {
                for scan_step in [-1i64, 0, 1] {
                    let Some(other) =
                        offset_flat(geom, &coords, axis, line_step, scan_axis, scan_step)
                    else {
                        continue;
                    };
                    let other_index = candidate_at[other];
                    if other_index == 0 {
                        continue;
                    }
                    if (work.values[flat] - work.values[other]).abs() <= tolerance {
                        union_labels(&mut parents, index as u32, other_index - 1);
                    }
                }
            }
        }
    }

    // Group candidates into faces and rank faces by their strongest point.
    let mut faces: HashMap<u32, (f64, usize, Vec<usize>)> = HashMap::new();
    for (index, &flat) in candidates.iter().enumerate() {
        let root = find_root(&mut parents, index as u32);
        let entry = faces
            .entry(root)
            .or_insert((f64::NEG_INFINITY, usize::MAX, Vec::new()));
        entry.0 = entry.0.max(work.values[flat]);
        entry.1 = entry.1.min(flat);
        entry.2.push(flat);
    }
    let mut ranked: Vec<(f64, usize, Vec<usize>)> = faces.into_values().collect();
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    // Pass 3: faces claim the above-floor terrain around them, brightest
    // first. A face whose seeds were all swallowed by an earlier fill does
    // not start a clump.
    let mut assignment = vec![0u32; len];
    let mut next_id = 0u32;
    let mut stack: Vec<usize> = Vec::new();
    let mut neighbors: Vec<usize> = Vec::new();
    for (_, _, seeds) in &ranked {
        stack.clear();
        let mut id = 0u32;
        for &seed in seeds {
            if assignment[seed] == 0 {
                if id == 0 {
                    next_id += 1;
                    id = next_id;
                }
                assignment[seed] = id;
                stack.push(seed);
            }
        }
        while let Some(flat) = stack.pop() {
            geom.neighbors_into(flat, common.connectivity, &mut neighbors);
            for &next in &neighbors {
                if assignment[next] == 0 && above_floor(work, noise, common.noise_level, next) {
                    assignment[next] = id;
                    stack.push(next);
                }
            }
        }
    }

    ca_smooth(work, noise, common, config.ca_iterations, &mut assignment);

    debug!(
        backend = "reinhold",
        candidates = candidates.len(),
        faces = ranked.len(),
        clumps = next_id,
        "face growing finished"
    );

    RawSegmentation::segmentation(assignment, true)
}

/// Value one step away along the scan axis; bad or out-of-bounds pixels read
/// as negative infinity so line endpoints can still be maxima.
fn line_value(work: &WorkGrid, coords: &[usize], scan_axis: usize, step: i64) -> f64 {
    let position = coords[scan_axis] as i64 + step;
    if position < 0 || position >= work.geom.shape()[scan_axis] as i64 {
        return f64::NEG_INFINITY;
    }
    let mut shifted = coords.to_vec();
    shifted[scan_axis] = position as usize;
    let v = work.values[work.geom.flat_of(&shifted)];
    if v.is_finite() {
        v
    } else {
        f64::NEG_INFINITY
    }
}

/// Flat index offset by `line_step` along `line_axis` and `scan_step` along
/// `scan_axis`; `None` when it falls outside the grid.
fn offset_flat(
    geom: &crate::grid::Geometry,
    coords: &[usize],
    line_axis: usize,
    line_step: i64,
    scan_axis: usize,
    scan_step: i64,
) -> Option<usize> {
    let line_position = coords[line_axis] as i64 + line_step;
    let scan_position = coords[scan_axis] as i64 + scan_step;
    if line_position < 0
        || line_position >= geom.shape()[line_axis] as i64
        || scan_position < 0
        || scan_position >= geom.shape()[scan_axis] as i64
    {
        return None;
    }
    let mut shifted = coords.to_vec();
    shifted[line_axis] = line_position as usize;
    shifted[scan_axis] = scan_position as usize;
    Some(geom.flat_of(&shifted))
}

/// Majority-vote cellular-automata cleanup of the raw ownership map.
///
/// Each round replaces every pixel's id with the most common id in its
/// vertex neighborhood (self included); ties that include the current id
/// keep it, other ties go to the smallest id. Pixels below the significance
/// floor are forced to background. Rounds are double-buffered so votes
/// within a round never see partial updates.
fn ca_smooth(
    work: &WorkGrid,
    noise: &NoiseField,
    common: &ExtractConfig,
    iterations: usize,
    assignment: &mut Vec<u32>,
) {
    if iterations == 0 {
        return;
    }
    let geom = &work.geom;
    let mut neighbors: Vec<usize> = Vec::new();
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for _ in 0..iterations {
        let current = assignment.clone();
        for flat in 0..current.len() {
            if !above_floor(work, noise, common.noise_level, flat) {
                assignment[flat] = 0;
                continue;
            }
            counts.clear();
            counts.push((current[flat], 1));
            geom.neighbors_into(flat, Connectivity::Vertex, &mut neighbors);
            for &next in &neighbors {
                let id = current[next];
                match counts.iter_mut().find(|(known, _)| *known == id) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((id, 1)),
                }
            }
            let best = counts.iter().map(|&(_, n)| n).max().unwrap_or(0);
            let keep_current = counts
                .iter()
                .any(|&(id, n)| n == best && id == current[flat]);
            if !keep_current {
                assignment[flat] = counts
                    .iter()
                    .filter(|&&(_, n)| n == best)
                    .map(|&(id, _)| id)
                    .min()
                    .unwrap_or(0);
            }
        }
    }
}
