//! ClumpFind: contour-descent flood-fill segmentation.
//!
//! A descending sequence of intensity levels is laid from the grid maximum
//! down to the significance floor, spaced by `delta_rms * RMS`. At each level
//! the pixels at or above it are grouped into connected components. A
//! component that overlaps exactly one clump surviving from the level above
//! extends that clump; a component with no predecessor starts a new clump (a
//! new local peak has emerged); a component spanning several predecessors is
//! a merge region - its unclaimed pixels go to the predecessor with the
//! higher original peak, and an erosion pass clears ambiguous
//! shared-boundary pixels from both sides so neither clump claims them at a
//! deeper level.
//!
//! The level-set approach is robust to irregular clump shapes but sensitive
//! to the step size: smaller `delta_rms` deblends finer structure at higher
//! cost.

use tracing::debug;

use crate::config::{ClumpFindConfig, ExtractConfig};
use crate::grid::WorkGrid;
use crate::noise::NoiseField;

use super::{above_floor, floor_at, RawSegmentation};

pub(crate) fn run(
    work: &WorkGrid,
    noise: &NoiseField,
    config: &ClumpFindConfig,
    common: &ExtractConfig,
) -> RawSegmentation {
    let len = work.geom.len();
    let mut assignment = vec![0u32; len];

    // Level sequence spans the candidate pixels only.
    let mut grid_max = f64::NEG_INFINITY;
    let mut floor_min = f64::INFINITY;
    let mut any_candidate = false;
    for flat in 0..len {
        if above_floor(work, noise, common.noise_level, flat) {
            any_candidate = true;
            grid_max = grid_max.max(work.values[flat]);
            floor_min = floor_min.min(floor_at(noise, common.noise_level, flat));
        }
    }
    if !any_candidate {
        return RawSegmentation::segmentation(assignment, true);
    }

    let delta = config.delta_rms * noise.mean_rms(len);
    let mut levels = Vec::new();
    let mut level = grid_max;
    while level > floor_min {
        levels.push(level);
        level -= delta;
    }
    // The floor contour is always scanned so faint wings are claimed.
    levels.push(floor_min);

    let mut clump_peaks: Vec<f64> = Vec::new();
    let mut blocked = vec![false; len];

    // Per-level scratch: component membership stamp and BFS stack.
    let mut stamp = vec![0u32; len];
    let mut stack: Vec<usize> = Vec::new();
    let mut neighbors: Vec<usize> = Vec::new();
    let mut component: Vec<usize> = Vec::new();

    for (level_idx, &level) in levels.iter().enumerate() {
        let this_stamp = level_idx as u32 + 1;

        for seed in 0..len {
            if stamp[seed] == this_stamp
                || blocked[seed]
                || !above_floor(work, noise, common.noise_level, seed)
                || work.values[seed] < level
            {
                continue;
            }

            // Flood-fill one connected component at this level.
            component.clear();
            stack.clear();
            stack.push(seed);
            stamp[seed] = this_stamp;
            while let Some(flat) = stack.pop() {
                component.push(flat);
                work.geom
                    .neighbors_into(flat, common.connectivity, &mut neighbors);
                for &next in &neighbors {
                    if stamp[next] != this_stamp
                        && !blocked[next]
                        && above_floor(work, noise, common.noise_level, next)
                        && work.values[next] >= level
                    {
                        stamp[next] = this_stamp;
                        stack.push(next);
                    }
                }
            }

            // Which clumps from shallower levels does this component touch?
            let mut predecessors: Vec<u32> = component
                .iter()
                .map(|&flat| assignment[flat])
                .filter(|&id| id != 0)
                .collect();
            predecessors.sort_unstable();
            predecessors.dedup();

            match predecessors.len() {
                0 => {
                    // A new local peak has emerged.
                    let peak = component
                        .iter()
                        .map(|&flat| work.values[flat])
                        .fold(f64::NEG_INFINITY, f64::max);
                    clump_peaks.push(peak);
                    let id = clump_peaks.len() as u32;
                    for &flat in &component {
                        assignment[flat] = id;
                    }
                }
                1 => {
                    let id = predecessors[0];
                    for &flat in &component {
                        if assignment[flat] == 0 {
                            assignment[flat] = id;
                        }
                    }
                }
                _ => {
                    // Merge region: unclaimed pixels go to the predecessor
                    // with the higher original peak (smaller id on ties).
                    let winner = predecessors
                        .iter()
                        .copied()
                        .max_by(|&a, &b| {
                            clump_peaks[a as usize - 1]
                                .partial_cmp(&clump_peaks[b as usize - 1])
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then(b.cmp(&a))
                        })
                        .unwrap_or(predecessors[0]);
                    for &flat in &component {
                        if assignment[flat] == 0 {
                            assignment[flat] = winner;
                        }
                    }
                    erode_shared_boundaries(
                        work,
                        common,
                        &component,
                        &mut assignment,
                        &mut blocked,
                    );
                }
            }
        }
    }

    debug!(
        backend = "clumpfind",
        levels = levels.len(),
        raw_clumps = clump_peaks.len(),
        "contour descent finished"
    );

    RawSegmentation::segmentation(assignment, true)
}

/// Clear pixels in a merge component that touch more than one clump, and
/// block them from being reclaimed at deeper levels.
fn erode_shared_boundaries(
    work: &WorkGrid,
    common: &ExtractConfig,
    component: &[usize],
    assignment: &mut [u32],
    blocked: &mut [bool],
) {
    let mut neighbors = Vec::new();
    let mut eroded = Vec::new();
    for &flat in component {
        let id = assignment[flat];
        if id == 0 {
            continue;
        }
        work.geom
            .neighbors_into(flat, common.connectivity, &mut neighbors);
        if neighbors
            .iter()
            .any(|&n| assignment[n] != 0 && assignment[n] != id)
        {
            eroded.push(flat);
        }
    }
    for flat in eroded {
        assignment[flat] = 0;
        blocked[flat] = true;
    }
}
