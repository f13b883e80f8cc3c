//! The common extraction pipeline wrapped around the four backends.
//!
//! `extract` owns everything that is uniform across backends: input
//! validation, the working-copy conversion, dispatch, `min_pixels` pruning,
//! adjacency conflict resolution for the region-growing backends, dense
//! renumbering and the final catalog statistics. Backends only produce a raw
//! per-pixel assignment (plus models and fractional weights for the
//! model-based decomposition); they never see the caller's grid or build
//! catalog records themselves.
//!
//! Identifiers in the finished catalog are dense from 1 and ordered by
//! descending peak value, with ties broken by ascending centroid compared
//! lexicographically, so a given input always produces the identical catalog.

use std::collections::{HashMap, HashSet};

use ndarray::{ArrayD, IxDyn};
use tracing::info;

use crate::backends::{self, Backend, RawSegmentation};
use crate::catalog::{Clump, ClumpCatalog, GaussianModel, PixelFraction};
use crate::config::ExtractConfig;
use crate::error::{CatalogWarning, ExtractError};
use crate::grid::{Grid, WorkGrid};
use crate::noise::{NoiseField, NoiseModel};

/// Run one clump extraction over a grid.
///
/// # Arguments
/// * `grid` - the intensity data; bad pixels are excluded from all processing
/// * `noise` - global or per-pixel RMS, the unit of every significance test
/// * `backend` - which algorithm to run, with its configuration embedded
/// * `config` - thresholds and limits common to every backend
///
/// # Errors
/// Returns [`ExtractError::ConfigurationInvalid`] or
/// [`ExtractError::ShapeMismatch`] for structurally bad inputs. Degraded runs
/// (masked-out grids, diverging fits, exhausted caps) succeed and describe
/// themselves in [`ClumpCatalog::warnings`].
pub fn extract(
    grid: &Grid,
    noise: &NoiseModel,
    backend: &Backend,
    config: &ExtractConfig,
) -> Result<ClumpCatalog, ExtractError> {
    config.validate()?;
    if grid.ndim() == 0 {
        return Err(ExtractError::ConfigurationInvalid(
            "grid must have rank at least 1".into(),
        ));
    }
    backend.validate(grid.ndim())?;
    noise.validate(grid)?;

    let work = WorkGrid::from_grid(grid);
    if grid.is_empty() || work.all_bad() {
        return Ok(ClumpCatalog::empty(
            grid.shape(),
            vec![CatalogWarning::EmptyGrid],
        ));
    }

    info!(
        backend = backend.name(),
        shape = ?grid.shape(),
        "extraction started"
    );

    let field = NoiseField::from_model(noise);
    let mut raw = match backend {
        Backend::ClumpFind(cfg) => backends::clumpfind::run(&work, &field, cfg, config),
        Backend::FellWalker(cfg) => backends::fellwalker::run(&work, &field, cfg, config),
        Backend::GaussClumps(cfg) => backends::gaussclumps::run(&work, &field, cfg, config),
        Backend::Reinhold(cfg) => backends::reinhold::run(&work, &field, cfg, config),
    };

    let min_pixels = config.min_pixels_for(grid.ndim());
    prune_small(&mut raw, min_pixels);
    if raw.resolve_adjacency {
        resolve_adjacency(&mut raw.assignment, &work, &field, config);
        // Boundary reassignment can shrink a clump back below the floor.
        prune_small(&mut raw, min_pixels);
    }

    let catalog = assemble(grid, &work, raw, config);
    info!(
        clumps = catalog.len(),
        warnings = catalog.warnings.len(),
        "extraction finished"
    );
    Ok(catalog)
}

/// Highest id referenced anywhere in a raw segmentation. A component can be
/// absent from the ownership map yet still appear in fraction lists.
fn max_referenced_id(raw: &RawSegmentation) -> usize {
    let mut max_id = raw.id_count();
    for fraction in &raw.fractions {
        for &(id, _) in &fraction.weights {
            max_id = max_id.max(id as usize);
        }
    }
    max_id
}

/// Effective size per raw id: plain pixel counts, except that pixels shared
/// by overlapping components contribute their fractional weights instead.
fn effective_sizes(raw: &RawSegmentation) -> Vec<f64> {
    let n = max_referenced_id(raw);
    let mut sizes = vec![0.0f64; n];
    if raw.fractions.is_empty() {
        for &id in &raw.assignment {
            if id > 0 {
                sizes[id as usize - 1] += 1.0;
            }
        }
        return sizes;
    }
    let shared: HashMap<usize, &PixelFraction> =
        raw.fractions.iter().map(|f| (f.index, f)).collect();
    for (flat, &id) in raw.assignment.iter().enumerate() {
        if id == 0 {
            continue;
        }
        match shared.get(&flat) {
            Some(fraction) => {
                for &(fid, weight) in &fraction.weights {
                    sizes[fid as usize - 1] += weight;
                }
            }
            None => sizes[id as usize - 1] += 1.0,
        }
    }
    sizes
}

/// Zero out every clump whose effective size falls short of `min_pixels`.
fn prune_small(raw: &mut RawSegmentation, min_pixels: usize) {
    let sizes = effective_sizes(raw);
    if sizes.is_empty() {
        return;
    }
    let dead: Vec<bool> = sizes.iter().map(|&s| s < min_pixels as f64).collect();
    if !dead.iter().any(|&d| d) {
        return;
    }
    for id in raw.assignment.iter_mut() {
        if *id > 0 && dead[*id as usize - 1] {
            *id = 0;
        }
    }
    raw.fractions.retain_mut(|fraction| {
        fraction.weights.retain(|&(id, _)| !dead[id as usize - 1]);
        fraction.weights.len() >= 2
    });
}

/// Post-segmentation conflict resolution for backends whose regions can butt
/// directly against each other.
///
/// Adjacent clumps whose peaks are indistinguishable at the significance
/// threshold are merged; for pairs that stay distinct, each contested
/// boundary pixel moves to the side offering the steeper ascent from it.
fn resolve_adjacency(
    assignment: &mut [u32],
    work: &WorkGrid,
    noise: &NoiseField,
    config: &ExtractConfig,
) {
    let len = assignment.len();
    let max_id = assignment.iter().copied().max().unwrap_or(0);
    if max_id < 2 {
        return;
    }

    // Peak value per id.
    let mut peaks = vec![f64::NEG_INFINITY; max_id as usize + 1];
    for (flat, &id) in assignment.iter().enumerate() {
        if id > 0 {
            peaks[id as usize] = peaks[id as usize].max(work.values[flat]);
        }
    }

    // Adjacent pairs, normalized to (smaller, larger).
    let mut pairs: HashSet<(u32, u32)> = HashSet::new();
    let mut neighbors = Vec::new();
    for flat in 0..len {
        let a = assignment[flat];
        if a == 0 {
            continue;
        }
        work.geom
            .neighbors_into(flat, config.connectivity, &mut neighbors);
        for &next in &neighbors {
            let b = assignment[next];
            if b != 0 && b != a {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    if pairs.is_empty() {
        return;
    }

    // Merge indistinguishable neighbors.
    let threshold = config.noise_level * noise.mean_rms(len);
    let mut parents: Vec<u32> = (0..=max_id).collect();
    let mut ordered: Vec<(u32, u32)> = pairs.iter().copied().collect();
    ordered.sort_unstable();
    let mut merged = false;
    for (a, b) in ordered {
        if (peaks[a as usize] - peaks[b as usize]).abs() < threshold {
            backends::union_labels(&mut parents, a, b);
            merged = true;
        }
    }
    if merged {
        for id in assignment.iter_mut() {
            if *id > 0 {
                *id = backends::find_root(&mut parents, *id);
            }
        }
    }

    // Contested boundary pixels go to the steeper-gradient side. Double
    // buffered so each decision sees the pre-pass labeling.
    let before: Vec<u32> = assignment.to_vec();
    for flat in 0..len {
        let own = before[flat];
        if own == 0 {
            continue;
        }
        work.geom
            .neighbors_into(flat, config.connectivity, &mut neighbors);
        let contested = neighbors
            .iter()
            .any(|&n| before[n] != 0 && before[n] != own);
        if !contested {
            continue;
        }
        // Steepest ascent from this pixel per candidate side.
        let mut best_id = own;
        let mut best_rise = f64::NEG_INFINITY;
        for &next in &neighbors {
            let id = before[next];
            if id == 0 || !work.is_good(next) {
                continue;
            }
            let rise = work.values[next] - work.values[flat];
            if rise > best_rise || (rise == best_rise && id < best_id) {
                best_rise = rise;
                best_id = id;
            }
        }
        assignment[flat] = best_id;
    }
}

/// Per-id accumulator for the catalog statistics scan.
struct Accum {
    peak_value: f64,
    peak_flat: usize,
    count: usize,
    flux: f64,
    weighted: Vec<f64>,
    lo: Vec<usize>,
    hi: Vec<usize>,
}

impl Accum {
    fn new(ndim: usize) -> Self {
        Self {
            peak_value: f64::NEG_INFINITY,
            peak_flat: 0,
            count: 0,
            flux: 0.0,
            weighted: vec![0.0; ndim],
            lo: vec![usize::MAX; ndim],
            hi: vec![0; ndim],
        }
    }
}

/// Final renumbering and statistics pass: orders surviving clumps, rewrites
/// the ownership map and fraction list to the dense ids, and fills in the
/// per-clump summary records.
fn assemble(
    grid: &Grid,
    work: &WorkGrid,
    raw: RawSegmentation,
    config: &ExtractConfig,
) -> ClumpCatalog {
    let ndim = work.geom.ndim();
    let max_id = max_referenced_id(&raw);

    // One scan over the grid gathers every per-clump statistic.
    let mut accums: Vec<Accum> = (0..max_id).map(|_| Accum::new(ndim)).collect();
    let mut coords = vec![0usize; ndim];
    for (flat, &id) in raw.assignment.iter().enumerate() {
        if id == 0 {
            continue;
        }
        let accum = &mut accums[id as usize - 1];
        let v = work.values[flat];
        work.geom.coords_into(flat, &mut coords);
        if v > accum.peak_value {
            accum.peak_value = v;
            accum.peak_flat = flat;
        }
        accum.count += 1;
        accum.flux += v;
        for axis in 0..ndim {
            accum.weighted[axis] += v * coords[axis] as f64;
            accum.lo[axis] = accum.lo[axis].min(coords[axis]);
            accum.hi[axis] = accum.hi[axis].max(coords[axis]);
        }
    }

    // Build unordered records for the ids that still own pixels.
    struct Pending {
        old_id: u32,
        peak_value: f64,
        peak_index: Vec<usize>,
        centroid: Vec<f64>,
        bounds: Vec<(usize, usize)>,
        pixel_count: usize,
        flux: f64,
        model: Option<GaussianModel>,
    }
    let mut pending: Vec<Pending> = Vec::new();
    for (index, accum) in accums.iter().enumerate() {
        if accum.count == 0 {
            continue;
        }
        let old_id = index as u32 + 1;
        let model = raw.models.get(index).cloned();
        let peak_index = work.geom.coords_of(accum.peak_flat);
        let bounds: Vec<(usize, usize)> = (0..ndim)
            .map(|axis| (accum.lo[axis], accum.hi[axis]))
            .collect();
        let (peak_value, centroid, flux) = match &model {
            // Model-based clumps report the fitted shape, not the pixel sums.
            Some(m) => (
                m.amplitude + m.background,
                m.center.clone(),
                m.integrated_flux(),
            ),
            None => (
                accum.peak_value,
                accum
                    .weighted
                    .iter()
                    .map(|&w| if accum.flux != 0.0 { w / accum.flux } else { 0.0 })
                    .collect(),
                accum.flux,
            ),
        };
        pending.push(Pending {
            old_id,
            peak_value,
            peak_index,
            centroid,
            bounds,
            pixel_count: accum.count,
            flux,
            model,
        });
    }

    // Dense ids: descending peak value, ties by ascending centroid.
    pending.sort_by(|a, b| {
        b.peak_value
            .partial_cmp(&a.peak_value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                for (ca, cb) in a.centroid.iter().zip(&b.centroid) {
                    match ca.partial_cmp(cb) {
                        Some(std::cmp::Ordering::Equal) | None => continue,
                        Some(order) => return order,
                    }
                }
                std::cmp::Ordering::Equal
            })
    });
    if let Some(cap) = config.max_clumps {
        pending.truncate(cap);
    }

    let mut renumber = vec![0u32; max_id + 1];
    for (rank, entry) in pending.iter().enumerate() {
        renumber[entry.old_id as usize] = rank as u32 + 1;
    }

    let ownership_flat: Vec<u32> = raw
        .assignment
        .iter()
        .map(|&id| renumber[id as usize])
        .collect();
    let ownership = ArrayD::from_shape_vec(IxDyn(grid.shape()), ownership_flat)
        .unwrap_or_else(|_| ArrayD::zeros(IxDyn(grid.shape())));

    let mut fractions: Vec<PixelFraction> = Vec::new();
    for fraction in raw.fractions {
        let mut weights: Vec<(u32, f64)> = fraction
            .weights
            .iter()
            .filter_map(|&(id, w)| {
                let new_id = renumber[id as usize];
                (new_id > 0).then_some((new_id, w))
            })
            .collect();
        if weights.len() < 2 {
            continue;
        }
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            for entry in weights.iter_mut() {
                entry.1 /= total;
            }
        }
        weights.sort_by(|(ida, wa), (idb, wb)| {
            wb.partial_cmp(wa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ida.cmp(idb))
        });
        fractions.push(PixelFraction {
            index: fraction.index,
            weights,
        });
    }
    fractions.sort_by_key(|f| f.index);

    let clumps: Vec<Clump> = pending
        .into_iter()
        .enumerate()
        .map(|(rank, entry)| Clump {
            id: rank as u32 + 1,
            peak_value: entry.peak_value,
            peak_index: entry.peak_index,
            centroid: entry.centroid,
            bounds: entry.bounds,
            pixel_count: entry.pixel_count,
            flux: entry.flux,
            model: entry.model,
        })
        .collect();

    ClumpCatalog {
        clumps,
        ownership,
        fractions,
        warnings: raw.warnings,
    }
}
