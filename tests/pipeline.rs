//! End-to-end extraction scenarios across all four backends.

use approx::assert_relative_eq;
use ndarray::{ArrayD, IxDyn};

use clumpfield::{
    extract, synth, Backend, CatalogWarning, ClumpFindConfig, ExtractConfig, FellWalkerConfig,
    GaussClumpsConfig, GaussianModel, Grid, NoiseModel, ReinholdConfig,
};

fn all_backends() -> Vec<Backend> {
    vec![
        Backend::ClumpFind(ClumpFindConfig::default()),
        Backend::FellWalker(FellWalkerConfig::default()),
        Backend::GaussClumps(GaussClumpsConfig::default()),
        Backend::Reinhold(ReinholdConfig::default()),
    ]
}

fn segmentation_backends() -> Vec<Backend> {
    vec![
        Backend::ClumpFind(ClumpFindConfig::default()),
        Backend::FellWalker(FellWalkerConfig::default()),
        Backend::Reinhold(ReinholdConfig::default()),
    ]
}

/// Two well-separated bumps on a noisy 2-D field.
fn two_bump_scene(noise_rms: f64, seed: u64) -> Grid {
    let mut data = synth::gaussian_field(
        &[32, 32],
        &[
            GaussianModel {
                amplitude: 10.0,
                center: vec![8.0, 8.0],
                sigma: vec![2.0, 2.0],
                background: 0.0,
            },
            GaussianModel {
                amplitude: 10.0,
                center: vec![24.0, 24.0],
                sigma: vec![2.0, 2.0],
                background: 0.0,
            },
        ],
    );
    if noise_rms > 0.0 {
        synth::add_noise(&mut data, noise_rms, seed);
    }
    Grid::new(data)
}

#[test]
fn test_fellwalker_reference_scenario_1d() {
    let data = ArrayD::from_shape_vec(
        IxDyn(&[9]),
        vec![0.0, 0.0, 1.0, 5.0, 9.0, 5.0, 1.0, 0.0, 0.0],
    )
    .unwrap();
    let catalog = extract(
        &Grid::new(data),
        &NoiseModel::Global(1.0),
        &Backend::FellWalker(FellWalkerConfig::default()),
        &ExtractConfig::default(),
    )
    .unwrap();

    assert_eq!(catalog.len(), 1);
    let expected: Vec<u32> = vec![0, 0, 0, 1, 1, 1, 0, 0, 0];
    let owned: Vec<u32> = catalog.ownership.iter().copied().collect();
    assert_eq!(owned, expected);
    assert_relative_eq!(catalog.clumps[0].peak_value, 9.0);
    assert_eq!(catalog.clumps[0].peak_index, vec![4]);
}

#[test]
fn test_gaussclumps_recovers_two_bumps() {
    let grid = two_bump_scene(0.01, 11);
    // The declared RMS sits above the injected noise so no stray background
    // pixel clears the significance floor.
    let catalog = extract(
        &grid,
        &NoiseModel::Global(0.02),
        &Backend::GaussClumps(GaussClumpsConfig::default()),
        &ExtractConfig::default(),
    )
    .unwrap();

    assert_eq!(catalog.len(), 2);
    for clump in &catalog.clumps {
        let model = clump.model.as_ref().expect("model-based clump");
        let near_first =
            (model.center[0] - 8.0).abs() < 1.0 && (model.center[1] - 8.0).abs() < 1.0;
        let near_second =
            (model.center[0] - 24.0).abs() < 1.0 && (model.center[1] - 24.0).abs() < 1.0;
        assert!(near_first || near_second, "center off both bumps: {model:?}");
        for axis in 0..2 {
            assert!(
                (model.sigma[axis] - 2.0).abs() / 2.0 < 0.05,
                "sigma off by more than 5%: {model:?}"
            );
        }
        assert!((model.amplitude - 10.0).abs() < 0.5);
    }
}

#[test]
fn test_segmentation_backends_find_both_bumps() {
    let grid = two_bump_scene(0.1, 3);
    for backend in segmentation_backends() {
        let catalog = extract(
            &grid,
            &NoiseModel::Global(0.1),
            &backend,
            &ExtractConfig::default(),
        )
        .unwrap();
        assert_eq!(catalog.len(), 2, "backend {}", backend.name());
        // Brighter-or-equal peaks come first; both peak pixels sit near the
        // injected centers.
        for clump in &catalog.clumps {
            let near_first = clump.peak_index[0].abs_diff(8) <= 1
                && clump.peak_index[1].abs_diff(8) <= 1;
            let near_second = clump.peak_index[0].abs_diff(24) <= 1
                && clump.peak_index[1].abs_diff(24) <= 1;
            assert!(near_first || near_second, "backend {}", backend.name());
        }
    }
}

#[test]
fn test_ownership_ids_are_closed_over_catalog() {
    let grid = two_bump_scene(0.1, 5);
    for backend in all_backends() {
        let catalog = extract(
            &grid,
            &NoiseModel::Global(0.1),
            &backend,
            &ExtractConfig::default(),
        )
        .unwrap();
        for &id in catalog.ownership.iter() {
            if id != 0 {
                assert!(
                    catalog.get(id).is_some(),
                    "dangling ownership id {id} from {}",
                    backend.name()
                );
            }
        }
        // Fraction lists only reference cataloged components.
        for fraction in &catalog.fractions {
            assert!(fraction.weights.len() >= 2);
            for &(id, _) in &fraction.weights {
                assert!(catalog.get(id).is_some());
            }
            let total: f64 = fraction.weights.iter().map(|(_, w)| w).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_min_pixels_invariant_after_pruning() {
    let grid = two_bump_scene(0.2, 9);
    let config = ExtractConfig {
        min_pixels: Some(12),
        ..Default::default()
    };
    for backend in segmentation_backends() {
        let catalog = extract(&grid, &NoiseModel::Global(0.2), &backend, &config).unwrap();
        for clump in &catalog.clumps {
            assert!(
                clump.pixel_count >= 12,
                "undersized clump from {}",
                backend.name()
            );
        }
    }
}

#[test]
fn test_extraction_is_idempotent() {
    let grid = two_bump_scene(0.1, 21);
    for backend in all_backends() {
        let config = ExtractConfig::default();
        let noise = NoiseModel::Global(0.1);
        let first = extract(&grid, &noise, &backend, &config).unwrap();
        let second = extract(&grid, &noise, &backend, &config).unwrap();
        assert_eq!(first, second, "backend {}", backend.name());
    }
}

#[test]
fn test_raising_noise_level_never_grows_coverage() {
    let grid = two_bump_scene(0.5, 13);
    for backend in segmentation_backends() {
        let low = extract(
            &grid,
            &NoiseModel::Global(0.5),
            &backend,
            &ExtractConfig {
                noise_level: 2.0,
                ..Default::default()
            },
        )
        .unwrap();
        let high = extract(
            &grid,
            &NoiseModel::Global(0.5),
            &backend,
            &ExtractConfig {
                noise_level: 5.0,
                ..Default::default()
            },
        )
        .unwrap();
        let covered = |catalog: &clumpfield::ClumpCatalog| {
            catalog.ownership.iter().filter(|&&id| id != 0).count()
        };
        assert!(
            covered(&high) <= covered(&low),
            "backend {}: {} > {}",
            backend.name(),
            covered(&high),
            covered(&low)
        );
        assert!(high.len() <= low.len(), "backend {}", backend.name());
    }
}

#[test]
fn test_gaussclumps_subtraction_reduces_residual() {
    let grid = two_bump_scene(0.01, 17);
    let noise = NoiseModel::Global(0.02);
    let config = ExtractConfig::default();
    let catalog = extract(
        &grid,
        &noise,
        &Backend::GaussClumps(GaussClumpsConfig::default()),
        &config,
    )
    .unwrap();
    assert!(!catalog.is_empty());

    // Reconstruct the residual from the fitted components: its energy over
    // the significant pixels must drop below the original's.
    let floor = config.noise_level * 0.02;
    let shape = grid.shape().to_vec();
    let mut original_norm = 0.0;
    let mut residual_norm = 0.0;
    for (flat, &v) in grid.data().iter().enumerate() {
        if v < floor {
            continue;
        }
        let row = flat / shape[1];
        let col = flat % shape[1];
        let position = [row as f64, col as f64];
        let modeled: f64 = catalog
            .clumps
            .iter()
            .filter_map(|c| c.model.as_ref())
            .map(|m| m.profile_at(&position))
            .sum();
        original_norm += v * v;
        let r = v - modeled;
        residual_norm += r * r;
    }
    assert!(residual_norm < original_norm);
}

#[test]
fn test_all_masked_grid_warns_for_every_backend() {
    let grid = Grid::new(ArrayD::from_elem(IxDyn(&[8, 8]), f64::NAN));
    for backend in all_backends() {
        let catalog = extract(
            &grid,
            &NoiseModel::Global(1.0),
            &backend,
            &ExtractConfig::default(),
        )
        .unwrap();
        assert!(catalog.is_empty(), "backend {}", backend.name());
        assert_eq!(catalog.warnings, vec![CatalogWarning::EmptyGrid]);
        assert!(catalog.ownership.iter().all(|&id| id == 0));
    }
}

#[test]
fn test_flat_grid_below_floor_is_clean_empty() {
    let grid = Grid::new(synth::constant(&[16, 16], 1.0));
    for backend in all_backends() {
        let catalog = extract(
            &grid,
            &NoiseModel::Global(1.0),
            &backend,
            &ExtractConfig::default(),
        )
        .unwrap();
        assert!(catalog.is_empty(), "backend {}", backend.name());
        assert!(catalog.warnings.is_empty(), "backend {}", backend.name());
    }
}

#[test]
fn test_explicit_mask_splits_structure() {
    // A masked column cuts one ridge into two clumps.
    let mut values = vec![0.0; 5 * 9];
    for col in 1..8 {
        values[9 + col] = 4.0;
        values[2 * 9 + col] = 8.0;
        values[3 * 9 + col] = 4.0;
    }
    let data = ArrayD::from_shape_vec(IxDyn(&[5, 9]), values).unwrap();
    let mut mask = ArrayD::from_elem(IxDyn(&[5, 9]), false);
    for row in 0..5 {
        mask[IxDyn(&[row, 4])] = true;
    }
    let grid = Grid::with_mask(data, mask).unwrap();
    let config = ExtractConfig {
        min_pixels: Some(3),
        ..Default::default()
    };
    let catalog = extract(
        &grid,
        &NoiseModel::Global(1.0),
        &Backend::FellWalker(FellWalkerConfig::default()),
        &config,
    )
    .unwrap();
    assert_eq!(catalog.len(), 2);
    // Nothing claims the masked column.
    for row in 0..5 {
        assert_eq!(catalog.ownership[IxDyn(&[row, 4])], 0);
    }
}
