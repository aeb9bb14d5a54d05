#![no_main]

use libfuzzer_sys::fuzz_target;
use pf_grid::{GridGeometry, Interpolator, gradient_x, laplacian, resample};
use pf_types::{GridResolution, InterpolationMethod};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let method = match selector % 3 {
        0 => InterpolationMethod::Linear,
        1 => InterpolationMethod::Nearest,
        _ => InterpolationMethod::InverseDistance,
    };
    let triples: Vec<[f64; 3]> = rest
        .chunks_exact(24)
        .take(64)
        .map(|chunk| {
            let mut out = [0.0; 3];
            for (slot, bytes) in out.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                *slot = f64::from_le_bytes(raw);
            }
            out
        })
        .collect();
    let xs: Vec<f64> = triples.iter().map(|t| t[0]).collect();
    let ys: Vec<f64> = triples.iter().map(|t| t[1]).collect();
    let values: Vec<f64> = triples.iter().map(|t| t[2]).collect();

    let Ok(resolution) = GridResolution::new(6, 5) else {
        return;
    };
    let Ok(geometry) = GridGeometry::from_points(&xs, &ys, resolution) else {
        return;
    };
    let Ok(interpolator) = Interpolator::new(&xs, &ys, geometry, method) else {
        return;
    };
    let grid = interpolator.interpolate(&values).expect("lengths match");
    assert_eq!(grid.values().len(), 30);
    let _ = gradient_x(&grid);
    let _ = laplacian(&grid);
    let back = resample(&grid, &xs, &ys, method).expect("lengths match");
    assert_eq!(back.len(), xs.len());
});
