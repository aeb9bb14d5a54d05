#![forbid(unsafe_code)]

//! Scattered-sample gridding and finite-difference operators.
//!
//! Points are mapped onto a regular lattice spanning their bounding box,
//! differenced there, and optionally read back at the original positions.

mod delaunay;
mod geometry;
mod interpolate;
mod nearest;
mod ops;

use pf_types::{GridResolution, TypeError};
use thiserror::Error;

pub use delaunay::{Triangle, barycentric, triangulate};
pub use geometry::{GridField, GridGeometry};
pub use interpolate::{IDW_NEIGHBOURS, IDW_POWER, Interpolator, interpolate};
pub use nearest::NearestIndex;
pub use ops::{curl2d, divergence, gradient_x, gradient_y, laplacian, resample};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("grid geometries differ: {left} grid vs {right} grid")]
    GeometryMismatch {
        left: GridResolution,
        right: GridResolution,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[cfg(test)]
mod tests {
    use pf_types::{GridResolution, InterpolationMethod};

    use super::{GridGeometry, Interpolator, gradient_x, resample};

    // Scattered lattice -> grid -> derivative -> back to points.
    #[test]
    fn gradient_round_trip_on_linear_field() {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..8 {
            for j in 0..8 {
                xs.push(f64::from(j) * 0.5);
                ys.push(f64::from(i) * 0.25);
            }
        }
        let values: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        let geometry = GridGeometry::from_points(&xs, &ys, GridResolution::new(15, 15).expect("res"))
            .expect("geometry");
        let prepared =
            Interpolator::new(&xs, &ys, geometry, InterpolationMethod::Linear).expect("prepare");
        let grad = gradient_x(&prepared.interpolate(&values).expect("grid"));

        for row in 0..15 {
            for col in 1..14 {
                assert!((grad.get(row, col).expect("node") - 2.0).abs() < 1e-9);
            }
        }
        let back = resample(&grad, &xs, &ys, InterpolationMethod::Linear).expect("resample");
        assert_eq!(back.len(), xs.len());
        assert!(back.iter().all(|value| (value - 2.0).abs() < 1e-9));
    }
}
