use pf_types::{GridResolution, InterpolationMethod};
use serde::{Deserialize, Serialize};

use crate::GridError;

/// Placement of a regular `rows x cols` lattice over the plane.
///
/// Nodes are stored row-major with rows running along y: node `(i, j)` sits
/// at `(x_at(j), y_at(i))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub dx: f64,
    pub dy: f64,
    pub cols: usize,
    pub rows: usize,
}

impl GridGeometry {
    pub fn new(
        (x0, x1): (f64, f64),
        (y0, y1): (f64, f64),
        resolution: GridResolution,
    ) -> Result<Self, GridError> {
        resolution.validate()?;
        let cols = resolution.cols;
        let rows = resolution.rows;
        Ok(Self {
            x0,
            y0,
            x1,
            y1,
            dx: (x1 - x0) / (cols - 1) as f64,
            dy: (y1 - y0) / (rows - 1) as f64,
            cols,
            rows,
        })
    }

    /// Bounding box of every point whose coordinates are both finite. With no
    /// such point the box collapses to the origin and the spacing is zero.
    pub fn from_points(xs: &[f64], ys: &[f64], resolution: GridResolution) -> Result<Self, GridError> {
        if xs.len() != ys.len() {
            return Err(GridError::LengthMismatch {
                expected: xs.len(),
                found: ys.len(),
            });
        }
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for (&x, &y) in xs.iter().zip(ys) {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, x, y, y),
                Some((xmin, xmax, ymin, ymax)) => (xmin.min(x), xmax.max(x), ymin.min(y), ymax.max(y)),
            });
        }
        let (xmin, xmax, ymin, ymax) = bounds.unwrap_or((0.0, 0.0, 0.0, 0.0));
        Self::new((xmin, xmax), (ymin, ymax), resolution)
    }

    #[must_use]
    pub fn resolution(&self) -> GridResolution {
        GridResolution {
            cols: self.cols,
            rows: self.rows,
        }
    }

    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.cols * self.rows
    }

    /// x of column `j`; the last column lands exactly on the upper bound.
    #[must_use]
    pub fn x_at(&self, j: usize) -> f64 {
        if j + 1 == self.cols {
            self.x1
        } else {
            self.x0 + j as f64 * self.dx
        }
    }

    #[must_use]
    pub fn y_at(&self, i: usize) -> f64 {
        if i + 1 == self.rows {
            self.y1
        } else {
            self.y0 + i as f64 * self.dy
        }
    }

    #[must_use]
    pub const fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    pub fn ensure_same(&self, other: &Self) -> Result<(), GridError> {
        if self == other {
            Ok(())
        } else {
            Err(GridError::GeometryMismatch {
                left: self.resolution(),
                right: other.resolution(),
            })
        }
    }
}

/// A scalar field sampled on a [`GridGeometry`]. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridField {
    geometry: GridGeometry,
    method: InterpolationMethod,
    values: Vec<f64>,
}

impl GridField {
    pub fn new(
        geometry: GridGeometry,
        method: InterpolationMethod,
        values: Vec<f64>,
    ) -> Result<Self, GridError> {
        if values.len() != geometry.node_count() {
            return Err(GridError::LengthMismatch {
                expected: geometry.node_count(),
                found: values.len(),
            });
        }
        Ok(Self {
            geometry,
            method,
            values,
        })
    }

    // Callers guarantee `values.len() == geometry.node_count()`.
    pub(crate) fn from_parts(
        geometry: GridGeometry,
        method: InterpolationMethod,
        values: Vec<f64>,
    ) -> Self {
        Self {
            geometry,
            method,
            values,
        }
    }

    #[must_use]
    pub fn filled(geometry: GridGeometry, method: InterpolationMethod, value: f64) -> Self {
        Self {
            geometry,
            method,
            values: vec![value; geometry.node_count()],
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.geometry.rows || col >= self.geometry.cols {
            return None;
        }
        self.values.get(self.geometry.index(row, col)).copied()
    }

    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            geometry: self.geometry,
            method: self.method,
            values: self.values.iter().map(|value| f(*value)).collect(),
        }
    }

    pub fn zip_map(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, GridError> {
        self.geometry.ensure_same(&other.geometry)?;
        Ok(Self {
            geometry: self.geometry,
            method: self.method,
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(left, right)| f(*left, *right))
                .collect(),
        })
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.values.len() * std::mem::size_of::<f64>()
    }
}
