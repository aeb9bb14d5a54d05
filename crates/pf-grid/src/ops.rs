use pf_types::InterpolationMethod;

use crate::geometry::GridField;
use crate::GridError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Second-order central differences inside, first-order one-sided at the
/// edges. A zero spacing yields an all-NaN result.
fn gradient(field: &GridField, axis: Axis) -> GridField {
    let geometry = *field.geometry();
    let (step, len) = match axis {
        Axis::X => (geometry.dx, geometry.cols),
        Axis::Y => (geometry.dy, geometry.rows),
    };
    if step == 0.0 || !step.is_finite() {
        return GridField::filled(geometry, field.method(), f64::NAN);
    }

    let values = field.values();
    let at = |row: usize, col: usize| values[geometry.index(row, col)];
    let mut out = Vec::with_capacity(values.len());
    for row in 0..geometry.rows {
        for col in 0..geometry.cols {
            let k = match axis {
                Axis::X => col,
                Axis::Y => row,
            };
            let sample = |offset: usize| match axis {
                Axis::X => at(row, offset),
                Axis::Y => at(offset, col),
            };
            let d = if k == 0 {
                (sample(1) - sample(0)) / step
            } else if k + 1 == len {
                (sample(k) - sample(k - 1)) / step
            } else {
                (sample(k + 1) - sample(k - 1)) / (2.0 * step)
            };
            out.push(d);
        }
    }
    GridField::from_parts(geometry, field.method(), out)
}

#[must_use]
pub fn gradient_x(field: &GridField) -> GridField {
    gradient(field, Axis::X)
}

#[must_use]
pub fn gradient_y(field: &GridField) -> GridField {
    gradient(field, Axis::Y)
}

/// ∂u/∂x + ∂v/∂y.
pub fn divergence(u: &GridField, v: &GridField) -> Result<GridField, GridError> {
    u.geometry().ensure_same(v.geometry())?;
    gradient_x(u).zip_map(&gradient_y(v), |du, dv| du + dv)
}

/// ∂v/∂x − ∂u/∂y.
pub fn curl2d(u: &GridField, v: &GridField) -> Result<GridField, GridError> {
    u.geometry().ensure_same(v.geometry())?;
    gradient_x(v).zip_map(&gradient_y(u), |dv, du| dv - du)
}

/// Gradient of the gradient along each axis, summed.
pub fn laplacian(field: &GridField) -> Result<GridField, GridError> {
    let xx = gradient_x(&gradient_x(field));
    let yy = gradient_y(&gradient_y(field));
    xx.zip_map(&yy, |a, b| a + b)
}

/// Sample `grid` at arbitrary points. Bilinear for linear and
/// inverse-distance grids, nearest node for nearest grids. Points with a NaN
/// coordinate or outside the grid extent read NaN.
pub fn resample(
    grid: &GridField,
    xs: &[f64],
    ys: &[f64],
    method: InterpolationMethod,
) -> Result<Vec<f64>, GridError> {
    if xs.len() != ys.len() {
        return Err(GridError::LengthMismatch {
            expected: xs.len(),
            found: ys.len(),
        });
    }
    let geometry = grid.geometry();
    let values = grid.values();

    Ok(xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let (Some(fx), Some(fy)) = (
                fractional(x, geometry.x0, geometry.dx, geometry.cols),
                fractional(y, geometry.y0, geometry.dy, geometry.rows),
            ) else {
                return f64::NAN;
            };
            match method {
                InterpolationMethod::Nearest => {
                    let col = (fx.round() as usize).min(geometry.cols - 1);
                    let row = (fy.round() as usize).min(geometry.rows - 1);
                    values[geometry.index(row, col)]
                }
                InterpolationMethod::Linear | InterpolationMethod::InverseDistance => {
                    bilinear(values, geometry.cols, geometry.rows, fx, fy)
                }
            }
        })
        .collect())
}

// Fractional node index along one axis, `None` outside the extent.
fn fractional(coord: f64, origin: f64, step: f64, count: usize) -> Option<f64> {
    if coord.is_nan() {
        return None;
    }
    if step == 0.0 {
        return (coord == origin).then_some(0.0);
    }
    let f = (coord - origin) / step;
    let last = (count - 1) as f64;
    let slack = 1e-9 * last.max(1.0);
    if f < -slack || f > last + slack {
        None
    } else {
        Some(f.clamp(0.0, last))
    }
}

// Zero-weight corners are skipped so a NaN neighbour does not leak into a
// sample that sits exactly on a node or edge.
fn bilinear(values: &[f64], cols: usize, rows: usize, fx: f64, fy: f64) -> f64 {
    let j0 = (fx.floor() as usize).min(cols.saturating_sub(2));
    let i0 = (fy.floor() as usize).min(rows.saturating_sub(2));
    let tx = fx - j0 as f64;
    let ty = fy - i0 as f64;

    let corners = [
        (i0, j0, (1.0 - tx) * (1.0 - ty)),
        (i0, j0 + 1, tx * (1.0 - ty)),
        (i0 + 1, j0, (1.0 - tx) * ty),
        (i0 + 1, j0 + 1, tx * ty),
    ];
    corners
        .iter()
        .filter(|(_, _, weight)| *weight != 0.0)
        .map(|(i, j, weight)| values[i * cols + j] * weight)
        .sum()
}

#[cfg(test)]
mod tests {
    use pf_types::{GridResolution, InterpolationMethod};

    use super::{curl2d, divergence, gradient_x, gradient_y, laplacian, resample};
    use crate::geometry::{GridField, GridGeometry};

    fn square(n: usize, extent: f64) -> GridGeometry {
        GridGeometry::new(
            (-extent, extent),
            (-extent, extent),
            GridResolution::new(n, n).expect("res"),
        )
        .expect("geometry")
    }

    fn sampled(geometry: GridGeometry, f: impl Fn(f64, f64) -> f64) -> GridField {
        let mut values = Vec::new();
        for row in 0..geometry.rows {
            for col in 0..geometry.cols {
                values.push(f(geometry.x_at(col), geometry.y_at(row)));
            }
        }
        GridField::new(geometry, InterpolationMethod::Linear, values).expect("field")
    }

    #[test]
    fn gradient_of_linear_field_is_constant() {
        let geometry = square(7, 3.0);
        let field = sampled(geometry, |x, y| 2.0 * x - 0.5 * y);
        for value in gradient_x(&field).values() {
            assert!((value - 2.0).abs() < 1e-12);
        }
        for value in gradient_y(&field).values() {
            assert!((value + 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn rotation_has_no_divergence_and_unit_vorticity() {
        let geometry = square(11, 1.0);
        let u = sampled(geometry, |_, y| -y);
        let v = sampled(geometry, |x, _| x);
        let div = divergence(&u, &v).expect("div");
        let curl = curl2d(&u, &v).expect("curl");
        for row in 1..10 {
            for col in 1..10 {
                assert!(div.get(row, col).expect("node").abs() < 1e-12);
                assert!((curl.get(row, col).expect("node") - 2.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn laplacian_of_paraboloid_is_four_inside() {
        let geometry = square(21, 2.0);
        let field = sampled(geometry, |x, y| x * x + y * y);
        let lap = laplacian(&field).expect("laplacian");
        // Interior nodes two steps from the edge see pure central differences.
        for row in 2..19 {
            for col in 2..19 {
                assert!((lap.get(row, col).expect("node") - 4.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn zero_spacing_gives_nan_gradient() {
        let geometry =
            GridGeometry::new((1.0, 1.0), (0.0, 1.0), GridResolution::new(3, 3).expect("res"))
                .expect("geometry");
        let field = GridField::filled(geometry, InterpolationMethod::Linear, 1.0);
        assert!(gradient_x(&field).values().iter().all(|v| v.is_nan()));
        assert!(gradient_y(&field).values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn resample_reads_bilinear_and_rejects_outside_points() {
        let geometry = square(3, 1.0);
        let field = sampled(geometry, |x, y| x + 10.0 * y);
        let out = resample(
            &field,
            &[0.5, 1.0, 2.0, f64::NAN],
            &[0.25, -1.0, 0.0, 0.0],
            InterpolationMethod::Linear,
        )
        .expect("resample");
        assert!((out[0] - 3.0).abs() < 1e-12);
        assert!((out[1] + 9.0).abs() < 1e-12);
        assert!(out[2].is_nan());
        assert!(out[3].is_nan());
    }

    #[test]
    fn nearest_resample_snaps_to_node() {
        let geometry = square(3, 1.0);
        let field = sampled(geometry, |x, y| x + 10.0 * y);
        let out = resample(&field, &[0.4], &[0.6], InterpolationMethod::Nearest).expect("resample");
        assert_eq!(out, vec![10.0]);
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let u = GridField::filled(square(3, 1.0), InterpolationMethod::Linear, 0.0);
        let v = GridField::filled(square(4, 1.0), InterpolationMethod::Linear, 0.0);
        assert!(divergence(&u, &v).is_err());
        assert!(curl2d(&u, &v).is_err());
    }
}
