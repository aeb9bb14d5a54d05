use std::collections::HashMap;

use pf_types::InterpolationMethod;
use tracing::{debug, warn};

use crate::delaunay::{Triangle, barycentric, triangulate};
use crate::geometry::{GridField, GridGeometry};
use crate::nearest::NearestIndex;
use crate::GridError;

/// Neighbours consulted by inverse-distance weighting.
pub const IDW_NEIGHBOURS: usize = 8;
pub const IDW_POWER: i32 = 2;

const COVER_TOLERANCE: f64 = 1e-9;

/// Vertices and weights of the triangle covering one grid node.
#[derive(Debug, Clone, Copy)]
struct Cover {
    vertices: [usize; 3],
    weights: [f64; 3],
}

/// Everything about a scattered-to-grid mapping that depends only on the
/// point positions, so one frame's geometry is prepared once and reused for
/// every value column interpolated onto it.
#[derive(Debug)]
pub struct Interpolator {
    geometry: GridGeometry,
    method: InterpolationMethod,
    source_len: usize,
    /// Original rows sharing each retained location, in input order.
    sources: Vec<Vec<usize>>,
    index: NearestIndex,
    covers: Option<Vec<Option<Cover>>>,
}

impl Interpolator {
    /// Points with a NaN coordinate are ignored. Coincident points share one
    /// location, which takes the first non-NaN value among them.
    pub fn new(
        xs: &[f64],
        ys: &[f64],
        geometry: GridGeometry,
        method: InterpolationMethod,
    ) -> Result<Self, GridError> {
        if xs.len() != ys.len() {
            return Err(GridError::LengthMismatch {
                expected: xs.len(),
                found: ys.len(),
            });
        }

        let mut seen: HashMap<(u64, u64), usize> = HashMap::new();
        let mut sources: Vec<Vec<usize>> = Vec::new();
        let mut points = Vec::new();
        for (row, (&x, &y)) in xs.iter().zip(ys).enumerate() {
            if x.is_nan() || y.is_nan() || x.is_infinite() || y.is_infinite() {
                continue;
            }
            // -0.0 and 0.0 are the same location.
            let location = ((x + 0.0).to_bits(), (y + 0.0).to_bits());
            match seen.get(&location) {
                Some(&idx) => sources[idx].push(row),
                None => {
                    seen.insert(location, points.len());
                    sources.push(vec![row]);
                    points.push((x, y));
                }
            }
        }

        let covers = if method == InterpolationMethod::Linear {
            Some(rasterize(&points, &triangulate(&points), &geometry))
        } else {
            None
        };
        debug!(
            points = points.len(),
            grid = %geometry.resolution(),
            ?method,
            "prepared interpolator"
        );

        Ok(Self {
            geometry,
            method,
            source_len: xs.len(),
            sources,
            index: NearestIndex::new(points),
            covers,
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Map per-point `values` (same order as the coordinates given to
    /// [`Interpolator::new`]) onto the grid.
    pub fn interpolate(&self, values: &[f64]) -> Result<GridField, GridError> {
        if values.len() != self.source_len {
            return Err(GridError::LengthMismatch {
                expected: self.source_len,
                found: values.len(),
            });
        }

        let sample: Vec<f64> = self
            .sources
            .iter()
            .map(|rows| {
                rows.iter()
                    .map(|row| values[*row])
                    .find(|value| !value.is_nan())
                    .unwrap_or(f64::NAN)
            })
            .collect();
        let usable = sample.iter().filter(|value| !value.is_nan()).count();
        if usable == 0 {
            return Ok(GridField::filled(self.geometry, self.method, f64::NAN));
        }

        let valid = |idx: usize| !sample[idx].is_nan();
        let nearest_at = |x: f64, y: f64| {
            self.index
                .nearest(x, y, valid)
                .map_or(f64::NAN, |idx| sample[idx])
        };

        let geometry = &self.geometry;
        let mut out = Vec::with_capacity(geometry.node_count());
        match (self.method, &self.covers) {
            (InterpolationMethod::Linear, Some(covers)) if usable >= 3 && has_cover(covers) => {
                let mut filled = 0_usize;
                for row in 0..geometry.rows {
                    for col in 0..geometry.cols {
                        let (x, y) = (geometry.x_at(col), geometry.y_at(row));
                        let linear = covers[geometry.index(row, col)].and_then(|cover| {
                            let vals = cover.vertices.map(|v| sample[v]);
                            if vals.iter().any(|value| value.is_nan()) {
                                return None;
                            }
                            Some(
                                vals.iter()
                                    .zip(cover.weights)
                                    .map(|(value, weight)| value * weight)
                                    .sum::<f64>(),
                            )
                        });
                        out.push(linear.unwrap_or_else(|| {
                            filled += 1;
                            nearest_at(x, y)
                        }));
                    }
                }
                if filled > 0 {
                    debug!(filled, "nearest fill for nodes outside the triangulation");
                }
            }
            (InterpolationMethod::InverseDistance, _) => {
                for row in 0..geometry.rows {
                    for col in 0..geometry.cols {
                        let (x, y) = (geometry.x_at(col), geometry.y_at(row));
                        let neighbours = self.index.k_nearest(x, y, IDW_NEIGHBOURS, valid);
                        out.push(inverse_distance(&neighbours, &sample));
                    }
                }
            }
            (method, _) => {
                if method == InterpolationMethod::Linear {
                    warn!(
                        usable,
                        "linear interpolation needs a non-degenerate triangulation; using nearest"
                    );
                }
                for row in 0..geometry.rows {
                    for col in 0..geometry.cols {
                        out.push(nearest_at(geometry.x_at(col), geometry.y_at(row)));
                    }
                }
            }
        }

        GridField::new(self.geometry, self.method, out)
    }
}

/// One-shot helper: prepare and interpolate a single value column.
pub fn interpolate(
    xs: &[f64],
    ys: &[f64],
    values: &[f64],
    geometry: GridGeometry,
    method: InterpolationMethod,
) -> Result<GridField, GridError> {
    Interpolator::new(xs, ys, geometry, method)?.interpolate(values)
}

fn has_cover(covers: &[Option<Cover>]) -> bool {
    covers.iter().any(Option::is_some)
}

fn inverse_distance(neighbours: &[(usize, f64)], sample: &[f64]) -> f64 {
    if let Some((idx, _)) = neighbours.iter().find(|(_, d2)| *d2 == 0.0) {
        return sample[*idx];
    }
    let (weighted, total) = neighbours
        .iter()
        .fold((0.0, 0.0), |(weighted, total), (idx, d2)| {
            let weight = 1.0 / d2.sqrt().powi(IDW_POWER);
            (weighted + weight * sample[*idx], total + weight)
        });
    if total == 0.0 { f64::NAN } else { weighted / total }
}

fn rasterize(
    points: &[(f64, f64)],
    triangles: &[Triangle],
    geometry: &GridGeometry,
) -> Vec<Option<Cover>> {
    let mut covers = vec![None; geometry.node_count()];
    if triangles.is_empty() {
        return covers;
    }

    let col_range = |lo: f64, hi: f64| axis_range(lo, hi, geometry.x0, geometry.dx, geometry.cols);
    let row_range = |lo: f64, hi: f64| axis_range(lo, hi, geometry.y0, geometry.dy, geometry.rows);

    for triangle in triangles {
        let [a, b, c] = triangle.0;
        let (pa, pb, pc) = (points[a], points[b], points[c]);
        let (Some(cols), Some(rows)) = (
            col_range(pa.0.min(pb.0).min(pc.0), pa.0.max(pb.0).max(pc.0)),
            row_range(pa.1.min(pb.1).min(pc.1), pa.1.max(pb.1).max(pc.1)),
        ) else {
            continue;
        };
        for row in rows.0..=rows.1 {
            for col in cols.0..=cols.1 {
                let node = geometry.index(row, col);
                if covers[node].is_some() {
                    continue;
                }
                let at = (geometry.x_at(col), geometry.y_at(row));
                let Some(weights) = barycentric(at, pa, pb, pc) else {
                    continue;
                };
                if weights.iter().all(|w| *w >= -COVER_TOLERANCE) {
                    covers[node] = Some(Cover {
                        vertices: [a, b, c],
                        weights,
                    });
                }
            }
        }
    }
    covers
}

/// Grid indices whose node coordinate may fall inside `[lo, hi]`, widened by
/// one node on each side to absorb rounding.
fn axis_range(lo: f64, hi: f64, origin: f64, step: f64, count: usize) -> Option<(usize, usize)> {
    if step == 0.0 {
        return Some((0, count - 1));
    }
    let first = ((lo - origin) / step).floor() - 1.0;
    let last = ((hi - origin) / step).ceil() + 1.0;
    if last < 0.0 || first > (count - 1) as f64 {
        return None;
    }
    Some((first.max(0.0) as usize, (last as usize).min(count - 1)))
}
