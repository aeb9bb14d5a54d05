use pf_expr::ResolvedFormula;
use pf_grid::NearestIndex;
use pf_types::{FormulaScope, FrameId, OutputMode};
use tracing::{debug, warn};

use crate::engine::{ComputationCore, ensure_scope};
use crate::error::CoreError;

impl ComputationCore {
    /// Value of a row formula at the point nearest `(x, y)`, frame by frame.
    ///
    /// Frames with no point within `tolerance` of `(x, y)` are left out, so
    /// a location far from every point yields an empty series. Per-frame values
    /// go through the field cache like [`ComputationCore::evaluate`].
    pub fn timeseries_at(
        &self,
        resolved: &ResolvedFormula,
        (x, y): (f64, f64),
        tolerance: f64,
    ) -> Result<Vec<(FrameId, f64)>, CoreError> {
        if !x.is_finite() || !y.is_finite() || !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(CoreError::InvalidLocation { x, y, tolerance });
        }
        ensure_scope(resolved, FormulaScope::Row)?;
        let (x_column, y_column) = self.config.coordinates();

        let mut series = Vec::new();
        for id in self.data.frame_ids() {
            let frame = self.data.get_frame(id)?;
            let (xs, ys) = frame.coordinates(x_column, y_column)?;
            let (rows, points): (Vec<usize>, Vec<(f64, f64)>) = xs
                .values()
                .iter()
                .zip(ys.values())
                .enumerate()
                .filter(|(_, (px, py))| px.is_finite() && py.is_finite())
                .map(|(row, (px, py))| (row, (*px, *py)))
                .unzip();

            let index = NearestIndex::new(points);
            let Some(&(nearest, d2)) = index.k_nearest(x, y, 1, |_| true).first() else {
                continue;
            };
            if d2 > tolerance * tolerance {
                debug!(frame = %id, distance = d2.sqrt(), "no point within tolerance");
                continue;
            }
            let values = self.evaluate(resolved, id, OutputMode::Points)?;
            let value = values.values().get(rows[nearest]).copied().unwrap_or(f64::NAN);
            series.push((id, value));
        }
        if series.is_empty() {
            warn!(x, y, tolerance, "no point near the requested location in any frame");
        }
        Ok(series)
    }
}
