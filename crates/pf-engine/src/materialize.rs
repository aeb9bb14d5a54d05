use std::collections::{BTreeMap, HashMap};
use std::ops::RangeBounds;
use std::sync::Arc;

use pf_columnar::{AggregateKind, Column};
use pf_expr::{EvalContext, Formula, ResolvedFormula};
use pf_frame::{ConstantStore, DataStore, Frame, StoreError};
use pf_types::{FormulaScope, FrameId, builtin_constant, validate_identifier};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::statistic_constant_name;
use crate::engine::ComputationCore;
use crate::error::CoreError;

const STATISTICS: [&str; 6] = ["mean", "sum", "min", "max", "std", "var"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub name: String,
    pub frames: usize,
    pub points: usize,
    /// Constant store version after `<name>_global_*` were published.
    pub statistics_version: Option<u64>,
}

impl ComputationCore {
    /// Evaluate a row formula on every frame and store the result as derived
    /// column `name`. Nothing is visible until every frame has been computed;
    /// a failed store write is rolled back. The field cache is not consulted.
    pub fn materialize(&self, formula: &Formula, name: &str) -> Result<MaterializeReport, CoreError> {
        let resolved = self.prepare_column(formula, name)?;
        let frames = self.frames()?;
        let columns = self.evaluate_frames(&resolved, &frames)?;
        self.persist(name, formula.text(), columns)
    }

    /// Reduce a row formula across the frames in `window` for each distinct
    /// point location and store the per-location result in every frame as
    /// column `name`. Pass `..` to reduce over the whole dataset. Points whose
    /// coordinates are missing, or whose location never occurs inside the
    /// window, get NaN.
    pub fn materialize_time_aggregate(
        &self,
        formula: &Formula,
        agg: AggregateKind,
        window: impl RangeBounds<FrameId>,
        name: &str,
    ) -> Result<MaterializeReport, CoreError> {
        let resolved = self.prepare_column(formula, name)?;
        let frames = self.frames()?;
        let selected: Vec<Arc<Frame>> = frames
            .iter()
            .filter(|frame| window.contains(&frame.id()))
            .cloned()
            .collect();
        let (Some(first), Some(last)) = (selected.first(), selected.last()) else {
            return Err(CoreError::EmptyFrameWindow);
        };
        let over = if selected.len() == frames.len() {
            "over frames".to_owned()
        } else {
            format!("over frames {}..={}", first.id().0, last.id().0)
        };
        let columns = self.evaluate_frames(&resolved, &selected)?;
        let (x, y) = self.config.coordinates();

        let mut groups: HashMap<(u64, u64), Vec<f64>> = HashMap::new();
        for frame in &selected {
            let (xs, ys) = frame.coordinates(x, y)?;
            let Some(values) = columns.get(&frame.id()) else {
                continue;
            };
            for ((px, py), value) in xs.values().iter().zip(ys.values()).zip(values.values()) {
                if let Some(key) = location_key(*px, *py) {
                    groups.entry(key).or_default().push(*value);
                }
            }
        }
        let reduced: HashMap<(u64, u64), f64> = groups
            .into_iter()
            .map(|(key, samples)| (key, agg.reduce(&samples)))
            .collect();

        let mut broadcast = BTreeMap::new();
        for frame in &frames {
            let (xs, ys) = frame.coordinates(x, y)?;
            let values = xs
                .values()
                .iter()
                .zip(ys.values())
                .map(|(px, py)| {
                    location_key(*px, *py)
                        .and_then(|key| reduced.get(&key).copied())
                        .unwrap_or(f64::NAN)
                })
                .collect();
            broadcast.insert(frame.id(), Column::new(values));
        }
        info!(
            column = name,
            aggregate = agg.name(),
            frames = selected.len(),
            locations = reduced.len(),
            "computed time aggregate"
        );
        let text = format!("{}({}) {over}", agg.name(), formula.text());
        self.persist(name, &text, broadcast)
    }

    /// Drop a derived column and the statistics published for it.
    pub fn drop_derived_column(&self, name: &str) -> Result<bool, CoreError> {
        let existed = self.data.drop_derived_column(name)?;
        self.cache.clear();
        if existed {
            let names: Vec<String> = STATISTICS
                .iter()
                .map(|statistic| statistic_constant_name(name, statistic))
                .collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            self.constants.remove(&refs)?;
            info!(column = name, "dropped derived column");
        }
        Ok(existed)
    }

    fn prepare_column(&self, formula: &Formula, name: &str) -> Result<ResolvedFormula, CoreError> {
        if formula.scope() != FormulaScope::Row {
            return Err(CoreError::ScopeMismatch {
                expected: FormulaScope::Row,
                found: formula.scope(),
            });
        }
        validate_identifier(name)?;
        if formula.expr().references(name) {
            return Err(CoreError::SelfReference {
                name: name.to_owned(),
            });
        }
        let existing = if self.data.list_columns().contains(name) {
            Some("raw column")
        } else if self.data.list_derived_columns().contains_key(name) {
            Some("derived column")
        } else if self.constants.snapshot().contains(name) {
            Some("global constant")
        } else if builtin_constant(name).is_some() {
            Some("built-in constant")
        } else {
            None
        };
        if let Some(existing) = existing {
            return Err(CoreError::NameConflict {
                name: name.to_owned(),
                existing,
            });
        }
        self.resolve(formula)
    }

    fn evaluate_frames(
        &self,
        resolved: &ResolvedFormula,
        frames: &[Arc<Frame>],
    ) -> Result<BTreeMap<FrameId, Column>, CoreError> {
        let snapshot = self.constants.snapshot();
        let spec = self.config.grid_spec();
        let evaluate_frame = |frame: &Arc<Frame>| -> Result<(FrameId, Column), CoreError> {
            let context = EvalContext::new(frame, &snapshot, resolved.coordinates(), spec);
            let column = context.evaluate_points(resolved)?;
            self.metrics
                .record_interpolations(context.interpolation_count());
            if column.len() != frame.len() {
                return Err(CoreError::ShapeMismatch {
                    frame: frame.id(),
                    expected: frame.len(),
                    found: column.len(),
                });
            }
            Ok((frame.id(), column))
        };
        if self.config.parallel_materialize {
            frames.par_iter().map(evaluate_frame).collect()
        } else {
            frames.iter().map(evaluate_frame).collect()
        }
    }

    fn persist(
        &self,
        name: &str,
        formula: &str,
        columns: BTreeMap<FrameId, Column>,
    ) -> Result<MaterializeReport, CoreError> {
        let frames = columns.len();
        let points = columns.values().map(Column::len).sum();
        if let Err(source) = self.data.persist_derived_column(name, formula, columns) {
            if let StoreError::ColumnExists(_) = source {
                return Err(CoreError::NameConflict {
                    name: name.to_owned(),
                    existing: "derived column",
                });
            }
            self.metrics.record_rollback();
            let rolled_back = match self.data.drop_derived_column(name) {
                Ok(_) => true,
                Err(err) => {
                    warn!(column = name, error = %err, "rollback of derived column failed");
                    false
                }
            };
            self.cache.clear();
            warn!(column = name, error = %source, rolled_back, "derived column write failed");
            return Err(CoreError::PartialWrite {
                name: name.to_owned(),
                rolled_back,
                source,
            });
        }
        self.metrics.record_materialization();
        info!(column = name, frames, points, "materialized derived column");

        let statistics_version = if self.config.publish_column_statistics {
            Some(self.publish_column_statistics(&[name])?)
        } else {
            None
        };
        Ok(MaterializeReport {
            name: name.to_owned(),
            frames,
            points,
            statistics_version,
        })
    }
}

/// Exact location identity; `-0.0` and `0.0` are the same place.
fn location_key(x: f64, y: f64) -> Option<(u64, u64)> {
    if x.is_nan() || y.is_nan() {
        None
    } else {
        Some(((x + 0.0).to_bits(), (y + 0.0).to_bits()))
    }
}
