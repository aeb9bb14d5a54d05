use pf_columnar::Column;
use pf_expr::{Formula, ResolvedFormula, evaluate_dataset, parse_constant_definition, parse_with_depth};
use pf_frame::{ConstantStore, ConstantUpdate, DataStore, Frame, GlobalConstant};
use pf_types::{FormulaScope, builtin_constant, validate_identifier};
use tracing::info;

use crate::engine::{ComputationCore, ensure_scope};
use crate::error::CoreError;

/// Name under which a column statistic is published, e.g. `speed_global_mean`.
#[must_use]
pub fn statistic_constant_name(column: &str, statistic: &str) -> String {
    format!("{column}_global_{statistic}")
}

impl ComputationCore {
    /// Evaluate a constant-scope formula over every frame of the dataset.
    pub fn evaluate_constant(&self, resolved: &ResolvedFormula) -> Result<f64, CoreError> {
        ensure_scope(resolved, FormulaScope::Constant)?;
        let frames = self.frames()?;
        let refs: Vec<&Frame> = frames.iter().map(|frame| &**frame).collect();
        let snapshot = self.constants.snapshot();
        let (value, interpolations) =
            evaluate_dataset(resolved, &refs, &snapshot, self.config.grid_spec())?;
        self.metrics.record_constant_evaluation();
        self.metrics.record_interpolations(interpolations);
        Ok(value)
    }

    /// Evaluate `text` in dataset scope and publish it as constant `name`.
    /// Any previous value of `name` is replaced under a new version.
    pub fn recompute_constant(&self, name: &str, text: &str) -> Result<GlobalConstant, CoreError> {
        let formula = parse_with_depth(text, FormulaScope::Constant, self.config.max_parse_depth)?;
        self.publish_formula_constant(name, &formula)
    }

    /// `name = expression` form of [`ComputationCore::recompute_constant`].
    pub fn define_constant(&self, definition: &str) -> Result<GlobalConstant, CoreError> {
        let (name, formula) = parse_constant_definition(definition, self.config.max_parse_depth)?;
        self.publish_formula_constant(&name, &formula)
    }

    fn publish_formula_constant(
        &self,
        name: &str,
        formula: &Formula,
    ) -> Result<GlobalConstant, CoreError> {
        self.check_constant_name(name)?;
        if formula.expr().references(name) {
            return Err(CoreError::SelfReference {
                name: name.to_owned(),
            });
        }
        let resolved = self.resolve(formula)?;
        let value = self.evaluate_constant(&resolved)?;
        let version = self
            .constants
            .publish(vec![ConstantUpdate::new(name, value).with_formula(formula.text())])?;
        self.metrics.record_published(1);
        info!(constant = name, value, version, formula = formula.text(), "recomputed constant");
        Ok(GlobalConstant {
            name: name.to_owned(),
            value,
            version,
            formula: Some(formula.text().to_owned()),
        })
    }

    fn check_constant_name(&self, name: &str) -> Result<(), CoreError> {
        validate_identifier(name)?;
        if self.data.list_columns().contains(name) {
            return Err(CoreError::NameConflict {
                name: name.to_owned(),
                existing: "raw column",
            });
        }
        if self.data.list_derived_columns().contains_key(name) {
            return Err(CoreError::NameConflict {
                name: name.to_owned(),
                existing: "derived column",
            });
        }
        if builtin_constant(name).is_some() {
            return Err(CoreError::NameConflict {
                name: name.to_owned(),
                existing: "built-in constant",
            });
        }
        Ok(())
    }

    /// Remove a published constant. Returns `false` when it did not exist.
    pub fn remove_constant(&self, name: &str) -> Result<bool, CoreError> {
        let before = self.constants.current_version();
        let after = self.constants.remove(&[name])?;
        Ok(after != before)
    }

    /// Publish `<col>_global_{mean,sum,min,max,std,var}` for every listed
    /// column, computed over all frames, as one batch. Returns the new store
    /// version.
    pub fn publish_column_statistics(&self, columns: &[&str]) -> Result<u64, CoreError> {
        let frames = self.frames()?;
        let mut updates = Vec::with_capacity(columns.len() * 6);
        for column in columns {
            let parts = frames
                .iter()
                .map(|frame| frame.require_column(column))
                .collect::<Result<Vec<_>, _>>()?;
            let statistics = Column::concat(parts).statistics();
            for (statistic, value) in statistics.entries() {
                updates.push(ConstantUpdate::new(
                    statistic_constant_name(column, statistic),
                    value,
                ));
            }
        }
        let count = updates.len();
        let version = self.constants.publish(updates)?;
        self.metrics.record_published(count);
        info!(columns = columns.len(), constants = count, version, "published column statistics");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pf_frame::{ConstantStore, Frame, MemoryConstantStore, MemoryDataStore};
    use pf_runtime::EngineConfig;
    use pf_types::{FormulaScope, FrameId};

    use super::statistic_constant_name;
    use crate::engine::ComputationCore;
    use crate::error::CoreError;

    fn core() -> ComputationCore {
        let frames = vec![
            Frame::from_dict(FrameId(0), vec![("p", vec![1.0, 2.0])]).expect("f0"),
            Frame::from_dict(FrameId(1), vec![("p", vec![3.0, f64::NAN])]).expect("f1"),
        ];
        ComputationCore::new(
            Arc::new(MemoryDataStore::new(frames).expect("store")),
            Arc::new(MemoryConstantStore::new()),
            EngineConfig::interactive(),
        )
        .expect("core")
    }

    #[test]
    fn dataset_mean_skips_missing_samples() {
        let core = core();
        let resolved = core
            .parse_and_resolve("mean(p)", FormulaScope::Constant)
            .expect("resolve");
        assert_eq!(core.evaluate_constant(&resolved).expect("mean"), 2.0);
        assert_eq!(core.metrics().constant_evaluations, 1);
    }

    #[test]
    fn definitions_publish_with_their_formula() {
        let core = core();
        let first = core.define_constant("p_top = max(p)").expect("define");
        assert_eq!(first.value, 3.0);
        assert_eq!(first.formula.as_deref(), Some("max(p)"));

        let second = core.recompute_constant("p_top", "max(p) * 2").expect("recompute");
        assert_eq!(second.value, 6.0);
        assert!(second.version > first.version);

        assert!(core.remove_constant("p_top").expect("remove"));
        assert!(!core.remove_constant("p_top").expect("already gone"));
    }

    #[test]
    fn constant_names_are_validated() {
        let core = core();
        assert!(matches!(
            core.recompute_constant("p", "mean(p)"),
            Err(CoreError::NameConflict { existing: "raw column", .. })
        ));
        assert!(matches!(
            core.recompute_constant("pi", "mean(p)"),
            Err(CoreError::NameConflict { .. })
        ));
        assert!(matches!(
            core.recompute_constant("9lives", "mean(p)"),
            Err(CoreError::InvalidName(_))
        ));
        assert!(matches!(
            core.recompute_constant("loop", "loop + 1"),
            Err(CoreError::SelfReference { .. })
        ));
        assert!(matches!(
            core.recompute_constant("bare", "p + 1"),
            Err(CoreError::Expr(_))
        ));
    }

    #[test]
    fn column_statistics_are_one_batch() {
        let core = core();
        let version = core.publish_column_statistics(&["p"]).expect("stats");
        let snapshot = core.constant_store().snapshot();
        assert_eq!(snapshot.version(), version);
        assert_eq!(snapshot.len(), 6);
        assert_eq!(snapshot.value(&statistic_constant_name("p", "mean")), Some(2.0));
        assert_eq!(snapshot.value("p_global_sum"), Some(6.0));
        assert_eq!(snapshot.value("p_global_min"), Some(1.0));
        assert!(snapshot.iter().all(|constant| constant.version == version));
    }
}
