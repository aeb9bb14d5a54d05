use std::sync::Arc;

use pf_cache::{CacheKey, CacheStats, FieldCache};
use pf_expr::{
    EvaluationResult, ExprError, FunctionRegistry, ResolvedFormula, SymbolTable, evaluate,
    parse_with_depth, resolve,
};
use pf_frame::{ConstantSnapshot, ConstantStore, DataStore, Frame};
use pf_runtime::EngineConfig;
use pf_types::{FormulaScope, FrameId, OutputMode};
use tracing::debug;

use crate::error::CoreError;
use crate::metrics::{CoreMetrics, MetricsSnapshot};

/// Facade over the formula pipeline, the field cache and both stores.
///
/// Every evaluation reads one constant snapshot up front and uses it for the
/// whole request. Cached fields are keyed by the highest version among the
/// constants a formula references, so publishing an unrelated constant
/// leaves them valid.
pub struct ComputationCore {
    pub(crate) data: Arc<dyn DataStore>,
    pub(crate) constants: Arc<dyn ConstantStore>,
    pub(crate) config: EngineConfig,
    pub(crate) registry: FunctionRegistry,
    pub(crate) cache: FieldCache<EvaluationResult>,
    pub(crate) metrics: CoreMetrics,
}

impl std::fmt::Debug for ComputationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationCore")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ComputationCore {
    pub fn new(
        data: Arc<dyn DataStore>,
        constants: Arc<dyn ConstantStore>,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let cache = FieldCache::new(config.cache_capacity()?, config.cache_byte_budget);
        Ok(Self {
            data,
            constants,
            config,
            registry: FunctionRegistry::standard(),
            cache,
            metrics: CoreMetrics::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn data_store(&self) -> &Arc<dyn DataStore> {
        &self.data
    }

    #[must_use]
    pub fn constant_store(&self) -> &Arc<dyn ConstantStore> {
        &self.constants
    }

    /// Names a formula may reference right now.
    #[must_use]
    pub fn symbols(&self) -> SymbolTable {
        self.symbols_with(&self.constants.snapshot())
    }

    pub(crate) fn symbols_with(&self, snapshot: &ConstantSnapshot) -> SymbolTable {
        let (x, y) = self.config.coordinates();
        SymbolTable::new()
            .with_raw_columns(self.data.list_columns())
            .with_derived_columns(self.data.list_derived_columns().into_keys())
            .with_constants(snapshot)
            .with_coordinates(x, y)
    }

    pub fn parse_and_resolve(
        &self,
        text: &str,
        scope: FormulaScope,
    ) -> Result<ResolvedFormula, CoreError> {
        let formula = parse_with_depth(text, scope, self.config.max_parse_depth)?;
        self.resolve(&formula)
    }

    pub(crate) fn resolve(&self, formula: &pf_expr::Formula) -> Result<ResolvedFormula, CoreError> {
        resolve(formula, &self.symbols(), &self.registry)
            .map_err(|err| CoreError::Expr(err.into()))
    }

    /// Evaluate a row formula on one frame. Repeated requests under the same
    /// constants are served from the field cache.
    pub fn evaluate(
        &self,
        resolved: &ResolvedFormula,
        frame: FrameId,
        output: OutputMode,
    ) -> Result<Arc<EvaluationResult>, CoreError> {
        ensure_scope(resolved, FormulaScope::Row)?;
        self.metrics.record_evaluation();
        let generation = self.cache.generation();
        let frame = self.data.get_frame(frame)?;
        let snapshot = self.constants.snapshot();
        let key = self.cache_key(resolved, &frame, output, &snapshot)?;
        let expected_len = match output {
            OutputMode::Points => frame.len(),
            OutputMode::Grid { spec } => spec.resolution.node_count(),
        };

        let result = self.cache.get_or_compute_since(generation, &key, expected_len, || {
            let evaluation = evaluate(
                resolved,
                &frame,
                &snapshot,
                output,
                self.config.grid_spec(),
            )?;
            self.metrics.record_interpolations(evaluation.interpolations);
            Ok::<_, ExprError>(evaluation.result)
        })?;
        Ok(result)
    }

    /// Parse, resolve and evaluate in one call.
    pub fn evaluate_text(
        &self,
        text: &str,
        frame: FrameId,
        output: OutputMode,
    ) -> Result<Arc<EvaluationResult>, CoreError> {
        let resolved = self.parse_and_resolve(text, FormulaScope::Row)?;
        self.evaluate(&resolved, frame, output)
    }

    fn cache_key(
        &self,
        resolved: &ResolvedFormula,
        frame: &Frame,
        output: OutputMode,
        snapshot: &ConstantSnapshot,
    ) -> Result<CacheKey, CoreError> {
        // Missing constants fail here so a removed constant never hits an
        // entry cached while it existed.
        let mut version = 0;
        for name in resolved.constants().keys() {
            let constant = snapshot.get(name).ok_or_else(|| ExprError::Reference {
                name: name.clone(),
            })?;
            version = version.max(constant.version);
        }
        let spatial = match output {
            OutputMode::Points if resolved.contains_spatial() => Some(self.config.grid_spec()),
            _ => None,
        };
        debug!(
            frame = %frame.id(),
            signature = resolved.signature(),
            version,
            "field cache key"
        );
        Ok(CacheKey::new(
            frame.id(),
            resolved.signature(),
            output,
            spatial,
            version,
        ))
    }

    pub(crate) fn frames(&self) -> Result<Vec<Arc<Frame>>, CoreError> {
        self.data
            .frame_ids()
            .into_iter()
            .map(|id| self.data.get_frame(id).map_err(CoreError::from))
            .collect()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats())
    }
}

pub(crate) fn ensure_scope(
    resolved: &ResolvedFormula,
    expected: FormulaScope,
) -> Result<(), CoreError> {
    if resolved.scope() == expected {
        Ok(())
    } else {
        Err(CoreError::ScopeMismatch {
            expected,
            found: resolved.scope(),
        })
    }
}
