#![forbid(unsafe_code)]

//! Formula engine and spatial computation core for time-indexed point clouds.
//!
//! ```
//! use pointfield::prelude::*;
//!
//! let frame = Frame::from_dict(
//!     FrameId(0),
//!     vec![
//!         ("x", vec![0.0, 1.0, 0.0, 1.0]),
//!         ("y", vec![0.0, 0.0, 1.0, 1.0]),
//!         ("u", vec![3.0, 4.0, 0.0, 1.0]),
//!         ("v", vec![4.0, 3.0, 1.0, 0.0]),
//!     ],
//! )
//! .expect("frame");
//! let core = pointfield::in_memory(vec![frame], EngineConfig::interactive()).expect("core");
//!
//! let speed = core
//!     .evaluate_text("sqrt(u**2 + v**2)", FrameId(0), OutputMode::Points)
//!     .expect("evaluate");
//! assert_eq!(speed.values()[..2], [5.0, 5.0]);
//! ```

use std::sync::Arc;

pub use pf_cache::{CacheKey, CacheStats, CachedField, FieldCache};
pub use pf_columnar::{AggregateKind, ArithmeticOp, Column, ColumnError, ColumnStatistics};
pub use pf_engine::{ComputationCore, CoreError, MaterializeReport, MetricsSnapshot};
pub use pf_expr::{
    EvalContext, EvaluationResult, Expr, ExprError, Formula, FunctionRegistry, ParseError,
    ResolveError, ResolvedFormula, SymbolTable, parse, parse_constant_definition,
};
pub use pf_frame::{
    ConstantSnapshot, ConstantStore, ConstantUpdate, DataStore, Frame, FrameError,
    GlobalConstant, MemoryConstantStore, MemoryDataStore, StoreError,
};
pub use pf_grid::{GridError, GridField, GridGeometry, Interpolator};
pub use pf_runtime::{EngineConfig, RuntimeError, RuntimeMode};
pub use pf_types::{
    FormulaScope, FrameId, GridResolution, GridSpec, InterpolationMethod, OutputMode,
    VariableKind,
};

pub mod prelude {
    pub use crate::{
        AggregateKind, ComputationCore, ConstantStore, DataStore, EngineConfig, Frame, FrameId,
        FormulaScope, GridResolution, GridSpec, InterpolationMethod, OutputMode,
    };
}

/// A core over fresh in-memory stores holding `frames`.
pub fn in_memory(frames: Vec<Frame>, config: EngineConfig) -> Result<ComputationCore, CoreError> {
    ComputationCore::new(
        Arc::new(MemoryDataStore::new(frames)?),
        Arc::new(MemoryConstantStore::new()),
        config,
    )
}
