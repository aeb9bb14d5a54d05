#![forbid(unsafe_code)]

//! The computation core: resolves formulas against the live stores, serves
//! frame evaluations through the field cache, computes dataset constants and
//! materializes derived columns.

mod constants;
mod engine;
mod error;
mod materialize;
mod metrics;
mod timeseries;

pub use crate::constants::statistic_constant_name;
pub use crate::engine::ComputationCore;
pub use crate::error::CoreError;
pub use crate::materialize::MaterializeReport;
pub use crate::metrics::MetricsSnapshot;
