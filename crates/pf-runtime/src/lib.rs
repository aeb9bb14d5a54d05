#![forbid(unsafe_code)]

use std::num::NonZeroUsize;
use std::path::Path;

use pf_types::{GridResolution, GridSpec, InterpolationMethod, TypeError, is_identifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Execution profile. Interactive favours a small, hot cache; batch favours
/// throughput on large datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    Interactive,
    Batch,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("malformed configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: RuntimeMode,
    /// Column holding the x coordinate of every point.
    pub x_column: String,
    pub y_column: String,
    pub resolution: GridResolution,
    pub interpolation: InterpolationMethod,
    pub max_parse_depth: usize,
    /// Maximum number of cached fields.
    pub cache_capacity: usize,
    /// Optional upper bound on the total size of cached fields, in bytes.
    pub cache_byte_budget: Option<usize>,
    pub parallel_materialize: bool,
    /// Publish `<col>_global_*` statistics after each materialization.
    pub publish_column_statistics: bool,
}

impl EngineConfig {
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            mode: RuntimeMode::Interactive,
            x_column: "x".to_owned(),
            y_column: "y".to_owned(),
            resolution: GridResolution::default(),
            interpolation: InterpolationMethod::Linear,
            max_parse_depth: 128,
            cache_capacity: 64,
            cache_byte_budget: Some(256 * 1024 * 1024),
            parallel_materialize: true,
            publish_column_statistics: true,
        }
    }

    #[must_use]
    pub fn batch() -> Self {
        Self {
            mode: RuntimeMode::Batch,
            cache_capacity: 16,
            cache_byte_budget: Some(64 * 1024 * 1024),
            ..Self::interactive()
        }
    }

    #[must_use]
    pub fn with_coordinates(mut self, x: impl Into<String>, y: impl Into<String>) -> Self {
        self.x_column = x.into();
        self.y_column = y.into();
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: GridResolution) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_interpolation(mut self, method: InterpolationMethod) -> Self {
        self.interpolation = method;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, capacity: usize, byte_budget: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self.cache_byte_budget = byte_budget;
        self
    }

    #[must_use]
    pub fn with_parallel_materialize(mut self, parallel: bool) -> Self {
        self.parallel_materialize = parallel;
        self
    }

    #[must_use]
    pub fn with_column_statistics(mut self, publish: bool) -> Self {
        self.publish_column_statistics = publish;
        self
    }

    /// Parse and validate a JSON document. Missing fields take the
    /// interactive defaults.
    pub fn from_json(text: &str) -> Result<Self, RuntimeError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        debug!(mode = ?config.mode, grid = %config.resolution, "loaded engine configuration");
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String, RuntimeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        for (field, name) in [("x_column", &self.x_column), ("y_column", &self.y_column)] {
            if !is_identifier(name) {
                return Err(RuntimeError::Invalid {
                    field,
                    reason: format!("'{name}' is not a valid column name"),
                });
            }
        }
        if self.x_column == self.y_column {
            return Err(RuntimeError::Invalid {
                field: "y_column",
                reason: "must differ from x_column".to_owned(),
            });
        }
        self.resolution.validate()?;
        if self.max_parse_depth == 0 {
            return Err(RuntimeError::Invalid {
                field: "max_parse_depth",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(RuntimeError::Invalid {
                field: "cache_capacity",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.cache_byte_budget == Some(0) {
            return Err(RuntimeError::Invalid {
                field: "cache_byte_budget",
                reason: "must be positive when set".to_owned(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn grid_spec(&self) -> GridSpec {
        GridSpec::new(self.resolution, self.interpolation)
    }

    #[must_use]
    pub fn coordinates(&self) -> (&str, &str) {
        (&self.x_column, &self.y_column)
    }

    pub fn cache_capacity(&self) -> Result<NonZeroUsize, RuntimeError> {
        NonZeroUsize::new(self.cache_capacity).ok_or_else(|| RuntimeError::Invalid {
            field: "cache_capacity",
            reason: "must be at least 1".to_owned(),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::interactive()
    }
}
