#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

impl From<u64> for FrameId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Scope a formula is declared in. Fixed at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaScope {
    /// Evaluated per point of a single frame; aggregates reduce over that frame.
    Row,
    /// Evaluated over the whole dataset; aggregates reduce over every frame.
    Constant,
}

impl FormulaScope {
    #[must_use]
    pub const fn signature_prefix(self) -> &'static str {
        match self {
            Self::Row => "row",
            Self::Constant => "const",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    RawColumn,
    DerivedColumn,
    GlobalConstant,
    BuiltinConstant,
    /// Coordinate columns consumed implicitly by spatial operators.
    SpatialOperandPlaceholder,
}

impl VariableKind {
    #[must_use]
    pub const fn is_column(self) -> bool {
        matches!(
            self,
            Self::RawColumn | Self::DerivedColumn | Self::SpatialOperandPlaceholder
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Delaunay triangulation with barycentric weights, nearest fill outside the hull.
    #[default]
    Linear,
    Nearest,
    /// Inverse-distance weighting (power 2) over the nearest samples.
    InverseDistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridResolution {
    pub cols: usize,
    pub rows: usize,
}

impl GridResolution {
    /// Finite differences need at least two nodes along each axis.
    pub fn new(cols: usize, rows: usize) -> Result<Self, TypeError> {
        let resolution = Self { cols, rows };
        resolution.validate()?;
        Ok(resolution)
    }

    pub fn validate(&self) -> Result<(), TypeError> {
        if self.cols < 2 || self.rows < 2 {
            return Err(TypeError::InvalidResolution {
                cols: self.cols,
                rows: self.rows,
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.cols * self.rows
    }
}

impl Default for GridResolution {
    fn default() -> Self {
        Self {
            cols: 150,
            rows: 150,
        }
    }
}

impl fmt::Display for GridResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSpec {
    pub resolution: GridResolution,
    pub method: InterpolationMethod,
}

impl GridSpec {
    #[must_use]
    pub const fn new(resolution: GridResolution, method: InterpolationMethod) -> Self {
        Self { resolution, method }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputMode {
    /// One value per original point, in frame order.
    Points,
    /// Values on the regular grid described by `spec`.
    Grid { spec: GridSpec },
}

impl OutputMode {
    #[must_use]
    pub const fn grid(spec: GridSpec) -> Self {
        Self::Grid { spec }
    }
}

/// Physical constants every formula can reference by name.
pub const BUILTIN_CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("g", 9.806_65),
    ("c", 299_792_458.0),
    ("h", 6.626_070_15e-34),
    ("k_B", 1.380_649e-23),
    ("N_A", 6.022_140_76e23),
    ("R", 8.314_462_618),
];

#[must_use]
pub fn builtin_constant(name: &str) -> Option<f64> {
    BUILTIN_CONSTANTS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, value)| *value)
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the same shape the formula tokenizer accepts.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_identifier(name: &str) -> Result<(), TypeError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(TypeError::InvalidIdentifier(name.to_owned()))
    }
}

/// Float equality where NaN equals NaN.
#[must_use]
pub fn semantic_eq(left: f64, right: f64) -> bool {
    (left.is_nan() && right.is_nan()) || left == right
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("grid resolution {cols}x{rows} is too small; at least 2x2 nodes are required")]
    InvalidResolution { cols: usize, rows: usize },
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::{
        FormulaScope, GridResolution, OutputMode, TypeError, builtin_constant, is_identifier,
        semantic_eq,
    };

    #[test]
    fn resolution_rejects_single_node_axes() {
        let err = GridResolution::new(1, 10).expect_err("must fail");
        assert_eq!(err, TypeError::InvalidResolution { cols: 1, rows: 10 });
        assert_eq!(
            err.to_string(),
            "grid resolution 1x10 is too small; at least 2x2 nodes are required"
        );
        assert_eq!(GridResolution::new(3, 4).expect("ok").node_count(), 12);
    }

    #[test]
    fn builtin_constants_are_case_sensitive() {
        assert_eq!(builtin_constant("pi"), Some(std::f64::consts::PI));
        assert_eq!(builtin_constant("k_B"), Some(1.380_649e-23));
        assert_eq!(builtin_constant("PI"), None);
    }

    #[test]
    fn identifier_shape_matches_tokenizer() {
        assert!(is_identifier("speed_2"));
        assert!(is_identifier("_tmp"));
        assert!(!is_identifier("2speed"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        assert!(semantic_eq(f64::NAN, f64::NAN));
        assert!(!semantic_eq(f64::NAN, 1.0));
        assert!(semantic_eq(2.0, 2.0));
    }

    #[test]
    fn output_mode_serializes_with_kind_tag() {
        let json = serde_json::to_string(&OutputMode::Points).expect("serialize");
        assert_eq!(json, r#"{"kind":"points"}"#);
        assert_eq!(FormulaScope::Constant.signature_prefix(), "const");
    }
}
