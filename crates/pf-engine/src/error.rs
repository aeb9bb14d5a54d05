use pf_expr::{ExprError, ParseError};
use pf_frame::{FrameError, StoreError};
use pf_runtime::RuntimeError;
use pf_types::{FormulaScope, FrameId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("'{0}' is not a valid column or constant name")]
    InvalidName(String),
    #[error("'{name}' is already defined as a {existing}")]
    NameConflict { name: String, existing: &'static str },
    #[error("formula for '{name}' refers to '{name}' itself")]
    SelfReference { name: String },
    #[error("operation needs a {expected:?}-scope formula, got {found:?} scope")]
    ScopeMismatch {
        expected: FormulaScope,
        found: FormulaScope,
    },
    #[error("formula produced {found} values for {frame} which has {expected} points")]
    ShapeMismatch {
        frame: FrameId,
        expected: usize,
        found: usize,
    },
    #[error("the frame window selects no frames")]
    EmptyFrameWindow,
    #[error("location ({x}, {y}) with tolerance {tolerance} needs finite coordinates and a non-negative tolerance")]
    InvalidLocation { x: f64, y: f64, tolerance: f64 },
    #[error("writing derived column '{name}' failed (rolled back: {rolled_back}): {source}")]
    PartialWrite {
        name: String,
        rolled_back: bool,
        #[source]
        source: StoreError,
    },
}

impl From<ParseError> for CoreError {
    fn from(err: ParseError) -> Self {
        Self::Expr(err.into())
    }
}

impl From<FrameError> for CoreError {
    fn from(err: FrameError) -> Self {
        Self::Expr(err.into())
    }
}

impl From<TypeError> for CoreError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidIdentifier(name) => Self::InvalidName(name),
            other => Self::Runtime(other.into()),
        }
    }
}
