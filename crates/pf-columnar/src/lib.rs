#![forbid(unsafe_code)]

mod aggregate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use aggregate::{AggregateKind, ColumnStatistics};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        let bits = values.iter().map(|value| !value.is_nan()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

/// A dense run of per-point samples. NaN marks a missing or anomalous value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    values: Vec<f64>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithmeticOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "**",
        }
    }

    /// Division by zero yields NaN rather than an infinity.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => {
                if rhs == 0.0 {
                    f64::NAN
                } else {
                    lhs / rhs
                }
            }
            Self::Pow => lhs.powf(rhs),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
}

impl Column {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        let validity = ValidityMask::from_values(&values);
        Self { values, validity }
    }

    #[must_use]
    pub fn broadcast(value: f64, len: usize) -> Self {
        Self::new(vec![value; len])
    }

    #[must_use]
    pub fn nan(len: usize) -> Self {
        Self::broadcast(f64::NAN, len)
    }

    /// Concatenate columns end to end, preserving order.
    #[must_use]
    pub fn concat<'a>(columns: impl IntoIterator<Item = &'a Column>) -> Self {
        let mut values = Vec::new();
        for column in columns {
            values.extend_from_slice(&column.values);
        }
        Self::new(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied()
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.values.len() * (std::mem::size_of::<f64>() + std::mem::size_of::<bool>())
    }

    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(lhs, rhs)| op.apply(*lhs, *rhs))
            .collect();
        Ok(Self::new(values))
    }

    /// Combine every element with a scalar. `scalar_on_left` keeps operand
    /// order for the non-commutative ops.
    #[must_use]
    pub fn binary_scalar(&self, scalar: f64, op: ArithmeticOp, scalar_on_left: bool) -> Self {
        let values = self
            .values
            .iter()
            .map(|value| {
                if scalar_on_left {
                    op.apply(scalar, *value)
                } else {
                    op.apply(*value, scalar)
                }
            })
            .collect();
        Self::new(values)
    }

    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(self.values.iter().map(|value| f(*value)).collect())
    }

    pub fn zip_map(&self, right: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }
        Ok(Self::new(
            self.values
                .iter()
                .zip(&right.values)
                .map(|(lhs, rhs)| f(*lhs, *rhs))
                .collect(),
        ))
    }

    #[must_use]
    pub fn aggregate(&self, kind: AggregateKind) -> f64 {
        kind.reduce(&self.values)
    }

    #[must_use]
    pub fn statistics(&self) -> ColumnStatistics {
        ColumnStatistics::from_values(&self.values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| pf_types::semantic_eq(*left, *right))
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}
