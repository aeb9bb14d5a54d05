use std::collections::BTreeMap;

use pf_columnar::AggregateKind;
use serde::{Deserialize, Serialize};

/// One-argument elementwise functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
}

impl MathFn {
    pub const ALL: [Self; 17] = [
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Asin,
        Self::Acos,
        Self::Atan,
        Self::Sinh,
        Self::Cosh,
        Self::Tanh,
        Self::Exp,
        Self::Log,
        Self::Log10,
        Self::Sqrt,
        Self::Abs,
        Self::Floor,
        Self::Ceil,
        Self::Round,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Sqrt => "sqrt",
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
        }
    }

    /// Domain errors and poles (`log(0)`, `sqrt(-1)`, overflow) come back as
    /// NaN.
    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        let out = match self {
            Self::Sin => value.sin(),
            Self::Cos => value.cos(),
            Self::Tan => value.tan(),
            Self::Asin => value.asin(),
            Self::Acos => value.acos(),
            Self::Atan => value.atan(),
            Self::Sinh => value.sinh(),
            Self::Cosh => value.cosh(),
            Self::Tanh => value.tanh(),
            Self::Exp => value.exp(),
            Self::Log => value.ln(),
            Self::Log10 => value.log10(),
            Self::Sqrt => value.sqrt(),
            Self::Abs => value.abs(),
            Self::Floor => value.floor(),
            Self::Ceil => value.ceil(),
            Self::Round => value.round_ties_even(),
        };
        if out.is_infinite() && value.is_finite() {
            f64::NAN
        } else {
            out
        }
    }
}

/// Two-argument elementwise functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairwiseFn {
    Pow,
    Min,
    Max,
}

impl PairwiseFn {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// NaN in either operand propagates.
    #[must_use]
    pub fn apply(self, left: f64, right: f64) -> f64 {
        if left.is_nan() || right.is_nan() {
            return f64::NAN;
        }
        match self {
            Self::Pow => left.powf(right),
            Self::Min => left.min(right),
            Self::Max => left.max(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialOp {
    GradX,
    GradY,
    Laplacian,
    Div,
    Curl,
}

impl SpatialOp {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GradX => "grad_x",
            Self::GradY => "grad_y",
            Self::Laplacian => "laplacian",
            Self::Div => "div",
            Self::Curl => "curl",
        }
    }

    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::GradX | Self::GradY | Self::Laplacian => 1,
            Self::Div | Self::Curl => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", content = "function", rename_all = "snake_case")]
pub enum FunctionKind {
    Math(MathFn),
    Pairwise(PairwiseFn),
    Aggregate(AggregateKind),
    Spatial(SpatialOp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(FunctionKind),
    UnknownName,
    WrongArity { accepted: Vec<usize> },
}

/// The closed set of callable functions, keyed by name then arity. `min` and
/// `max` are aggregates with one argument and elementwise with two.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    entries: BTreeMap<&'static str, BTreeMap<usize, FunctionKind>>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
        };
        for func in MathFn::ALL {
            registry.insert(func.name(), 1, FunctionKind::Math(func));
        }
        for func in [PairwiseFn::Pow, PairwiseFn::Min, PairwiseFn::Max] {
            registry.insert(func.name(), 2, FunctionKind::Pairwise(func));
        }
        for kind in AggregateKind::ALL {
            registry.insert(kind.name(), 1, FunctionKind::Aggregate(kind));
        }
        for op in [
            SpatialOp::GradX,
            SpatialOp::GradY,
            SpatialOp::Laplacian,
            SpatialOp::Div,
            SpatialOp::Curl,
        ] {
            registry.insert(op.name(), op.arity(), FunctionKind::Spatial(op));
        }
        registry
    }

    fn insert(&mut self, name: &'static str, arity: usize, kind: FunctionKind) {
        self.entries.entry(name).or_default().insert(arity, kind);
    }

    #[must_use]
    pub fn lookup(&self, name: &str, arity: usize) -> Lookup {
        match self.entries.get(name) {
            None => Lookup::UnknownName,
            Some(by_arity) => match by_arity.get(&arity) {
                Some(kind) => Lookup::Found(*kind),
                None => Lookup::WrongArity {
                    accepted: by_arity.keys().copied().collect(),
                },
            },
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use pf_columnar::AggregateKind;

    use super::{FunctionKind, FunctionRegistry, Lookup, MathFn, PairwiseFn, SpatialOp};

    #[test]
    fn min_and_max_are_overloaded_by_arity() {
        let registry = FunctionRegistry::standard();
        assert_eq!(
            registry.lookup("min", 1),
            Lookup::Found(FunctionKind::Aggregate(AggregateKind::Min))
        );
        assert_eq!(
            registry.lookup("max", 2),
            Lookup::Found(FunctionKind::Pairwise(PairwiseFn::Max))
        );
        assert_eq!(
            registry.lookup("min", 3),
            Lookup::WrongArity {
                accepted: vec![1, 2]
            }
        );
    }

    #[test]
    fn unknown_names_are_reported() {
        let registry = FunctionRegistry::standard();
        assert_eq!(registry.lookup("eval", 1), Lookup::UnknownName);
        assert_eq!(
            registry.lookup("curl", 1),
            Lookup::WrongArity { accepted: vec![2] }
        );
        assert_eq!(
            registry.lookup("laplacian", 1),
            Lookup::Found(FunctionKind::Spatial(SpatialOp::Laplacian))
        );
        assert!(registry.names().any(|name| name == "median"));
    }

    #[test]
    fn math_domain_errors_become_nan() {
        assert!(MathFn::Sqrt.apply(-1.0).is_nan());
        assert!(MathFn::Log.apply(0.0).is_nan());
        assert!(MathFn::Exp.apply(1000.0).is_nan());
        assert_eq!(MathFn::Round.apply(2.5), 2.0);
        assert_eq!(MathFn::Abs.apply(-3.0), 3.0);
        assert!(PairwiseFn::Min.apply(f64::NAN, 1.0).is_nan());
        assert_eq!(PairwiseFn::Pow.apply(2.0, 10.0), 1024.0);
    }
}
