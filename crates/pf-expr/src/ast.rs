use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use pf_columnar::ArithmeticOp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
}

/// Parsed formula tree. Function names are kept verbatim; binding them is
/// the resolver's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: f64,
    },
    VarRef {
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    #[must_use]
    pub fn literal(value: f64) -> Self {
        Self::Literal { value }
    }

    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::VarRef { name: name.into() }
    }

    #[must_use]
    pub fn neg(operand: Self) -> Self {
        Self::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }
    }

    #[must_use]
    pub fn binary(op: ArithmeticOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn call(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Call {
            name: name.into(),
            args,
        }
    }

    /// Every variable name referenced anywhere in the tree.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Literal { .. } => {}
            Self::VarRef { name } => {
                out.insert(name.clone());
            }
            Self::Unary { operand, .. } => operand.collect_variables(out),
            Self::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }

    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        match self {
            Self::Literal { .. } => false,
            Self::VarRef { name: candidate } => candidate == name,
            Self::Unary { operand, .. } => operand.references(name),
            Self::Binary { left, right, .. } => left.references(name) || right.references(name),
            Self::Call { args, .. } => args.iter().any(|arg| arg.references(name)),
        }
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            // Debug gives the shortest string that parses back to the same bits.
            Self::Literal { value } => {
                let _ = write!(out, "{value:?}");
            }
            Self::VarRef { name } => out.push_str(name),
            Self::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                out.push_str("(-");
                operand.write_canonical(out);
                out.push(')');
            }
            Self::Binary { op, left, right } => {
                out.push('(');
                left.write_canonical(out);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                right.write_canonical(out);
                out.push(')');
            }
            Self::Call { name, args } => {
                out.push_str(name);
                out.push('(');
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    arg.write_canonical(out);
                }
                out.push(')');
            }
        }
    }

    /// Fully parenthesized rendering with normalized literals. Re-parsing it
    /// yields an equal tree.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use pf_columnar::ArithmeticOp;

    use super::Expr;

    #[test]
    fn canonical_form_parenthesizes_everything() {
        let expr = Expr::binary(
            ArithmeticOp::Add,
            Expr::binary(ArithmeticOp::Pow, Expr::var("u"), Expr::literal(2.0)),
            Expr::neg(Expr::call("sin", vec![Expr::var("v")])),
        );
        assert_eq!(expr.canonical(), "((u ** 2.0) + (-sin(v)))");
    }

    #[test]
    fn literals_use_shortest_round_trip_text() {
        assert_eq!(Expr::literal(0.5).canonical(), "0.5");
        assert_eq!(Expr::literal(1e-7).canonical(), "1e-7");
        assert_eq!(Expr::literal(3.0).canonical(), "3.0");
    }

    #[test]
    fn variable_collection_ignores_function_names() {
        let expr = Expr::call(
            "div",
            vec![Expr::var("u"), Expr::call("mean", vec![Expr::var("v")])],
        );
        let vars: Vec<String> = expr.variables().into_iter().collect();
        assert_eq!(vars, vec!["u".to_owned(), "v".to_owned()]);
        assert!(expr.references("v"));
        assert!(!expr.references("div"));
    }

    #[test]
    fn ast_serializes_with_kind_tags() {
        let json = serde_json::to_value(Expr::var("p")).expect("serialize");
        assert_eq!(json, serde_json::json!({"kind": "var_ref", "name": "p"}));
    }
}
