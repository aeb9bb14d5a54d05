use std::collections::{BTreeMap, BTreeSet};

use pf_columnar::{AggregateKind, ArithmeticOp};
use pf_frame::ConstantSnapshot;
use pf_types::{FormulaScope, VariableKind, builtin_constant};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ast::{Expr, UnaryOp};
use crate::parser::Formula;
use crate::registry::{FunctionKind, FunctionRegistry, Lookup, MathFn, PairwiseFn, SpatialOp};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("{name}() takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("{function}(): {reason}")]
    Dimension { function: String, reason: String },
    #[error("constant formula uses point-varying '{subexpression}' outside an aggregate")]
    ScopeViolation { subexpression: String },
}

/// Names visible to a formula at resolution time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    raw_columns: BTreeSet<String>,
    derived_columns: BTreeSet<String>,
    constants: BTreeMap<String, u64>,
    coordinates: Option<(String, String)>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_raw_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_columns.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_derived_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_columns.extend(names.into_iter().map(Into::into));
        self
    }

    /// Published constants only; versions start at 1.
    #[must_use]
    pub fn with_constant(mut self, name: impl Into<String>, version: u64) -> Self {
        self.constants.insert(name.into(), version);
        self
    }

    #[must_use]
    pub fn with_constants(mut self, snapshot: &ConstantSnapshot) -> Self {
        for constant in snapshot.iter() {
            self.constants.insert(constant.name.clone(), constant.version);
        }
        self
    }

    #[must_use]
    pub fn with_coordinates(mut self, x: impl Into<String>, y: impl Into<String>) -> Self {
        self.coordinates = Some((x.into(), y.into()));
        self
    }

    #[must_use]
    pub fn coordinates(&self) -> Option<(&str, &str)> {
        self.coordinates
            .as_ref()
            .map(|(x, y)| (x.as_str(), y.as_str()))
    }

    #[must_use]
    pub fn is_column(&self, name: &str) -> bool {
        self.raw_columns.contains(name) || self.derived_columns.contains(name)
    }

    #[must_use]
    pub fn is_raw_column(&self, name: &str) -> bool {
        self.raw_columns.contains(name)
    }

    #[must_use]
    pub fn is_derived_column(&self, name: &str) -> bool {
        self.derived_columns.contains(name)
    }

    #[must_use]
    pub fn constant_version(&self, name: &str) -> Option<u64> {
        self.constants.get(name).copied()
    }

    fn classify(&self, name: &str) -> Option<VariableKind> {
        if self.raw_columns.contains(name) {
            Some(VariableKind::RawColumn)
        } else if self.derived_columns.contains(name) {
            Some(VariableKind::DerivedColumn)
        } else if self.constants.contains_key(name) {
            Some(VariableKind::GlobalConstant)
        } else if builtin_constant(name).is_some() {
            Some(VariableKind::BuiltinConstant)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Literal {
        value: f64,
    },
    Variable {
        name: String,
        binding: VariableKind,
    },
    Negate {
        operand: Box<ResolvedNode>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<ResolvedNode>,
        right: Box<ResolvedNode>,
    },
    Math {
        func: MathFn,
        arg: Box<ResolvedNode>,
    },
    Pairwise {
        func: PairwiseFn,
        left: Box<ResolvedNode>,
        right: Box<ResolvedNode>,
    },
    Aggregate {
        agg: AggregateKind,
        arg: Box<ResolvedNode>,
    },
    Spatial {
        op: SpatialOp,
        args: Vec<ResolvedNode>,
    },
}

/// A bound tree node plus the two facts evaluation planning needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub kind: NodeKind,
    /// Differs from point to point within one frame.
    pub varies_per_point: bool,
    /// Has a spatial call at or below this node.
    pub contains_spatial: bool,
}

impl ResolvedNode {
    fn leaf(kind: NodeKind, varies_per_point: bool) -> Self {
        Self {
            kind,
            varies_per_point,
            contains_spatial: false,
        }
    }
}

/// A formula whose every name is bound. Built once, evaluated many times.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFormula {
    formula: Formula,
    root: ResolvedNode,
    bindings: BTreeMap<String, VariableKind>,
    constants: BTreeMap<String, u64>,
    coordinates: Option<(String, String)>,
}

impl ResolvedFormula {
    #[must_use]
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    #[must_use]
    pub fn root(&self) -> &ResolvedNode {
        &self.root
    }

    #[must_use]
    pub fn scope(&self) -> FormulaScope {
        self.formula.scope()
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        self.formula.signature()
    }

    /// Every name the formula depends on with its binding. Coordinate columns
    /// consumed by spatial calls appear as `SpatialOperandPlaceholder` unless
    /// the formula also names them directly.
    #[must_use]
    pub fn bindings(&self) -> &BTreeMap<String, VariableKind> {
        &self.bindings
    }

    /// Global constants referenced, with the version seen at resolution.
    #[must_use]
    pub fn constants(&self) -> &BTreeMap<String, u64> {
        &self.constants
    }

    #[must_use]
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|(_, kind)| kind.is_column())
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn contains_spatial(&self) -> bool {
        self.root.contains_spatial
    }

    #[must_use]
    pub fn coordinates(&self) -> Option<(&str, &str)> {
        self.coordinates
            .as_ref()
            .map(|(x, y)| (x.as_str(), y.as_str()))
    }
}

pub fn resolve(
    formula: &Formula,
    symbols: &SymbolTable,
    registry: &FunctionRegistry,
) -> Result<ResolvedFormula, ResolveError> {
    let mut resolver = Resolver {
        symbols,
        registry,
        bindings: BTreeMap::new(),
        constants: BTreeMap::new(),
    };
    let root = resolver.node(formula.expr())?;

    if formula.scope() == FormulaScope::Constant {
        if let Some(sub) = point_varying_outside_aggregate(&root) {
            return Err(ResolveError::ScopeViolation { subexpression: sub });
        }
    }

    if root.contains_spatial {
        if let Some((x, y)) = symbols.coordinates() {
            for axis in [x, y] {
                resolver
                    .bindings
                    .entry(axis.to_owned())
                    .or_insert(VariableKind::SpatialOperandPlaceholder);
            }
        }
    }

    debug!(
        signature = formula.signature(),
        bindings = resolver.bindings.len(),
        spatial = root.contains_spatial,
        "resolved formula"
    );

    Ok(ResolvedFormula {
        formula: formula.clone(),
        root,
        bindings: resolver.bindings,
        constants: resolver.constants,
        coordinates: symbols.coordinates.clone(),
    })
}

struct Resolver<'a> {
    symbols: &'a SymbolTable,
    registry: &'a FunctionRegistry,
    bindings: BTreeMap<String, VariableKind>,
    constants: BTreeMap<String, u64>,
}

impl Resolver<'_> {
    fn node(&mut self, expr: &Expr) -> Result<ResolvedNode, ResolveError> {
        match expr {
            Expr::Literal { value } => Ok(ResolvedNode::leaf(
                NodeKind::Literal { value: *value },
                false,
            )),
            Expr::VarRef { name } => {
                let binding = self.symbols.classify(name).ok_or_else(|| {
                    ResolveError::UnknownIdentifier { name: name.clone() }
                })?;
                self.bindings.insert(name.clone(), binding);
                if binding == VariableKind::GlobalConstant {
                    let version = self.symbols.constant_version(name).unwrap_or_default();
                    self.constants.insert(name.clone(), version);
                }
                Ok(ResolvedNode::leaf(
                    NodeKind::Variable {
                        name: name.clone(),
                        binding,
                    },
                    binding.is_column(),
                ))
            }
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let operand = self.node(operand)?;
                Ok(ResolvedNode {
                    varies_per_point: operand.varies_per_point,
                    contains_spatial: operand.contains_spatial,
                    kind: NodeKind::Negate {
                        operand: Box::new(operand),
                    },
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.node(left)?;
                let right = self.node(right)?;
                Ok(ResolvedNode {
                    varies_per_point: left.varies_per_point || right.varies_per_point,
                    contains_spatial: left.contains_spatial || right.contains_spatial,
                    kind: NodeKind::Arithmetic {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<ResolvedNode, ResolveError> {
        let kind = match self.registry.lookup(name, args.len()) {
            Lookup::Found(kind) => kind,
            Lookup::UnknownName => {
                return Err(ResolveError::UnknownFunction {
                    name: name.to_owned(),
                });
            }
            Lookup::WrongArity { accepted } => {
                let expected = accepted
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or ");
                return Err(ResolveError::Arity {
                    name: name.to_owned(),
                    expected,
                    found: args.len(),
                });
            }
        };

        let mut resolved = args
            .iter()
            .map(|arg| self.node(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let varies = resolved.iter().any(|arg| arg.varies_per_point);
        let spatial_below = resolved.iter().any(|arg| arg.contains_spatial);

        let node = match kind {
            FunctionKind::Math(func) => {
                let arg = pop_one(&mut resolved);
                ResolvedNode {
                    kind: NodeKind::Math {
                        func,
                        arg: Box::new(arg),
                    },
                    varies_per_point: varies,
                    contains_spatial: spatial_below,
                }
            }
            FunctionKind::Pairwise(func) => {
                let right = pop_one(&mut resolved);
                let left = pop_one(&mut resolved);
                ResolvedNode {
                    kind: NodeKind::Pairwise {
                        func,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    varies_per_point: varies,
                    contains_spatial: spatial_below,
                }
            }
            FunctionKind::Aggregate(agg) => {
                let arg = pop_one(&mut resolved);
                ResolvedNode {
                    kind: NodeKind::Aggregate {
                        agg,
                        arg: Box::new(arg),
                    },
                    varies_per_point: false,
                    contains_spatial: spatial_below,
                }
            }
            FunctionKind::Spatial(op) => {
                self.check_spatial(op, &resolved)?;
                ResolvedNode {
                    kind: NodeKind::Spatial { op, args: resolved },
                    varies_per_point: true,
                    contains_spatial: true,
                }
            }
        };
        Ok(node)
    }

    fn check_spatial(&self, op: SpatialOp, args: &[ResolvedNode]) -> Result<(), ResolveError> {
        let dimension = |reason: String| ResolveError::Dimension {
            function: op.name().to_owned(),
            reason,
        };
        let Some((x, y)) = self.symbols.coordinates() else {
            return Err(dimension("no coordinate columns are configured".to_owned()));
        };
        if x == y {
            return Err(dimension(format!(
                "coordinate columns must be distinct, both are '{x}'"
            )));
        }
        for axis in [x, y] {
            if !self.symbols.is_column(axis) {
                return Err(dimension(format!(
                    "coordinate column '{axis}' is not in the frame schema"
                )));
            }
        }
        if let Some(position) = args.iter().position(|arg| !arg.varies_per_point) {
            return Err(dimension(format!(
                "operand {} is constant over the points of a frame",
                position + 1
            )));
        }
        Ok(())
    }
}

// Arity is checked against the registry before any argument is taken.
fn pop_one(args: &mut Vec<ResolvedNode>) -> ResolvedNode {
    args.pop()
        .unwrap_or_else(|| ResolvedNode::leaf(NodeKind::Literal { value: f64::NAN }, false))
}

fn point_varying_outside_aggregate(node: &ResolvedNode) -> Option<String> {
    if !node.varies_per_point {
        return None;
    }
    match &node.kind {
        NodeKind::Variable { name, .. } => Some(name.clone()),
        NodeKind::Spatial { op, .. } => Some(format!("{}(...)", op.name())),
        NodeKind::Negate { operand } => point_varying_outside_aggregate(operand),
        NodeKind::Math { arg, .. } => point_varying_outside_aggregate(arg),
        NodeKind::Arithmetic { left, right, .. } | NodeKind::Pairwise { left, right, .. } => {
            point_varying_outside_aggregate(left).or_else(|| point_varying_outside_aggregate(right))
        }
        NodeKind::Literal { .. } | NodeKind::Aggregate { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use pf_types::{FormulaScope, VariableKind};

    use super::{NodeKind, ResolveError, SymbolTable, resolve};
    use crate::parser::parse;
    use crate::registry::FunctionRegistry;

    fn symbols() -> SymbolTable {
        SymbolTable::new()
            .with_raw_columns(["x", "y", "u", "v", "p"])
            .with_derived_columns(["speed"])
            .with_constant("p_mean", 3)
            .with_coordinates("x", "y")
    }

    fn resolve_text(text: &str, scope: FormulaScope) -> Result<super::ResolvedFormula, ResolveError> {
        let formula = parse(text, scope).expect("parse");
        resolve(&formula, &symbols(), &FunctionRegistry::standard())
    }

    #[test]
    fn names_bind_in_lookup_order() {
        let resolved = resolve_text("u + speed * p_mean + pi", FormulaScope::Row).expect("resolve");
        let bindings = resolved.bindings();
        assert_eq!(bindings["u"], VariableKind::RawColumn);
        assert_eq!(bindings["speed"], VariableKind::DerivedColumn);
        assert_eq!(bindings["p_mean"], VariableKind::GlobalConstant);
        assert_eq!(bindings["pi"], VariableKind::BuiltinConstant);
        assert_eq!(resolved.constants().get("p_mean"), Some(&3));
        assert!(resolved.root().varies_per_point);
        assert!(!resolved.contains_spatial());
    }

    #[test]
    fn raw_column_shadows_builtin_constant() {
        let table = SymbolTable::new().with_raw_columns(["g"]);
        let formula = parse("g * 2", FormulaScope::Row).expect("parse");
        let resolved = resolve(&formula, &table, &FunctionRegistry::standard()).expect("resolve");
        assert_eq!(resolved.bindings()["g"], VariableKind::RawColumn);
    }

    #[test]
    fn unknown_names_and_functions_are_rejected() {
        assert_eq!(
            resolve_text("u + w", FormulaScope::Row).expect_err("unknown"),
            ResolveError::UnknownIdentifier {
                name: "w".to_owned()
            }
        );
        assert_eq!(
            resolve_text("open(u)", FormulaScope::Row).expect_err("unknown fn"),
            ResolveError::UnknownFunction {
                name: "open".to_owned()
            }
        );
        let err = resolve_text("div(u)", FormulaScope::Row).expect_err("arity");
        assert_eq!(
            err,
            ResolveError::Arity {
                name: "div".to_owned(),
                expected: "2".to_owned(),
                found: 1
            }
        );
        assert_eq!(err.to_string(), "div() takes 2 argument(s), got 1");
    }

    #[test]
    fn spatial_calls_mark_nodes_and_coordinates() {
        let resolved = resolve_text("grad_x(u) + mean(p)", FormulaScope::Row).expect("resolve");
        assert!(resolved.contains_spatial());
        assert_eq!(
            resolved.bindings()["x"],
            VariableKind::SpatialOperandPlaceholder
        );
        let NodeKind::Arithmetic { left, right, .. } = &resolved.root().kind else {
            panic!("expected arithmetic root");
        };
        assert!(left.contains_spatial);
        assert!(!right.contains_spatial);
        assert!(!right.varies_per_point);
    }

    #[test]
    fn spatial_operands_must_vary_per_point() {
        let err = resolve_text("grad_x(p_mean)", FormulaScope::Row).expect_err("constant operand");
        assert!(matches!(err, ResolveError::Dimension { ref function, .. } if function == "grad_x"));

        let table = SymbolTable::new().with_raw_columns(["u"]);
        let formula = parse("laplacian(u)", FormulaScope::Row).expect("parse");
        let err = resolve(&formula, &table, &FunctionRegistry::standard()).expect_err("no coords");
        assert!(matches!(err, ResolveError::Dimension { .. }));

        let table = SymbolTable::new()
            .with_raw_columns(["x", "u"])
            .with_coordinates("x", "x");
        let err = resolve(&formula, &table, &FunctionRegistry::standard()).expect_err("same axis");
        assert!(matches!(err, ResolveError::Dimension { .. }));
    }

    #[test]
    fn constant_scope_requires_aggregates_around_columns() {
        let ok = resolve_text("mean(u) / max(v) + 1", FormulaScope::Constant).expect("resolve");
        assert!(!ok.root().varies_per_point);
        assert!(resolve_text("mean(grad_x(u))", FormulaScope::Constant).is_ok());

        let err = resolve_text("mean(u) + v", FormulaScope::Constant).expect_err("bare column");
        assert_eq!(
            err,
            ResolveError::ScopeViolation {
                subexpression: "v".to_owned()
            }
        );
        // The same text is fine per row.
        assert!(resolve_text("mean(u) + v", FormulaScope::Row).is_ok());
    }
}
