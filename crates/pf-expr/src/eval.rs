use std::cell::{Cell, OnceCell};

use pf_columnar::{AggregateKind, Column, ColumnError};
use pf_frame::{ConstantSnapshot, Frame, FrameError};
use pf_grid::{
    GridError, GridField, GridGeometry, Interpolator, curl2d, divergence, gradient_x, gradient_y,
    laplacian, resample,
};
use pf_types::{FormulaScope, GridSpec, OutputMode, VariableKind, builtin_constant};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::ParseError;
use crate::registry::SpatialOp;
use crate::resolve::{NodeKind, ResolveError, ResolvedFormula, ResolvedNode};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("global constant '{name}' is missing from the constant snapshot")]
    Reference { name: String },
    #[error("formula is declared in {found:?} scope but {expected:?} scope is required")]
    ScopeMismatch {
        expected: FormulaScope,
        found: FormulaScope,
    },
    #[error("gridding needs coordinate columns but none are configured")]
    MissingCoordinates,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Intermediate value of one node within one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Points(Column),
    Grid(GridField),
}

impl Value {
    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Self::Scalar(value) => Self::Scalar(f(value)),
            Self::Points(column) => Self::Points(column.map(f)),
            Self::Grid(grid) => Self::Grid(grid.map(f)),
        }
    }

    fn reduce(&self, agg: AggregateKind) -> f64 {
        match self {
            Self::Scalar(value) => agg.reduce(&[*value]),
            Self::Points(column) => column.aggregate(agg),
            Self::Grid(grid) => agg.reduce(grid.values()),
        }
    }
}

/// What `evaluate` hands back: per-point values in frame order, or a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum EvaluationResult {
    Points(Column),
    Grid(GridField),
}

impl EvaluationResult {
    /// Point count or grid node count.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Points(column) => column.len(),
            Self::Grid(grid) => grid.values().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Points(column) => column.values(),
            Self::Grid(grid) => grid.values(),
        }
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Points(column) => column.byte_size(),
            Self::Grid(grid) => grid.byte_size(),
        }
    }

    #[must_use]
    pub fn as_points(&self) -> Option<&Column> {
        match self {
            Self::Points(column) => Some(column),
            Self::Grid(_) => None,
        }
    }

    #[must_use]
    pub fn as_grid(&self) -> Option<&GridField> {
        match self {
            Self::Grid(grid) => Some(grid),
            Self::Points(_) => None,
        }
    }
}

/// One frame's evaluation state. The scattered-to-grid preparation
/// (triangulation, neighbour index) is built on first use and shared by every
/// spatial operand evaluated through this context.
#[derive(Debug)]
pub struct EvalContext<'a> {
    frame: &'a Frame,
    constants: &'a ConstantSnapshot,
    coordinates: Option<(&'a str, &'a str)>,
    spec: GridSpec,
    prepared: OnceCell<Interpolator>,
    interpolations: Cell<u64>,
}

impl<'a> EvalContext<'a> {
    #[must_use]
    pub fn new(
        frame: &'a Frame,
        constants: &'a ConstantSnapshot,
        coordinates: Option<(&'a str, &'a str)>,
        spec: GridSpec,
    ) -> Self {
        Self {
            frame,
            constants,
            coordinates,
            spec,
            prepared: OnceCell::new(),
            interpolations: Cell::new(0),
        }
    }

    #[must_use]
    pub fn frame(&self) -> &Frame {
        self.frame
    }

    /// Scattered-to-grid interpolations performed so far.
    #[must_use]
    pub fn interpolation_count(&self) -> u64 {
        self.interpolations.get()
    }

    /// One value per point of the frame, in frame order.
    pub fn evaluate_points(&self, resolved: &ResolvedFormula) -> Result<Column, ExprError> {
        ensure_scope(resolved, FormulaScope::Row)?;
        match self.eval(resolved.root(), false)? {
            Value::Scalar(value) => Ok(Column::broadcast(value, self.frame.len())),
            Value::Points(column) => Ok(column),
            Value::Grid(grid) => self.to_points(&grid),
        }
    }

    /// The formula on this context's grid. Formulas without spatial calls are
    /// evaluated per point and interpolated.
    pub fn evaluate_grid(&self, resolved: &ResolvedFormula) -> Result<GridField, ExprError> {
        ensure_scope(resolved, FormulaScope::Row)?;
        let value = self.eval(resolved.root(), true)?;
        self.to_grid(value)
    }

    fn eval(&self, node: &ResolvedNode, want_grid: bool) -> Result<Value, ExprError> {
        // Only subtrees with a spatial call are worth keeping on the grid.
        let child_grid = |child: &ResolvedNode| want_grid && child.contains_spatial;
        match &node.kind {
            NodeKind::Literal { value } => Ok(Value::Scalar(*value)),
            NodeKind::Variable { name, binding } => self.variable(name, *binding),
            NodeKind::Negate { operand } => {
                Ok(self.eval(operand, child_grid(operand))?.map(|value| -value))
            }
            NodeKind::Math { func, arg } => {
                let func = *func;
                Ok(self.eval(arg, child_grid(arg))?.map(|value| func.apply(value)))
            }
            NodeKind::Arithmetic { op, left, right } => {
                let op = *op;
                let lhs = self.eval(left, child_grid(left))?;
                let rhs = self.eval(right, child_grid(right))?;
                self.combine(lhs, rhs, |a, b| op.apply(a, b))
            }
            NodeKind::Pairwise { func, left, right } => {
                let func = *func;
                let lhs = self.eval(left, child_grid(left))?;
                let rhs = self.eval(right, child_grid(right))?;
                self.combine(lhs, rhs, |a, b| func.apply(a, b))
            }
            NodeKind::Aggregate { agg, arg } => {
                Ok(Value::Scalar(self.eval(arg, false)?.reduce(*agg)))
            }
            NodeKind::Spatial { op, args } => {
                let operands = args
                    .iter()
                    .map(|arg| self.eval(arg, true))
                    .collect::<Result<Vec<_>, _>>()?;
                self.spatial(*op, operands, want_grid)
            }
        }
    }

    fn variable(&self, name: &str, binding: VariableKind) -> Result<Value, ExprError> {
        if binding.is_column() {
            return Ok(Value::Points(self.frame.require_column(name)?.clone()));
        }
        scalar_binding(name, binding, self.constants).map(Value::Scalar)
    }

    fn combine(
        &self,
        left: Value,
        right: Value,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ExprError> {
        Ok(match (left, right) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
            (Value::Points(a), Value::Scalar(b)) => Value::Points(a.map(|x| f(x, b))),
            (Value::Scalar(a), Value::Points(b)) => Value::Points(b.map(|x| f(a, x))),
            (Value::Points(a), Value::Points(b)) => Value::Points(a.zip_map(&b, f)?),
            (Value::Grid(a), Value::Scalar(b)) => Value::Grid(a.map(|x| f(x, b))),
            (Value::Scalar(a), Value::Grid(b)) => Value::Grid(b.map(|x| f(a, x))),
            (left, right) => {
                let left = self.to_grid(left)?;
                let right = self.to_grid(right)?;
                Value::Grid(left.zip_map(&right, f)?)
            }
        })
    }

    fn spatial(&self, op: SpatialOp, operands: Vec<Value>, want_grid: bool) -> Result<Value, ExprError> {
        let grids = operands
            .into_iter()
            .map(|operand| self.to_grid(operand))
            .collect::<Result<Vec<_>, _>>()?;
        let out = match (op, grids.as_slice()) {
            (SpatialOp::GradX, [field]) => gradient_x(field),
            (SpatialOp::GradY, [field]) => gradient_y(field),
            (SpatialOp::Laplacian, [field]) => laplacian(field)?,
            (SpatialOp::Div, [u, v]) => divergence(u, v)?,
            (SpatialOp::Curl, [u, v]) => curl2d(u, v)?,
            (op, grids) => {
                return Err(ResolveError::Arity {
                    name: op.name().to_owned(),
                    expected: op.arity().to_string(),
                    found: grids.len(),
                }
                .into());
            }
        };
        if want_grid {
            Ok(Value::Grid(out))
        } else {
            Ok(Value::Points(self.to_points(&out)?))
        }
    }

    fn coordinate_columns(&self) -> Result<(&'a Column, &'a Column), ExprError> {
        let (x, y) = self.coordinates.ok_or(ExprError::MissingCoordinates)?;
        Ok(self.frame.coordinates(x, y)?)
    }

    fn interpolator(&self) -> Result<&Interpolator, ExprError> {
        if let Some(prepared) = self.prepared.get() {
            return Ok(prepared);
        }
        let (xs, ys) = self.coordinate_columns()?;
        let geometry = GridGeometry::from_points(xs.values(), ys.values(), self.spec.resolution)?;
        let prepared = Interpolator::new(xs.values(), ys.values(), geometry, self.spec.method)?;
        Ok(self.prepared.get_or_init(|| prepared))
    }

    fn to_grid(&self, value: Value) -> Result<GridField, ExprError> {
        match value {
            Value::Grid(grid) => Ok(grid),
            Value::Scalar(value) => Ok(GridField::filled(
                *self.interpolator()?.geometry(),
                self.spec.method,
                value,
            )),
            Value::Points(column) => {
                let grid = self.interpolator()?.interpolate(column.values())?;
                self.interpolations.set(self.interpolations.get() + 1);
                Ok(grid)
            }
        }
    }

    fn to_points(&self, grid: &GridField) -> Result<Column, ExprError> {
        let (xs, ys) = self.coordinate_columns()?;
        let values = resample(grid, xs.values(), ys.values(), self.spec.method)?;
        Ok(Column::new(values))
    }
}

fn ensure_scope(resolved: &ResolvedFormula, expected: FormulaScope) -> Result<(), ExprError> {
    if resolved.scope() == expected {
        Ok(())
    } else {
        Err(ExprError::ScopeMismatch {
            expected,
            found: resolved.scope(),
        })
    }
}

fn scalar_binding(
    name: &str,
    binding: VariableKind,
    constants: &ConstantSnapshot,
) -> Result<f64, ExprError> {
    let value = match binding {
        VariableKind::GlobalConstant => constants.value(name),
        _ => builtin_constant(name),
    };
    value.ok_or_else(|| ExprError::Reference {
        name: name.to_owned(),
    })
}

/// Outcome of a single-frame evaluation plus how many interpolations it ran.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: EvaluationResult,
    pub interpolations: u64,
}

/// Evaluate a row formula on one frame. `spatial` is the grid used for
/// spatial calls when the output is per point; grid output uses its own spec.
pub fn evaluate(
    resolved: &ResolvedFormula,
    frame: &Frame,
    constants: &ConstantSnapshot,
    output: OutputMode,
    spatial: GridSpec,
) -> Result<Evaluation, ExprError> {
    let spec = match output {
        OutputMode::Points => spatial,
        OutputMode::Grid { spec } => spec,
    };
    let context = EvalContext::new(frame, constants, resolved.coordinates(), spec);
    let result = match output {
        OutputMode::Points => EvaluationResult::Points(context.evaluate_points(resolved)?),
        OutputMode::Grid { .. } => EvaluationResult::Grid(context.evaluate_grid(resolved)?),
    };
    Ok(Evaluation {
        result,
        interpolations: context.interpolation_count(),
    })
}

/// Dataset-scope intermediate: a scalar, or one value per frame.
enum DatasetValue {
    Scalar(f64),
    PerFrame(Vec<Value>),
}

/// Evaluate a constant formula over every frame. Aggregates reduce the
/// concatenation of all frames; spatial calls run frame by frame.
pub fn evaluate_dataset(
    resolved: &ResolvedFormula,
    frames: &[&Frame],
    constants: &ConstantSnapshot,
    spatial: GridSpec,
) -> Result<(f64, u64), ExprError> {
    ensure_scope(resolved, FormulaScope::Constant)?;
    let contexts: Vec<EvalContext<'_>> = frames
        .iter()
        .map(|frame| EvalContext::new(frame, constants, resolved.coordinates(), spatial))
        .collect();
    let dataset = Dataset {
        contexts: &contexts,
        constants,
    };
    let value = match dataset.eval(resolved.root())? {
        DatasetValue::Scalar(value) => value,
        DatasetValue::PerFrame(_) => {
            return Err(ExprError::ScopeMismatch {
                expected: FormulaScope::Constant,
                found: FormulaScope::Row,
            });
        }
    };
    let interpolations = contexts.iter().map(EvalContext::interpolation_count).sum();
    Ok((value, interpolations))
}

struct Dataset<'c, 'a> {
    contexts: &'c [EvalContext<'a>],
    constants: &'a ConstantSnapshot,
}

impl Dataset<'_, '_> {
    fn eval(&self, node: &ResolvedNode) -> Result<DatasetValue, ExprError> {
        match &node.kind {
            NodeKind::Literal { value } => Ok(DatasetValue::Scalar(*value)),
            NodeKind::Variable { name, binding } if binding.is_column() => self
                .contexts
                .iter()
                .map(|context| context.variable(name, *binding))
                .collect::<Result<Vec<_>, _>>()
                .map(DatasetValue::PerFrame),
            NodeKind::Variable { name, binding } => {
                scalar_binding(name, *binding, self.constants).map(DatasetValue::Scalar)
            }
            NodeKind::Negate { operand } => Ok(self.map(self.eval(operand)?, |value| -value)),
            NodeKind::Math { func, arg } => {
                let func = *func;
                Ok(self.map(self.eval(arg)?, |value| func.apply(value)))
            }
            NodeKind::Arithmetic { op, left, right } => {
                let op = *op;
                self.combine(self.eval(left)?, self.eval(right)?, |a, b| op.apply(a, b))
            }
            NodeKind::Pairwise { func, left, right } => {
                let func = *func;
                self.combine(self.eval(left)?, self.eval(right)?, |a, b| func.apply(a, b))
            }
            NodeKind::Aggregate { agg, arg } => Ok(DatasetValue::Scalar(match self.eval(arg)? {
                DatasetValue::Scalar(value) => agg.reduce(&[value]),
                DatasetValue::PerFrame(values) => {
                    let mut samples = Vec::new();
                    for value in &values {
                        match value {
                            Value::Scalar(value) => samples.push(*value),
                            Value::Points(column) => samples.extend_from_slice(column.values()),
                            Value::Grid(grid) => samples.extend_from_slice(grid.values()),
                        }
                    }
                    agg.reduce(&samples)
                }
            })),
            NodeKind::Spatial { op, args } => {
                let operands = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut out = Vec::with_capacity(self.contexts.len());
                for (idx, context) in self.contexts.iter().enumerate() {
                    let per_frame = operands
                        .iter()
                        .map(|operand| match operand {
                            DatasetValue::Scalar(value) => Value::Scalar(*value),
                            DatasetValue::PerFrame(values) => values
                                .get(idx)
                                .cloned()
                                .unwrap_or(Value::Scalar(f64::NAN)),
                        })
                        .collect();
                    out.push(context.spatial(*op, per_frame, false)?);
                }
                Ok(DatasetValue::PerFrame(out))
            }
        }
    }

    fn map(&self, value: DatasetValue, f: impl Fn(f64) -> f64) -> DatasetValue {
        match value {
            DatasetValue::Scalar(value) => DatasetValue::Scalar(f(value)),
            DatasetValue::PerFrame(values) => {
                DatasetValue::PerFrame(values.into_iter().map(|value| value.map(&f)).collect())
            }
        }
    }

    fn combine(
        &self,
        left: DatasetValue,
        right: DatasetValue,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<DatasetValue, ExprError> {
        let per_frame = |values: Vec<Value>| values.into_iter().map(Some).collect::<Vec<_>>();
        let (lhs, rhs) = match (left, right) {
            (DatasetValue::Scalar(a), DatasetValue::Scalar(b)) => {
                return Ok(DatasetValue::Scalar(f(a, b)));
            }
            (DatasetValue::PerFrame(a), DatasetValue::Scalar(b)) => {
                (per_frame(a), vec![Some(Value::Scalar(b)); self.contexts.len()])
            }
            (DatasetValue::Scalar(a), DatasetValue::PerFrame(b)) => {
                (vec![Some(Value::Scalar(a)); self.contexts.len()], per_frame(b))
            }
            (DatasetValue::PerFrame(a), DatasetValue::PerFrame(b)) => (per_frame(a), per_frame(b)),
        };
        let mut out = Vec::with_capacity(self.contexts.len());
        for ((context, lhs), rhs) in self.contexts.iter().zip(lhs).zip(rhs) {
            if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                out.push(context.combine(lhs, rhs, &f)?);
            }
        }
        Ok(DatasetValue::PerFrame(out))
    }
}
