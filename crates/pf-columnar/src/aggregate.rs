use serde::{Deserialize, Serialize};

/// Reductions shared by frame-scope and dataset-scope aggregates.
///
/// NaN samples are skipped. A reduction over no finite samples is NaN,
/// except `sum`, whose empty value is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Mean,
    Sum,
    /// Population standard deviation (denominator N).
    Std,
    /// Population variance (denominator N).
    Var,
    Min,
    Max,
    Median,
}

impl AggregateKind {
    pub const ALL: [Self; 7] = [
        Self::Mean,
        Self::Sum,
        Self::Std,
        Self::Var,
        Self::Min,
        Self::Max,
        Self::Median,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Std => "std",
            Self::Var => "var",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    #[must_use]
    pub fn reduce(self, values: &[f64]) -> f64 {
        let finite = values.iter().copied().filter(|value| !value.is_nan());
        match self {
            Self::Sum => finite.sum(),
            Self::Mean => mean(values),
            Self::Var => population_variance(values),
            Self::Std => population_variance(values).sqrt(),
            Self::Min => finite.fold(f64::NAN, f64::min),
            Self::Max => finite.fold(f64::NAN, f64::max),
            Self::Median => median(values),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

// Two-pass: the single-pass E[x²]−E[x]² form loses precision on offset data.
fn population_variance(values: &[f64]) -> f64 {
    let center = mean(values);
    if center.is_nan() {
        return f64::NAN;
    }
    let (sum_sq, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0_usize), |(acc, count), value| {
            let delta = value - center;
            (acc + delta * delta, count + 1)
        });
    sum_sq / count as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// The six per-column figures published as `<column>_global_<stat>` constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub mean: f64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub var: f64,
}

impl ColumnStatistics {
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            mean: AggregateKind::Mean.reduce(values),
            sum: AggregateKind::Sum.reduce(values),
            min: AggregateKind::Min.reduce(values),
            max: AggregateKind::Max.reduce(values),
            std: AggregateKind::Std.reduce(values),
            var: AggregateKind::Var.reduce(values),
        }
    }

    /// `(suffix, value)` pairs in publication order.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("mean", self.mean),
            ("sum", self.sum),
            ("min", self.min),
            ("max", self.max),
            ("std", self.std),
            ("var", self.var),
        ]
    }
}
