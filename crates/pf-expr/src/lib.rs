#![forbid(unsafe_code)]

//! Formula language for point-cloud frames: parsing, name binding against a
//! symbol table, and evaluation per point, on a grid, or across a dataset.
//!
//! ```text
//! text --parse--> Formula --resolve--> ResolvedFormula --evaluate--> EvaluationResult
//! ```

mod ast;
mod eval;
mod parser;
mod registry;
mod resolve;

pub use ast::{Expr, UnaryOp};
pub use eval::{
    EvalContext, Evaluation, EvaluationResult, ExprError, Value, evaluate, evaluate_dataset,
};
pub use parser::{
    DEFAULT_MAX_DEPTH, Formula, ParseError, parse, parse_constant_definition, parse_with_depth,
};
pub use registry::{FunctionKind, FunctionRegistry, Lookup, MathFn, PairwiseFn, SpatialOp};
pub use resolve::{NodeKind, ResolveError, ResolvedFormula, ResolvedNode, SymbolTable, resolve};

use pf_types::FormulaScope;

/// Parse `text` and bind it against `symbols` using the standard function set.
pub fn parse_and_resolve(
    text: &str,
    scope: FormulaScope,
    symbols: &SymbolTable,
    max_depth: usize,
) -> Result<ResolvedFormula, ExprError> {
    let formula = parse_with_depth(text, scope, max_depth)?;
    Ok(resolve(&formula, symbols, &FunctionRegistry::standard())?)
}

#[cfg(test)]
mod tests {
    use pf_types::FormulaScope;

    use super::{DEFAULT_MAX_DEPTH, ExprError, SymbolTable, parse_and_resolve};

    #[test]
    fn parse_and_resolve_reports_each_stage() {
        let symbols = SymbolTable::new().with_raw_columns(["u", "v"]);
        let resolved = parse_and_resolve("u * v", FormulaScope::Row, &symbols, DEFAULT_MAX_DEPTH)
            .expect("resolves");
        assert_eq!(resolved.signature(), "row:(u * v)");

        let err = parse_and_resolve("u *", FormulaScope::Row, &symbols, DEFAULT_MAX_DEPTH)
            .expect_err("truncated");
        assert!(matches!(err, ExprError::Parse(_)));

        let err = parse_and_resolve("u * w", FormulaScope::Row, &symbols, DEFAULT_MAX_DEPTH)
            .expect_err("unknown");
        assert!(matches!(err, ExprError::Resolve(_)));
    }
}
