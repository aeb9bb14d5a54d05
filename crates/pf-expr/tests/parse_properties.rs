//! Property tests for formula parsing and signatures.

use pf_expr::{DEFAULT_MAX_DEPTH, parse, parse_with_depth};
use pf_types::FormulaScope;
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec!["u", "v", "w", "pi", "k_2"]).prop_map(str::to_owned),
        (0u32..1000).prop_map(|n| n.to_string()),
        (0u32..100, 0u32..100).prop_map(|(int, frac)| format!("{int}.{frac}")),
        (1u32..9, -12i32..12).prop_map(|(m, e)| format!("{m}e{e}")),
    ]
}

fn formula_text() -> impl Strategy<Value = String> {
    leaf().prop_recursive(5, 48, 3, |inner| {
        prop_oneof![
            (
                inner.clone(),
                prop::sample::select(vec!["+", "-", "*", "/", "**"]),
                inner.clone()
            )
                .prop_map(|(left, op, right)| format!("{left} {op} {right}")),
            inner.clone().prop_map(|expr| format!("({expr})")),
            inner.clone().prop_map(|expr| format!("-{expr}")),
            (
                prop::sample::select(vec!["sin", "sqrt", "mean", "grad_x", "abs"]),
                inner.clone()
            )
                .prop_map(|(func, arg)| format!("{func}({arg})")),
            (prop::sample::select(vec!["min", "pow", "div"]), inner.clone(), inner)
                .prop_map(|(func, a, b)| format!("{func}({a}, {b})")),
        ]
    })
}

proptest! {
    #[test]
    fn prop_signature_is_deterministic(text in formula_text()) {
        let first = parse(&text, FormulaScope::Row).expect("generated text parses");
        let second = parse(&text, FormulaScope::Row).expect("generated text parses");
        prop_assert_eq!(first.signature(), second.signature());
        prop_assert!(first.signature().starts_with("row:"));
    }

    #[test]
    fn prop_canonical_text_reparses_to_same_tree(text in formula_text()) {
        let formula = parse(&text, FormulaScope::Row).expect("generated text parses");
        let canonical = formula.expr().canonical();
        let reparsed = parse(&canonical, FormulaScope::Row).expect("canonical text parses");
        prop_assert_eq!(reparsed.expr(), formula.expr());
        prop_assert_eq!(reparsed.signature(), formula.signature());
    }

    #[test]
    fn prop_whitespace_does_not_change_signature(text in formula_text()) {
        let padded: String = text
            .chars()
            .flat_map(|c| match c {
                '(' | ')' | ',' => vec![' ', c, ' '],
                _ => vec![c],
            })
            .collect();
        let plain = parse(&text, FormulaScope::Row).expect("plain parses");
        let spaced = parse(&padded, FormulaScope::Row).expect("padded parses");
        prop_assert_eq!(plain.signature(), spaced.signature());
    }

    #[test]
    fn prop_scope_is_part_of_the_signature(text in formula_text()) {
        let row = parse(&text, FormulaScope::Row).expect("row parses");
        let constant = parse(&text, FormulaScope::Constant).expect("constant parses");
        prop_assert_ne!(row.signature(), constant.signature());
    }

    #[test]
    fn prop_nesting_beyond_the_limit_is_rejected(depth in 1usize..40) {
        let text = format!("{}u{}", "(".repeat(depth), ")".repeat(depth));
        let shallow = parse_with_depth(&text, FormulaScope::Row, depth + 1);
        prop_assert!(shallow.is_ok());
        let deep = format!("{}u", "-".repeat(DEFAULT_MAX_DEPTH + depth));
        prop_assert!(parse(&deep, FormulaScope::Row).is_err());
    }
}
