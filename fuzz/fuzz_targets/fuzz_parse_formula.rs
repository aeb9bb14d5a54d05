#![no_main]

use libfuzzer_sys::fuzz_target;
use pf_expr::{parse_constant_definition, parse_with_depth};
use pf_types::FormulaScope;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(formula) = parse_with_depth(text, FormulaScope::Row, 64) {
        let canonical = formula.expr().canonical();
        let again = parse_with_depth(&canonical, FormulaScope::Row, usize::MAX)
            .expect("canonical text must parse");
        assert_eq!(again.signature(), formula.signature());
    }
    let _ = parse_constant_definition(text, 64);
});
