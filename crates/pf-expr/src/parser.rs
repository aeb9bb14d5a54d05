use pf_columnar::ArithmeticOp;
use pf_types::{FormulaScope, is_identifier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::Expr;

pub const DEFAULT_MAX_DEPTH: usize = 128;

const END_OF_INPUT: &str = "end of input";

/// Rejected formula text. `offset` counts characters from the start of the
/// input.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} at offset {offset} (found {token:?})")]
pub struct ParseError {
    pub offset: usize,
    pub token: String,
    pub message: String,
}

impl ParseError {
    fn new(offset: usize, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            offset,
            token: token.into(),
            message: message.into(),
        }
    }
}

/// A parsed formula. Immutable once built; identical text always yields an
/// identical signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    text: String,
    expr: Expr,
    scope: FormulaScope,
    signature: String,
}

impl Formula {
    #[must_use]
    pub fn new(text: impl Into<String>, expr: Expr, scope: FormulaScope) -> Self {
        let signature = format!("{}:{}", scope.signature_prefix(), expr.canonical());
        Self {
            text: text.into(),
            expr,
            scope,
            signature,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    #[must_use]
    pub fn scope(&self) -> FormulaScope {
        self.scope
    }

    /// Scope-prefixed canonical rendering, used as the cache identity.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Parse with the default nesting bound.
pub fn parse(text: &str, scope: FormulaScope) -> Result<Formula, ParseError> {
    parse_with_depth(text, scope, DEFAULT_MAX_DEPTH)
}

/// Grammar:
///
/// ```text
///   expr     → additive
///   additive → term ( ("+" | "-") term )*
///   term     → unary ( ("*" | "/") unary )*
///   unary    → ("-" | "+") unary | power
///   power    → atom ( "**" unary )?
///   atom     → NUMBER | IDENT | IDENT "(" args? ")" | "(" expr ")"
///   args     → expr ( "," expr )*
/// ```
pub fn parse_with_depth(
    text: &str,
    scope: FormulaScope,
    max_depth: usize,
) -> Result<Formula, ParseError> {
    let expr = parse_expr(text, max_depth)?;
    Ok(Formula::new(text, expr, scope))
}

/// Split `name = expr` and parse the right side in constant scope.
pub fn parse_constant_definition(
    text: &str,
    max_depth: usize,
) -> Result<(String, Formula), ParseError> {
    let Some((name_part, body)) = text.split_once('=') else {
        return Err(ParseError::new(
            text.chars().count(),
            END_OF_INPUT,
            "constant definition must have the form `name = expression`",
        ));
    };
    let name = name_part.trim();
    if !is_identifier(name) {
        let offset = name_part.chars().take_while(|c| c.is_whitespace()).count();
        return Err(ParseError::new(offset, name, "invalid constant name"));
    }

    let body_offset = name_part.chars().count() + 1;
    let expr = parse_expr(body, max_depth).map_err(|err| ParseError {
        offset: err.offset + body_offset,
        ..err
    })?;
    Ok((
        name.to_owned(),
        Formula::new(body.trim(), expr, FormulaScope::Constant),
    ))
}

fn parse_expr(text: &str, max_depth: usize) -> Result<Expr, ParseError> {
    let tokens = tokenize(text)?;
    let end = text.chars().count();
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
        max_depth,
        end,
    };
    if tokens.is_empty() {
        return Err(ParseError::new(0, END_OF_INPUT, "empty expression"));
    }
    let expr = parser.additive()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError::new(
            extra.offset,
            extra.text.clone(),
            "unexpected token after complete expression",
        ));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
    text: String,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = match c {
            '+' => {
                i += 1;
                TokenKind::Plus
            }
            '-' => {
                i += 1;
                TokenKind::Minus
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    i += 2;
                    TokenKind::DoubleStar
                } else {
                    i += 1;
                    TokenKind::Star
                }
            }
            '/' => {
                i += 1;
                TokenKind::Slash
            }
            '(' => {
                i += 1;
                TokenKind::LParen
            }
            ')' => {
                i += 1;
                TokenKind::RParen
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let (value, next) = lex_number(&chars, start)?;
                i = next;
                TokenKind::Number(value)
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                TokenKind::Ident(chars[start..i].iter().collect())
            }
            _ => {
                return Err(ParseError::new(
                    start,
                    c.to_string(),
                    "unexpected character",
                ));
            }
        };
        tokens.push(Token {
            kind,
            offset: start,
            text: chars[start..i].iter().collect(),
        });
    }
    Ok(tokens)
}

// digits* ("." digits*)? ([eE] [+-]? digits+)?, with at least one mantissa digit.
fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), ParseError> {
    let mut i = start;
    let mut mantissa_digits = 0;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return Err(ParseError::new(start, ".", "malformed number"));
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        let digits_start = j;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        if j == digits_start {
            let text: String = chars[start..j].iter().collect();
            return Err(ParseError::new(start, text, "malformed exponent"));
        }
        i = j;
    }
    let text: String = chars[start..i].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ParseError::new(start, text.clone(), "malformed number"))?;
    Ok((value, i))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    max_depth: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn error_here(&self, message: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::new(token.offset, token.text.clone(), message),
            None => ParseError::new(self.end, END_OF_INPUT, message),
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<(), ParseError> {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => ArithmeticOp::Add,
                Some(TokenKind::Minus) => ArithmeticOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => ArithmeticOp::Mul,
                Some(TokenKind::Slash) => ArithmeticOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    // Every level of nesting passes through here, so this is where the
    // depth bound is enforced.
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.depth >= self.max_depth {
            return Err(self.error_here(&format!(
                "expression nests deeper than {} levels",
                self.max_depth
            )));
        }
        self.depth += 1;
        let result = match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.pos += 1;
                self.unary().map(Expr::neg)
            }
            Some(TokenKind::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        };
        self.depth -= 1;
        result
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.atom()?;
        if self.peek_kind() == Some(&TokenKind::DoubleStar) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::binary(ArithmeticOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        match &token.kind {
            TokenKind::Number(value) => {
                let value = *value;
                self.pos += 1;
                Ok(Expr::literal(value))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.pos += 1;
                if self.peek_kind() != Some(&TokenKind::LParen) {
                    return Ok(Expr::var(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek_kind() != Some(&TokenKind::RParen) {
                    args.push(self.additive()?);
                    while self.peek_kind() == Some(&TokenKind::Comma) {
                        self.pos += 1;
                        args.push(self.additive()?);
                    }
                }
                self.expect(&TokenKind::RParen, "expected ',' or ')' in argument list")?;
                Ok(Expr::call(name, args))
            }
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.additive()?;
                self.expect(&TokenKind::RParen, "expected closing ')'")?;
                Ok(inner)
            }
            _ => Err(self.error_here("expected a number, name or '('")),
        }
    }
}

#[cfg(test)]
mod tests {
    use pf_columnar::ArithmeticOp;
    use pf_types::FormulaScope;

    use super::{ParseError, parse, parse_constant_definition, parse_with_depth};
    use crate::ast::Expr;

    fn row(text: &str) -> Expr {
        parse(text, FormulaScope::Row).expect("parse").expr().clone()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(
            row("a + b * c"),
            Expr::binary(
                ArithmeticOp::Add,
                Expr::var("a"),
                Expr::binary(ArithmeticOp::Mul, Expr::var("b"), Expr::var("c")),
            )
        );
        assert_eq!(
            parse("a - b - c", FormulaScope::Row).expect("parse").signature(),
            "row:((a - b) - c)"
        );
        assert_eq!(
            parse("2 ** 3 ** 2", FormulaScope::Row).expect("parse").signature(),
            "row:(2.0 ** (3.0 ** 2.0))"
        );
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        assert_eq!(
            row("-x ** 2"),
            Expr::neg(Expr::binary(ArithmeticOp::Pow, Expr::var("x"), Expr::literal(2.0)))
        );
        assert_eq!(
            row("2 ** -1"),
            Expr::binary(ArithmeticOp::Pow, Expr::literal(2.0), Expr::neg(Expr::literal(1.0)))
        );
    }

    #[test]
    fn unary_plus_is_elided() {
        assert_eq!(row("+u"), Expr::var("u"));
        assert_eq!(row("-+-u"), Expr::neg(Expr::neg(Expr::var("u"))));
    }

    #[test]
    fn number_forms() {
        for (text, value) in [
            ("12", 12.0),
            ("1.5", 1.5),
            (".5", 0.5),
            ("3.", 3.0),
            ("1e-3", 1e-3),
            ("2.5E+4", 2.5e4),
        ] {
            assert_eq!(row(text), Expr::literal(value), "{text}");
        }
    }

    #[test]
    fn calls_and_argument_lists() {
        assert_eq!(
            row("div(u, v * 2)"),
            Expr::call(
                "div",
                vec![
                    Expr::var("u"),
                    Expr::binary(ArithmeticOp::Mul, Expr::var("v"), Expr::literal(2.0)),
                ],
            )
        );
        assert_eq!(row("f()"), Expr::call("f", Vec::new()));
    }

    #[test]
    fn whitespace_and_redundant_parens_do_not_change_signature() {
        let a = parse("u**2+v**2", FormulaScope::Row).expect("a");
        let b = parse(" ( u ** 2 ) + (v**2) ", FormulaScope::Row).expect("b");
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature(), "row:((u ** 2.0) + (v ** 2.0))");

        let c = parse("u**2+v**2", FormulaScope::Constant).expect("c");
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn errors_carry_offset_and_token() {
        let err = parse("u + * v", FormulaScope::Row).expect_err("missing operand");
        assert_eq!(err.offset, 4);
        assert_eq!(err.token, "*");

        let err = parse("sin(u", FormulaScope::Row).expect_err("unclosed call");
        assert_eq!(err.offset, 5);
        assert_eq!(err.token, "end of input");

        let err = parse("u $ v", FormulaScope::Row).expect_err("bad char");
        assert_eq!(
            err,
            ParseError {
                offset: 2,
                token: "$".to_owned(),
                message: "unexpected character".to_owned(),
            }
        );

        let err = parse("2x", FormulaScope::Row).expect_err("juxtaposition");
        assert_eq!((err.offset, err.token.as_str()), (1, "x"));

        assert!(parse("1e", FormulaScope::Row).is_err());
        assert!(parse("   ", FormulaScope::Row).is_err());
        assert!(parse(".", FormulaScope::Row).is_err());
    }

    #[test]
    fn depth_bound_rejects_pathological_nesting() {
        let deep = format!("{}u{}", "(".repeat(200), ")".repeat(200));
        let err = parse(&deep, FormulaScope::Row).expect_err("too deep");
        assert!(err.message.contains("deeper than 128"));

        let shallow = format!("{}u{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(
            parse_with_depth(&shallow, FormulaScope::Row, 32)
                .expect("within bound")
                .expr(),
            &Expr::var("u")
        );
        assert!(parse(&"-".repeat(500), FormulaScope::Row).is_err());
    }

    #[test]
    fn constant_definitions_split_on_equals() {
        let (name, formula) =
            parse_constant_definition("u_mean = mean(u)", 128).expect("definition");
        assert_eq!(name, "u_mean");
        assert_eq!(formula.scope(), FormulaScope::Constant);
        assert_eq!(formula.signature(), "const:mean(u)");
        assert_eq!(formula.text(), "mean(u)");

        let err = parse_constant_definition("2bad = 1", 128).expect_err("bad name");
        assert_eq!(err.token, "2bad");

        let err = parse_constant_definition("k = u +", 128).expect_err("bad body");
        assert_eq!(err.offset, 7);
        assert!(parse_constant_definition("no equals here", 128).is_err());
    }
}
