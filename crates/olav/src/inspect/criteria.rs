//! Acceptance-criteria mini-language.
//!
//! Skills declare per-field threshold comparisons combined with boolean
//! operators, one criterion per line:
//!
//! ```text
//! fail when input_errors > {max_errors}
//! warn when status == notconnect or status == "err-disabled"
//! fail when raw contains "%TRACEBACK" and not protocol == down
//! ```
//!
//! A comparison clause holds when *any* parsed row satisfies it; the
//! pseudo-field `raw` tests against the unparsed output. Ordered
//! comparisons require both sides to be numeric; a non-numeric operand
//! makes the clause false rather than failing the evaluation.

use crate::error::{OlavError, Result};
use crate::fleet::ParsedRow;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Text(String),
    /// `{name}` placeholder bound from the inspection parameters.
    Param(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        field: String,
        op: CmpOp,
        value: Operand,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// One `fail when ...` / `warn when ...` line.
#[derive(Debug, Clone)]
pub struct Criterion {
    pub severity: Severity,
    pub expr: Expr,
    /// The original line, echoed into report bullets.
    pub source: String,
}

impl Criterion {
    /// Parse a criterion line. Blank input returns `None`.
    pub fn parse(line: &str) -> Result<Option<Criterion>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (severity, rest) = if let Some(rest) = line.strip_prefix("fail when ") {
            (Severity::Fail, rest)
        } else if let Some(rest) = line.strip_prefix("warn when ") {
            (Severity::Warn, rest)
        } else {
            return Err(bad(line, "expected 'fail when' or 'warn when'"));
        };
        let tokens = tokenize(rest).map_err(|reason| bad(line, &reason))?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.expr().map_err(|reason| bad(line, &reason))?;
        if parser.pos != tokens.len() {
            return Err(bad(line, "trailing input after expression"));
        }
        Ok(Some(Criterion {
            severity,
            expr,
            source: line.to_string(),
        }))
    }
}

fn bad(line: &str, reason: &str) -> OlavError {
    OlavError::ParseFailed {
        operation: format!("criterion '{line}'"),
        reason: reason.to_string(),
    }
}

/// Everything a criterion can look at for one device.
pub struct EvalContext<'a> {
    pub rows: &'a [ParsedRow],
    pub raw: &'a str,
    pub params: &'a BTreeMap<String, Value>,
}

impl Expr {
    pub fn eval(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Expr::And(a, b) => a.eval(ctx) && b.eval(ctx),
            Expr::Or(a, b) => a.eval(ctx) || b.eval(ctx),
            Expr::Not(inner) => !inner.eval(ctx),
            Expr::Compare { field, op, value } => {
                let needle = match resolve(value, ctx.params) {
                    Some(v) => v,
                    None => return false,
                };
                if field == "raw" {
                    return compare(ctx.raw, *op, &needle);
                }
                ctx.rows.iter().any(|row| {
                    row.get(field)
                        .is_some_and(|actual| compare(actual, *op, &needle))
                })
            }
        }
    }
}

/// Evaluate criteria in severity order: any failing `fail` wins, then any
/// failing `warn`. Returns the matched criteria alongside.
pub fn worst_severity<'a>(
    criteria: &'a [Criterion],
    ctx: &EvalContext<'_>,
) -> (Option<Severity>, Vec<&'a Criterion>) {
    let matched: Vec<&Criterion> = criteria.iter().filter(|c| c.expr.eval(ctx)).collect();
    let severity = if matched.iter().any(|c| c.severity == Severity::Fail) {
        Some(Severity::Fail)
    } else if !matched.is_empty() {
        Some(Severity::Warn)
    } else {
        None
    };
    (severity, matched)
}

fn resolve(operand: &Operand, params: &BTreeMap<String, Value>) -> Option<String> {
    match operand {
        Operand::Number(n) => Some(trim_float(*n)),
        Operand::Text(t) => Some(t.clone()),
        Operand::Param(name) => params.get(name).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    }
}

fn trim_float(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn compare(actual: &str, op: CmpOp, needle: &str) -> bool {
    match op {
        CmpOp::Contains => actual.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()),
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (parse_num(actual), parse_num(needle)) {
                (Some(a), Some(b)) => a == b,
                _ => actual.eq_ignore_ascii_case(needle),
            };
            (op == CmpOp::Eq) == equal
        }
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let (Some(a), Some(b)) = (parse_num(actual), parse_num(needle)) else {
                return false;
            };
            match op {
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                _ => unreachable!(),
            }
        }
    }
}

fn parse_num(s: &str) -> Option<f64> {
    s.trim().replace(',', "").parse().ok()
}

// ── Tokenizer & recursive-descent parser ──────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Param(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    text.push(chars[i]);
                    i += 1;
                }
                if i == chars.len() {
                    return Err("unterminated string literal".into());
                }
                i += 1;
                tokens.push(Token::Text(text));
            }
            '{' => {
                let mut name = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '}' {
                    name.push(chars[i]);
                    i += 1;
                }
                if i == chars.len() {
                    return Err("unterminated parameter placeholder".into());
                }
                i += 1;
                tokens.push(Token::Param(name.trim().to_string()));
            }
            '=' | '!' | '>' | '<' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let (op, width) = match two.as_str() {
                    "==" => (CmpOp::Eq, 2),
                    "!=" => (CmpOp::Ne, 2),
                    ">=" => (CmpOp::Ge, 2),
                    "<=" => (CmpOp::Le, 2),
                    _ if c == '>' => (CmpOp::Gt, 1),
                    _ if c == '<' => (CmpOp::Lt, 1),
                    _ => return Err(format!("unexpected character '{c}'")),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| format!("bad number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-' || chars[i] == '/')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Op(CmpOp::Contains),
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(format!("unexpected character '{c}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.expr()?;
            if !self.eat(&Token::RParen) {
                return Err("missing closing parenthesis".into());
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> std::result::Result<Expr, String> {
        let field = match self.next() {
            Some(Token::Ident(name)) => name.clone(),
            other => return Err(format!("expected field name, got {other:?}")),
        };
        let op = match self.next() {
            Some(Token::Op(op)) => *op,
            other => return Err(format!("expected comparison operator, got {other:?}")),
        };
        let value = match self.next() {
            Some(Token::Number(n)) => Operand::Number(*n),
            Some(Token::Text(t)) => Operand::Text(t.clone()),
            Some(Token::Param(p)) => Operand::Param(p.clone()),
            Some(Token::Ident(word)) => Operand::Text(word.clone()),
            other => return Err(format!("expected value, got {other:?}")),
        };
        Ok(Expr::Compare { field, op, value })
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> ParsedRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ctx<'a>(
        rows: &'a [ParsedRow],
        raw: &'a str,
        params: &'a BTreeMap<String, Value>,
    ) -> EvalContext<'a> {
        EvalContext { rows, raw, params }
    }

    #[test]
    fn threshold_comparison() {
        let criterion = Criterion::parse("fail when input_errors > 0")
            .unwrap()
            .unwrap();
        assert_eq!(criterion.severity, Severity::Fail);

        let rows = vec![row(&[("input_errors", "12")])];
        let params = BTreeMap::new();
        assert!(criterion.expr.eval(&ctx(&rows, "", &params)));

        let rows = vec![row(&[("input_errors", "0")])];
        assert!(!criterion.expr.eval(&ctx(&rows, "", &params)));
    }

    #[test]
    fn parameter_placeholder_binds_at_eval_time() {
        let criterion = Criterion::parse("fail when input_errors > {max_errors}")
            .unwrap()
            .unwrap();
        let rows = vec![row(&[("input_errors", "7")])];

        let mut params = BTreeMap::new();
        params.insert("max_errors".to_string(), Value::from(10));
        assert!(!criterion.expr.eval(&ctx(&rows, "", &params)));

        params.insert("max_errors".to_string(), Value::from(5));
        assert!(criterion.expr.eval(&ctx(&rows, "", &params)));

        // Unbound parameter makes the clause false, never a panic.
        let empty = BTreeMap::new();
        assert!(!criterion.expr.eval(&ctx(&rows, "", &empty)));
    }

    #[test]
    fn boolean_combinators_and_parens() {
        let criterion =
            Criterion::parse("warn when (status == notconnect or status == \"err-disabled\") and not vlan == 999")
                .unwrap()
                .unwrap();
        let params = BTreeMap::new();

        let rows = vec![row(&[("status", "err-disabled"), ("vlan", "10")])];
        assert!(criterion.expr.eval(&ctx(&rows, "", &params)));

        let rows = vec![row(&[("status", "err-disabled"), ("vlan", "999")])];
        assert!(!criterion.expr.eval(&ctx(&rows, "", &params)));

        let rows = vec![row(&[("status", "connected"), ("vlan", "10")])];
        assert!(!criterion.expr.eval(&ctx(&rows, "", &params)));
    }

    #[test]
    fn raw_pseudo_field() {
        let criterion = Criterion::parse("fail when raw contains \"%TRACEBACK\"")
            .unwrap()
            .unwrap();
        let params = BTreeMap::new();
        assert!(criterion.expr.eval(&ctx(&[], "...%TRACEBACK: stack...", &params)));
        assert!(!criterion.expr.eval(&ctx(&[], "all quiet", &params)));
    }

    #[test]
    fn ordered_compare_on_non_numeric_is_false() {
        let criterion = Criterion::parse("fail when status > 5").unwrap().unwrap();
        let rows = vec![row(&[("status", "connected")])];
        let params = BTreeMap::new();
        assert!(!criterion.expr.eval(&ctx(&rows, "", &params)));
    }

    #[test]
    fn numbers_with_thousands_separators() {
        let criterion = Criterion::parse("fail when in_octets >= 1000000")
            .unwrap()
            .unwrap();
        let rows = vec![row(&[("in_octets", "1,234,567")])];
        let params = BTreeMap::new();
        assert!(criterion.expr.eval(&ctx(&rows, "", &params)));
    }

    #[test]
    fn worst_severity_prefers_fail() {
        let criteria = vec![
            Criterion::parse("warn when speed == auto").unwrap().unwrap(),
            Criterion::parse("fail when input_errors > 0").unwrap().unwrap(),
        ];
        let rows = vec![row(&[("speed", "auto"), ("input_errors", "3")])];
        let params = BTreeMap::new();
        let (severity, matched) = worst_severity(&criteria, &ctx(&rows, "", &params));
        assert_eq!(severity, Some(Severity::Fail));
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Criterion::parse("whenever things break").is_err());
        assert!(Criterion::parse("fail when input_errors >").is_err());
        assert!(Criterion::parse("fail when (a == 1").is_err());
        assert!(Criterion::parse("").unwrap().is_none());
        assert!(Criterion::parse("# comment").unwrap().is_none());
    }
}
