//! Safe boolean expressions for `logic.if` nodes and record filters.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! or      = and ( "||" and )*
//! and     = not ( "&&" not )*
//! not     = "!" not | compare
//! compare = primary ( op primary )?        op: == === = != !== > < >= <=
//! primary = literal | path | "(" or ")"
//! ```
//!
//! Literals are strings (single or double quoted), numbers, `true`, `false`,
//! `null` and `undefined`. Paths are dotted identifiers resolved against the
//! evaluation root; a trailing `length` on an array or string yields its size.
//! Missing paths evaluate to null. Numbers compare as f64.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Path(Vec<String>),
    Not(Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed, reusable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(extra) = parser.peek() {
            return Err(ConditionError::UnexpectedToken(extra.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `root` and coerce the result to a boolean.
    pub fn evaluate(&self, root: &Value) -> bool {
        truthy(&eval(&self.expr, root))
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(source: &str, root: &Value) -> Result<bool, ConditionError> {
    Ok(Condition::parse(source)?.evaluate(root))
}

// Tokens

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::Bool(b) => write!(f, "{}", b),
            Token::Null => f.write_str("null"),
            Token::Op(op) => write!(f, "{:?}", op),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Length of a run of '=' starting at `at`.
    let equals = |at: usize| chars[at..].iter().take_while(|c| **c == '=').count();

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                // `=`, `==` and `===` are all equality
                let n = equals(i).min(3);
                tokens.push(Token::Op(CompareOp::Eq));
                i += n;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                let n = equals(i + 1).min(2);
                tokens.push(Token::Op(CompareOp::Ne));
                i += 1 + n;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let inclusive = chars.get(i + 1) == Some(&'=');
                let op = match (c, inclusive) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                tokens.push(Token::Op(op));
                i += if inclusive { 2 } else { 1 };
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == quote)
                    .map(|offset| start + offset)
                    .ok_or(ConditionError::UnterminatedString)?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '.'))
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(match ident.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" | "undefined" => Token::Null,
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(ConditionError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

// Parser

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self.bump().ok_or(ConditionError::UnexpectedEnd)?;
        match token {
            Token::Str(s) => Ok(Expr::Literal(Literal::String(s.clone()))),
            Token::Num(n) => Ok(Expr::Literal(Literal::Number(*n))),
            Token::Bool(b) => Ok(Expr::Literal(Literal::Bool(*b))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::Ident(path) => Ok(Expr::Path(path.split('.').map(str::to_string).collect())),
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ConditionError::UnexpectedToken(other.to_string())),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            other => Err(ConditionError::UnexpectedToken(other.to_string())),
        }
    }
}

// Interpreter

fn eval(expr: &Expr, root: &Value) -> Value {
    match expr {
        Expr::Literal(Literal::Null) => Value::Null,
        Expr::Literal(Literal::Bool(b)) => Value::Bool(*b),
        Expr::Literal(Literal::Number(n)) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Expr::Literal(Literal::String(s)) => Value::String(s.clone()),
        Expr::Path(segments) => resolve_path(root, segments),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, root))),
        Expr::And(left, right) => Value::Bool(truthy(&eval(left, root)) && truthy(&eval(right, root))),
        Expr::Or(left, right) => Value::Bool(truthy(&eval(left, root)) || truthy(&eval(right, root))),
        Expr::Compare { op, left, right } => {
            Value::Bool(compare(&eval(left, root), &eval(right, root), *op))
        }
    }
}

fn resolve_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root;
    for (idx, segment) in segments.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = match next {
            Some(v) => v,
            None if segment == "length" && idx + 1 == segments.len() => {
                return match current {
                    Value::Array(items) => Value::from(items.len()),
                    Value::String(s) => Value::from(s.chars().count()),
                    _ => Value::Null,
                };
            }
            None => return Value::Null,
        };
    }
    current.clone()
}

/// JavaScript-style truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numbers, and numeric strings compared against a number.
/// Record stores often hand numbers back as text.
fn numeric_pair(left: &Value, right: &Value) -> Option<(f64, f64)> {
    let coerce = |v: &Value| v.as_f64().or_else(|| v.as_str()?.trim().parse::<f64>().ok());
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => Some((coerce(left)?, coerce(right)?)),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value, op: CompareOp) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            CompareOp::Eq => both,
            CompareOp::Ne => !both,
            _ => false,
        };
    }

    if let Some((l, r)) = numeric_pair(left, right) {
        return match op {
            CompareOp::Eq => (l - r).abs() < f64::EPSILON,
            CompareOp::Ne => (l - r).abs() >= f64::EPSILON,
            CompareOp::Gt => l > r,
            CompareOp::Lt => l < r,
            CompareOp::Ge => l >= r,
            CompareOp::Le => l <= r,
        };
    }

    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Gt => l > r,
            CompareOp::Lt => l < r,
            CompareOp::Ge => l >= r,
            CompareOp::Le => l <= r,
        };
    }

    match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_into_tree() {
        let cond = Condition::parse("input.count > 0 && !input.blocked").unwrap();
        assert_eq!(
            cond.expr(),
            &Expr::And(
                Box::new(Expr::Compare {
                    op: CompareOp::Gt,
                    left: Box::new(Expr::Path(vec!["input".into(), "count".into()])),
                    right: Box::new(Expr::Literal(Literal::Number(0.0))),
                }),
                Box::new(Expr::Not(Box::new(Expr::Path(vec![
                    "input".into(),
                    "blocked".into()
                ])))),
            )
        );
    }

    #[test]
    fn test_numeric_and_string_comparisons() {
        let root = json!({"input": {"count": 3, "status": "paid"}});
        assert!(evaluate("input.count >= 3", &root).unwrap());
        assert!(!evaluate("input.count < 3", &root).unwrap());
        assert!(evaluate("input.status === 'paid'", &root).unwrap());
        assert!(evaluate(r#"input.status != "refunded""#, &root).unwrap());
    }

    #[test]
    fn test_numeric_strings_compare_as_numbers() {
        let root = json!({"input": {"n": "3", "total": " 5.5 ", "code": "07", "label": "abc"}});
        assert!(evaluate("input.n == 3", &root).unwrap());
        assert!(evaluate("input.n > 2", &root).unwrap());
        assert!(evaluate("input.total > 5", &root).unwrap());
        assert!(evaluate("7 == input.code", &root).unwrap());
        assert!(!evaluate("input.label > 1", &root).unwrap());
        assert!(evaluate("input.label != 1", &root).unwrap());
        // two strings stay a text comparison
        assert!(!evaluate("input.code == '7'", &root).unwrap());
    }

    #[test]
    fn test_single_equals_is_equality() {
        let record = json!({"run_id": "abc"});
        assert!(evaluate(r#"run_id = "abc""#, &record).unwrap());
        assert!(!evaluate(r#"run_id = "xyz""#, &record).unwrap());
    }

    #[test]
    fn test_length_of_arrays() {
        let root = json!({"input": {"records": [], "name": "Ada"}});
        assert!(!evaluate("input.records.length > 0", &root).unwrap());
        assert!(evaluate("input.name.length == 3", &root).unwrap());
    }

    #[test]
    fn test_grouping_and_precedence() {
        let root = json!({"input": {"a": 1, "b": 2, "c": 3}});
        assert!(evaluate("input.a == 9 || input.b == 2 && input.c == 3", &root).unwrap());
        assert!(!evaluate("(input.a == 9 || input.b == 2) && input.c == 4", &root).unwrap());
    }

    #[test]
    fn test_missing_paths_are_null() {
        let root = json!({"input": {}});
        assert!(!evaluate("input.total > 10", &root).unwrap());
        assert!(evaluate("input.total == null", &root).unwrap());
        assert!(evaluate("input.total === undefined", &root).unwrap());
        assert!(!evaluate("input.total", &root).unwrap());
    }

    #[test]
    fn test_rejects_code() {
        assert_eq!(
            Condition::parse("process.exit(1);").unwrap_err(),
            ConditionError::UnexpectedChar(';')
        );
        assert!(matches!(
            Condition::parse("input.a ==").unwrap_err(),
            ConditionError::UnexpectedEnd
        ));
        assert_eq!(Condition::parse("   ").unwrap_err(), ConditionError::Empty);
        assert_eq!(
            Condition::parse("'open").unwrap_err(),
            ConditionError::UnterminatedString
        );
    }
}
