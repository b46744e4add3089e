//! Boolean expression evaluator for custom spawn triggers.
//!
//! Policies can gate ephemeral-agent spawning on a boolean expression over
//! the current [`EvaluationContext`], e.g.
//! `"average_confidence < 0.5 && total_votes > 10 && !consensus_reached"`.
//!
//! The grammar is small and evaluated with ordinary operator precedence
//! (lowest to highest): `||`, `&&`, unary `!`, then the comparisons
//! `== != < <= > >=`. Leaves are `true`, `false`, decimal numbers, or names
//! resolved against the context's named fields and `custom_fields`.
//!
//! The expression is parsed fully before evaluation, so a malformed
//! right-hand side is a parse error even when the left-hand side would
//! short-circuit. Evaluation itself short-circuits `||` and `&&`.
//!
//! Type rules: ordering comparisons require numbers on both sides; equality
//! allows number=number and bool=bool; anything mixed fails with
//! [`ExprError::TypeMismatch`]. Referencing an unset optional field (e.g.
//! `average_confidence` when no confidence was recorded) is an error, not
//! `false`.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// A scalar value usable in `custom_fields`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
}

/// Snapshot of orchestrator state a spawn trigger evaluates against.
///
/// Derived from workflow results, never stored. The named fields are
/// addressable from expressions by their snake_case names
/// (`consensus_reached`, `average_confidence`, `tie_detected`,
/// `total_votes`, `winning_vote_count`, `escalation_requested`); any other
/// name falls through to `custom_fields`.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    /// Whether the orchestrator reached consensus.
    pub consensus_reached: bool,
    /// Mean confidence across contributions, when one was computed.
    pub average_confidence: Option<f64>,
    /// Whether the top choices tied.
    pub tie_detected: bool,
    /// Number of votes cast, when voting happened.
    pub total_votes: Option<usize>,
    /// Count held by the winning choice, when voting happened.
    pub winning_vote_count: Option<usize>,
    /// Whether an agent explicitly requested escalation.
    pub escalation_requested: bool,
    /// Additional caller-defined scalars addressable by name.
    pub custom_fields: HashMap<String, FieldValue>,
}

/// Typed failures from parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The expression was empty or all whitespace.
    Empty,
    /// The expression is malformed (duplicate operators, unmatched
    /// parentheses, trailing tokens, …).
    Parse(String),
    /// A name resolved to neither a named field nor a custom field.
    UnknownVariable(String),
    /// A name resolved to an optional field that is unset.
    MissingField(String),
    /// Operands with incompatible types were combined.
    TypeMismatch(String),
    /// A character sequence that looks like an operator but is not one
    /// (`|`, `&`, bare `=`).
    UnknownOperator(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Empty => write!(f, "empty expression"),
            ExprError::Parse(msg) => write!(f, "parse error: {}", msg),
            ExprError::UnknownVariable(name) => write!(f, "unknown variable: {}", name),
            ExprError::MissingField(name) => write!(f, "field not set: {}", name),
            ExprError::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
            ExprError::UnknownOperator(op) => write!(f, "unknown operator: {}", op),
        }
    }
}

impl Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    True,
    False,
    Number(f64),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Bool(bool),
    Number(f64),
    Var(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Bool(bool),
    Number(f64),
}

/// Evaluate `expr` against `ctx`, returning the boolean result.
///
/// # Examples
///
/// ```
/// use quorum::quorum::expression::{evaluate, EvaluationContext};
///
/// let ctx = EvaluationContext {
///     average_confidence: Some(0.45),
///     total_votes: Some(15),
///     ..Default::default()
/// };
/// let ok = evaluate(
///     "average_confidence < 0.5 && total_votes > 10 && !consensus_reached",
///     &ctx,
/// )
/// .unwrap();
/// assert!(ok);
/// ```
pub fn evaluate(expr: &str, ctx: &EvaluationContext) -> Result<bool, ExprError> {
    if expr.trim().is_empty() {
        return Err(ExprError::Empty);
    }
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Parse(format!(
            "unexpected token after expression: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    match eval(&ast, ctx)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Err(ExprError::TypeMismatch(format!(
            "expression evaluated to number {}, expected boolean",
            n
        ))),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ExprError::UnknownOperator("|".to_string()));
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ExprError::UnknownOperator("&".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(ExprError::UnknownOperator("=".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::Parse(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => {
                return Err(ExprError::Parse(format!("unexpected character '{}'", c)));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.parse_primary()?;
        Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Parse("unmatched '('".to_string())),
                }
            }
            Some(t) => Err(ExprError::Parse(format!("unexpected token {:?}", t))),
            None => Err(ExprError::Parse("unexpected end of expression".to_string())),
        }
    }
}

fn eval(expr: &Expr, ctx: &EvaluationContext) -> Result<Value, ExprError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Var(name) => resolve(name, ctx),
        Expr::Not(inner) => match eval(inner, ctx)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Number(_) => Err(ExprError::TypeMismatch(
                "'!' requires a boolean operand".to_string(),
            )),
        },
        Expr::Or(lhs, rhs) => {
            match eval(lhs, ctx)? {
                Value::Bool(true) => Ok(Value::Bool(true)), // short-circuit
                Value::Bool(false) => match eval(rhs, ctx)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    Value::Number(_) => Err(ExprError::TypeMismatch(
                        "'||' requires boolean operands".to_string(),
                    )),
                },
                Value::Number(_) => Err(ExprError::TypeMismatch(
                    "'||' requires boolean operands".to_string(),
                )),
            }
        }
        Expr::And(lhs, rhs) => {
            match eval(lhs, ctx)? {
                Value::Bool(false) => Ok(Value::Bool(false)), // short-circuit
                Value::Bool(true) => match eval(rhs, ctx)? {
                    Value::Bool(b) => Ok(Value::Bool(b)),
                    Value::Number(_) => Err(ExprError::TypeMismatch(
                        "'&&' requires boolean operands".to_string(),
                    )),
                },
                Value::Number(_) => Err(ExprError::TypeMismatch(
                    "'&&' requires boolean operands".to_string(),
                )),
            }
        }
        Expr::Cmp(op, lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            match (op, l, r) {
                (CmpOp::Eq, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a == b)),
                (CmpOp::Ne, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a != b)),
                (CmpOp::Eq, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a == b)),
                (CmpOp::Ne, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a != b)),
                (CmpOp::Lt, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),
                (CmpOp::Le, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),
                (CmpOp::Gt, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),
                (CmpOp::Ge, Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),
                (CmpOp::Lt, _, _) | (CmpOp::Le, _, _) | (CmpOp::Gt, _, _) | (CmpOp::Ge, _, _) => {
                    Err(ExprError::TypeMismatch(
                        "ordering comparison requires numbers on both sides".to_string(),
                    ))
                }
                _ => Err(ExprError::TypeMismatch(
                    "equality comparison requires operands of the same type".to_string(),
                )),
            }
        }
    }
}

fn resolve(name: &str, ctx: &EvaluationContext) -> Result<Value, ExprError> {
    match name {
        "consensus_reached" => Ok(Value::Bool(ctx.consensus_reached)),
        "tie_detected" => Ok(Value::Bool(ctx.tie_detected)),
        "escalation_requested" => Ok(Value::Bool(ctx.escalation_requested)),
        "average_confidence" => ctx
            .average_confidence
            .map(Value::Number)
            .ok_or_else(|| ExprError::MissingField(name.to_string())),
        "total_votes" => ctx
            .total_votes
            .map(|n| Value::Number(n as f64))
            .ok_or_else(|| ExprError::MissingField(name.to_string())),
        "winning_vote_count" => ctx
            .winning_vote_count
            .map(|n| Value::Number(n as f64))
            .ok_or_else(|| ExprError::MissingField(name.to_string())),
        _ => match ctx.custom_fields.get(name) {
            Some(FieldValue::Bool(b)) => Ok(Value::Bool(*b)),
            Some(FieldValue::Number(n)) => Ok(Value::Number(*n)),
            None => Err(ExprError::UnknownVariable(name.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvaluationContext {
        EvaluationContext {
            consensus_reached: false,
            average_confidence: Some(0.45),
            tie_detected: true,
            total_votes: Some(15),
            winning_vote_count: Some(6),
            escalation_requested: false,
            custom_fields: HashMap::new(),
        }
    }

    #[test]
    fn test_literals_and_variables() {
        assert!(evaluate("true", &ctx()).unwrap());
        assert!(!evaluate("false", &ctx()).unwrap());
        assert!(evaluate("tie_detected", &ctx()).unwrap());
        assert!(!evaluate("consensus_reached", &ctx()).unwrap());
    }

    #[test]
    fn test_compound_expression() {
        let ok = evaluate(
            "average_confidence < 0.5 && total_votes > 10 && !consensus_reached",
            &ctx(),
        )
        .unwrap();
        assert!(ok);

        let mut c = ctx();
        c.consensus_reached = true;
        let ok = evaluate(
            "average_confidence < 0.5 && total_votes > 10 && !consensus_reached",
            &c,
        )
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_precedence_or_binds_loosest() {
        // (false && false) || true, not false && (false || true)
        assert!(evaluate("consensus_reached && false || true", &ctx()).unwrap());
    }

    #[test]
    fn test_whitespace_insensitive() {
        assert!(evaluate("  total_votes   >=  15  ", &ctx()).unwrap());
        assert!(evaluate("total_votes>=15", &ctx()).unwrap());
    }

    #[test]
    fn test_missing_optional_field_is_error() {
        let mut c = ctx();
        c.average_confidence = None;
        let err = evaluate("average_confidence < 0.5", &c).unwrap_err();
        assert_eq!(err, ExprError::MissingField("average_confidence".to_string()));

        // Equality against an unset optional is also an error, not false.
        c.total_votes = None;
        let err = evaluate("total_votes == 3", &c).unwrap_err();
        assert_eq!(err, ExprError::MissingField("total_votes".to_string()));
    }

    #[test]
    fn test_unknown_variable() {
        let err = evaluate("no_such_field", &ctx()).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("no_such_field".to_string()));
    }

    #[test]
    fn test_custom_fields() {
        let mut c = ctx();
        c.custom_fields
            .insert("retries".to_string(), FieldValue::Number(3.0));
        c.custom_fields
            .insert("urgent".to_string(), FieldValue::Bool(true));
        assert!(evaluate("retries >= 3 && urgent", &c).unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        // bool compared with number
        assert!(matches!(
            evaluate("tie_detected == 1", &ctx()).unwrap_err(),
            ExprError::TypeMismatch(_)
        ));
        // ordering on a bool
        assert!(matches!(
            evaluate("tie_detected < 1", &ctx()).unwrap_err(),
            ExprError::TypeMismatch(_)
        ));
        // numeric top-level result
        assert!(matches!(
            evaluate("0.5", &ctx()).unwrap_err(),
            ExprError::TypeMismatch(_)
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(evaluate("", &ctx()).unwrap_err(), ExprError::Empty);
        assert_eq!(evaluate("   ", &ctx()).unwrap_err(), ExprError::Empty);
        assert!(matches!(
            evaluate("true && && false", &ctx()).unwrap_err(),
            ExprError::Parse(_)
        ));
        assert!(matches!(
            evaluate("(true", &ctx()).unwrap_err(),
            ExprError::Parse(_)
        ));
        assert!(matches!(
            evaluate("true false", &ctx()).unwrap_err(),
            ExprError::Parse(_)
        ));
        assert_eq!(
            evaluate("a | b", &ctx()).unwrap_err(),
            ExprError::UnknownOperator("|".to_string())
        );
        assert_eq!(
            evaluate("a = 1", &ctx()).unwrap_err(),
            ExprError::UnknownOperator("=".to_string())
        );
    }

    #[test]
    fn test_short_circuit_skips_missing_field() {
        let mut c = ctx();
        c.average_confidence = None;
        // Left side is true, so the unset field on the right is never
        // evaluated.
        assert!(evaluate("tie_detected || average_confidence > 0.5", &c).unwrap());
        // But a parse error on the right is still a parse error.
        assert!(matches!(
            evaluate("tie_detected || (", &c).unwrap_err(),
            ExprError::Parse(_)
        ));
    }

    #[test]
    fn test_evaluation_is_pure() {
        let c = ctx();
        let a = evaluate("average_confidence < 0.5 || tie_detected", &c).unwrap();
        let b = evaluate("average_confidence < 0.5 || tie_detected", &c).unwrap();
        assert_eq!(a, b);
    }
}
