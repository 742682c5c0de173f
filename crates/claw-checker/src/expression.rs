//! Evaluation of trigger values into state labels.
//!
//! Threshold triggers compare the main value against `warn_value` and
//! `error_value`. Expression triggers run a small language:
//!
//! ```text
//! t1 > 10 && t2 < 5 ? ERROR : (t1 > 5 ? WARN : OK)
//! ```
//!
//! Bound names are `t1` (main value), `t2..tN` (additional targets),
//! `PREV_STATE`, and the labels `OK`, `WARN`, `ERROR` and `NODATA`.

use std::collections::HashMap;

use crate::error::ExpressionError;
use crate::types::{State, Trigger, TriggerType};

/// Turns a trigger's values into a state label.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvaluator {
    /// Higher values are worse.
    Rising {
        /// Warning threshold.
        warn: Option<f64>,
        /// Error threshold.
        error: Option<f64>,
    },
    /// Lower values are worse.
    Falling {
        /// Warning threshold.
        warn: Option<f64>,
        /// Error threshold.
        error: Option<f64>,
    },
    /// A parsed custom expression.
    Custom(Expression),
}

impl StateEvaluator {
    /// Builds the evaluator for a trigger.
    ///
    /// # Errors
    ///
    /// Returns an error if thresholds are missing or the expression does not parse.
    pub fn from_trigger(trigger: &Trigger) -> Result<Self, ExpressionError> {
        let (warn, error) = (trigger.warn_value, trigger.error_value);
        match trigger.trigger_type {
            TriggerType::Rising | TriggerType::Falling if warn.is_none() && error.is_none() => {
                Err(ExpressionError::MissingThresholds)
            }
            TriggerType::Rising => Ok(Self::Rising { warn, error }),
            TriggerType::Falling => Ok(Self::Falling { warn, error }),
            TriggerType::Expression => {
                let text = trigger
                    .expression
                    .as_deref()
                    .ok_or(ExpressionError::MissingExpression)?;
                Ok(Self::Custom(Expression::parse(text)?))
            }
        }
    }

    /// Evaluates the state for one sample.
    ///
    /// `additional` maps `t2..tN` to their values at the same timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if a custom expression fails to evaluate.
    pub fn evaluate(
        &self,
        main_value: f64,
        additional: &HashMap<String, f64>,
        previous_state: State,
    ) -> Result<State, ExpressionError> {
        match self {
            Self::Rising { warn, error } => Ok(if error.is_some_and(|e| main_value >= e) {
                State::Error
            } else if warn.is_some_and(|w| main_value >= w) {
                State::Warn
            } else {
                State::Ok
            }),
            Self::Falling { warn, error } => Ok(if error.is_some_and(|e| main_value <= e) {
                State::Error
            } else if warn.is_some_and(|w| main_value <= w) {
                State::Warn
            } else {
                State::Ok
            }),
            Self::Custom(expression) => {
                let bindings = Bindings {
                    main_value,
                    additional,
                    previous_state,
                };
                match expression.eval(&bindings)? {
                    Value::State(state) => Ok(state),
                    other => Err(ExpressionError::NotAState(other.to_string())),
                }
            }
        }
    }
}

/// A runtime value inside an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    State(State),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::State(s) => write!(f, "{s}"),
        }
    }
}

struct Bindings<'a> {
    main_value: f64,
    additional: &'a HashMap<String, f64>,
    previous_state: State,
}

impl Bindings<'_> {
    fn lookup(&self, name: &str) -> Result<Value, ExpressionError> {
        let value = match name {
            "t1" => Value::Number(self.main_value),
            "PREV_STATE" => Value::State(self.previous_state),
            "OK" => Value::State(State::Ok),
            "WARN" => Value::State(State::Warn),
            "ERROR" => Value::State(State::Error),
            "NODATA" => Value::State(State::NoData),
            _ => match self.additional.get(name) {
                Some(v) => Value::Number(*v),
                None => return Err(ExpressionError::UnknownVariable(name.to_string())),
            },
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(String),
    Not(Box<Node>),
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
}

/// A parsed trigger expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError::Parse` for malformed input and
    /// `ExpressionError::UnknownFunction` for any function call.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.ternary()?;
        if let Some((position, token)) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::Parse {
                position: *position,
                reason: format!("unexpected token {token:?}"),
            });
        }
        Ok(Self { root })
    }

    fn eval(&self, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
        eval_node(&self.root, bindings)
    }
}

fn eval_node(node: &Node, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
    match node {
        Node::Number(n) => Ok(Value::Number(*n)),
        Node::Variable(name) => bindings.lookup(name),
        Node::Not(inner) => Ok(Value::Bool(!as_bool(eval_node(inner, bindings)?)?)),
        Node::Negate(inner) => Ok(Value::Number(-as_number(eval_node(inner, bindings)?)?)),
        Node::Ternary(cond, then, otherwise) => {
            if as_bool(eval_node(cond, bindings)?)? {
                eval_node(then, bindings)
            } else {
                eval_node(otherwise, bindings)
            }
        }
        Node::Binary(BinaryOp::Or, lhs, rhs) => Ok(Value::Bool(
            as_bool(eval_node(lhs, bindings)?)? || as_bool(eval_node(rhs, bindings)?)?,
        )),
        Node::Binary(BinaryOp::And, lhs, rhs) => Ok(Value::Bool(
            as_bool(eval_node(lhs, bindings)?)? && as_bool(eval_node(rhs, bindings)?)?,
        )),
        Node::Binary(op, lhs, rhs) => {
            let lhs = eval_node(lhs, bindings)?;
            let rhs = eval_node(rhs, bindings)?;
            binary(*op, lhs, rhs)
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::State(a), Value::State(b)) => a == b,
                _ => {
                    return Err(ExpressionError::TypeMismatch(format!(
                        "cannot compare {lhs} with {rhs}"
                    )));
                }
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Or => Ok(Value::Bool(as_bool(lhs)? || as_bool(rhs)?)),
        BinaryOp::And => Ok(Value::Bool(as_bool(lhs)? && as_bool(rhs)?)),
        _ => {
            let (a, b) = (as_number(lhs)?, as_number(rhs)?);
            Ok(match op {
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div => Value::Number(a / b),
                _ => Value::Number(a % b),
            })
        }
    }
}

fn as_number(value: Value) -> Result<f64, ExpressionError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(ExpressionError::TypeMismatch(format!("expected number, got {other}"))),
    }
}

fn as_bool(value: Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExpressionError::TypeMismatch(format!("expected boolean, got {other}"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
}

const OPERATORS: [&str; 16] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "?", ":",
];

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            let literal = &text[start..pos];
            let number = literal.parse::<f64>().map_err(|_| ExpressionError::Parse {
                position: start,
                reason: format!("invalid number {literal:?}"),
            })?;
            tokens.push((start, Token::Number(number)));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push((start, Token::Ident(text[start..pos].to_string())));
        } else if c == b'(' {
            pos += 1;
            tokens.push((start, Token::LParen));
        } else if c == b')' {
            pos += 1;
            tokens.push((start, Token::RParen));
        } else if let Some(op) = OPERATORS.iter().find(|op| text[pos..].starts_with(**op)) {
            pos += op.len();
            tokens.push((
                start,
                match *op {
                    "?" => Token::Question,
                    ":" => Token::Colon,
                    other => Token::Op(other),
                },
            ));
        } else {
            return Err(ExpressionError::Parse {
                position: start,
                reason: format!("unexpected character {:?}", char::from(c)),
            });
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or_else(
            || self.tokens.last().map_or(0, |(p, _)| p + 1),
            |(p, _)| *p,
        )
    }

    fn error(&self, reason: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            position: self.position(),
            reason: reason.into(),
        }
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ExpressionError> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    fn ternary(&mut self) -> Result<Node, ExpressionError> {
        let cond = self.binary_level(0)?;
        if self.peek() != Some(&Token::Question) {
            return Ok(cond);
        }
        self.pos += 1;
        let then = self.ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.ternary()?;
        Ok(Node::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn binary_level(&mut self, level: usize) -> Result<Node, ExpressionError> {
        const LEVELS: [&[&str]; 6] = [
            &["||"],
            &["&&"],
            &["==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = self.binary_level(level + 1)?;
            lhs = Node::Binary(binary_op(op), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        match self.eat_op(&["!", "-"]) {
            Some("!") => Ok(Node::Not(Box::new(self.unary()?))),
            Some(_) => Ok(Node::Negate(Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let token = self.peek().cloned();
        match token {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Node::Number(n))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Token::LParen) {
                    return Err(ExpressionError::UnknownFunction(name));
                }
                Ok(Node::Variable(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.ternary()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

fn binary_op(op: &str) -> BinaryOp {
    match op {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Rem,
    }
}
