//! Guard and action evaluation.
//!
//! The engine treats the datamodel as opaque and talks to it through the
//! [`Evaluator`] trait. [`JsonDataModel`] is the stock implementation: a JSON
//! context plus a small expression language.
//!
//! Guard expressions:
//!
//! - `ctx.field` - context field access (truthy check)
//! - `ctx.field.nested` - nested field access
//! - `_event.name`, `_event.data.field` - the event being processed
//! - `ctx.field == value` / `!=` - equality (strings, numbers, booleans, null)
//! - `ctx.field > value` / `>=` / `<` / `<=` - numeric comparison
//! - `In('state')` - true while `state` is active
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! A numeric comparison against a present, non-numeric value is an
//! evaluation error; a missing value compares false.
//!
//! Value expressions are JSON literals (`42`, `"on"`, `{"a": 1}`) or a single
//! field reference (`ctx.count`, `_event.data.amount`).

use crate::error::{CoreError, EvalError};
use crate::event::Event;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// What an expression can see besides the datamodel.
pub struct Scope<'a> {
    /// The event being processed; `None` during eventless passes.
    pub event: Option<&'a Event>,
    /// Oracle for `In(state)`.
    pub in_state: &'a dyn Fn(&str) -> bool,
}

impl<'a> Scope<'a> {
    pub fn new(event: Option<&'a Event>, in_state: &'a dyn Fn(&str) -> bool) -> Self {
        Self { event, in_state }
    }
}

/// Datamodel seam used by the engine for guards and executable content.
///
/// Every failure is reported by the engine and degrades to "transition
/// disabled" or "action skipped"; none aborts a macrostep.
pub trait Evaluator {
    /// Evaluates a guard.
    fn eval_cond(&mut self, expr: &str, scope: &Scope<'_>) -> Result<bool, EvalError>;

    /// Evaluates a value expression.
    fn eval_value(&mut self, expr: &str, scope: &Scope<'_>) -> Result<Value, EvalError>;

    /// Stores a value at a datamodel location.
    fn assign(&mut self, location: &str, value: Value) -> Result<(), EvalError>;
}

/// Root of a field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Ctx,
    EventName,
    EventData,
}

/// A dotted path below a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub root: Root,
    pub path: String,
}

impl FieldRef {
    fn resolve(&self, ctx: &Value, scope: &Scope<'_>) -> Value {
        match self.root {
            Root::Ctx => get_field(ctx, &self.path),
            Root::EventName => scope
                .event
                .map(|e| Value::String(e.name.clone()))
                .unwrap_or(Value::Null),
            Root::EventData => match scope.event {
                Some(e) if self.path.is_empty() => e.data.clone(),
                Some(e) => get_field(&e.data, &self.path),
                None => Value::Null,
            },
        }
    }

    fn describe(&self) -> String {
        let root = match self.root {
            Root::Ctx => "ctx",
            Root::EventName => return "_event.name".to_string(),
            Root::EventData => "_event.data",
        };
        if self.path.is_empty() {
            root.to_string()
        } else {
            format!("{}.{}", root, self.path)
        }
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Field is truthy.
    Truthy(FieldRef),
    /// Equality comparison.
    Eq(FieldRef, Value),
    /// Inequality comparison.
    Ne(FieldRef, Value),
    /// Greater than.
    Gt(FieldRef, f64),
    /// Greater or equal.
    Ge(FieldRef, f64),
    /// Less than.
    Lt(FieldRef, f64),
    /// Less or equal.
    Le(FieldRef, f64),
    /// State membership.
    In(String),
    /// Logical AND.
    And(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical OR.
    Or(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical NOT.
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(invalid(format!(
                "unexpected input at offset {}: '{}'",
                parser.pos,
                &s[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates the guard against a context.
    pub fn evaluate(&self, ctx: &Value, scope: &Scope<'_>) -> Result<bool, EvalError> {
        Ok(match self {
            GuardExpr::Truthy(field) => is_truthy(&field.resolve(ctx, scope)),
            GuardExpr::Eq(field, expected) => values_equal(&field.resolve(ctx, scope), expected),
            GuardExpr::Ne(field, expected) => !values_equal(&field.resolve(ctx, scope), expected),
            GuardExpr::Gt(field, expected) => {
                numeric(field, ctx, scope)?.map(|v| v > *expected).unwrap_or(false)
            }
            GuardExpr::Ge(field, expected) => {
                numeric(field, ctx, scope)?.map(|v| v >= *expected).unwrap_or(false)
            }
            GuardExpr::Lt(field, expected) => {
                numeric(field, ctx, scope)?.map(|v| v < *expected).unwrap_or(false)
            }
            GuardExpr::Le(field, expected) => {
                numeric(field, ctx, scope)?.map(|v| v <= *expected).unwrap_or(false)
            }
            GuardExpr::In(state) => (scope.in_state)(state),
            GuardExpr::And(left, right) => left.evaluate(ctx, scope)? && right.evaluate(ctx, scope)?,
            GuardExpr::Or(left, right) => left.evaluate(ctx, scope)? || right.evaluate(ctx, scope)?,
            GuardExpr::Not(inner) => !inner.evaluate(ctx, scope)?,
        })
    }
}

/// A parsed value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Literal(Value),
    Field(FieldRef),
}

impl ValueExpr {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty value expression"));
        }

        if s.starts_with("ctx.") || s.starts_with("_event.") {
            let mut parser = Parser::new(s);
            let field = parser.parse_field()?;
            if parser.pos != s.len() {
                return Err(invalid(format!("unexpected input after field in '{}'", s)));
            }
            return Ok(ValueExpr::Field(field));
        }

        serde_json::from_str(s)
            .map(ValueExpr::Literal)
            .map_err(|e| invalid(format!("not a JSON literal or field: {}", e)))
    }

    pub fn evaluate(&self, ctx: &Value, scope: &Scope<'_>) -> Value {
        match self {
            ValueExpr::Literal(v) => v.clone(),
            ValueExpr::Field(field) => field.resolve(ctx, scope),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidExpression {
        reason: reason.into(),
    }
}

fn numeric(field: &FieldRef, ctx: &Value, scope: &Scope<'_>) -> Result<Option<f64>, EvalError> {
    match field.resolve(ctx, scope) {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(EvalError::TypeMismatch {
            field: field.describe(),
            expected: "number",
            found: type_name(&other),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn get_field(ctx: &Value, field: &str) -> Value {
    let mut current = ctx;

    for part in field.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part).unwrap_or(&Value::Null);
            }
            _ => return Value::Null,
        }
    }

    current.clone()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// Simple recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            self.skip_whitespace();
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') {
            self.pos += 1;
            self.skip_whitespace();
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('(') {
            self.pos += 1;
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(invalid("expected ')'"));
            }
            self.pos += 1;
            return Ok(expr);
        }

        if self.peek_str("In(") {
            self.pos += 3;
            self.skip_whitespace();
            let state = self.parse_quoted()?;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(invalid("expected ')' after In(...)"));
            }
            self.pos += 1;
            return Ok(GuardExpr::In(state));
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();
        let field = self.parse_field()?;
        self.skip_whitespace();

        if self.peek_str("==") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Eq(field, value));
        }

        if self.peek_str("!=") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Ne(field, value));
        }

        if self.peek_str(">=") {
            self.pos += 2;
            let num = self.parse_number()?;
            return Ok(GuardExpr::Ge(field, num));
        }

        if self.peek_str("<=") {
            self.pos += 2;
            let num = self.parse_number()?;
            return Ok(GuardExpr::Le(field, num));
        }

        if self.peek_char() == Some('>') {
            self.pos += 1;
            let num = self.parse_number()?;
            return Ok(GuardExpr::Gt(field, num));
        }

        if self.peek_char() == Some('<') {
            self.pos += 1;
            let num = self.parse_number()?;
            return Ok(GuardExpr::Lt(field, num));
        }

        Ok(GuardExpr::Truthy(field))
    }

    fn parse_field(&mut self) -> Result<FieldRef, CoreError> {
        let (root, prefix_len) = if self.peek_str("ctx.") {
            (Root::Ctx, 4)
        } else if self.peek_str("_event.data") {
            (Root::EventData, 11)
        } else if self.peek_str("_event.name") {
            (Root::EventName, 11)
        } else {
            return Err(invalid("field must start with 'ctx.' or '_event.'"));
        };
        self.pos += prefix_len;

        if root == Root::EventName {
            return Ok(FieldRef {
                root,
                path: String::new(),
            });
        }
        if root == Root::EventData {
            if self.peek_char() != Some('.') {
                return Ok(FieldRef {
                    root,
                    path: String::new(),
                });
            }
            self.pos += 1;
        }

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let path = &self.input[start..self.pos];
        if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
            return Err(invalid("empty field name"));
        }

        Ok(FieldRef {
            root,
            path: path.to_string(),
        })
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];

        if rest.starts_with("true") {
            self.pos += 4;
            return Ok(Value::Bool(true));
        }
        if rest.starts_with("false") {
            self.pos += 5;
            return Ok(Value::Bool(false));
        }
        if rest.starts_with("null") {
            self.pos += 4;
            return Ok(Value::Null);
        }
        if rest.starts_with('"') || rest.starts_with('\'') {
            return self.parse_quoted().map(Value::String);
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {}", num)))
    }

    /// Parses a single- or double-quoted string.
    fn parse_quoted(&mut self) -> Result<String, CoreError> {
        let quote = match self.peek_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(invalid("expected string")),
        };
        self.pos += 1;

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c == quote {
                let s = &self.input[start..self.pos];
                self.pos += 1;
                return Ok(s.to_string());
            }
            if c == '\\' {
                self.pos += 1;
                if let Some(escaped) = self.peek_char() {
                    self.pos += escaped.len_utf8();
                }
            } else {
                self.pos += c.len_utf8();
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            self.pos += 1;
            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

/// JSON datamodel with parsed-expression caching.
#[derive(Debug, Clone, Default)]
pub struct JsonDataModel {
    ctx: Value,
    guards: HashMap<String, GuardExpr>,
    values: HashMap<String, ValueExpr>,
}

impl JsonDataModel {
    pub fn new(ctx: Value) -> Self {
        Self {
            ctx,
            guards: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn ctx(&self) -> &Value {
        &self.ctx
    }

    pub fn into_ctx(self) -> Value {
        self.ctx
    }

    fn guard(&mut self, expr: &str) -> Result<&GuardExpr, EvalError> {
        if !self.guards.contains_key(expr) {
            let parsed = GuardExpr::parse(expr).map_err(|e| EvalError::Parse {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
            self.guards.insert(expr.to_string(), parsed);
        }
        Ok(&self.guards[expr])
    }

    fn value(&mut self, expr: &str) -> Result<&ValueExpr, EvalError> {
        if !self.values.contains_key(expr) {
            let parsed = ValueExpr::parse(expr).map_err(|e| EvalError::Parse {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
            self.values.insert(expr.to_string(), parsed);
        }
        Ok(&self.values[expr])
    }
}

impl Evaluator for JsonDataModel {
    fn eval_cond(&mut self, expr: &str, scope: &Scope<'_>) -> Result<bool, EvalError> {
        let guard = self.guard(expr)?.clone();
        guard.evaluate(&self.ctx, scope)
    }

    fn eval_value(&mut self, expr: &str, scope: &Scope<'_>) -> Result<Value, EvalError> {
        let value = self.value(expr)?.clone();
        Ok(value.evaluate(&self.ctx, scope))
    }

    fn assign(&mut self, location: &str, value: Value) -> Result<(), EvalError> {
        let fail = |reason: &str| EvalError::Assign {
            location: location.to_string(),
            reason: reason.to_string(),
        };
        let path = location
            .strip_prefix("ctx.")
            .filter(|p| !p.is_empty() && p.split('.').all(|part| !part.is_empty()))
            .ok_or_else(|| fail("location must be a 'ctx.' path"))?;

        if self.ctx.is_null() {
            self.ctx = Value::Object(Map::new());
        }

        let mut parts = path.split('.').peekable();
        let mut current = &mut self.ctx;
        while let Some(part) = parts.next() {
            let map = current
                .as_object_mut()
                .ok_or_else(|| fail("intermediate value is not an object"))?;
            if parts.peek().is_none() {
                map.insert(part.to_string(), value);
                return Ok(());
            }
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        Ok(())
    }
}
