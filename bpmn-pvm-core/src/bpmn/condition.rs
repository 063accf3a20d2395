use crate::behavior::Condition;
use crate::error::{BehaviorError, DefinitionError};
use crate::runtime::Variables;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
        }
    }
}

/// Compares one variable against a literal.
///
/// Parsed from `${name op literal}` where `op` is one of `== != < > <= >=`
/// and the literal is JSON or a single-quoted string. `${flag}` and
/// `${!flag}` test a boolean. An unset variable compares as `null`.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableCondition {
    pub variable: String,
    pub op: CompareOp,
    pub value: Value,
}

impl VariableCondition {
    pub fn new(variable: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            variable: variable.into(),
            op,
            value,
        }
    }

    pub fn parse(expression: &str) -> Result<Self, DefinitionError> {
        let invalid = || DefinitionError::InvalidCondition(expression.to_string());
        let trimmed = expression.trim();
        let body = trimmed
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(trimmed)
            .trim();

        let Some(pos) = body.find(['=', '!', '<', '>']) else {
            return if is_identifier(body) {
                Ok(Self::new(body, CompareOp::Eq, Value::Bool(true)))
            } else {
                Err(invalid())
            };
        };

        if pos == 0 {
            let name = body[1..].trim();
            return if body.starts_with('!') && !body.starts_with("!=") && is_identifier(name) {
                Ok(Self::new(name, CompareOp::Eq, Value::Bool(false)))
            } else {
                Err(invalid())
            };
        }

        let rest = &body[pos..];
        let (op, len) = if rest.starts_with("==") {
            (CompareOp::Eq, 2)
        } else if rest.starts_with("!=") {
            (CompareOp::Ne, 2)
        } else if rest.starts_with("<=") {
            (CompareOp::Le, 2)
        } else if rest.starts_with(">=") {
            (CompareOp::Ge, 2)
        } else if rest.starts_with('<') {
            (CompareOp::Lt, 1)
        } else if rest.starts_with('>') {
            (CompareOp::Gt, 1)
        } else {
            return Err(invalid());
        };

        let variable = body[..pos].trim();
        if !is_identifier(variable) {
            return Err(invalid());
        }
        let value = parse_literal(body[pos + len..].trim()).ok_or_else(invalid)?;
        Ok(Self::new(variable, op, value))
    }
}

impl fmt::Display for VariableCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{} {} {}}}", self.variable, self.op.symbol(), self.value)
    }
}

impl Condition for VariableCondition {
    fn evaluate(&self, variables: &Variables) -> Result<bool, BehaviorError> {
        let actual = variables.get(&self.variable).unwrap_or(&Value::Null);
        Ok(compare(actual, self.op, &self.value))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn parse_literal(s: &str) -> Option<Value> {
    if let Some(text) = s.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Some(Value::String(text.to_string()));
    }
    serde_json::from_str(s).ok()
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(lhs, rhs),
        CompareOp::Ne => !values_equal(lhs, rhs),
        CompareOp::Lt => ordering(lhs, rhs).is_some_and(Ordering::is_lt),
        CompareOp::Gt => ordering(lhs, rhs).is_some_and(Ordering::is_gt),
        CompareOp::Le => ordering(lhs, rhs).is_some_and(Ordering::is_le),
        CompareOp::Ge => ordering(lhs, rhs).is_some_and(Ordering::is_ge),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn ordering(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
