use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use air_core::AirError;

/// A declarative rule: when `field <operator> value` holds for a request,
/// the condition's `action` applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot path into the request attributes, e.g. `tool_name` or `context.env`.
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    pub action: ConditionAction,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionAction {
    Allow,
    Deny,
    Log,
}

/// Comparison applied between the request attribute and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Contains => "contains",
        }
    }

    /// Operators whose value must be a JSON array.
    pub fn wants_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Evaluate `actual <op> expected`.
    pub fn apply(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            Self::Eq => json_eq(actual, expected),
            Self::Neq => !json_eq(actual, expected),
            Self::Gt => compare(actual, expected).is_some_and(|o| o.is_gt()),
            Self::Gte => compare(actual, expected).is_some_and(|o| o.is_ge()),
            Self::Lt => compare(actual, expected).is_some_and(|o| o.is_lt()),
            Self::Lte => compare(actual, expected).is_some_and(|o| o.is_le()),
            Self::In => expected
                .as_array()
                .is_some_and(|items| items.iter().any(|i| json_eq(actual, i))),
            Self::NotIn => expected
                .as_array()
                .is_some_and(|items| !items.iter().any(|i| json_eq(actual, i))),
            Self::Contains => match (actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| json_eq(i, needle)),
                _ => false,
            },
        }
    }
}

impl FromStr for Operator {
    type Err = AirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "==" => Ok(Self::Eq),
            "neq" | "ne" | "!=" => Ok(Self::Neq),
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "in" => Ok(Self::In),
            "not_in" => Ok(Self::NotIn),
            "contains" => Ok(Self::Contains),
            other => Err(AirError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = AirError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Numeric ordering; numeric strings are coerced so `"5"` compares like `5`.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    as_number(a)?.partial_cmp(&as_number(b)?)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Attributes ─────────────────────────────────────────────────

/// The attribute view of an evaluation request that conditions match against.
///
/// Top-level context keys are visible directly (`env`) and under `context.`
/// (`context.env`). `tool_name`, `action`, and `agent_id` always reflect the
/// request itself, even if the context carries keys with the same name.
#[derive(Debug, Clone)]
pub struct Attributes {
    root: Value,
}

impl Attributes {
    pub fn new(agent_id: &str, action: &str, context: &Map<String, Value>) -> Self {
        let mut root = context.clone();
        root.insert("context".into(), Value::Object(context.clone()));
        root.insert("agent_id".into(), Value::String(agent_id.to_string()));
        root.insert("action".into(), Value::String(action.to_string()));
        root.insert("tool_name".into(), Value::String(action.to_string()));
        Self {
            root: Value::Object(root),
        }
    }

    /// Resolve a dot path. Missing segments yield `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

// ── Matcher ────────────────────────────────────────────────────

impl Condition {
    /// Whether this condition holds for the given attributes. A missing field never matches.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match attrs.get(&self.field) {
            Some(actual) => self.operator.apply(actual, &self.value),
            None => false,
        }
    }
}

/// First condition, in declaration order, whose predicate holds.
pub fn first_match<'a>(conditions: &'a [Condition], attrs: &Attributes) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.matches(attrs))
}

/// The condition that decides the request: any matching `deny` wins, otherwise
/// the first match in declaration order.
pub fn resolve<'a>(conditions: &'a [Condition], attrs: &Attributes) -> Option<&'a Condition> {
    let deny = conditions
        .iter()
        .find(|c| c.action == ConditionAction::Deny && c.matches(attrs));
    let hit = deny.or_else(|| first_match(conditions, attrs));
    if let Some(c) = hit {
        debug!(
            field = %c.field,
            operator = %c.operator,
            action = ?c.action,
            "condition matched"
        );
    }
    hit
}
