//! Condition trees and update payloads.
//!
//! A condition is either a flat field → value mapping (implicit equality,
//! ANDed), a raw SQL fragment with positional parameters, or an explicit AND
//! of nested parts. Every composed query carries the `All` wrapper produced
//! by [`compose`], which merges the per-call condition with the access
//! object's persistent base filter.

use serde_json::{Map, Value};

/// A query condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field → value pairs, each an equality, joined with AND.
    Map(Map<String, Value>),
    /// A raw SQL fragment; `?` placeholders bind the parameters in order.
    Expr(String, Vec<Value>),
    /// Explicit AND of the nested parts.
    All(Vec<Condition>),
}

impl Condition {
    /// The empty condition: matches everything, omitted during composition.
    pub fn none() -> Self {
        Condition::Map(Map::new())
    }

    /// A raw fragment condition with positional parameters.
    pub fn expr(text: impl Into<String>, params: Vec<Value>) -> Self {
        Condition::Expr(text.into(), params)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Map(map) => map.is_empty(),
            Condition::Expr(text, _) => text.is_empty(),
            Condition::All(parts) => parts.is_empty(),
        }
    }
}

impl From<Map<String, Value>> for Condition {
    fn from(map: Map<String, Value>) -> Self {
        Condition::Map(map)
    }
}

/// JSON objects become equality mappings; anything else is the empty
/// condition.
impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Condition::Map(map),
            _ => Condition::none(),
        }
    }
}

/// A call-site `where` argument: a bare primary-key value or a condition.
#[derive(Debug, Clone)]
pub enum Selector {
    Key(i64),
    Cond(Condition),
}

impl Selector {
    /// Resolves the primary-key shortcut: a bare number matches by `pk`.
    pub fn into_condition(self, pk: &str) -> Condition {
        match self {
            Selector::Key(id) => {
                let mut map = Map::new();
                map.insert(pk.to_string(), Value::from(id));
                Condition::Map(map)
            }
            Selector::Cond(condition) => condition,
        }
    }
}

impl From<i64> for Selector {
    fn from(id: i64) -> Self {
        Selector::Key(id)
    }
}

impl From<Condition> for Selector {
    fn from(condition: Condition) -> Self {
        Selector::Cond(condition)
    }
}

impl From<Map<String, Value>> for Selector {
    fn from(map: Map<String, Value>) -> Self {
        Selector::Cond(Condition::Map(map))
    }
}

impl From<Value> for Selector {
    fn from(value: Value) -> Self {
        match value.as_i64() {
            Some(id) => Selector::Key(id),
            None => Selector::Cond(value.into()),
        }
    }
}

/// Merges the per-call condition with the persistent base filter into the
/// explicit AND wrapper, omitting empty parts.
pub fn compose(condition: Condition, base: Option<&Condition>) -> Condition {
    let mut parts = Vec::new();
    if !condition.is_empty() {
        parts.push(condition);
    }
    if let Some(base) = base {
        if !base.is_empty() {
            parts.push(base.clone());
        }
    }
    Condition::All(parts)
}

/// A literal SQL fragment used inside update payloads. Never escaped; the
/// caller owns injection safety.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExpr(pub String);

/// Wraps a literal string as a non-escaped SQL fragment.
pub fn raw(text: impl Into<String>) -> RawExpr {
    RawExpr(text.into())
}

/// One value in an update payload: a plain value or a raw fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Value(Value),
    Expr(RawExpr),
}

/// Column → new-value payload for bulk updates; ordered for stable rendering.
pub type Changes = std::collections::BTreeMap<String, SetValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Condition {
        Condition::from(value)
    }

    #[test]
    fn test_compose_keeps_both_parts() {
        let base = map(json!({"tenant": 7}));
        let composed = compose(map(json!({"status": 1})), Some(&base));
        assert_eq!(
            composed,
            Condition::All(vec![map(json!({"status": 1})), map(json!({"tenant": 7}))])
        );
    }

    #[test]
    fn test_compose_omits_empty_parts() {
        let composed = compose(map(json!({"status": 1})), None);
        assert_eq!(composed, Condition::All(vec![map(json!({"status": 1}))]));

        let composed = compose(Condition::none(), Some(&map(json!({"tenant": 7}))));
        assert_eq!(composed, Condition::All(vec![map(json!({"tenant": 7}))]));
    }

    #[test]
    fn test_compose_of_nothing_is_the_bare_wrapper() {
        let composed = compose(Condition::none(), Some(&Condition::none()));
        assert_eq!(composed, Condition::All(Vec::new()));
        assert!(composed.is_empty());
    }

    #[test]
    fn test_numeric_selector_becomes_primary_key_equality() {
        let condition = Selector::from(5).into_condition("id");
        assert_eq!(condition, map(json!({"id": 5})));
    }

    #[test]
    fn test_numeric_json_selector_takes_the_key_shortcut() {
        let condition = Selector::from(json!(42)).into_condition("order_id");
        assert_eq!(condition, map(json!({"order_id": 42})));
    }

    #[test]
    fn test_expr_condition_is_not_empty() {
        assert!(!Condition::expr("status >= ?", vec![json!(1)]).is_empty());
        assert!(Condition::expr("", Vec::new()).is_empty());
    }
}
