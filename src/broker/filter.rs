/// Payload filter predicates
///
/// Subscriptions may carry a filter over payload fields, applied server-side
/// after topic and priority checks. A filter is a conjunction of conditions;
/// fields are addressed with dot paths into the payload object.
use serde::{Deserialize, Serialize};

// ============================================================================
// FILTER STRUCTS
// ============================================================================

/// Comparison operators supported in filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact JSON equality
    Eq,
    /// Negated equality
    Ne,
    /// Numeric greater-than
    Gt,
    /// Numeric greater-or-equal
    Gte,
    /// Numeric less-than
    Lt,
    /// Numeric less-or-equal
    Lte,
    /// Set membership: condition value is an array of candidates
    In,
    /// Field is present (condition value ignored)
    Exists,
}

/// One condition over a payload field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Dot path into the payload ("task.assignee")
    pub field: String,

    pub op: FilterOp,

    /// Comparison operand (unused for Exists)
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Conjunction of conditions; an empty filter matches everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadFilter {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

// ============================================================================
// EVALUATION
// ============================================================================

impl PayloadFilter {
    pub fn new(conditions: Vec<FilterCondition>) -> Self {
        Self { conditions }
    }

    /// Whether every condition holds for this payload
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.conditions.iter().all(|c| c.matches(payload))
    }
}

impl FilterCondition {
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        let field_value = lookup_path(payload, &self.field);

        match self.op {
            FilterOp::Exists => field_value.is_some(),
            FilterOp::Eq => field_value.map_or(false, |v| *v == self.value),
            FilterOp::Ne => field_value.map_or(false, |v| *v != self.value),
            FilterOp::Gt => compare_numeric(field_value, &self.value, |a, b| a > b),
            FilterOp::Gte => compare_numeric(field_value, &self.value, |a, b| a >= b),
            FilterOp::Lt => compare_numeric(field_value, &self.value, |a, b| a < b),
            FilterOp::Lte => compare_numeric(field_value, &self.value, |a, b| a <= b),
            FilterOp::In => match (&self.value, field_value) {
                (serde_json::Value::Array(candidates), Some(v)) => candidates.contains(v),
                _ => false,
            },
        }
    }
}

/// Resolve a dot path inside a JSON object
fn lookup_path<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_numeric(
    field_value: Option<&serde_json::Value>,
    operand: &serde_json::Value,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (field_value.and_then(|v| v.as_f64()), operand.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field: &str, op: FilterOp, value: serde_json::Value) -> FilterCondition {
        FilterCondition {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = PayloadFilter::default();
        assert!(filter.matches(&json!({"anything": true})));
        assert!(filter.matches(&json!(null)));
    }

    #[test]
    fn test_equality() {
        let filter = PayloadFilter::new(vec![condition("status", FilterOp::Eq, json!("open"))]);
        assert!(filter.matches(&json!({"status": "open"})));
        assert!(!filter.matches(&json!({"status": "closed"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_numeric_comparisons() {
        let filter = PayloadFilter::new(vec![condition("retries", FilterOp::Gte, json!(3))]);
        assert!(filter.matches(&json!({"retries": 3})));
        assert!(filter.matches(&json!({"retries": 10})));
        assert!(!filter.matches(&json!({"retries": 2})));
        // Non-numeric field never satisfies a numeric comparison
        assert!(!filter.matches(&json!({"retries": "many"})));
    }

    #[test]
    fn test_set_membership() {
        let filter = PayloadFilter::new(vec![condition(
            "kind",
            FilterOp::In,
            json!(["build", "test"]),
        )]);
        assert!(filter.matches(&json!({"kind": "test"})));
        assert!(!filter.matches(&json!({"kind": "deploy"})));
    }

    #[test]
    fn test_nested_path() {
        let filter = PayloadFilter::new(vec![condition("task.assignee", FilterOp::Eq, json!("w1"))]);
        assert!(filter.matches(&json!({"task": {"assignee": "w1"}})));
        assert!(!filter.matches(&json!({"task": {"assignee": "w2"}})));
        assert!(!filter.matches(&json!({"task": {}})));
    }

    #[test]
    fn test_conjunction() {
        let filter = PayloadFilter::new(vec![
            condition("status", FilterOp::Eq, json!("open")),
            condition("weight", FilterOp::Lt, json!(5)),
        ]);
        assert!(filter.matches(&json!({"status": "open", "weight": 2})));
        assert!(!filter.matches(&json!({"status": "open", "weight": 9})));
    }

    #[test]
    fn test_exists() {
        let filter = PayloadFilter::new(vec![condition("error", FilterOp::Exists, json!(null))]);
        assert!(filter.matches(&json!({"error": "boom"})));
        assert!(filter.matches(&json!({"error": null})));
        assert!(!filter.matches(&json!({"ok": true})));
    }

    #[test]
    fn test_filter_serde() {
        let parsed: PayloadFilter = serde_json::from_value(json!({
            "conditions": [
                {"field": "status", "op": "eq", "value": "open"},
                {"field": "weight", "op": "lte", "value": 3}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.conditions.len(), 2);
        assert!(parsed.matches(&json!({"status": "open", "weight": 3})));
    }
}
