//! Format descriptors and the typed final answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const PRODUCT_REVENUE_SHAPE: &str = "list[{product:str,revenue:float}]";

/// Parsed `format_hint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatHint {
    Int,
    /// Any hint starting with `float` (`float`, `float (2dp)`, ...).
    Float,
    ProductRevenueList,
    Other(String),
}

impl FormatHint {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        if normalized == "int" {
            FormatHint::Int
        } else if normalized.starts_with("float") {
            FormatHint::Float
        } else if compact.contains(PRODUCT_REVENUE_SHAPE) {
            FormatHint::ProductRevenueList
        } else {
            FormatHint::Other(raw.trim().to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRevenue {
    pub product: String,
    pub revenue: f64,
}

/// Final answer, shaped by the format hint once finalization is done.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FinalAnswer {
    Int(i64),
    Float(f64),
    Text(String),
    ProductRevenue(Vec<ProductRevenue>),
    /// Any other JSON value (objects, mixed lists, booleans, null).
    Structured(Value),
}

impl FinalAnswer {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => FinalAnswer::Int(i),
                None => FinalAnswer::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FinalAnswer::Text(s),
            other => FinalAnswer::Structured(other),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, FinalAnswer::Int(_) | FinalAnswer::Float(_))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
