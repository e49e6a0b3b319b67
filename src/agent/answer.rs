//! Answer finalization.
//!
//! Four stages run in order over the synthesizer's raw text and the last
//! query result. Each stage returns `Err` when it does not apply or cannot
//! coerce; the caller then keeps the previous stage's value.
//!
//! 1. parse the raw text (JSON, scalar per hint, literal structure, raw string)
//! 2. float hint: take the first cell of the result when the answer is not numeric
//! 3. product/revenue hint: rebuild the list from the result columns
//! 4. strict coercion to the hint's shape

use crate::agent::format::{FinalAnswer, FormatHint, ProductRevenue};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StageError {
    #[error("stage does not apply")]
    NotApplicable,
    #[error("coercion failed: {0}")]
    Coercion(String),
}

pub type StageResult = Result<FinalAnswer, StageError>;

/// Run the whole pipeline. Never fails: the worst case is the raw text.
pub fn finalize(
    format_hint: &str,
    answer_text: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> FinalAnswer {
    let hint = FormatHint::parse(format_hint);
    let parsed = parse_answer(&hint, answer_text);

    let after_rows = match hint {
        FormatHint::Float => keep_on_failure("float-from-rows", float_from_rows(&parsed, rows), parsed),
        FormatHint::ProductRevenueList => keep_on_failure(
            "rebuild-from-rows",
            product_revenue_from_rows(columns, rows),
            parsed,
        ),
        _ => parsed,
    };

    let enforced = enforce(&hint, &after_rows);
    keep_on_failure("enforce", enforced, after_rows)
}

fn keep_on_failure(stage: &str, result: StageResult, previous: FinalAnswer) -> FinalAnswer {
    match result {
        Ok(next) => next,
        Err(StageError::NotApplicable) => previous,
        Err(e) => {
            tracing::debug!(stage, "answer stage skipped: {}", e);
            previous
        }
    }
}

/// Stage 1. JSON first, then a scalar per hint, then a Python-style literal, then the raw text.
/// For `int`/`float` hints a failed scalar parse yields the raw text directly.
pub fn parse_answer(hint: &FormatHint, text: &str) -> FinalAnswer {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return FinalAnswer::from_json(value);
    }
    match hint {
        FormatHint::Int => text
            .trim()
            .parse::<i64>()
            .map(FinalAnswer::Int)
            .unwrap_or_else(|_| FinalAnswer::Text(text.to_string())),
        FormatHint::Float => text
            .trim()
            .parse::<f64>()
            .map(FinalAnswer::Float)
            .unwrap_or_else(|_| FinalAnswer::Text(text.to_string())),
        _ => literal_to_json(text)
            .map(FinalAnswer::from_json)
            .unwrap_or_else(|| FinalAnswer::Text(text.to_string())),
    }
}

/// Stage 2 (float hint).
pub fn float_from_rows(current: &FinalAnswer, rows: &[Vec<Value>]) -> StageResult {
    if current.is_number() {
        return Err(StageError::NotApplicable);
    }
    let first = rows.first().ok_or(StageError::NotApplicable)?;
    let cell = first
        .first()
        .ok_or_else(|| StageError::Coercion("first row has no columns".to_string()))?;
    value_to_f64(cell).map(FinalAnswer::Float)
}

/// Stage 3 (product/revenue hint). Columns are found by name, falling back to positions 0 and 1.
pub fn product_revenue_from_rows(columns: &[String], rows: &[Vec<Value>]) -> StageResult {
    if rows.is_empty() || columns.is_empty() {
        return Err(StageError::NotApplicable);
    }
    let find = |name: &str, fallback: usize| {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .unwrap_or(fallback)
    };
    let product_idx = find("product", 0);
    let revenue_idx = find("revenue", 1);

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let product = row
            .get(product_idx)
            .ok_or_else(|| StageError::Coercion(format!("row has no column {}", product_idx)))?;
        let revenue = row
            .get(revenue_idx)
            .ok_or_else(|| StageError::Coercion(format!("row has no column {}", revenue_idx)))?;
        items.push(ProductRevenue {
            product: value_to_text(product),
            revenue: value_to_f64(revenue)?,
        });
    }
    Ok(FinalAnswer::ProductRevenue(items))
}

/// Stage 4. Conformant inputs come back unchanged.
pub fn enforce(hint: &FormatHint, current: &FinalAnswer) -> StageResult {
    match hint {
        FormatHint::Int => match current {
            FinalAnswer::Int(_) => Ok(current.clone()),
            FinalAnswer::Float(f) if f.is_finite() => Ok(FinalAnswer::Int(f.round_ties_even() as i64)),
            FinalAnswer::Float(f) => Err(StageError::Coercion(format!("{} is not finite", f))),
            FinalAnswer::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(FinalAnswer::Int)
                .map_err(|e| StageError::Coercion(e.to_string())),
            _ => Err(StageError::NotApplicable),
        },
        FormatHint::Float => match current {
            FinalAnswer::Float(_) => Ok(current.clone()),
            FinalAnswer::Int(i) => Ok(FinalAnswer::Float(*i as f64)),
            FinalAnswer::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(FinalAnswer::Float)
                .map_err(|e| StageError::Coercion(e.to_string())),
            _ => Err(StageError::NotApplicable),
        },
        FormatHint::ProductRevenueList => {
            let value = match current {
                FinalAnswer::ProductRevenue(_) => return Ok(current.clone()),
                FinalAnswer::Text(s) => serde_json::from_str::<Value>(s)
                    .map_err(|e| StageError::Coercion(e.to_string()))?,
                FinalAnswer::Structured(v) => v.clone(),
                _ => return Err(StageError::NotApplicable),
            };
            let Value::Array(items) = value else {
                return Err(StageError::NotApplicable);
            };
            let mut cleaned = Vec::with_capacity(items.len());
            for item in &items {
                let Value::Object(obj) = item else {
                    continue;
                };
                let product = obj.get("product").map(value_to_text).unwrap_or_default();
                let revenue = match obj.get("revenue") {
                    Some(v) => value_to_f64(v)?,
                    None => 0.0,
                };
                cleaned.push(ProductRevenue { product, revenue });
            }
            if cleaned.is_empty() {
                return Err(StageError::NotApplicable);
            }
            Ok(FinalAnswer::ProductRevenue(cleaned))
        }
        FormatHint::Other(_) => Err(StageError::NotApplicable),
    }
}

fn value_to_f64(value: &Value) -> Result<f64, StageError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| StageError::Coercion(format!("{} is not representable as f64", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| StageError::Coercion(format!("'{}': {}", s, e))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(StageError::Coercion(format!("cannot convert {} to float", other))),
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rewrite a Python-style literal (single quotes, tuples, `True`/`False`/`None`)
/// as JSON and parse it.
pub fn literal_to_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(trimmed.len() + 8);
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                let mut body = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == '\\' {
                        match chars.next()? {
                            'n' => body.push('\n'),
                            't' => body.push('\t'),
                            other => body.push(other),
                        }
                    } else if ch == quote {
                        closed = true;
                        break;
                    } else {
                        body.push(ch);
                    }
                }
                if !closed {
                    return None;
                }
                out.push_str(&serde_json::to_string(&body).ok()?);
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    // Exponents such as `1e5` are part of a number.
                    _ if ident.starts_with(['e', 'E'])
                        && out.ends_with(|p: char| p.is_ascii_digit() || p == '.') =>
                    {
                        out.push_str(&ident)
                    }
                    _ => return None,
                }
            }
            other => out.push(other),
        }
    }
    serde_json::from_str(&out).ok()
}
