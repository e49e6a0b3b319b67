//! Constraint extraction.
//!
//! The model proposes constraints; anything it leaves unset is filled from
//! fixed phrase tables. Date precedence: model value, then a named campaign,
//! then a generic season, then a bare year. A margin question that names a
//! year always gets that full year.

use crate::agent::signature::{self, PLAN};
use crate::agent::state::Constraints;
use crate::core::llm::LanguageModel;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

/// First matching phrase wins.
const KPI_RULES: &[(&[&str], &str)] = &[
    (&["average order value", "aov"], "aov"),
    (&["margin", "gross margin"], "margin"),
    (&["quantity", "units sold"], "quantity"),
    (&["discount"], "discount"),
    (&["revenue", "sales"], "revenue"),
];

const CATEGORY_RULES: &[(&[&str], &str)] = &[
    (&["beverages"], "Beverages"),
    (&["condiments"], "Condiments"),
    (&["confections"], "Confections"),
    (&["dairy"], "Dairy Products"),
    (&["grains", "cereals"], "Grains/Cereals"),
    (&["meat", "poultry"], "Meat/Poultry"),
    (&["seafood"], "Seafood"),
];

/// Marketing-calendar campaigns with fixed windows (end exclusive).
const CAMPAIGNS: &[(&str, &str, &str)] = &[
    ("summer beverages 1997", "1997-06-01", "1997-07-01"),
    ("winter classics 1997", "1997-12-01", "1998-01-01"),
];

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("year pattern is valid"));
static SUMMER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsummer ((?:19|20)\d{2})\b").expect("summer pattern is valid"));
static WINTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bwinter ((?:19|20)\d{2})\b").expect("winter pattern is valid"));
static TOP_N_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btop (\d+|three|five|ten)\b").expect("top-n pattern is valid"));

pub struct Planner {
    model: Arc<dyn LanguageModel>,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Never fails: unusable model output counts as an empty object.
    pub fn plan(&self, question: &str, docs: &str) -> Constraints {
        let prompt = PLAN.render(&[("question", question), ("top_docs", docs)], &[]);
        let proposed = match self.model.complete(&prompt) {
            Ok(raw) => {
                let outputs = PLAN.parse_outputs(&raw);
                let text = signature::output_str(&outputs, "constraints_json").unwrap_or_default();
                parse_proposal(&text)
            }
            Err(e) => {
                tracing::warn!("constraint extraction failed, using rules only: {}", e);
                Map::new()
            }
        };
        apply_rules(proposed, question, docs)
    }
}

fn parse_proposal(text: &str) -> Map<String, Value> {
    if text.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(signature::strip_code_fence(text)) {
        Ok(Value::Object(obj)) => obj,
        Ok(other) => {
            tracing::warn!("constraints are not an object: {}", other);
            Map::new()
        }
        Err(e) => {
            tracing::warn!("unparseable constraints, using rules only: {}", e);
            Map::new()
        }
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fill unset fields from the phrase tables and normalize.
pub fn apply_rules(proposed: Map<String, Value>, question: &str, docs: &str) -> Constraints {
    let q = question.to_lowercase();
    let ctx = format!("{}\n{}", question, docs).to_lowercase();

    let mut kpi = string_field(&proposed, "kpi");
    let mut start_date = string_field(&proposed, "start_date");
    let mut end_date = string_field(&proposed, "end_date");
    let mut category = string_field(&proposed, "category");
    let mut top_n = proposed
        .get("top_n")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    if kpi.is_none() {
        kpi = first_rule(KPI_RULES, &q);
    }
    if category.is_none() {
        category = first_rule(CATEGORY_RULES, &q);
    }
    if top_n.is_none() {
        top_n = top_n_from(&q);
    }

    if kpi.as_deref() == Some("margin") {
        if let Some(year) = first_year(&YEAR_RE, &q) {
            let (start, end) = full_year(year);
            start_date = Some(start);
            end_date = Some(end);
        }
    }

    if start_date.is_none() && end_date.is_none() {
        if let Some((start, end)) = date_range_from(&ctx) {
            start_date = Some(start);
            end_date = Some(end);
        }
    }

    Constraints {
        kpi,
        start_date,
        end_date,
        category,
        top_n,
    }
}

fn first_rule(rules: &[(&[&str], &str)], q: &str) -> Option<String> {
    rules
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| q.contains(p)))
        .map(|(_, value)| value.to_string())
}

fn top_n_from(q: &str) -> Option<u32> {
    let word = TOP_N_RE.captures(q)?.get(1)?.as_str();
    match word {
        "three" => Some(3),
        "five" => Some(5),
        "ten" => Some(10),
        digits => digits.parse().ok().filter(|n| *n > 0),
    }
}

fn first_year(re: &Regex, text: &str) -> Option<i32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn full_year(year: i32) -> (String, String) {
    (format!("{}-01-01", year), format!("{}-01-01", year + 1))
}

fn date_range_from(ctx: &str) -> Option<(String, String)> {
    if let Some((_, start, end)) = CAMPAIGNS.iter().find(|(phrase, _, _)| ctx.contains(phrase)) {
        return Some((start.to_string(), end.to_string()));
    }
    if let Some(year) = first_year(&SUMMER_RE, ctx) {
        return Some((format!("{}-06-01", year), format!("{}-09-01", year)));
    }
    if let Some(year) = first_year(&WINTER_RE, ctx) {
        return Some((format!("{}-12-01", year), format!("{}-01-01", year + 1)));
    }
    first_year(&YEAR_RE, ctx).map(full_year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules_only(question: &str, docs: &str) -> Constraints {
        apply_rules(Map::new(), question, docs)
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn aov_without_dates() {
        let c = rules_only("What is the average order value?", "");
        assert_eq!(c.kpi.as_deref(), Some("aov"));
        assert_eq!(c.start_date, None);
        assert_eq!(c.end_date, None);
        assert_eq!(c.category, None);
        assert_eq!(c.top_n, None);
    }

    #[test]
    fn campaign_beats_generic_year() {
        let c = rules_only("Total quantity of Beverages sold during Summer Beverages 1997?", "");
        assert_eq!(c.kpi.as_deref(), Some("quantity"));
        assert_eq!(c.category.as_deref(), Some("Beverages"));
        assert_eq!(c.start_date.as_deref(), Some("1997-06-01"));
        assert_eq!(c.end_date.as_deref(), Some("1997-07-01"));
    }

    #[test]
    fn campaign_found_in_retrieved_text() {
        let c = rules_only(
            "Revenue during the campaign?",
            "[marketing_calendar::chunk0] Winter Classics 1997 runs in December.",
        );
        assert_eq!(c.start_date.as_deref(), Some("1997-12-01"));
        assert_eq!(c.end_date.as_deref(), Some("1998-01-01"));
    }

    #[test]
    fn generic_seasons_and_bare_year() {
        let c = rules_only("Sales in summer 1997", "");
        assert_eq!(c.start_date.as_deref(), Some("1997-06-01"));
        assert_eq!(c.end_date.as_deref(), Some("1997-09-01"));

        let c = rules_only("Sales in winter 1996", "");
        assert_eq!(c.start_date.as_deref(), Some("1996-12-01"));
        assert_eq!(c.end_date.as_deref(), Some("1997-01-01"));

        let c = rules_only("Discount given in 1998", "");
        assert_eq!(c.kpi.as_deref(), Some("discount"));
        assert_eq!(c.start_date.as_deref(), Some("1998-01-01"));
        assert_eq!(c.end_date.as_deref(), Some("1999-01-01"));
    }

    #[test]
    fn margin_year_overrides_everything() {
        let c = rules_only("Gross margin in Summer Beverages 1997?", "");
        assert_eq!(c.kpi.as_deref(), Some("margin"));
        assert_eq!(c.start_date.as_deref(), Some("1997-01-01"));
        assert_eq!(c.end_date.as_deref(), Some("1998-01-01"));

        let proposed = obj(json!({"kpi": "margin", "start_date": "1997-06-01", "end_date": "1997-07-01"}));
        let c = apply_rules(proposed, "Which customer had the top margin in 1997?", "");
        assert_eq!(c.start_date.as_deref(), Some("1997-01-01"));
        assert_eq!(c.end_date.as_deref(), Some("1998-01-01"));
    }

    #[test]
    fn model_values_take_precedence() {
        let proposed = obj(json!({
            "kpi": "revenue",
            "start_date": "1997-03-01",
            "end_date": "1997-04-01",
            "category": "Seafood",
            "top_n": 7,
        }));
        let c = apply_rules(proposed, "Top 3 beverages by quantity in summer 1997", "");
        assert_eq!(c.kpi.as_deref(), Some("revenue"));
        assert_eq!(c.start_date.as_deref(), Some("1997-03-01"));
        assert_eq!(c.category.as_deref(), Some("Seafood"));
        assert_eq!(c.top_n, Some(7));
    }

    #[test]
    fn blank_or_mistyped_model_values_count_as_unset() {
        let proposed = obj(json!({"kpi": "  ", "category": 5, "top_n": "3"}));
        let c = apply_rules(proposed, "Top three products by revenue", "");
        assert_eq!(c.kpi.as_deref(), Some("revenue"));
        assert_eq!(c.category, None);
        assert_eq!(c.top_n, Some(3));
    }

    #[test]
    fn top_n_phrases() {
        assert_eq!(top_n_from("top 5 customers"), Some(5));
        assert_eq!(top_n_from("top five customers"), Some(5));
        assert_eq!(top_n_from("top 10 products"), Some(10));
        assert_eq!(top_n_from("the topmost product"), None);
    }

    #[test]
    fn unparseable_proposal_is_empty() {
        assert!(parse_proposal("kpi is revenue").is_empty());
        assert!(parse_proposal("[1, 2]").is_empty());
        assert_eq!(parse_proposal(r#"{"kpi": "aov"}"#).get("kpi"), Some(&json!("aov")));
    }
}
