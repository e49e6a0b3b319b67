//! Prompt signatures.
//!
//! A signature is a fixed instruction block plus named input and output
//! fields. The model is asked to reply with one JSON object keyed by the
//! output field names; [`parse_outputs`] is lenient about how it actually replies.

use crate::core::llm::Prompt;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Named field with a short description shown to the model.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub desc: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub instructions: &'static str,
    pub inputs: &'static [Field],
    pub outputs: &'static [Field],
}

/// One worked example: input and output field values by name.
pub type Demo = Map<String, Value>;

pub const ROUTE: Signature = Signature {
    name: "route",
    instructions: "Decide whether to use RAG only, SQL only, or hybrid (RAG + SQL).",
    inputs: &[Field {
        name: "question",
        desc: "",
    }],
    outputs: &[Field {
        name: "route",
        desc: "One of: rag, sql, hybrid. Prefer 'rag' for pure policy/docs, 'sql' for pure numeric DB \
               questions, 'hybrid' when docs define KPIs/dates and DB has numbers.",
    }],
};

pub const PLAN: Signature = Signature {
    name: "plan",
    instructions: "Extract high-level constraints: date ranges, KPI name, category, entities.",
    inputs: &[
        Field {
            name: "question",
            desc: "",
        },
        Field {
            name: "top_docs",
            desc: "Concatenated relevant doc chunks from RAG search.",
        },
    ],
    outputs: &[Field {
        name: "constraints_json",
        desc: "A compact JSON object string like {\"kpi\": \"...\", \"start_date\": \"YYYY-MM-DD\", \
               \"end_date\": \"YYYY-MM-DD\", \"category\": \"...\"}",
    }],
};

pub const NL2SQL: Signature = Signature {
    name: "nl2sql",
    instructions: "Generate a single valid SQLite query using the live schema.

Rules:
- Use double quotes around the table name \"Order Details\".
- Always join through Orders to access dates:
    FROM \"Order Details\" od
    JOIN Orders o ON o.OrderID = od.OrderID
    JOIN Products p ON p.ProductID = od.ProductID
    JOIN Categories c ON c.CategoryID = p.CategoryID
- Use date ranges, e.g.:
    o.OrderDate >= '1997-06-01' AND o.OrderDate < '1997-07-01'
  instead of YEAR(), MONTH() etc.
- For gross margin KPIs, use:
    revenue = SUM(od.UnitPrice * od.Quantity * (1 - od.Discount))
    cost    = SUM(od.UnitPrice * od.Quantity * 0.7)
    margin  = revenue - cost
- Only use existing tables/columns from the schema.
- Return a single SELECT statement, no comments, no CTEs.",
    inputs: &[
        Field {
            name: "question",
            desc: "",
        },
        Field {
            name: "schema",
            desc: "SQLite schema from PRAGMA, including tables Orders, 'Order Details', Products, \
                   Customers, Categories.",
        },
        Field {
            name: "constraints_json",
            desc: "JSON with inferred constraints (dates, KPI, category, etc.).",
        },
    ],
    outputs: &[Field {
        name: "sql",
        desc: "A single SELECT statement compatible with SQLite, no comments.",
    }],
};

pub const SYNTHESIZE: Signature = Signature {
    name: "synthesize",
    instructions: "Convert SQL results + docs into final answer text that will later be parsed to \
                   the requested format.",
    inputs: &[
        Field {
            name: "question",
            desc: "",
        },
        Field {
            name: "format_hint",
            desc: "",
        },
        Field {
            name: "top_docs",
            desc: "Concatenated top RAG chunks with their IDs.",
        },
        Field {
            name: "sql",
            desc: "The final executed SQL query, or empty if not used.",
        },
        Field {
            name: "sql_rows_json",
            desc: "A short JSON-like representation of SQL rows/columns, for the model to reason about.",
        },
    ],
    outputs: &[
        Field {
            name: "answer_text",
            desc: "Return ONLY the value for final_answer, serialized as JSON that exactly matches \
                   format_hint (e.g., 14, 123.45, {\"category\":\"Beverages\",\"quantity\":42}, \
                   [{\"product\":\"Chai\",\"revenue\":123.45}, ...]).",
        },
        Field {
            name: "explanation",
            desc: "One or two short sentences explaining how the answer was obtained.",
        },
        Field {
            name: "confidence",
            desc: "A confidence score between 0.0 and 1.0.",
        },
    ],
};

impl Signature {
    /// Render with the default instructions.
    pub fn render(&self, inputs: &[(&str, &str)], demos: &[Demo]) -> Prompt {
        self.render_with(self.instructions, inputs, demos)
    }

    /// Render with overridden instructions (tuned artifacts carry their own).
    pub fn render_with(&self, instructions: &str, inputs: &[(&str, &str)], demos: &[Demo]) -> Prompt {
        let mut system = String::new();
        system.push_str(instructions.trim());
        system.push_str("\n\n");

        system.push_str("Inputs:\n");
        for field in self.inputs {
            push_field_line(&mut system, field);
        }
        system.push_str("\nOutputs:\n");
        for field in self.outputs {
            push_field_line(&mut system, field);
        }

        let keys: Vec<String> = self.outputs.iter().map(|f| format!("\"{}\"", f.name)).collect();
        system.push_str(&format!(
            "\nRespond with a single JSON object with exactly these keys: {}. No other text.",
            keys.join(", ")
        ));

        let mut user = String::new();
        for demo in demos {
            user.push_str("Example:\n");
            for field in self.inputs.iter().chain(self.outputs.iter()) {
                if let Some(value) = demo.get(field.name) {
                    user.push_str(&format!("{}: {}\n", field.name, display_value(value)));
                }
            }
            user.push('\n');
        }
        if !demos.is_empty() {
            user.push_str("Now answer:\n");
        }
        for field in self.inputs {
            let value = inputs
                .iter()
                .find(|(name, _)| *name == field.name)
                .map(|(_, v)| *v)
                .unwrap_or("");
            user.push_str(&format!("{}: {}\n", field.name, value));
        }

        Prompt {
            signature: self.name,
            system,
            user,
        }
    }

    /// Extract this signature's output fields from a raw completion.
    pub fn parse_outputs(&self, raw: &str) -> Map<String, Value> {
        parse_outputs(raw, self.outputs)
    }
}

fn push_field_line(buf: &mut String, field: &Field) {
    if field.desc.is_empty() {
        buf.push_str(&format!("- {}\n", field.name));
    } else {
        buf.push_str(&format!("- {}: {}\n", field.name, field.desc));
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

static FIELD_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[\[\*]*\s*([A-Za-z_][A-Za-z0-9_]*)\s*[\]\*]*\s*[:=]\s*(.*)$")
        .expect("field line pattern is valid")
});

/// Whole text as a JSON object, else the first balanced `{...}`, else `field: value` lines.
/// Fields that cannot be found are simply absent.
pub fn parse_outputs(raw: &str, outputs: &[Field]) -> Map<String, Value> {
    let trimmed = strip_code_fence(raw);

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        return keep_known(obj, outputs);
    }
    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(candidate) {
            return keep_known(obj, outputs);
        }
    }

    let mut found = Map::new();
    let mut current: Option<&str> = None;
    for line in trimmed.lines() {
        if let Some(caps) = FIELD_LINE_RE.captures(line) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if let Some(field) = outputs.iter().find(|f| f.name == name) {
                let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                found.insert(field.name.to_string(), Value::String(value.to_string()));
                current = Some(field.name);
                continue;
            }
        }
        // Continuation lines belong to the last field seen.
        if let Some(name) = current {
            if let Some(Value::String(existing)) = found.get_mut(name) {
                if !line.trim().is_empty() {
                    existing.push('\n');
                    existing.push_str(line.trim_end());
                }
            }
        }
    }

    // A single-output signature may get a bare answer.
    if found.is_empty() && outputs.len() == 1 && !trimmed.is_empty() {
        found.insert(outputs[0].name.to_string(), Value::String(trimmed.to_string()));
    }
    found
}

fn keep_known(obj: Map<String, Value>, outputs: &[Field]) -> Map<String, Value> {
    obj.into_iter()
        .filter(|(k, _)| outputs.iter().any(|f| f.name == k))
        .collect()
}

/// Output field as text. JSON strings are taken as-is, other values are re-serialized.
pub fn output_str(outputs: &Map<String, Value>, name: &str) -> Option<String> {
    match outputs.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

/// Drop a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
