//! Typed readers for the quasi-JSON detail sub-fields.
//!
//! Detail fragments arrive either as strict JSON or in a looser repr-style
//! notation (single-quoted strings, `None`/`True`/`False`). Every reader here is
//! total: absent, blank, malformed, or wrongly-shaped input yields `None`.

use serde_json::Value as JsonValue;
use vacsift_core::DetailPayload;

/// Literal marker some listings carry for "no entries".
pub const EMPTY_LIST_MARKER: &str = "[]";

/// Outcome of reading one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Absent, blank, or the empty-list marker.
    Empty,
    Value(JsonValue),
    Malformed,
}

pub fn parse_fragment(text: Option<&str>) -> Fragment {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Fragment::Empty;
    };
    if text == EMPTY_LIST_MARKER {
        return Fragment::Empty;
    }
    if let Ok(value) = serde_json::from_str::<JsonValue>(text) {
        return Fragment::Value(value);
    }
    match normalize_quotes(text) {
        Some(rewritten) => serde_json::from_str(&rewritten)
            .map(Fragment::Value)
            .unwrap_or(Fragment::Malformed),
        None => Fragment::Malformed,
    }
}

/// Rewrite repr-style notation into JSON. Returns `None` on an unterminated string.
fn normalize_quotes(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                let quote = ch;
                out.push('"');
                loop {
                    match chars.next()? {
                        '\\' => match chars.next()? {
                            '\'' => out.push('\''),
                            escaped => {
                                out.push('\\');
                                out.push(escaped);
                            }
                        },
                        c if c == quote => break,
                        '"' => out.push_str("\\\""),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            c if c.is_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    other => other,
                });
            }
            c => out.push(c),
        }
    }
    Some(out)
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Skill names in source order. Any element without a string `name` spoils the list.
pub fn extract_skills(text: Option<&str>) -> Option<Vec<String>> {
    let Fragment::Value(JsonValue::Array(items)) = parse_fragment(text) else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| item.get("name").and_then(JsonValue::as_str).map(str::to_string))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryLanguage {
    pub code: Option<String>,
    pub level: Option<String>,
}

/// Code and level of the first listed language requirement.
pub fn extract_primary_language(text: Option<&str>) -> PrimaryLanguage {
    let Fragment::Value(JsonValue::Array(items)) = parse_fragment(text) else {
        return PrimaryLanguage::default();
    };
    let Some(first) = items.first() else {
        return PrimaryLanguage::default();
    };
    PrimaryLanguage {
        code: first.get("id").and_then(scalar_text),
        level: first
            .get("level")
            .and_then(|level| level.get("id"))
            .and_then(scalar_text),
    }
}

pub fn extract_schedule(text: Option<&str>) -> Option<String> {
    match parse_fragment(text) {
        Fragment::Value(value @ JsonValue::Object(_)) => value.get("id").and_then(scalar_text),
        _ => None,
    }
}

/// Everything the enrichment step reads out of a detail payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub key_skills: Option<Vec<String>>,
    pub language: PrimaryLanguage,
    pub schedule: Option<String>,
    pub description: Option<String>,
}

pub fn extract_fields(detail: &DetailPayload) -> ExtractedFields {
    ExtractedFields {
        key_skills: extract_skills(detail.key_skills.as_deref()),
        language: extract_primary_language(detail.languages.as_deref()),
        schedule: extract_schedule(detail.schedule.as_deref()),
        description: detail
            .description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
    }
}
