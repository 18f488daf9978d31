//! Rich-presence text for a launched game.
//!
//! Templates come from `settings.json` and support `{name}`, `{high}`, `{aff}`
//! and `{flags}`. Literal braces are written `{{` and `}}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DETAILS_TEMPLATE: &str = "{name}";
pub const DEFAULT_STATE_TEMPLATE: &str = "HighPrio={high}  Affinity={aff}  Flags={flags}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub details: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceTemplates {
    pub details: String,
    pub state: String,
}

impl Default for PresenceTemplates {
    fn default() -> Self {
        Self {
            details: DEFAULT_DETAILS_TEMPLATE.to_string(),
            state: DEFAULT_STATE_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("unmatched '{0}' at byte {1}")]
    Unbalanced(char, usize),
}

/// Values substituted into the templates.
pub struct PresenceFields<'a> {
    pub name: &'a str,
    pub high: bool,
    pub aff: bool,
    pub flags: &'a [String],
}

pub fn format(
    templates: &PresenceTemplates,
    fields: &PresenceFields<'_>,
) -> Result<PresencePayload, PresenceError> {
    Ok(PresencePayload {
        details: render(&templates.details, fields)?,
        state: render(&templates.state, fields)?,
    })
}

fn render(template: &str, fields: &PresenceFields<'_>) -> Result<String, PresenceError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, ch)) => key.push(ch),
                        None => return Err(PresenceError::Unbalanced('{', at)),
                    }
                }
                out.push_str(&value_of(&key, fields)?);
            }
            '}' => return Err(PresenceError::Unbalanced('}', at)),
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn value_of(key: &str, fields: &PresenceFields<'_>) -> Result<String, PresenceError> {
    Ok(match key.trim() {
        "name" => fields.name.to_string(),
        "high" => fields.high.to_string(),
        "aff" => fields.aff.to_string(),
        "flags" if fields.flags.is_empty() => "(none)".to_string(),
        "flags" => fields.flags.join(" "),
        other => return Err(PresenceError::UnknownPlaceholder(other.to_string())),
    })
}
