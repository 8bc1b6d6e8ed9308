//! Parameter redaction for diagnostics.
//!
//! Only parameters on the allow-list are logged with their values. Everything else is
//! replaced with a placeholder so failures never leak credentials or personal data.

use crate::models::Params;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

/// Placeholder written in place of a non-loggable value.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    loggable: HashSet<String>,
}

impl RedactionPolicy {
    /// Policy that redacts every value.
    pub fn redact_all() -> Self {
        Self::default()
    }

    /// Policy that logs the named parameters and redacts the rest.
    ///
    /// Names are compared case-insensitively and a leading `@` is ignored.
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let loggable = names
            .into_iter()
            .map(|n| normalize(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();
        Self { loggable }
    }

    pub fn is_loggable(&self, name: &str) -> bool {
        self.loggable.contains(&normalize(name))
    }

    /// Render parameters for logging. Nulls are kept as-is since they carry no data.
    pub fn redact(&self, params: &Params) -> Map<String, JsonValue> {
        params
            .iter()
            .map(|(name, value)| {
                let rendered = if value.is_null() || self.is_loggable(name) {
                    value.to_json()
                } else {
                    JsonValue::String(REDACTED.to_string())
                };
                (name.clone(), rendered)
            })
            .collect()
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_start_matches('@').to_ascii_lowercase()
}
