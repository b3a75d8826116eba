//! Strict `{{ name }}` substitution for stored scripts.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{DistError, Result};
use crate::types::Variables;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

/// Replace every placeholder with its value from `variables`.
///
/// Strings are inserted verbatim, other values as JSON. An unknown name is an
/// error.
pub fn render(text: &str, variables: &Variables) -> Result<String> {
    let pattern = PLACEHOLDER
        .as_ref()
        .ok_or_else(|| DistError::Template("placeholder pattern failed to compile".to_string()))?;

    let mut missing = None;
    let rendered = pattern.replace_all(text, |caps: &Captures<'_>| {
        let name = &caps[1];
        match variables.get(name) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(DistError::Template(format!("'{name}' is not defined"))),
        None => Ok(rendered.into_owned()),
    }
}
