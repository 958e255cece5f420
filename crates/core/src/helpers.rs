//! Helper functions for text cleanup and template placeholders.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{Result, SerializerError};

// `{name}` placeholders; `{{` and `}}` are literal braces.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Clean text by normalizing line endings and trimming surrounding whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .to_string()
}

/// Substitute `{name}` placeholders using `lookup`.
///
/// Unknown placeholders are an error so that a typo in a custom template
/// cannot silently produce prompts with missing fields.
pub fn render_placeholders<'a, F>(template: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        let whole = &caps[0];
        match caps.get(1) {
            None if whole == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(name) => match lookup(name.as_str()) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            },
        }
    });

    match missing {
        Some(name) => Err(SerializerError::Template(format!(
            "unknown placeholder `{{{}}}` in template",
            name
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// Names of all placeholders used by a template, in order of appearance.
pub fn placeholder_names(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
