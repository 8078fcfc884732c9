//! `{{ NAME }}` placeholder rendering for query strings.
//!
//! Only bare names are supported. An unknown name renders as an empty
//! string, the same as an undefined variable in a Jinja template.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Render `template` against `constants`.
pub fn render(template: &str, constants: &BTreeMap<String, serde_json::Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match constants.get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) => String::new(),
                Some(other) => other.to_string(),
                None => {
                    debug!(%name, "undefined placeholder in query template");
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constants() -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("JOB".to_string(), json!("node")),
            ("LIMIT".to_string(), json!(80)),
            ("RATIO".to_string(), json!(0.5)),
        ])
    }

    #[test]
    fn renders_strings_and_numbers() {
        let out = render("cpu{job=\"{{JOB}}\"} > {{ LIMIT }} * {{ RATIO }}", &constants());
        assert_eq!(out, "cpu{job=\"node\"} > 80 * 0.5");
    }

    #[test]
    fn unknown_placeholder_renders_empty() {
        assert_eq!(render("a{{ MISSING }}b", &constants()), "ab");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(render("sum(rate(x[1m]))", &constants()), "sum(rate(x[1m]))");
    }
}
