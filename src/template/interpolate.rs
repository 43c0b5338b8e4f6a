//! Variable interpolation for stack files
//!
//! Supports `${VAR}`, `${VAR:-default}`, and `$VAR` in string scalars,
//! with `$$` escaping a literal dollar sign. Unknown variables resolve
//! to the empty string, compose-style.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_yaml::Value;
use tracing::warn;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("static pattern compiles")
    })
}

/// Interpolate every string scalar in the document
pub(crate) fn interpolate(value: Value, args: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(&s, args)),
        Value::Sequence(seq) => {
            Value::Sequence(seq.into_iter().map(|v| interpolate(v, args)).collect())
        }
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, interpolate(v, args)))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn interpolate_str(input: &str, args: &HashMap<String, String>) -> String {
    pattern()
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str());

            match name {
                None => "$".to_string(),
                Some(name) => match args.get(name) {
                    Some(value) => value.clone(),
                    None => match caps.get(2) {
                        Some(default) => default.as_str().to_string(),
                        None => {
                            warn!("Undefined variable {} resolves to empty", name);
                            String::new()
                        }
                    },
                },
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_braced_and_bare_variables() {
        let args = args(&[("TAG", "3.19"), ("NAME", "app")]);
        assert_eq!(interpolate_str("alpine:${TAG}", &args), "alpine:3.19");
        assert_eq!(interpolate_str("hello $NAME!", &args), "hello app!");
    }

    #[test]
    fn applies_defaults_for_missing_variables() {
        let args = args(&[]);
        assert_eq!(interpolate_str("${MISSING:-fallback}", &args), "fallback");
        assert_eq!(interpolate_str("${MISSING}", &args), "");
    }

    #[test]
    fn double_dollar_escapes() {
        let args = args(&[("HOME", "/root")]);
        assert_eq!(interpolate_str("cost: $$5 in $HOME", &args), "cost: $5 in /root");
    }

    #[test]
    fn walks_nested_documents() {
        let args = args(&[("IMG", "alpine")]);
        let doc: Value = serde_yaml::from_str("services:\n  app:\n    image: $IMG\n").unwrap();
        let resolved = interpolate(doc, &args);
        let image = &resolved["services"]["app"]["image"];
        assert_eq!(image.as_str(), Some("alpine"));
    }
}
