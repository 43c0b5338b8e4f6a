//! Compose-style overlay merging
//!
//! Later files win: mappings merge key by key, scalars and sequences
//! are replaced wholesale.

use serde_yaml::Value;

/// Merge `overlay` into `base` in place
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn overlay_overrides_scalars_and_keeps_base_keys() {
        let mut base = parse("app:\n  image: alpine:3.18\n  tty: true\n");
        merge(&mut base, parse("app:\n  image: alpine:3.19\n"));

        assert_eq!(base["app"]["image"].as_str(), Some("alpine:3.19"));
        assert_eq!(base["app"]["tty"].as_bool(), Some(true));
    }

    #[test]
    fn overlay_adds_new_services_after_existing_ones() {
        let mut base = parse("app:\n  image: alpine\n");
        merge(&mut base, parse("log:\n  image: busybox\n"));

        let names: Vec<&str> = base
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(|k| k.as_str())
            .collect();
        assert_eq!(names, vec!["app", "log"]);
    }

    #[test]
    fn overlay_replaces_sequences_wholesale() {
        let mut base = parse("app:\n  command: [echo, one]\n");
        merge(&mut base, parse("app:\n  command: [echo, two]\n"));

        let command: Vec<&str> = base["app"]["command"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(command, vec!["echo", "two"]);
    }
}
