//! Component model
//!
//! A `Component` is the declarative record for one child container,
//! deserialized straight from a compose-style service mapping. Runtime
//! identity (name, container id) is populated during the lifecycle and
//! never comes from user input.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::error::{EngineError, EngineResult};

/// Entrypoint/command shape accepted from declarative input: absent, a
/// shell-style line, or a pre-tokenized argument list. Anything else
/// fails at deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArgList {
    #[default]
    Absent,
    Line(String),
    Argv(Vec<String>),
}

impl ArgList {
    /// Normalize into an argument vector. Shell-style lines are split
    /// with POSIX quoting rules; splitting failures are configuration
    /// errors for both entrypoint and command alike.
    pub fn normalize(&self) -> EngineResult<Vec<String>> {
        match self {
            ArgList::Absent => Ok(Vec::new()),
            ArgList::Line(line) => shell_words::split(line)
                .map_err(|e| EngineError::Config(format!("invalid command line {:?}: {}", line, e))),
            ArgList::Argv(args) => Ok(args.clone()),
        }
    }
}

/// Component healthcheck, daemon-interpreted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub test: ArgList,

    #[serde(default, deserialize_with = "duration::opt")]
    pub interval: Option<Duration>,

    #[serde(default, deserialize_with = "duration::opt")]
    pub timeout: Option<Duration>,

    #[serde(default, deserialize_with = "duration::opt")]
    pub start_period: Option<Duration>,

    #[serde(default)]
    pub retries: Option<u32>,
}

/// Declarative description of one child container
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Component {
    pub image: String,

    #[serde(default)]
    pub entrypoint: ArgList,

    #[serde(default)]
    pub command: ArgList,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Ordered `KEY=VALUE` pairs
    #[serde(default)]
    pub environment: Vec<String>,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub tty: bool,

    #[serde(default)]
    pub stop_signal: Option<String>,

    #[serde(default, deserialize_with = "duration::opt")]
    pub stop_grace_period: Option<Duration>,

    #[serde(default)]
    pub healthcheck: Option<HealthCheck>,

    /// Declared identity, set by the template session
    #[serde(skip)]
    pub name: String,

    /// Assigned once the daemon confirms creation
    #[serde(skip)]
    pub container_id: Option<String>,
}

impl Component {
    /// Grace period to use when stopping this component, falling back
    /// to `default` when the component declares none (or zero).
    pub fn effective_grace(&self, default: Duration) -> Duration {
        match self.stop_grace_period {
            Some(grace) if !grace.is_zero() => grace,
            _ => default,
        }
    }
}

/// Produced exactly once per started component
#[derive(Debug, Clone)]
pub struct ComponentExit {
    pub name: String,

    /// Daemon-reported status code
    pub status_code: i64,

    /// Set when the wait itself terminated unexpectedly, distinct from
    /// a non-zero status code
    pub error: Option<String>,
}

/// Process exit code for a completed run: zero iff every component
/// exited cleanly, otherwise the maximum non-zero status. A wait-level
/// error with status zero counts as a supervisor failure.
pub fn aggregate_exit_code(exits: &[ComponentExit]) -> i32 {
    exits
        .iter()
        .map(|exit| {
            let code = exit.status_code.clamp(0, 255) as i32;
            if code == 0 && exit.error.is_some() {
                1
            } else {
                code
            }
        })
        .max()
        .unwrap_or(0)
}

/// Compose-style duration fields: `"90s"`, `"1m30s"`, `"500ms"`, or a
/// bare integer meaning seconds.
pub(crate) mod duration {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Deserializer, Visitor};
    use serde::Deserialize;

    pub(crate) fn parse(input: &str) -> Result<Duration, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("empty duration".into());
        }

        let mut total = Duration::ZERO;
        let mut rest = trimmed;

        while !rest.is_empty() {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                return Err(format!("invalid duration {:?}", input));
            }
            let (number, tail) = rest.split_at(digits);
            let value: u64 = number
                .parse()
                .map_err(|_| format!("invalid duration {:?}", input))?;

            let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
            let (unit, next) = tail.split_at(unit_len);
            total += match unit {
                "h" => Duration::from_secs(value * 3600),
                "m" => Duration::from_secs(value * 60),
                "s" | "" => Duration::from_secs(value),
                "ms" => Duration::from_millis(value),
                "us" => Duration::from_micros(value),
                _ => return Err(format!("unknown duration unit {:?} in {:?}", unit, input)),
            };
            rest = next;
        }

        Ok(total)
    }

    struct ComposeDuration(Duration);

    impl<'de> Deserialize<'de> for ComposeDuration {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            struct DurationVisitor;

            impl<'de> Visitor<'de> for DurationVisitor {
                type Value = ComposeDuration;

                fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.write_str("a duration string like \"10s\" or a number of seconds")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                    parse(v).map(ComposeDuration).map_err(E::custom)
                }

                fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                    Ok(ComposeDuration(Duration::from_secs(v)))
                }

                fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                    if v < 0 {
                        return Err(E::custom("negative duration"));
                    }
                    Ok(ComposeDuration(Duration::from_secs(v as u64)))
                }
            }

            deserializer.deserialize_any(DurationVisitor)
        }
    }

    pub(crate) fn opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<ComposeDuration>::deserialize(deserializer)?.map(|d| d.0))
    }
}
