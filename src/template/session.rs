//! One-shot stack resolution session

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::engine::Component;
use super::{interpolate, overlay};

/// Errors raised while resolving stack files; all fatal at startup
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no stack files given")]
    NoInput,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no services defined in {files}")]
    NoServices { files: String },

    #[error("invalid service {name}: {reason}")]
    InvalidService { name: String, reason: String },
}

/// One parsed stack file
struct ConfigFile {
    filename: String,
    document: Value,
}

/// Resolves declarative stack files into the component list. Created
/// once at startup; never re-entered.
pub struct Session {
    working_dir: PathBuf,
    config_files: Vec<ConfigFile>,
    args: HashMap<String, String>,
}

impl Session {
    /// Read and parse the given stack files in declared order. The
    /// single path `-` reads standard input instead.
    pub fn new(input_files: &[String]) -> Result<Self, TemplateError> {
        if input_files.is_empty() {
            return Err(TemplateError::NoInput);
        }

        let mut config_files = Vec::with_capacity(input_files.len());

        if input_files.len() == 1 && input_files[0] == "-" {
            let mut contents = String::new();
            std::io::stdin()
                .read_to_string(&mut contents)
                .map_err(|source| TemplateError::Io {
                    path: "<stdin>".into(),
                    source,
                })?;
            config_files.push(parse_file("<stdin>", &contents)?);
        } else {
            for path in input_files {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
                        path: path.clone(),
                        source,
                    })?;
                config_files.push(parse_file(path, &contents)?);
            }
        }

        let working_dir = Path::new(&input_files[0])
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self::build(working_dir, config_files, std::env::vars().collect()))
    }

    fn build(
        working_dir: PathBuf,
        config_files: Vec<ConfigFile>,
        args: HashMap<String, String>,
    ) -> Self {
        Self {
            working_dir,
            config_files,
            args,
        }
    }

    /// Resolve variables, merge the overlays, and export the component
    /// list in declared order
    pub fn components(&self) -> Result<Vec<Component>, TemplateError> {
        debug!(
            "Resolving {} stack file(s) from {}",
            self.config_files.len(),
            self.working_dir.display()
        );

        let mut services = Value::Mapping(Default::default());
        for file in &self.config_files {
            let resolved = interpolate::interpolate(file.document.clone(), &self.args);
            if let Some(section) = resolved.get("services") {
                overlay::merge(&mut services, section.clone());
            }
        }

        let mapping = match services {
            Value::Mapping(mapping) if !mapping.is_empty() => mapping,
            _ => {
                return Err(TemplateError::NoServices {
                    files: self
                        .config_files
                        .iter()
                        .map(|f| f.filename.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        };

        let mut components = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let name = key
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| TemplateError::InvalidService {
                    name: format!("{:?}", key),
                    reason: "service names must be strings".into(),
                })?;

            let mut component: Component =
                serde_yaml::from_value(value).map_err(|e| TemplateError::InvalidService {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            if component.image.is_empty() {
                return Err(TemplateError::InvalidService {
                    name,
                    reason: "image is required".into(),
                });
            }

            component.name = name;
            components.push(component);
        }

        Ok(components)
    }
}

fn parse_file(filename: &str, contents: &str) -> Result<ConfigFile, TemplateError> {
    let document = serde_yaml::from_str(contents).map_err(|source| TemplateError::Parse {
        path: filename.to_string(),
        source,
    })?;
    Ok(ConfigFile {
        filename: filename.to_string(),
        document,
    })
}
