//! Podlike
//!
//! A pod-like supervisor that runs inside a container and manages
//! sibling containers sharing its kernel namespaces, composed entirely
//! from primitive Docker engine calls.

pub mod config;
pub mod engine;
pub mod template;

// Re-export commonly used types
pub use config::Configuration;
pub use engine::{Client, Component, ComponentExit, Supervisor};
pub use template::Session;
