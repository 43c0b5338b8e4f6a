//! Component lifecycle engine
//!
//! Discovers the supervisor's own container, creates components wired
//! into its namespaces, streams their output, supervises their
//! lifetimes, and tears everything down on exit.

mod client;
mod component;
mod create;
mod error;
mod output;
mod supervisor;

pub use client::Client;
pub use component::{aggregate_exit_code, ArgList, Component, ComponentExit, HealthCheck};
pub use error::{EngineError, EngineResult};
pub use supervisor::Supervisor;
