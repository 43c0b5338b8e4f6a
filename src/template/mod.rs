//! Template preparation session
//!
//! Reads one or more compose-style stack descriptions, resolves
//! variables, merges overlays, and yields the concrete component list
//! handed to the supervisor. One-shot: the session runs once at
//! startup and is not re-entered.

mod interpolate;
mod overlay;
mod session;

pub use session::{Session, TemplateError};
