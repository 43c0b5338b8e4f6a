//! Engine error taxonomy

use thiserror::Error;

/// Errors produced by the component lifecycle engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed component definition, seed label, or command shape
    #[error("configuration error: {0}")]
    Config(String),

    /// Not running inside a container, or the cgroup is not discoverable
    #[error("environment error: {0}")]
    Environment(String),

    /// The daemon could not be contacted, or gave up responding
    #[error("daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("image pull failed: {0}")]
    ImagePull(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An RPC deadline was exceeded
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the underlying daemon response was a 404
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            })
        )
    }
}
