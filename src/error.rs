use thiserror::Error;

/// Errors that can surface synchronously while provisioning a
/// [`crate::instance::FailoverInstance`]. These are the only errors this
/// crate ever returns as a Rust `Result` — once an instance is serving
/// traffic, failures are always materialized as HTTP responses, never
/// propagated as framework errors.
#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("upstream list must not be empty")]
    EmptyUpstreamList,

    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
