use thiserror::Error;

/// CLI-specific error type
#[derive(Debug, Error)]
pub enum Error {
    /// The flags and file describe an impossible deployment.
    #[error("invalid deployment: {0}")]
    InvalidDeployment(String),

    /// A role task panicked or was aborted.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// Deployment file could not be parsed.
    #[error("invalid deployment file: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// Publisher, subscriber or broker failure.
    #[error(transparent)]
    Participant(#[from] relay_participant::Error),

    /// Deployment file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadConfig {
        /// The file.
        path: String,
        /// Why.
        source: std::io::Error,
    },

    /// Latency samples could not be written.
    #[error("failed to write latency samples to {path}: {source}")]
    WriteLatency {
        /// The file.
        path: String,
        /// Why.
        source: std::io::Error,
    },
}
