//! Top-level error types for Skybot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Social(#[from] SocialError),

    #[error(transparent)]
    Gen(#[from] GenError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0}")]
    MissingKeys(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Bluesky client errors.
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error("login failed for {handle}: {message}")]
    Auth { handle: String, message: String },

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response shape from {endpoint}: {message}")]
    UnexpectedResponse { endpoint: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// The backend refused the prompt itself. Terminal, never retried.
    #[error("prompt blocked by the backend: {reason}")]
    PromptBlocked { reason: String },

    /// The backend answered but produced nothing usable. Retryable.
    #[error("backend returned no usable output")]
    EmptyOutput,

    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response shape from {operation}: {message}")]
    UnexpectedResponse { operation: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
