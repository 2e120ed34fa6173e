use thiserror::Error;

/// Errors raised by the worker and pool layers.
///
/// Only [`ReplPoolError::NoAvailable`] propagates to callers as a distinct
/// signal (to permit client back-off). Every other variant is translated by
/// the orchestrator into the `error` field of a snippet response so batch
/// requests can report per-snippet failures without aborting the batch.
#[derive(Debug, Error)]
pub enum ReplPoolError {
    #[error("no available REPL: pool is at capacity")]
    NoAvailable,

    #[error("failed to spawn REPL process: {0}")]
    SpawnFailed(String),

    #[error("Lean REPL command timed out in {0} seconds")]
    Timeout(f64),

    #[error("REPL crashed: {0}")]
    ReplCrashed(String),

    #[error("REPL protocol error: {0}")]
    ProtocolError(String),

    #[error("{0}")]
    InterpreterError(String),
}

impl ReplPoolError {
    /// Canonical surface used in `{error: ...}` response fields.
    /// `NoAvailable` is excluded — it never reaches this path (see §7 of SPEC_FULL.md).
    pub fn user_message(&self) -> String {
        match self {
            Self::NoAvailable => "no available REPL: pool is at capacity".to_string(),
            Self::SpawnFailed(msg) => format!("failed to start REPL: {msg}"),
            Self::Timeout(secs) => format!("Lean REPL command timed out in {secs} seconds"),
            Self::ReplCrashed(msg) => format!("REPL crashed: {msg}"),
            Self::ProtocolError(msg) => format!("REPL protocol error: {msg}"),
            Self::InterpreterError(msg) => msg.clone(),
        }
    }
}

/// Errors raised while loading and validating [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not a valid {1}")]
    InvalidValue(&'static str, &'static str),

    #[error("LEAN_REPL_PATH is required but was not set")]
    MissingInterpreterPath,

    #[error("INIT_REPLS oversubscribed: sum of values ({sum}) exceeds MAX_REPLS ({max_repls})")]
    InitReplsOversubscribed { sum: usize, max_repls: usize },

    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    FileParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("BIND_ADDR is not a valid socket address: {0}")]
    InvalidBindAddr(String),
}
