use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Error returned while building handlers, formatters or a dispatcher from
/// configuration. Always fatal at construction time.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    MissingOption(&'static str),

    #[error("invalid value for option `{option}`: {reason}")]
    InvalidOption { option: &'static str, reason: String },

    #[error("invalid options for `{name}`: {source}")]
    Options {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown color `{color}`; available colors: {available}")]
    UnknownColor { color: String, available: String },

    #[error("unknown record attribute `{0}`")]
    UnknownAttribute(String),

    #[error("unterminated placeholder in template `{0}`")]
    BadTemplate(String),

    #[error("log file `{path}` must end with `{expected}`")]
    InvalidExtension { path: PathBuf, expected: &'static str },

    #[error("unknown handler class `{0}`")]
    UnknownHandlerClass(String),

    #[error("unknown formatter class `{0}`")]
    UnknownFormatterClass(String),

    #[error("unknown filter class `{0}`")]
    UnknownFilterClass(String),

    #[error("handler `{handler}` references unknown formatter `{formatter}`")]
    UnknownFormatter { handler: String, formatter: String },

    #[error("`{owner}` references unknown filter `{filter}`")]
    UnknownFilter { owner: String, filter: String },

    #[error("logger `{logger}` references unknown handler `{handler}`")]
    UnknownHandler { logger: String, handler: String },

    #[error("handler `{handler}` cannot use formatter `{formatter}`: {reason}")]
    IncompatibleFormatter {
        handler: String,
        formatter: String,
        reason: &'static str,
    },

    #[error("failed to start webhook worker: {0}")]
    Worker(#[source] io::Error),
}

/// Runtime failure inside a handler. Reported through the diagnostics
/// channel, never returned to the code that logged the record.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rotate log file {path}: {source}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to console: {0}")]
    Console(#[source] io::Error),

    #[error("handler is closed; record discarded")]
    Closed,

    #[error("delivery queue is full; record rejected")]
    QueueFull,

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Failure of one outbound webhook request. The records it carried stay
/// buffered for the next attempt.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("network communication failed: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("webhook rejected payload with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("webhook rate limited the request (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Minimum wait the remote side asked for before the next request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
