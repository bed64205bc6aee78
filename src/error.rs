//! Typed errors for the seams where callers branch on the failure kind.
//! Everything else flows through `anyhow::Result` with context.

use thiserror::Error;

/// Errors returned by the chat transport.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The rendered text exceeds what the chat service accepts.
    #[error("message is too long")]
    MessageTooLong,

    /// The chat service answered with `ok: false`.
    #[error("chat api error: {description}")]
    Api { description: String },

    /// Transport-level failure (connect, timeout, body decode).
    #[error("chat transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors parsing an inline-button callback payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("callback payload is empty")]
    Empty,

    #[error("unknown callback action: {0}")]
    UnknownAction(String),

    #[error("callback payload has {0} fields, expected 3 or 4")]
    FieldCount(usize),

    #[error("callback score is not a number: {0}")]
    BadScore(String),
}

/// Errors from feed registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("feed {0} is already followed")]
    AlreadyFollowed(String),

    #[error("feed {0} is not checked out")]
    NotCheckedOut(String),
}

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading key file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("writing key file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing key file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("key file is missing `{0}`")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// An upstream reply that will never decode, however often it is retried.
#[derive(Debug, Error)]
#[error("malformed {what}: {reason}")]
pub struct MalformedResponse {
    pub what: String,
    pub reason: String,
}

impl MalformedResponse {
    /// True when `err` or anything in its context chain is malformed data.
    pub fn is_cause_of(err: &anyhow::Error) -> bool {
        err.chain().any(|e| e.is::<MalformedResponse>())
    }
}
