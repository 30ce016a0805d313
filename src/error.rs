//! Error type shared by every layer of the adapter.
//!
//! Configuration errors surface while the schema is being built; everything
//! else is raised per resolver call and handed to async-graphql unchanged,
//! which reports it as a field error.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Misuse of the adapter detected at schema-build or first-use time.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to convert {0} to a GraphQL type")]
    UnmappableType(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid global id: {0}")]
    InvalidGlobalId(String),

    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Unknown attribute `{attribute}` on model {model}")]
    UnknownAttribute { model: String, attribute: String },

    #[error("Operator `{operator}` is not supported by the {dialect} dialect")]
    UnsupportedOperator {
        operator: &'static str,
        dialect: &'static str,
    },

    #[error("Error simplifying selection: {0}")]
    Selection(String),

    #[error("Association `{0}` can only be resolved with a source instance")]
    MissingSource(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A batched load failed; the same error is shared by every waiting key.
    #[error("Batch load failed: {0}")]
    Batch(Arc<Error>),

    /// Raised by a caller-supplied hook and propagated untouched.
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error is a configuration mistake rather than a per-request failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UnmappableType(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::InvalidArgument {
        name: name.into(),
        reason: reason.into(),
    }
}

pub fn invalid_filter(msg: impl Into<String>) -> Error {
    Error::InvalidFilter(msg.into())
}
