use reqwest::StatusCode;
use thiserror::Error;

/// Why a single feed entity could not be turned into telemetry.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("entity is not an object")]
    NotAnObject,

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("field {path} is not {expected}")]
    WrongType {
        path: &'static str,
        expected: &'static str,
    },
}

/// Feed retrieval failure. Never escapes the fetcher; it is logged and the
/// run sees an empty document.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid feed url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("feed request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("feed returned status {0}")]
    Status(StatusCode),

    #[error("feed body is not a valid document: {0}")]
    Decode(String),
}

/// Failure to deliver one record to the telemetry sink.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("invalid sink url: {0}")]
    InvalidSink(String),

    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("sink returned status {0}")]
    Status(StatusCode),
}

/// Failures that end a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("no vehicles found in public data")]
    NoEntities,
}

impl RunError {
    /// Short kind label, as written to the run history.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::NoEntities => "no_entities",
        }
    }
}

/// Missing or malformed process configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not found")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}
