//! Error types for configuration, weather retrieval and speech dispatch.
//!
//! None of these ever stop the service; the worst outcome of any of them
//! is that no announcement fires this cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("no weather entity configured")]
    NotConfigured,

    #[error("weather entity {0} not found")]
    EntityNotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("host returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed weather payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for WeatherError {
    fn from(err: reqwest::Error) -> Self {
        WeatherError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no TTS engine configured for {0}")]
    NoTtsEngine(String),

    #[error("speech capability unavailable: {0}")]
    Unavailable(String),

    #[error("speak request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Unavailable(err.to_string())
    }
}
