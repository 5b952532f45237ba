use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[cfg(feature = "native")]
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(String),

    #[error("Invalid feed URL: {0}")]
    FeedUrl(#[from] url::ParseError),

    #[error("Sink error: {0}")]
    Sink(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

#[cfg(feature = "native")]
impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoreError {
    fn from(err: toml::ser::Error) -> Self {
        CoreError::TomlSerialization(err.to_string())
    }
}

/// Failure to turn a single inbound feed message into a [`crate::feed::FeedEvent`].
///
/// These never escape the feed reader: the message is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedParseError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported txType `{0}`")]
    UnknownKind(String),

    #[error("invalid market cap {0}")]
    InvalidMarketCap(f64),
}
