use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Invalid color '{0}', expected #rrggbb")]
    InvalidColor(String),

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Update error: {0}")]
    UpdateError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
