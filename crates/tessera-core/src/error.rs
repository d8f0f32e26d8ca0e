use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A caller broke an API contract (e.g. asked a key set about `Undefined`).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid device string '{0}'")]
    InvalidDevice(String),

    #[error("Unknown device type ordinal {0}")]
    UnknownDeviceType(i16),

    #[error("Unknown dispatch key '{0}'")]
    UnknownDispatchKey(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
