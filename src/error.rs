use thiserror::Error;

pub type Result<T> = std::result::Result<T, CastError>;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Session join failed: {0}")]
    Join(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CastError {
    /// Timeouts and disconnects are recovered by reconnecting; everything else is logged.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, CastError::Disconnected | CastError::Timeout(_))
    }
}
