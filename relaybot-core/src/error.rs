use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Container engine error: {0}")]
    ContainerEngine(String),

    #[error("Chat relay error: {0}")]
    Chat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
