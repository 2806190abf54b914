use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;
