use serde_json::{json, Value};

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Renders the error as a cross-process message body
    ///
    /// The content side never sees a Rust error, only `{ "error": ... }`.
    pub fn to_payload(&self) -> Value {
        let message = match self {
            AppError::InvalidInput(msg)
            | AppError::ExternalApi(msg)
            | AppError::Messaging(msg) => msg.clone(),
            _ => self.to_string(),
        };

        json!({
            "error": message
        })
    }
}

pub type AppResult<T> = Result<T, AppError>;
