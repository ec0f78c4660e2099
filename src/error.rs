use thiserror::Error;

/// Main error type for the relay server and host agent
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream scheduling service error: {0}")]
    Upstream(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Request errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// True for errors caused by the caller rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::Validation(_)
                | RelayError::Auth(_)
                | RelayError::NotFound(_)
                | RelayError::Conflict(_)
        )
    }
}

/// Result type alias for RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
