use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(format!("Database error: {}", err))
    }
}

impl From<toml::de::Error> for AuditError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Chain tail moved: expected previous hash {expected}, store tail is {actual}")]
    ChainConflict { expected: String, actual: String },

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuditError {
    /// True for failures a caller may retry against a fresh chain tail.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ChainConflict { .. })
    }
}

pub type Result<T, E = AuditError> = std::result::Result<T, E>;
