use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum RollupError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("sensor not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl RollupError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(sensor_id: impl Display) -> Self {
        Self::NotFound(sensor_id.to_string())
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "persistence failure");
        Self::Persistence(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type RollupResult<T> = Result<T, RollupError>;

/// Raised by a store when a save is based on a revision that is no longer current.
#[derive(Debug, thiserror::Error)]
#[error("write conflict on sensor {sensor_id}: expected revision {expected}")]
pub struct StoreConflict {
    pub sensor_id: String,
    pub expected: i64,
}
