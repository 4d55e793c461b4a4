use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Simulation {simulation_id} is already running")]
    AlreadyRunning { simulation_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decision generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Decision validation failed: {0}")]
    Validation(String),

    #[error("Demand engine error: {0}")]
    Demand(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure classes surfaced to callers above the engine (HTTP handlers, CLIs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Failure,
}

impl SimError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning { .. } => ErrorKind::Conflict,
            Self::NotFound { .. }       => ErrorKind::NotFound,
            _                           => ErrorKind::Failure,
        }
    }
}

/// Errors raised by an external decision-generation capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("empty response")]
    EmptyResponse,

    #[error("request refused: {0}")]
    Refused(String),
}

pub type SimResult<T> = Result<T, SimError>;
