use std::path::PathBuf;
use stopsig_core::Side;
use thiserror::Error;

/// Failures of the engine.
///
/// Setup paths (configuration, trial plan) return these as `Err`. Runtime
/// operations never do: they log the value and report a plain `bool`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("trial plan not found at {}", path.display())]
    PlanNotFound { path: PathBuf },
    #[error("trial plan is invalid: {0}")]
    PlanInvalid(String),
    #[error("a trial is already in flight")]
    DuplicateTrialStart,
    #[error("no stimulus in the {0} lane")]
    MissingCollaborator(Side),
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
