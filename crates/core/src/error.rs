use thiserror::Error;

use crate::trigger::TriggerStatus;
use crate::validation::ValidationResult;

#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("validation failed: {0}")]
    Validation(ValidationResult),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("cannot move trigger from {from} to {to}")]
    InvalidTransition { from: TriggerStatus, to: TriggerStatus },

    #[error("trigger type is immutable (was {from}, got {to})")]
    TypeChanged { from: String, to: String },

    #[error("unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid schedule: {0}")]
    Schedule(String),
}

pub type Result<T> = std::result::Result<T, SluiceError>;
