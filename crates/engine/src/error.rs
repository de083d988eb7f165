use sluice_connector::SourceError;
use sluice_core::{SluiceError, TriggerType};
use sluice_storage::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] SluiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("trigger not found: {0}")]
    TriggerNotFound(Uuid),

    #[error("no poller registered for {0} triggers")]
    NoPoller(TriggerType),

    #[error("trigger {0} already has a cycle in flight")]
    AlreadyRunning(Uuid),

    #[error("poll cycle panicked: {0}")]
    Panic(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
