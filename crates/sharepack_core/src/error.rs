use thiserror::Error;
use uuid::Uuid;

use crate::platform::PlatformError;
use crate::queue::QueueError;
use crate::share_config::ConfigError;
use crate::store::StoreError;

/// Top-level error for submission, orchestration and consumption.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("share pack {0} not found")]
    SharePackNotFound(Uuid),

    /// Stored state contradicts what the current step needs
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
