//! sharepack_core: share pack provisioning with SCD2 history.
//!
//! Configurations are validated and recorded by [`SharePackService`], queued
//! as [`ProvisioningRequest`]s and drained by [`SharePackConsumer`], which
//! hands each one to the [`Orchestrator`]. Every entity write goes through
//! [`TemporalStore::expire_and_insert`], so nothing is ever updated in place.
//!
//! This crate has no database dependency. Storage, the platform and the
//! queue sit behind async traits with in-memory adapters here; the Postgres
//! adapters live in `sharepack_postgres`.

pub mod classify;
pub mod consumer;
pub mod entities;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod repository;
pub mod share_config;
pub mod store;
pub mod strategy;
pub mod submission;
pub mod types;

pub use classify::is_retryable;
pub use consumer::{ConsumerConfig, MessageOutcome, ProvisioningHandler, SharePackConsumer};
pub use entities::{Pipeline, PipelineSchedule, Project, Recipient, RecipientType, Share, SharePack, Tenant};
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::{CleanupReport, OrphanCleaner, Orchestrator, ProvisionReport, ProvisioningLedger};
pub use platform::{
    InMemoryPlatform, PlatformClient, PlatformConnector, PlatformError, StaticConnector,
};
pub use queue::{InMemoryWorkQueue, ProvisioningRequest, QueueError, QueueMessage, WorkQueue};
pub use repository::Repositories;
pub use share_config::{ConfigError, ShareConfig};
pub use store::{Entity, InMemoryTemporalStore, Scd2Table, StoreError, TemporalStore, Versioned};
pub use strategy::{StrategyDetection, StrategyDetector};
pub use submission::{SharePackService, SharePackStatusView, SubmissionReceipt};
pub use types::{AuditAction, AuditRecord, ChangeMeta, EntityKind, SharePackStatus, Strategy, VersionedRecord};
