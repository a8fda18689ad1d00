//! Temporal (SCD2) store port.
//!
//! Every mutable entity is kept as immutable versions: an update closes the
//! current row (`effective_to = now`, `is_current = false`) and inserts the
//! next version in the same unit of work, together with its audit row.
//!
//! The port works on raw JSON field objects keyed by [`EntityKind`] so a
//! backend needs only one generic code path. [`Scd2Table`] layers the typed
//! entity structs and the soft-delete/restore helpers on top.

pub mod memory;
pub mod table;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AuditRecord, ChangeMeta, EntityKind, VersionedRecord};

pub use memory::InMemoryTemporalStore;
pub use table::{Entity, Scd2Table, Versioned};

/// Errors raised by temporal store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {business_id} not found")]
    NotFound { kind: EntityKind, business_id: Uuid },

    /// Pool exhaustion, dropped connections, IO timeouts
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("version conflict on {kind} {business_id}: {message}")]
    Conflict {
        kind: EntityKind,
        business_id: Uuid,
        message: String,
    },

    #[error("failed to decode {kind} fields: {message}")]
    Decode { kind: EntityKind, message: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port for SCD2-versioned entities.
///
/// Backends must make `expire_and_insert` atomic (expire, insert and audit in
/// one unit) and serialise concurrent calls for the same business id so that
/// versions never collide.
#[async_trait]
pub trait TemporalStore: Send + Sync {
    // ── Writes ──

    /// Expire the current version (if any) and insert `prior + 1`.
    async fn expire_and_insert(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        fields: Value,
        is_deleted: bool,
        meta: &ChangeMeta,
    ) -> StoreResult<VersionedRecord<Value>>;

    // ── Reads ──

    async fn get_current(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        include_deleted: bool,
    ) -> StoreResult<Option<VersionedRecord<Value>>>;

    async fn get_all_current(
        &self,
        kind: EntityKind,
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>>;

    /// All versions ordered by version ascending.
    async fn get_history(
        &self,
        kind: EntityKind,
        business_id: Uuid,
    ) -> StoreResult<Vec<VersionedRecord<Value>>>;

    /// The version with `effective_from <= at < effective_to`.
    async fn get_point_in_time(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<VersionedRecord<Value>>>;

    /// Current rows whose top-level string fields equal every `(key, value)`.
    async fn find_current_by_fields(
        &self,
        kind: EntityKind,
        criteria: &[(&str, &str)],
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>>;

    // ── Audit ──

    /// Audit rows for one entity, oldest first.
    async fn audit_trail(&self, kind: EntityKind, business_id: Uuid)
        -> StoreResult<Vec<AuditRecord>>;
}
