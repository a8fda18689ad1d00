//! In-memory temporal store.
//!
//! A single `RwLock` guards all rows and the audit log; holding the write
//! lock across expire + insert + audit gives the same atomicity and
//! per-entity serialisation the Postgres backend gets from its transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreResult, TemporalStore};
use crate::types::{
    end_of_time, fields_match, AuditAction, AuditRecord, ChangeMeta, EntityKind, VersionedRecord,
};

#[derive(Default)]
struct Inner {
    rows: HashMap<EntityKind, Vec<VersionedRecord<Value>>>,
    audit: Vec<AuditRecord>,
}

/// Memory-backed [`TemporalStore`] used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryTemporalStore {
    inner: RwLock<Inner>,
}

impl InMemoryTemporalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of a kind, all versions.
    pub async fn all_rows(&self, kind: EntityKind) -> Vec<VersionedRecord<Value>> {
        self.inner
            .read()
            .await
            .rows
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of audit rows across all kinds.
    pub async fn audit_len(&self) -> usize {
        self.inner.read().await.audit.len()
    }
}

#[async_trait]
impl TemporalStore for InMemoryTemporalStore {
    async fn expire_and_insert(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        fields: Value,
        is_deleted: bool,
        meta: &ChangeMeta,
    ) -> StoreResult<VersionedRecord<Value>> {
        let mut inner = self.inner.write().await;
        let mut now = Utc::now();

        let rows = inner.rows.entry(kind).or_default();
        let prior = rows
            .iter_mut()
            .find(|r| r.business_id == business_id && r.is_current);

        let (prior_version, prior_deleted, old_values) = match prior {
            Some(prior) => {
                // Never produce an interval that ends before it starts
                if now < prior.effective_from {
                    now = prior.effective_from;
                }
                prior.effective_to = now;
                prior.is_current = false;
                (
                    prior.version,
                    Some(prior.is_deleted),
                    Some(prior.fields.clone()),
                )
            }
            None => (0, None, None),
        };

        let record = VersionedRecord {
            record_id: Uuid::now_v7(),
            business_id,
            version: prior_version + 1,
            effective_from: now,
            effective_to: end_of_time(),
            is_current: true,
            is_deleted,
            created_by: meta.created_by.clone(),
            change_reason: meta.change_reason.clone(),
            fields,
        };
        rows.push(record.clone());

        let action = meta
            .action
            .unwrap_or_else(|| AuditAction::infer(prior_deleted, is_deleted));
        inner.audit.push(AuditRecord {
            audit_id: Uuid::now_v7(),
            entity_type: kind,
            entity_id: business_id,
            action,
            performed_by: meta.created_by.clone(),
            old_values,
            new_values: record.fields.clone(),
            performed_at: now,
        });

        Ok(record)
    }

    async fn get_current(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        include_deleted: bool,
    ) -> StoreResult<Option<VersionedRecord<Value>>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.get(&kind).and_then(|rows| {
            rows.iter()
                .find(|r| {
                    r.business_id == business_id && r.is_current && (include_deleted || !r.is_deleted)
                })
                .cloned()
        }))
    }

    async fn get_all_current(
        &self,
        kind: EntityKind,
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.is_current && (include_deleted || !r.is_deleted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_history(
        &self,
        kind: EntityKind,
        business_id: Uuid,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        let inner = self.inner.read().await;
        let mut history: Vec<_> = inner
            .rows
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.business_id == business_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        history.sort_by_key(|r| r.version);
        Ok(history)
    }

    async fn get_point_in_time(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<VersionedRecord<Value>>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.get(&kind).and_then(|rows| {
            rows.iter()
                .find(|r| r.business_id == business_id && r.is_effective_at(at))
                .cloned()
        }))
    }

    async fn find_current_by_fields(
        &self,
        kind: EntityKind,
        criteria: &[(&str, &str)],
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .rows
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|r| {
                        r.is_current
                            && (include_deleted || !r.is_deleted)
                            && fields_match(&r.fields, criteria)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn audit_trail(
        &self,
        kind: EntityKind,
        business_id: Uuid,
    ) -> StoreResult<Vec<AuditRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .filter(|a| a.entity_type == kind && a.entity_id == business_id)
            .cloned()
            .collect())
    }
}
