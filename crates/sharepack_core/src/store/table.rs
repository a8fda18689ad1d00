//! Typed view over the raw temporal store.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{StoreError, StoreResult, TemporalStore};
use crate::types::{AuditRecord, ChangeMeta, EntityKind, VersionedRecord};

/// A domain entity persisted as SCD2 versions.
pub trait Entity:
    Serialize + DeserializeOwned + Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Canonicalise set-valued fields before storage so that two equivalent
    /// configurations serialise identically.
    fn normalize(&mut self) {}
}

pub type Versioned<E> = VersionedRecord<E>;

/// Typed SCD2 table for one entity kind.
pub struct Scd2Table<E> {
    store: Arc<dyn TemporalStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Scd2Table<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Scd2Table<E> {
    pub fn new(store: Arc<dyn TemporalStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn TemporalStore> {
        &self.store
    }

    /// Write a new, non-deleted version with the given fields.
    pub async fn expire_and_insert(
        &self,
        business_id: Uuid,
        fields: E,
        meta: &ChangeMeta,
    ) -> StoreResult<Versioned<E>> {
        self.write(business_id, fields, false, meta).await
    }

    async fn write(
        &self,
        business_id: Uuid,
        mut fields: E,
        is_deleted: bool,
        meta: &ChangeMeta,
    ) -> StoreResult<Versioned<E>> {
        fields.normalize();
        let raw = encode(&fields)?;
        let row = self
            .store
            .expire_and_insert(E::KIND, business_id, raw, is_deleted, meta)
            .await?;
        Ok(row.with_fields(fields))
    }

    pub async fn get_current(
        &self,
        business_id: Uuid,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<E>>> {
        self.store
            .get_current(E::KIND, business_id, include_deleted)
            .await?
            .map(decode)
            .transpose()
    }

    /// Current version or `StoreError::NotFound`.
    pub async fn require_current(&self, business_id: Uuid) -> StoreResult<Versioned<E>> {
        self.get_current(business_id, false)
            .await?
            .ok_or(StoreError::NotFound {
                kind: E::KIND,
                business_id,
            })
    }

    pub async fn get_all_current(&self, include_deleted: bool) -> StoreResult<Vec<Versioned<E>>> {
        decode_all(self.store.get_all_current(E::KIND, include_deleted).await?)
    }

    pub async fn get_history(&self, business_id: Uuid) -> StoreResult<Vec<Versioned<E>>> {
        decode_all(self.store.get_history(E::KIND, business_id).await?)
    }

    pub async fn get_point_in_time(
        &self,
        business_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Versioned<E>>> {
        self.store
            .get_point_in_time(E::KIND, business_id, at)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn find_current_by(
        &self,
        criteria: &[(&str, &str)],
        include_deleted: bool,
    ) -> StoreResult<Vec<Versioned<E>>> {
        decode_all(
            self.store
                .find_current_by_fields(E::KIND, criteria, include_deleted)
                .await?,
        )
    }

    /// Flag the entity deleted in a new version; `None` if it has no current version.
    pub async fn soft_delete(
        &self,
        business_id: Uuid,
        deleted_by: &str,
        reason: &str,
    ) -> StoreResult<Option<Uuid>> {
        let Some(current) = self.get_current(business_id, true).await? else {
            return Ok(None);
        };
        let row = self
            .write(
                business_id,
                current.fields,
                true,
                &ChangeMeta::new(deleted_by, reason),
            )
            .await?;
        Ok(Some(row.record_id))
    }

    /// Undo a soft delete; `None` if there is no current version or it is not deleted.
    pub async fn restore(
        &self,
        business_id: Uuid,
        restored_by: &str,
        reason: &str,
    ) -> StoreResult<Option<Uuid>> {
        let Some(current) = self.get_current(business_id, true).await? else {
            return Ok(None);
        };
        if !current.is_deleted {
            return Ok(None);
        }
        let row = self
            .write(
                business_id,
                current.fields,
                false,
                &ChangeMeta::new(restored_by, reason),
            )
            .await?;
        Ok(Some(row.record_id))
    }

    pub async fn audit_trail(&self, business_id: Uuid) -> StoreResult<Vec<AuditRecord>> {
        self.store.audit_trail(E::KIND, business_id).await
    }
}

fn encode<E: Entity>(fields: &E) -> StoreResult<Value> {
    serde_json::to_value(fields).map_err(|e| StoreError::Decode {
        kind: E::KIND,
        message: e.to_string(),
    })
}

fn decode<E: Entity>(row: VersionedRecord<Value>) -> StoreResult<Versioned<E>> {
    let fields: E = serde_json::from_value(row.fields.clone()).map_err(|e| StoreError::Decode {
        kind: E::KIND,
        message: e.to_string(),
    })?;
    Ok(row.with_fields(fields))
}

fn decode_all<E: Entity>(rows: Vec<VersionedRecord<Value>>) -> StoreResult<Vec<Versioned<E>>> {
    rows.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Share;
    use crate::store::InMemoryTemporalStore;

    fn table() -> Scd2Table<Share> {
        Scd2Table::new(Arc::new(InMemoryTemporalStore::new()))
    }

    fn share(assets: &[&str]) -> Share {
        Share {
            share_name: "finance_share".into(),
            share_assets: assets.iter().map(|s| s.to_string()).collect(),
            ..Share::default()
        }
    }

    #[tokio::test]
    async fn soft_delete_on_missing_is_noop() {
        let t = table();
        assert_eq!(t.soft_delete(Uuid::now_v7(), "u", "r").await.unwrap(), None);
        assert_eq!(t.restore(Uuid::now_v7(), "u", "r").await.unwrap(), None);
    }

    #[tokio::test]
    async fn restore_requires_deleted_current() {
        let t = table();
        let id = Uuid::now_v7();
        t.expire_and_insert(id, share(&["c.s.a"]), &ChangeMeta::new("u", "create"))
            .await
            .unwrap();
        assert_eq!(t.restore(id, "u", "noop").await.unwrap(), None);
        assert_eq!(t.get_history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fields_are_normalized_on_write() {
        let t = table();
        let id = Uuid::now_v7();
        let row = t
            .expire_and_insert(id, share(&["c.s.b", "c.s.a", "c.s.b"]), &ChangeMeta::new("u", "create"))
            .await
            .unwrap();
        assert_eq!(row.fields.share_assets, vec!["c.s.a", "c.s.b"]);

        let current = t.require_current(id).await.unwrap();
        assert_eq!(current.fields, row.fields);
    }

    #[tokio::test]
    async fn require_current_reports_not_found() {
        let t = table();
        let err = t.require_current(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Share, .. }));
    }
}
