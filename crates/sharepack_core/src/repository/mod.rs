//! Typed repositories over the SCD2 tables.
//!
//! Upserts look an entity up by its natural key across every share pack,
//! soft-deleted rows included, so re-provisioning a name from another pack
//! reuses the existing business id instead of forking its history.

pub mod pipeline;
pub mod project;
pub mod recipient;
pub mod share;
pub mod share_pack;
pub mod tenant;

use std::sync::Arc;

use uuid::Uuid;

use crate::store::{Entity, Scd2Table, StoreResult, TemporalStore, Versioned};
use crate::types::ChangeMeta;

pub use pipeline::PipelineRepository;
pub use project::ProjectRepository;
pub use recipient::RecipientRepository;
pub use share::ShareRepository;
pub use share_pack::SharePackRepository;
pub use tenant::TenantRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    /// A soft-deleted entity came back
    Recreated,
    /// Fields already matched the current version; nothing written
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub business_id: Uuid,
    /// Record id of the version now current
    pub record_id: Uuid,
    pub change: ChangeKind,
}

impl UpsertOutcome {
    pub fn wrote_version(&self) -> bool {
        self.change != ChangeKind::Unchanged
    }
}

/// All repositories over one store.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: TenantRepository,
    pub projects: ProjectRepository,
    pub share_packs: SharePackRepository,
    pub recipients: RecipientRepository,
    pub shares: ShareRepository,
    pub pipelines: PipelineRepository,
}

impl Repositories {
    pub fn new(store: Arc<dyn TemporalStore>) -> Self {
        Self {
            tenants: TenantRepository::new(Scd2Table::new(store.clone())),
            projects: ProjectRepository::new(Scd2Table::new(store.clone())),
            share_packs: SharePackRepository::new(Scd2Table::new(store.clone())),
            recipients: RecipientRepository::new(Scd2Table::new(store.clone())),
            shares: ShareRepository::new(Scd2Table::new(store.clone())),
            pipelines: PipelineRepository::new(Scd2Table::new(store)),
        }
    }
}

/// Among current rows sharing a natural key, prefer a live one, then the newest.
pub(crate) fn pick_existing<E>(rows: Vec<Versioned<E>>) -> Option<Versioned<E>> {
    rows.into_iter()
        .max_by_key(|r| (!r.is_deleted, r.effective_from))
}

/// Create, update, recreate or leave alone depending on `existing`.
pub(crate) async fn upsert<E: Entity>(
    table: &Scd2Table<E>,
    existing: Option<Versioned<E>>,
    mut fields: E,
    meta: &ChangeMeta,
) -> StoreResult<UpsertOutcome> {
    fields.normalize();
    let (business_id, change) = match existing {
        None => (Uuid::now_v7(), ChangeKind::Created),
        Some(current) if !current.is_deleted && current.fields == fields => {
            return Ok(UpsertOutcome {
                business_id: current.business_id,
                record_id: current.record_id,
                change: ChangeKind::Unchanged,
            });
        }
        Some(current) if current.is_deleted => (current.business_id, ChangeKind::Recreated),
        Some(current) => (current.business_id, ChangeKind::Updated),
    };
    let row = table.expire_and_insert(business_id, fields, meta).await?;
    Ok(UpsertOutcome {
        business_id,
        record_id: row.record_id,
        change,
    })
}

/// Live current rows only.
pub(crate) fn live<E>(rows: Vec<Versioned<E>>) -> Vec<Versioned<E>> {
    rows.into_iter().filter(|r| !r.is_deleted).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Share;
    use crate::store::InMemoryTemporalStore;
    use crate::types::AuditAction;

    fn share(assets: &[&str]) -> Share {
        Share {
            share_name: "s1".into(),
            share_assets: assets.iter().map(|a| a.to_string()).collect(),
            ..Share::default()
        }
    }

    #[tokio::test]
    async fn upsert_walks_created_unchanged_updated_recreated() {
        let table: Scd2Table<Share> = Scd2Table::new(Arc::new(InMemoryTemporalStore::new()));
        let meta = ChangeMeta::new("tester", "upsert");

        let created = upsert(&table, None, share(&["c.s.a"]), &meta).await.unwrap();
        assert_eq!(created.change, ChangeKind::Created);
        let id = created.business_id;

        let current = table.get_current(id, true).await.unwrap();
        let same = upsert(&table, current, share(&["c.s.a", "c.s.a"]), &meta)
            .await
            .unwrap();
        assert_eq!(same.change, ChangeKind::Unchanged);
        assert!(!same.wrote_version());

        let current = table.get_current(id, true).await.unwrap();
        let updated = upsert(&table, current, share(&["c.s.b"]), &meta).await.unwrap();
        assert_eq!(updated.change, ChangeKind::Updated);

        table.soft_delete(id, "tester", "gone").await.unwrap();
        let current = table.get_current(id, true).await.unwrap();
        let back = upsert(&table, current, share(&["c.s.b"]), &meta).await.unwrap();
        assert_eq!(back.change, ChangeKind::Recreated);
        assert_eq!(back.business_id, id);

        let actions: Vec<AuditAction> = table
            .audit_trail(id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Created,
                AuditAction::Updated,
                AuditAction::Deleted,
                AuditAction::Recreated
            ]
        );
    }
}
