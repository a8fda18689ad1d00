use uuid::Uuid;

use super::{live, pick_existing, upsert, UpsertOutcome};
use crate::entities::Recipient;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::ChangeMeta;

#[derive(Clone)]
pub struct RecipientRepository {
    table: Scd2Table<Recipient>,
}

impl RecipientRepository {
    pub fn new(table: Scd2Table<Recipient>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<Recipient> {
        &self.table
    }

    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<Recipient>>> {
        self.table.get_current(business_id, false).await
    }

    /// Global lookup by name, across every share pack.
    pub async fn find_by_name(
        &self,
        recipient_name: &str,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<Recipient>>> {
        let rows = self
            .table
            .find_current_by(&[("recipient_name", recipient_name)], include_deleted)
            .await?;
        Ok(pick_existing(rows))
    }

    pub async fn list_by_share_pack(
        &self,
        share_pack_id: Uuid,
    ) -> StoreResult<Vec<Versioned<Recipient>>> {
        let id = share_pack_id.to_string();
        let rows = self
            .table
            .find_current_by(&[("share_pack_id", &id)], false)
            .await?;
        Ok(live(rows))
    }

    pub async fn upsert(
        &self,
        recipient: Recipient,
        meta: &ChangeMeta,
    ) -> StoreResult<UpsertOutcome> {
        let existing = self.find_by_name(&recipient.recipient_name, true).await?;
        upsert(&self.table, existing, recipient, meta).await
    }

    pub async fn soft_delete(
        &self,
        business_id: Uuid,
        by: &str,
        reason: &str,
    ) -> StoreResult<Option<Uuid>> {
        self.table.soft_delete(business_id, by, reason).await
    }
}
