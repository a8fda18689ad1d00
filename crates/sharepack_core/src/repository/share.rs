use uuid::Uuid;

use super::{live, pick_existing, upsert, UpsertOutcome};
use crate::entities::Share;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::ChangeMeta;

#[derive(Clone)]
pub struct ShareRepository {
    table: Scd2Table<Share>,
}

impl ShareRepository {
    pub fn new(table: Scd2Table<Share>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<Share> {
        &self.table
    }

    /// Current live version, whichever share pack owns it.
    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<Share>>> {
        self.table.get_current(business_id, false).await
    }

    pub async fn find_by_name(
        &self,
        share_name: &str,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<Share>>> {
        let rows = self
            .table
            .find_current_by(&[("share_name", share_name)], include_deleted)
            .await?;
        Ok(pick_existing(rows))
    }

    pub async fn list_by_share_pack(&self, share_pack_id: Uuid) -> StoreResult<Vec<Versioned<Share>>> {
        let id = share_pack_id.to_string();
        let rows = self
            .table
            .find_current_by(&[("share_pack_id", &id)], false)
            .await?;
        Ok(live(rows))
    }

    /// Live shares, in any pack, whose asset set contains `asset`.
    pub async fn find_containing_asset(&self, asset: &str) -> StoreResult<Vec<Versioned<Share>>> {
        Ok(self
            .table
            .get_all_current(false)
            .await?
            .into_iter()
            .filter(|s| s.fields.contains_asset(asset))
            .collect())
    }

    /// Live shares, in any pack, listing `recipient` as attached.
    pub async fn find_attached_to(&self, recipient: &str) -> StoreResult<Vec<Versioned<Share>>> {
        Ok(self
            .table
            .get_all_current(false)
            .await?
            .into_iter()
            .filter(|s| s.fields.recipients_attached.iter().any(|r| r == recipient))
            .collect())
    }

    pub async fn upsert(&self, share: Share, meta: &ChangeMeta) -> StoreResult<UpsertOutcome> {
        let existing = self.find_by_name(&share.share_name, true).await?;
        upsert(&self.table, existing, share, meta).await
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
