use uuid::Uuid;

use super::{live, pick_existing, upsert, UpsertOutcome};
use crate::entities::Pipeline;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::ChangeMeta;

#[derive(Clone)]
pub struct PipelineRepository {
    table: Scd2Table<Pipeline>,
}

impl PipelineRepository {
    pub fn new(table: Scd2Table<Pipeline>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<Pipeline> {
        &self.table
    }

    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<Pipeline>>> {
        self.table.get_current(business_id, false).await
    }

    /// Global lookup by name, across every share pack.
    pub async fn find_by_name(
        &self,
        pipeline_name: &str,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<Pipeline>>> {
        let rows = self
            .table
            .find_current_by(&[("pipeline_name", pipeline_name)], include_deleted)
            .await?;
        Ok(pick_existing(rows))
    }

    pub async fn list_by_share_pack(
        &self,
        share_pack_id: Uuid,
    ) -> StoreResult<Vec<Versioned<Pipeline>>> {
        let id = share_pack_id.to_string();
        let rows = self
            .table
            .find_current_by(&[("share_pack_id", &id)], false)
            .await?;
        Ok(live(rows))
    }

    pub async fn list_by_share(&self, share_id: Uuid) -> StoreResult<Vec<Versioned<Pipeline>>> {
        let id = share_id.to_string();
        let rows = self.table.find_current_by(&[("share_id", &id)], false).await?;
        Ok(live(rows))
    }

    /// Live rows pointing at one external pipeline.
    pub async fn find_by_external_id(
        &self,
        external_pipeline_id: &str,
    ) -> StoreResult<Vec<Versioned<Pipeline>>> {
        let rows = self
            .table
            .find_current_by(&[("external_pipeline_id", external_pipeline_id)], false)
            .await?;
        Ok(live(rows))
    }

    pub async fn upsert(&self, pipeline: Pipeline, meta: &ChangeMeta) -> StoreResult<UpsertOutcome> {
        let existing = self.find_by_name(&pipeline.pipeline_name, true).await?;
        upsert(&self.table, existing, pipeline, meta).await
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
