//! Share pack repository.
//!
//! Status transitions are versions of their own with a `STATUS_CHANGED`
//! audit action so progress can be polled and replayed from history.

use uuid::Uuid;

use super::pick_existing;
use crate::entities::SharePack;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::{AuditAction, ChangeMeta, SharePackStatus};

#[derive(Clone)]
pub struct SharePackRepository {
    table: Scd2Table<SharePack>,
}

impl SharePackRepository {
    pub fn new(table: Scd2Table<SharePack>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<SharePack> {
        &self.table
    }

    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<SharePack>>> {
        self.table.get_current(business_id, false).await
    }

    pub async fn require(&self, business_id: Uuid) -> StoreResult<Versioned<SharePack>> {
        self.table.require_current(business_id).await
    }

    pub async fn history(&self, business_id: Uuid) -> StoreResult<Vec<Versioned<SharePack>>> {
        self.table.get_history(business_id).await
    }

    pub async fn list(&self, include_deleted: bool) -> StoreResult<Vec<Versioned<SharePack>>> {
        self.table.get_all_current(include_deleted).await
    }

    /// The share pack a re-upload should version, if any.
    pub async fn find_by_natural_key(
        &self,
        requested_by: &str,
        business_line: &str,
        project_name: &str,
    ) -> StoreResult<Option<Versioned<SharePack>>> {
        let rows = self
            .table
            .find_current_by(
                &[
                    ("requested_by", requested_by),
                    ("business_line", business_line),
                    ("project_name", project_name),
                ],
                true,
            )
            .await?;
        Ok(pick_existing(rows))
    }

    /// Store an uploaded share pack, versioning an earlier upload with the
    /// same requester, business line and project.
    pub async fn record_upload(
        &self,
        pack: SharePack,
        uploaded_by: &str,
        reason: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        let existing = self
            .find_by_natural_key(&pack.requested_by, &pack.business_line, &pack.project_name)
            .await?;
        let business_id = existing
            .as_ref()
            .map(|e| e.business_id)
            .unwrap_or_else(Uuid::now_v7);
        self.table
            .expire_and_insert(business_id, pack, &ChangeMeta::new(uploaded_by, reason))
            .await
    }

    /// Write a status version.
    pub async fn update_status(
        &self,
        business_id: Uuid,
        status: SharePackStatus,
        provisioning_status: &str,
        error_message: Option<String>,
        by: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        let mut fields = self.require(business_id).await?.fields;
        fields.status = status;
        fields.provisioning_status = provisioning_status.to_string();
        fields.error_message = error_message;
        let reason = format!("status -> {}", status);
        self.table
            .expire_and_insert(
                business_id,
                fields,
                &ChangeMeta::new(by, reason).with_action(AuditAction::StatusChanged),
            )
            .await
    }

    pub async fn mark_in_progress(
        &self,
        business_id: Uuid,
        provisioning_status: &str,
        by: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        self.update_status(
            business_id,
            SharePackStatus::InProgress,
            provisioning_status,
            None,
            by,
        )
        .await
    }

    pub async fn mark_failed(
        &self,
        business_id: Uuid,
        provisioning_status: &str,
        error_message: &str,
        by: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        self.update_status(
            business_id,
            SharePackStatus::Failed,
            provisioning_status,
            Some(error_message.to_string()),
            by,
        )
        .await
    }

    pub async fn mark_completed(
        &self,
        business_id: Uuid,
        by: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        self.update_status(
            business_id,
            SharePackStatus::Completed,
            "All steps completed",
            None,
            by,
        )
        .await
    }

    /// Record the tenant and project a share pack resolved to.
    pub async fn set_resolution(
        &self,
        business_id: Uuid,
        tenant_id: Uuid,
        project_id: Uuid,
        by: &str,
    ) -> StoreResult<Versioned<SharePack>> {
        let current = self.require(business_id).await?;
        if current.fields.tenant_id == Some(tenant_id)
            && current.fields.project_id == Some(project_id)
        {
            return Ok(current);
        }
        let mut fields = current.fields;
        fields.tenant_id = Some(tenant_id);
        fields.project_id = Some(project_id);
        self.table
            .expire_and_insert(
                business_id,
                fields,
                &ChangeMeta::new(by, "tenant and project resolved"),
            )
            .await
    }
}
