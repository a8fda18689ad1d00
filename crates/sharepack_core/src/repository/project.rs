use uuid::Uuid;

use super::{pick_existing, upsert, UpsertOutcome};
use crate::entities::Project;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::ChangeMeta;

#[derive(Clone)]
pub struct ProjectRepository {
    table: Scd2Table<Project>,
}

impl ProjectRepository {
    pub fn new(table: Scd2Table<Project>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<Project> {
        &self.table
    }

    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<Project>>> {
        self.table.get_current(business_id, false).await
    }

    pub async fn find_by_name(
        &self,
        project_name: &str,
        tenant_id: Uuid,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<Project>>> {
        let tenant = tenant_id.to_string();
        let rows = self
            .table
            .find_current_by(
                &[("project_name", project_name), ("tenant_id", &tenant)],
                include_deleted,
            )
            .await?;
        Ok(pick_existing(rows))
    }

    pub async fn list_by_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<Versioned<Project>>> {
        let tenant = tenant_id.to_string();
        self.table
            .find_current_by(&[("tenant_id", &tenant)], false)
            .await
    }

    /// Resolve a project under a tenant, creating it when absent.
    ///
    /// A supplied approver replaces the stored one; `None` keeps it.
    pub async fn ensure(
        &self,
        project_name: &str,
        tenant_id: Uuid,
        approver: Option<&str>,
        by: &str,
    ) -> StoreResult<UpsertOutcome> {
        let existing = self.find_by_name(project_name, tenant_id, true).await?;
        let mut fields = existing
            .as_ref()
            .map(|current| current.fields.clone())
            .unwrap_or_else(|| Project {
                project_name: project_name.to_string(),
                tenant_id,
                approver: None,
            });
        if let Some(approver) = approver {
            fields.approver = Some(approver.to_string());
        }
        upsert(
            &self.table,
            existing,
            fields,
            &ChangeMeta::new(by, "project resolved for share pack"),
        )
        .await
    }
}
