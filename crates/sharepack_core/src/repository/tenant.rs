use uuid::Uuid;

use super::{pick_existing, upsert, UpsertOutcome};
use crate::entities::Tenant;
use crate::store::{Scd2Table, StoreResult, Versioned};
use crate::types::ChangeMeta;

#[derive(Clone)]
pub struct TenantRepository {
    table: Scd2Table<Tenant>,
}

impl TenantRepository {
    pub fn new(table: Scd2Table<Tenant>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Scd2Table<Tenant> {
        &self.table
    }

    pub async fn get(&self, business_id: Uuid) -> StoreResult<Option<Versioned<Tenant>>> {
        self.table.get_current(business_id, false).await
    }

    pub async fn find_by_business_line(
        &self,
        business_line: &str,
        include_deleted: bool,
    ) -> StoreResult<Option<Versioned<Tenant>>> {
        let rows = self
            .table
            .find_current_by(&[("business_line", business_line)], include_deleted)
            .await?;
        Ok(pick_existing(rows))
    }

    pub async fn upsert(&self, tenant: Tenant, meta: &ChangeMeta) -> StoreResult<UpsertOutcome> {
        let existing = self
            .find_by_business_line(&tenant.business_line, true)
            .await?;
        upsert(&self.table, existing, tenant, meta).await
    }

    /// Resolve the tenant for a business line, creating it when absent.
    ///
    /// An existing live tenant is returned untouched; a deleted one is restored.
    pub async fn ensure(&self, business_line: &str, by: &str) -> StoreResult<UpsertOutcome> {
        let existing = self.find_by_business_line(business_line, true).await?;
        let fields = existing
            .as_ref()
            .map(|current| current.fields.clone())
            .unwrap_or_else(|| Tenant {
                business_line: business_line.to_string(),
                owner: None,
            });
        upsert(
            &self.table,
            existing,
            fields,
            &ChangeMeta::new(by, "tenant resolved for share pack"),
        )
        .await
    }
}
