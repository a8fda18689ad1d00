//! Postgres implementation of the temporal store port.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) since the
//! tables come from migrations that may not exist at compile time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use sharepack_core::store::{StoreError, StoreResult, TemporalStore};
use sharepack_core::types::end_of_time;
use sharepack_core::{AuditAction, AuditRecord, ChangeMeta, EntityKind, VersionedRecord};

use crate::locks::lock_entity;
use crate::SCHEMA;

const VERSION_COLUMNS: &str = "record_id, business_id, version, effective_from, effective_to, \
     is_current, is_deleted, created_by, change_reason, fields";

#[derive(Debug, FromRow)]
struct PgVersionRow {
    record_id: Uuid,
    business_id: Uuid,
    version: i32,
    effective_from: DateTime<Utc>,
    effective_to: DateTime<Utc>,
    is_current: bool,
    is_deleted: bool,
    created_by: String,
    change_reason: String,
    fields: Value,
}

impl From<PgVersionRow> for VersionedRecord<Value> {
    fn from(r: PgVersionRow) -> Self {
        Self {
            record_id: r.record_id,
            business_id: r.business_id,
            version: r.version,
            effective_from: r.effective_from,
            effective_to: r.effective_to,
            is_current: r.is_current,
            is_deleted: r.is_deleted,
            created_by: r.created_by,
            change_reason: r.change_reason,
            fields: r.fields,
        }
    }
}

#[derive(Debug, FromRow)]
struct PgAuditRow {
    audit_id: Uuid,
    entity_id: Uuid,
    action: String,
    performed_by: String,
    old_values: Option<Value>,
    new_values: Value,
    performed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PriorVersion {
    version: i32,
    is_deleted: bool,
    effective_from: DateTime<Utc>,
    fields: Value,
}

/// Map a sqlx failure onto the store taxonomy. Connection-level problems are
/// kept apart so the consumer can retry them.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn table(kind: EntityKind) -> String {
    format!("{}.{}", SCHEMA, kind.table_name())
}

/// Postgres-backed temporal store.
#[derive(Clone)]
pub struct PgTemporalStore {
    pool: PgPool,
}

impl PgTemporalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TemporalStore for PgTemporalStore {
    async fn expire_and_insert(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        fields: Value,
        is_deleted: bool,
        meta: &ChangeMeta,
    ) -> StoreResult<VersionedRecord<Value>> {
        let t = table(kind);
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // Serialises writers even when no current row exists yet to lock
        lock_entity(&mut tx, kind, business_id)
            .await
            .map_err(store_error)?;

        let prior = sqlx::query_as::<_, PriorVersion>(&format!(
            r#"
            SELECT version, is_deleted, effective_from, fields
            FROM {t}
            WHERE business_id = $1 AND is_current
            FOR UPDATE
            "#
        ))
        .bind(business_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        let mut now = Utc::now();
        if let Some(p) = &prior {
            if now < p.effective_from {
                now = p.effective_from;
            }
            sqlx::query(&format!(
                r#"
                UPDATE {t}
                SET effective_to = $2, is_current = false
                WHERE business_id = $1 AND is_current
                "#
            ))
            .bind(business_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        let version = prior.as_ref().map(|p| p.version).unwrap_or(0) + 1;
        let row = sqlx::query_as::<_, PgVersionRow>(&format!(
            r#"
            INSERT INTO {t} (
                record_id, business_id, version, effective_from, effective_to,
                is_current, is_deleted, created_by, change_reason, fields
            ) VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8, $9)
            RETURNING {VERSION_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(business_id)
        .bind(version)
        .bind(now)
        .bind(end_of_time())
        .bind(is_deleted)
        .bind(&meta.created_by)
        .bind(&meta.change_reason)
        .bind(&fields)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
                kind,
                business_id,
                message: db.message().to_string(),
            },
            _ => store_error(e),
        })?;

        let action = meta.action.unwrap_or_else(|| {
            AuditAction::infer(prior.as_ref().map(|p| p.is_deleted), is_deleted)
        });
        sqlx::query(&format!(
            r#"
            INSERT INTO {SCHEMA}.audit_trail (
                audit_id, entity_type, entity_id, action, performed_by,
                old_values, new_values, performed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(kind.as_str())
        .bind(business_id)
        .bind(action.as_str())
        .bind(&meta.created_by)
        .bind(prior.map(|p| p.fields))
        .bind(&fields)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        debug!(kind = kind.as_str(), business_id = %business_id, version, "version written");
        Ok(row.into())
    }

    async fn get_current(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        include_deleted: bool,
    ) -> StoreResult<Option<VersionedRecord<Value>>> {
        let row = sqlx::query_as::<_, PgVersionRow>(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM {}
            WHERE business_id = $1 AND is_current AND ($2 OR NOT is_deleted)
            "#,
            table(kind)
        ))
        .bind(business_id)
        .bind(include_deleted)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(row.map(Into::into))
    }

    async fn get_all_current(
        &self,
        kind: EntityKind,
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        let rows = sqlx::query_as::<_, PgVersionRow>(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM {}
            WHERE is_current AND ($1 OR NOT is_deleted)
            ORDER BY effective_from
            "#,
            table(kind)
        ))
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_history(
        &self,
        kind: EntityKind,
        business_id: Uuid,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        let rows = sqlx::query_as::<_, PgVersionRow>(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM {}
            WHERE business_id = $1
            ORDER BY version
            "#,
            table(kind)
        ))
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_point_in_time(
        &self,
        kind: EntityKind,
        business_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<VersionedRecord<Value>>> {
        let row = sqlx::query_as::<_, PgVersionRow>(&format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM {}
            WHERE business_id = $1 AND effective_from <= $2 AND $2 < effective_to
            ORDER BY version DESC
            LIMIT 1
            "#,
            table(kind)
        ))
        .bind(business_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(row.map(Into::into))
    }

    async fn find_current_by_fields(
        &self,
        kind: EntityKind,
        criteria: &[(&str, &str)],
        include_deleted: bool,
    ) -> StoreResult<Vec<VersionedRecord<Value>>> {
        // $1 is include_deleted; each criterion takes a key and a value slot
        let mut sql = format!(
            "SELECT {VERSION_COLUMNS} FROM {} WHERE is_current AND ($1 OR NOT is_deleted)",
            table(kind)
        );
        for i in 0..criteria.len() {
            let key = 2 + i * 2;
            sql.push_str(&format!(" AND fields ->> ${} = ${}", key, key + 1));
        }
        sql.push_str(" ORDER BY effective_from");

        let mut query = sqlx::query_as::<_, PgVersionRow>(&sql).bind(include_deleted);
        for (key, value) in criteria {
            query = query.bind(*key).bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(store_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn audit_trail(
        &self,
        kind: EntityKind,
        business_id: Uuid,
    ) -> StoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, PgAuditRow>(&format!(
            r#"
            SELECT audit_id, entity_id, action, performed_by,
                   old_values, new_values, performed_at
            FROM {SCHEMA}.audit_trail
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY performed_at, audit_id
            "#
        ))
        .bind(kind.as_str())
        .bind(business_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter()
            .map(|r| {
                let action = r
                    .action
                    .parse::<AuditAction>()
                    .map_err(|message| StoreError::Decode { kind, message })?;
                Ok(AuditRecord {
                    audit_id: r.audit_id,
                    entity_type: kind,
                    entity_id: r.entity_id,
                    action,
                    performed_by: r.performed_by,
                    old_values: r.old_values,
                    new_values: r.new_values,
                    performed_at: r.performed_at,
                })
            })
            .collect()
    }
}
