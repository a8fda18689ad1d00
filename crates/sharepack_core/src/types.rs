//! Core domain types shared by the store, repositories and orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Entity kinds
// ============================================================================

/// Every versioned entity kind persisted through the temporal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tenant,
    Project,
    SharePack,
    Recipient,
    Share,
    Pipeline,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Tenant,
        Self::Project,
        Self::SharePack,
        Self::Recipient,
        Self::Share,
        Self::Pipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Project => "project",
            Self::SharePack => "share_pack",
            Self::Recipient => "recipient",
            Self::Share => "share",
            Self::Pipeline => "pipeline",
        }
    }

    /// Table holding the versions of this kind (unqualified).
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Tenant => "tenants",
            Self::Project => "projects",
            Self::SharePack => "share_packs",
            Self::Recipient => "recipients",
            Self::Share => "shares",
            Self::Pipeline => "pipelines",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown entity kind: {}", s))
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Provisioning mode requested for a share pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    #[default]
    New,
    Update,
    Delete,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

// ============================================================================
// Share pack status
// ============================================================================

/// Externally visible status of a share pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SharePackStatus {
    Uploaded,
    InProgress,
    Completed,
    Failed,
    ValidationFailed,
}

impl SharePackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::ValidationFailed
        )
    }
}

impl fmt::Display for SharePackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Action recorded in the audit trail for one version change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Recreated,
    StatusChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::Recreated => "RECREATED",
            Self::StatusChanged => "STATUS_CHANGED",
        }
    }

    /// Action implied by a version change when the caller does not force one.
    ///
    /// `prior_deleted` is `None` when no version existed before.
    pub fn infer(prior_deleted: Option<bool>, new_deleted: bool) -> Self {
        match (prior_deleted, new_deleted) {
            (None, _) => Self::Created,
            (Some(false), true) => Self::Deleted,
            (Some(true), false) => Self::Recreated,
            _ => Self::Updated,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "UPDATED" => Ok(Self::Updated),
            "DELETED" => Ok(Self::Deleted),
            "RECREATED" => Ok(Self::Recreated),
            "STATUS_CHANGED" => Ok(Self::StatusChanged),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Append-only audit row written with every version change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub entity_type: EntityKind,
    /// Business id of the entity that changed
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub performed_by: String,
    pub old_values: Option<Value>,
    pub new_values: Value,
    pub performed_at: DateTime<Utc>,
}

// ============================================================================
// Versioned records
// ============================================================================

/// Open-ended `effective_to` of the current version (9999-12-31T23:59:59Z).
pub fn end_of_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|n| n.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One SCD2 version of an entity: the envelope plus its domain fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<F> {
    /// Surrogate key, unique per version
    pub record_id: Uuid,
    /// Stable identifier across all versions
    pub business_id: Uuid,
    pub version: i32,
    pub effective_from: DateTime<Utc>,
    pub effective_to: DateTime<Utc>,
    pub is_current: bool,
    pub is_deleted: bool,
    pub created_by: String,
    pub change_reason: String,
    pub fields: F,
}

impl<F> VersionedRecord<F> {
    /// Whether this version was the effective one at `at` (half-open interval).
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at && at < self.effective_to
    }

    /// Replace the field payload, keeping the envelope.
    pub fn with_fields<G>(self, fields: G) -> VersionedRecord<G> {
        VersionedRecord {
            record_id: self.record_id,
            business_id: self.business_id,
            version: self.version,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            is_current: self.is_current,
            is_deleted: self.is_deleted,
            created_by: self.created_by,
            change_reason: self.change_reason,
            fields,
        }
    }
}

/// Provenance attached to a version change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMeta {
    pub created_by: String,
    pub change_reason: String,
    /// Forces the audit action; inferred from the deletion flags when `None`
    pub action: Option<AuditAction>,
}

impl ChangeMeta {
    pub fn new(created_by: impl Into<String>, change_reason: impl Into<String>) -> Self {
        Self {
            created_by: created_by.into(),
            change_reason: change_reason.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Whether a JSON field object carries string `value` under every `(key, value)`.
pub fn fields_match(fields: &Value, criteria: &[(&str, &str)]) -> bool {
    criteria.iter().all(|(key, expected)| {
        fields
            .get(*key)
            .and_then(Value::as_str)
            .map(|actual| actual == *expected)
            .unwrap_or(false)
    })
}

/// Deduplicate and sort a set-valued field.
pub fn normalize_set(values: &mut Vec<String>) {
    values.sort();
    values.dedup();
}
