//! Port to the external data platform's management API.
//!
//! The orchestrator only ever talks to [`PlatformClient`]; adapters decide the
//! wire format. Every call returns a typed [`PlatformError`] on failure.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::{PipelineSchedule, RecipientType};

pub use memory::{InMemoryPlatform, PlatformOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("platform request timed out: {0}")]
    Timeout(String),

    #[error("platform connection error: {0}")]
    Connection(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("platform returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Http { status: 404, .. })
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

// ── Payloads ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSpec {
    pub name: String,
    pub recipient_type: RecipientType,
    pub recipient_identifier: Option<String>,
    pub ip_access_list: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientInfo {
    pub name: String,
    pub id: String,
    pub recipient_type: RecipientType,
    pub ip_access_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareInfo {
    pub name: String,
    pub id: String,
    /// Three-part names of attached data objects
    pub objects: Vec<String>,
    /// Recipients holding a grant on this share
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub source_asset: String,
    pub target_asset: String,
    pub notification_emails: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub serverless: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub pipeline_id: String,
    pub cron: String,
    pub timezone: String,
}

impl ScheduleSpec {
    pub fn new(pipeline_id: impl Into<String>, schedule: &PipelineSchedule) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            cron: schedule.cron.clone(),
            timezone: schedule.timezone.clone(),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────

/// Resource-level operations against one workspace.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    // Recipients
    async fn list_recipients(&self) -> PlatformResult<Vec<RecipientInfo>>;
    async fn get_recipient(&self, name: &str) -> PlatformResult<RecipientInfo>;
    async fn create_recipient(&self, spec: &RecipientSpec) -> PlatformResult<RecipientInfo>;
    async fn update_recipient_ip_access(
        &self,
        name: &str,
        ip_access_list: &[String],
    ) -> PlatformResult<RecipientInfo>;
    async fn delete_recipient(&self, name: &str) -> PlatformResult<()>;

    // Shares
    async fn list_shares(&self) -> PlatformResult<Vec<ShareInfo>>;
    async fn get_share(&self, name: &str) -> PlatformResult<ShareInfo>;
    async fn create_share(&self, name: &str, description: Option<&str>)
        -> PlatformResult<ShareInfo>;
    async fn delete_share(&self, name: &str) -> PlatformResult<()>;
    async fn add_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()>;
    async fn remove_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()>;
    async fn grant_share(&self, share: &str, recipient: &str) -> PlatformResult<()>;

    // Catalogs
    async fn ensure_catalog(&self, catalog: &str) -> PlatformResult<()>;

    // Pipelines
    async fn create_pipeline(&self, spec: &PipelineSpec) -> PlatformResult<PipelineInfo>;
    async fn update_pipeline(&self, id: &str, spec: &PipelineSpec) -> PlatformResult<PipelineInfo>;
    async fn delete_pipeline(&self, id: &str) -> PlatformResult<()>;

    // Schedules
    /// Create or replace the schedule of a pipeline; returns the schedule id.
    async fn upsert_schedule(&self, spec: &ScheduleSpec) -> PlatformResult<String>;
    async fn delete_schedule(&self, pipeline_id: &str) -> PlatformResult<()>;
}

/// Builds a [`PlatformClient`] bound to a workspace.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, workspace_url: &str) -> PlatformResult<Arc<dyn PlatformClient>>;
}

/// Connector that hands out the same client for every workspace.
pub struct StaticConnector {
    client: Arc<dyn PlatformClient>,
}

impl StaticConnector {
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformConnector for StaticConnector {
    async fn connect(&self, _workspace_url: &str) -> PlatformResult<Arc<dyn PlatformClient>> {
        Ok(self.client.clone())
    }
}
