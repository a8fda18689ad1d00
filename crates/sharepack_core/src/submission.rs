//! Producer side: accept a configuration, record it, queue it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::SharePack;
use crate::error::{ProvisionError, ProvisionResult};
use crate::platform::PlatformConnector;
use crate::queue::{ProvisioningRequest, WorkQueue};
use crate::repository::SharePackRepository;
use crate::share_config::ShareConfig;
use crate::store::Versioned;
use crate::strategy::StrategyDetector;
use crate::types::{SharePackStatus, Strategy};

/// Returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub share_pack_id: Uuid,
    pub version: i32,
    pub final_strategy: Strategy,
    pub warnings: Vec<String>,
}

/// Externally visible state of one share pack version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharePackStatusView {
    pub share_pack_id: Uuid,
    pub share_pack_name: String,
    pub strategy: Strategy,
    pub status: SharePackStatus,
    pub provisioning_status: String,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<&Versioned<SharePack>> for SharePackStatusView {
    fn from(row: &Versioned<SharePack>) -> Self {
        Self {
            share_pack_id: row.business_id,
            share_pack_name: row.fields.share_pack_name.clone(),
            strategy: row.fields.strategy,
            status: row.fields.status,
            provisioning_status: row.fields.provisioning_status.clone(),
            error_message: row.fields.error_message.clone(),
            warnings: row.fields.warnings.clone(),
            version: row.version,
            updated_at: row.effective_from,
        }
    }
}

pub struct SharePackService {
    share_packs: SharePackRepository,
    detector: StrategyDetector,
    queue: Arc<dyn WorkQueue>,
}

impl SharePackService {
    pub fn new(
        share_packs: SharePackRepository,
        connector: Arc<dyn PlatformConnector>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            share_packs,
            detector: StrategyDetector::new(connector),
            queue,
        }
    }

    /// Parse a YAML document and submit it.
    pub async fn submit_yaml(&self, raw: &str, uploaded_by: &str) -> ProvisionResult<SubmissionReceipt> {
        let config = ShareConfig::from_yaml_str(raw)?;
        self.submit(config, uploaded_by).await
    }

    /// Validate, detect the effective strategy, record and enqueue.
    ///
    /// Invalid configurations are still recorded, as `VALIDATION_FAILED`,
    /// and are never enqueued.
    #[instrument(skip_all, fields(uploaded_by = %uploaded_by))]
    pub async fn submit(
        &self,
        mut config: ShareConfig,
        uploaded_by: &str,
    ) -> ProvisionResult<SubmissionReceipt> {
        config.normalize();

        if let Err(errors) = config.validate() {
            let mut pack = pack_from_config(&config)?;
            pack.status = SharePackStatus::ValidationFailed;
            pack.provisioning_status = "Validation failed".to_string();
            pack.error_message = Some(errors.join("; "));
            let row = self
                .share_packs
                .record_upload(pack, uploaded_by, "configuration failed validation")
                .await?;
            warn!(
                share_pack_id = %row.business_id,
                error_count = errors.len(),
                "share pack rejected by validation"
            );
            return Err(ProvisionError::Validation(errors));
        }

        let declared = config.metadata.strategy;
        let detection = self
            .detector
            .detect(&config.metadata.workspace_url, &config, declared)
            .await;

        let mut pack = pack_from_config(&config)?;
        pack.strategy = detection.final_strategy;
        pack.warnings = detection.warnings.clone();
        pack.provisioning_status = "Queued for provisioning".to_string();

        let reason = if detection.strategy_changed() {
            format!("uploaded ({} -> {})", declared, detection.final_strategy)
        } else {
            "uploaded".to_string()
        };
        let row = self
            .share_packs
            .record_upload(pack, uploaded_by, &reason)
            .await?;

        let request = ProvisioningRequest {
            share_pack_id: row.business_id,
            share_pack_name: Some(row.fields.share_pack_name.clone()),
            strategy: Some(detection.final_strategy),
        };
        if let Err(e) = self.queue.enqueue(request.to_value()?).await {
            error!(share_pack_id = %row.business_id, error = %e, "share pack recorded but not enqueued");
            return Err(e.into());
        }

        info!(
            share_pack_id = %row.business_id,
            version = row.version,
            strategy = %detection.final_strategy,
            warnings = detection.warnings.len(),
            "share pack submitted"
        );

        Ok(SubmissionReceipt {
            share_pack_id: row.business_id,
            version: row.version,
            final_strategy: detection.final_strategy,
            warnings: detection.warnings,
        })
    }

    pub async fn status(&self, share_pack_id: Uuid) -> ProvisionResult<SharePackStatusView> {
        self.share_packs
            .get(share_pack_id)
            .await?
            .as_ref()
            .map(SharePackStatusView::from)
            .ok_or(ProvisionError::SharePackNotFound(share_pack_id))
    }

    /// Every recorded version, oldest first.
    pub async fn history(&self, share_pack_id: Uuid) -> ProvisionResult<Vec<SharePackStatusView>> {
        let rows = self.share_packs.history(share_pack_id).await?;
        Ok(rows.iter().map(SharePackStatusView::from).collect())
    }

    pub async fn queue_depth(&self) -> ProvisionResult<usize> {
        Ok(self.queue.approximate_length().await?)
    }
}

fn pack_from_config(config: &ShareConfig) -> ProvisionResult<SharePack> {
    let m = &config.metadata;
    Ok(SharePack {
        share_pack_name: config.share_pack_name(),
        requested_by: m.requestor.clone(),
        business_line: m.business_line.clone(),
        project_name: m.project_name.clone(),
        workspace_url: m.workspace_url.clone(),
        strategy: m.strategy,
        status: SharePackStatus::Uploaded,
        config: config.to_value()?,
        ..SharePack::default()
    })
}
