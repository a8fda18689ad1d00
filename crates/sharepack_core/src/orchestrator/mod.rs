//! Provisioning orchestrator
//!
//! Drives one share pack through its provisioning steps against the
//! platform, writing a status version before every step so progress can be
//! polled. The first failing step ends the run: the share pack is marked
//! FAILED with the error's exact text before the error is returned.
//!
//! There is no automatic rollback. Everything created before a failure is
//! kept in a [`ProvisioningLedger`] and logged for manual remediation.

pub mod cleanup;
mod delete;
mod provision;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::entities::SharePack;
use crate::error::{ProvisionError, ProvisionResult};
use crate::platform::{PlatformClient, PlatformConnector, ShareInfo};
use crate::repository::Repositories;
use crate::share_config::ShareConfig;
use crate::types::Strategy;

pub use cleanup::{CleanupReport, OrphanAction, OrphanCleaner, OrphanOutcome, UnresolvedPipeline};

/// One numbered step of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub number: u8,
    pub total: u8,
    pub label: &'static str,
}

impl Step {
    const fn new(number: u8, total: u8, label: &'static str) -> Self {
        Self {
            number,
            total,
            label,
        }
    }

    /// Status text written while the step runs.
    pub fn progress(&self) -> String {
        format!("Step {}/{}: {}", self.number, self.total, self.label)
    }

    /// Status text written when the step fails.
    pub fn failure(&self) -> String {
        format!("Failed at step {}/{}: {}", self.number, self.total, self.label)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.progress())
    }
}

pub const RESOLVE_TENANT: Step = Step::new(1, 7, "Resolving tenant and project");
pub const CREATE_RECIPIENTS: Step = Step::new(2, 7, "Creating recipients");
pub const CREATE_SHARES: Step = Step::new(3, 7, "Creating shares");
pub const ATTACH_ASSETS: Step = Step::new(4, 7, "Attaching data assets");
pub const ATTACH_RECIPIENTS: Step = Step::new(5, 7, "Attaching recipients to shares");
pub const CREATE_PIPELINES: Step = Step::new(6, 7, "Creating pipelines");
pub const SCHEDULE_PIPELINES: Step = Step::new(7, 7, "Scheduling pipelines");

pub const DELETE_PIPELINES: Step = Step::new(1, 3, "Deleting pipelines");
pub const DELETE_SHARES: Step = Step::new(2, 3, "Deleting shares");
pub const DELETE_RECIPIENTS: Step = Step::new(3, 3, "Deleting recipients");

/// Before any step: the run never got as far as step 1.
const PREPARE: Step = Step::new(0, 7, "Preparing provisioning");

/// What a run changed on the platform, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisioningLedger {
    pub recipients_created: Vec<String>,
    pub recipients_updated: Vec<String>,
    pub shares_created: Vec<String>,
    pub assets_added: Vec<String>,
    pub assets_removed: Vec<String>,
    pub grants: Vec<String>,
    pub pipelines_created: Vec<String>,
    pub pipelines_updated: Vec<String>,
    pub schedules: Vec<String>,
    pub deleted: Vec<String>,
    /// Resources left in place because something else still uses them
    pub retained: Vec<String>,
}

impl ProvisioningLedger {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            ("recipients created", &self.recipients_created),
            ("recipients updated", &self.recipients_updated),
            ("shares created", &self.shares_created),
            ("assets added", &self.assets_added),
            ("assets removed", &self.assets_removed),
            ("grants", &self.grants),
            ("pipelines created", &self.pipelines_created),
            ("pipelines updated", &self.pipelines_updated),
            ("schedules", &self.schedules),
            ("deleted", &self.deleted),
            ("retained", &self.retained),
        ]
        .iter()
        .filter(|(_, names)| !names.is_empty())
        .map(|(label, names)| format!("{}: {}", label, names.join(", ")))
        .collect();
        if parts.is_empty() {
            "nothing".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub share_pack_id: Uuid,
    pub strategy: Strategy,
    pub ledger: ProvisioningLedger,
    pub cleanup: Option<CleanupReport>,
}

/// State carried across the steps of one run.
pub(crate) struct Run {
    pub share_pack_id: Uuid,
    pub pack: SharePack,
    pub config: ShareConfig,
    pub strategy: Strategy,
    pub client: Arc<dyn PlatformClient>,
    pub ledger: ProvisioningLedger,
    pub cleanup: Option<CleanupReport>,
    /// Live platform view of each declared share after step 3
    pub live_shares: BTreeMap<String, ShareInfo>,
    /// Share name -> business id
    pub share_ids: BTreeMap<String, Uuid>,
    /// Pipeline name -> (business id, external pipeline id)
    pub pipelines: BTreeMap<String, (Uuid, String)>,
}

pub struct Orchestrator {
    repos: Repositories,
    connector: Arc<dyn PlatformConnector>,
    actor: String,
}

impl Orchestrator {
    pub fn new(repos: Repositories, connector: Arc<dyn PlatformConnector>) -> Self {
        Self {
            repos,
            connector,
            actor: "provisioning-worker".to_string(),
        }
    }

    /// Name written as `created_by` on every version this orchestrator writes.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub(crate) fn actor(&self) -> &str {
        &self.actor
    }

    /// Provision the current version of a share pack using its stored strategy.
    #[instrument(skip_all, fields(share_pack_id = %share_pack_id))]
    pub async fn provision(&self, share_pack_id: Uuid) -> ProvisionResult<ProvisionReport> {
        let current = self
            .repos
            .share_packs
            .get(share_pack_id)
            .await?
            .ok_or(ProvisionError::SharePackNotFound(share_pack_id))?;
        let pack = current.fields;
        let strategy = pack.strategy;

        let mut run = match self.prepare(share_pack_id, pack).await {
            Ok(run) => run,
            Err(e) => {
                self.fail(share_pack_id, PREPARE, &e, &ProvisioningLedger::default())
                    .await;
                return Err(e);
            }
        };

        info!(strategy = %strategy, "provisioning share pack");
        let mut step = PREPARE;
        let outcome = match strategy {
            Strategy::New | Strategy::Update => self.run_provision(&mut run, &mut step).await,
            Strategy::Delete => self.run_delete(&mut run, &mut step).await,
        };

        if let Err(e) = outcome {
            self.fail(share_pack_id, step, &e, &run.ledger).await;
            return Err(e);
        }

        self.repos
            .share_packs
            .mark_completed(share_pack_id, &self.actor)
            .await?;
        info!(ledger = %run.ledger.summary(), "share pack provisioned");

        Ok(ProvisionReport {
            share_pack_id,
            strategy,
            ledger: run.ledger,
            cleanup: run.cleanup,
        })
    }

    async fn prepare(&self, share_pack_id: Uuid, pack: SharePack) -> ProvisionResult<Run> {
        let mut config = ShareConfig::from_value(&pack.config)?;
        config.normalize();
        let client = self.connector.connect(&pack.workspace_url).await?;
        Ok(Run {
            share_pack_id,
            strategy: pack.strategy,
            pack,
            config,
            client,
            ledger: ProvisioningLedger::default(),
            cleanup: None,
            live_shares: BTreeMap::new(),
            share_ids: BTreeMap::new(),
            pipelines: BTreeMap::new(),
        })
    }

    /// Write the in-progress status version for `step`.
    pub(crate) async fn enter(&self, run: &Run, step: Step) -> ProvisionResult<()> {
        info!(share_pack_id = %run.share_pack_id, step = %step, "entering step");
        self.repos
            .share_packs
            .mark_in_progress(run.share_pack_id, &step.progress(), &self.actor)
            .await?;
        Ok(())
    }

    /// Persist FAILED with the error's text. A failure to persist is logged,
    /// never allowed to mask the original error.
    async fn fail(
        &self,
        share_pack_id: Uuid,
        step: Step,
        err: &ProvisionError,
        ledger: &ProvisioningLedger,
    ) {
        let message = err.to_string();
        error!(
            share_pack_id = %share_pack_id,
            step = %step,
            error = %message,
            created_before_failure = %ledger.summary(),
            "provisioning failed"
        );
        if let Err(e) = self
            .repos
            .share_packs
            .mark_failed(share_pack_id, &step.failure(), &message, &self.actor)
            .await
        {
            error!(share_pack_id = %share_pack_id, error = %e, "could not record FAILED status");
        }
    }
}
