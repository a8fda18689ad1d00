//! DELETE strategy: tear down the declared pipelines, shares and recipients.
//!
//! Pipelines are deleted from the platform under the same guard as orphan
//! cleanup. Recipients still granted on a share outside this pack are kept.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};
use uuid::Uuid;

use super::cleanup::{delete_external_pipeline, tolerate_missing};
use super::{Orchestrator, Run, Step, DELETE_PIPELINES, DELETE_RECIPIENTS, DELETE_SHARES};
use crate::entities::Pipeline;
use crate::error::ProvisionResult;
use crate::store::Versioned;

const DELETE_REASON: &str = "share pack deleted";

impl Orchestrator {
    pub(crate) async fn run_delete(&self, run: &mut Run, step: &mut Step) -> ProvisionResult<()> {
        *step = DELETE_PIPELINES;
        self.enter(run, *step).await?;
        self.delete_pipelines(run).await?;

        *step = DELETE_SHARES;
        self.enter(run, *step).await?;
        self.delete_shares(run).await?;

        *step = DELETE_RECIPIENTS;
        self.enter(run, *step).await?;
        self.delete_recipients(run).await
    }

    async fn delete_pipelines(&self, run: &mut Run) -> ProvisionResult<()> {
        let repos = self.repositories();

        // Rows under each declared share plus any declared pipeline found by name
        let mut targets: BTreeMap<Uuid, Versioned<Pipeline>> = BTreeMap::new();
        for share in &run.config.shares {
            if let Some(row) = repos.shares.find_by_name(&share.name, false).await? {
                for p in repos.pipelines.list_by_share(row.business_id).await? {
                    targets.insert(p.business_id, p);
                }
            }
            for declared in &share.pipelines {
                if let Some(p) = repos.pipelines.find_by_name(&declared.name, false).await? {
                    targets.insert(p.business_id, p);
                }
            }
        }

        for (business_id, pipeline) in targets {
            let name = pipeline.fields.pipeline_name.clone();
            if let Some(external_id) = pipeline.fields.external_pipeline_id.as_deref() {
                let others = repos
                    .pipelines
                    .find_by_external_id(external_id)
                    .await?
                    .into_iter()
                    .filter(|p| p.business_id != business_id)
                    .count();
                if others == 0 {
                    delete_external_pipeline(run.client.as_ref(), external_id).await?;
                    run.ledger.deleted.push(format!("pipeline {}", name));
                } else {
                    warn!(
                        pipeline = %name,
                        external_pipeline_id = external_id,
                        other_rows = others,
                        "external pipeline shared with other rows, keeping it"
                    );
                    run.ledger.retained.push(format!("pipeline {}", name));
                }
            }
            repos
                .pipelines
                .soft_delete(business_id, self.actor(), DELETE_REASON)
                .await?;
        }
        Ok(())
    }

    async fn delete_shares(&self, run: &mut Run) -> ProvisionResult<()> {
        let repos = self.repositories();
        for share in run.config.shares.clone() {
            tolerate_missing(run.client.delete_share(&share.name).await)?;
            run.ledger.deleted.push(format!("share {}", share.name));
            if let Some(row) = repos.shares.find_by_name(&share.name, false).await? {
                repos
                    .shares
                    .soft_delete(row.business_id, self.actor(), DELETE_REASON)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete_recipients(&self, run: &mut Run) -> ProvisionResult<()> {
        let repos = self.repositories();
        let declared_shares: BTreeSet<String> = run.config.share_names();

        for recipient in run.config.recipients.clone() {
            let still_granted: Vec<String> = repos
                .shares
                .find_attached_to(&recipient.name)
                .await?
                .into_iter()
                .map(|s| s.fields.share_name)
                .filter(|name| !declared_shares.contains(name))
                .collect();
            if !still_granted.is_empty() {
                warn!(
                    recipient = %recipient.name,
                    shares = ?still_granted,
                    "recipient still attached to other shares, keeping it"
                );
                run.ledger
                    .retained
                    .push(format!("recipient {}", recipient.name));
                continue;
            }

            tolerate_missing(run.client.delete_recipient(&recipient.name).await)?;
            run.ledger
                .deleted
                .push(format!("recipient {}", recipient.name));
            if let Some(row) = repos.recipients.find_by_name(&recipient.name, false).await? {
                repos
                    .recipients
                    .soft_delete(row.business_id, self.actor(), DELETE_REASON)
                    .await?;
            }
        }
        info!(share_pack_id = %run.share_pack_id, "share pack resources deleted");
        Ok(())
    }
}
