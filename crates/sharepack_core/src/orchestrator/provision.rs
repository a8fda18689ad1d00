//! NEW / UPDATE provisioning steps.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::{
    Orchestrator, Run, Step, ATTACH_ASSETS, ATTACH_RECIPIENTS, CREATE_PIPELINES,
    CREATE_RECIPIENTS, CREATE_SHARES, RESOLVE_TENANT, SCHEDULE_PIPELINES,
};
use crate::entities::{Pipeline, PipelineSchedule, Recipient, Share};
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::cleanup::OrphanCleaner;
use crate::platform::{
    PipelineSpec, PlatformError, RecipientInfo, RecipientSpec, ScheduleSpec, ShareInfo,
};
use crate::share_config::{catalog_of, PipelineConfig, RecipientConfig};
use crate::types::{normalize_set, ChangeMeta, Strategy};

impl Orchestrator {
    pub(crate) async fn run_provision(
        &self,
        run: &mut Run,
        step: &mut Step,
    ) -> ProvisionResult<()> {
        *step = RESOLVE_TENANT;
        self.enter(run, *step).await?;
        self.resolve_tenant_and_project(run).await?;

        *step = CREATE_RECIPIENTS;
        self.enter(run, *step).await?;
        self.ensure_recipients(run).await?;

        *step = CREATE_SHARES;
        self.enter(run, *step).await?;
        self.ensure_shares(run).await?;

        *step = ATTACH_ASSETS;
        self.enter(run, *step).await?;
        self.attach_assets(run).await?;

        *step = ATTACH_RECIPIENTS;
        self.enter(run, *step).await?;
        self.attach_recipients(run).await?;

        *step = CREATE_PIPELINES;
        self.enter(run, *step).await?;
        self.ensure_pipelines(run).await?;

        *step = SCHEDULE_PIPELINES;
        self.enter(run, *step).await?;
        self.schedule_pipelines(run).await
    }

    fn meta(&self, reason: &str) -> ChangeMeta {
        ChangeMeta::new(self.actor(), reason)
    }

    // ── Step 1 ──

    async fn resolve_tenant_and_project(&self, run: &mut Run) -> ProvisionResult<()> {
        let repos = self.repositories();
        let tenant = repos
            .tenants
            .ensure(&run.pack.business_line, self.actor())
            .await?;
        let project = repos
            .projects
            .ensure(
                &run.pack.project_name,
                tenant.business_id,
                run.config.metadata.approver.as_deref(),
                self.actor(),
            )
            .await?;
        repos
            .share_packs
            .set_resolution(
                run.share_pack_id,
                tenant.business_id,
                project.business_id,
                self.actor(),
            )
            .await?;
        debug!(
            tenant_id = %tenant.business_id,
            project_id = %project.business_id,
            "tenant and project resolved"
        );
        Ok(())
    }

    // ── Step 2 ──

    async fn ensure_recipients(&self, run: &mut Run) -> ProvisionResult<()> {
        for declared in run.config.recipients.clone() {
            let info = match run.strategy {
                Strategy::Update => self.reconcile_recipient(run, &declared).await?,
                _ => match run.client.create_recipient(&recipient_spec(&declared)).await {
                    Ok(info) => {
                        run.ledger.recipients_created.push(declared.name.clone());
                        info
                    }
                    // Redelivered NEW run; adopt what the earlier attempt made
                    Err(PlatformError::AlreadyExists(_)) => {
                        warn!(recipient = %declared.name, "recipient already exists, reconciling");
                        self.reconcile_recipient(run, &declared).await?
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            let outcome = self
                .repositories()
                .recipients
                .upsert(
                    Recipient {
                        recipient_name: declared.name.clone(),
                        share_pack_id: Some(run.share_pack_id),
                        recipient_type: declared.recipient_type,
                        recipient_identifier: declared.recipient_identifier.clone(),
                        external_recipient_id: Some(info.id),
                        ip_access_list: declared.ip_access_list.clone(),
                        description: declared.description.clone(),
                    },
                    &self.meta("recipient provisioned"),
                )
                .await?;
            debug!(recipient = %declared.name, change = ?outcome.change, "recipient row upserted");
        }
        Ok(())
    }

    /// Get the live recipient, creating it when missing and syncing its IP list.
    async fn reconcile_recipient(
        &self,
        run: &mut Run,
        declared: &RecipientConfig,
    ) -> ProvisionResult<RecipientInfo> {
        let live = match run.client.get_recipient(&declared.name).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                let info = run.client.create_recipient(&recipient_spec(declared)).await?;
                run.ledger.recipients_created.push(declared.name.clone());
                return Ok(info);
            }
            Err(e) => return Err(e.into()),
        };

        let mut live_ips = live.ip_access_list.clone();
        normalize_set(&mut live_ips);
        if live_ips == declared.ip_access_list {
            return Ok(live);
        }
        let updated = run
            .client
            .update_recipient_ip_access(&declared.name, &declared.ip_access_list)
            .await?;
        run.ledger.recipients_updated.push(declared.name.clone());
        Ok(updated)
    }

    // ── Step 3 ──

    async fn ensure_shares(&self, run: &mut Run) -> ProvisionResult<()> {
        for declared in run.config.shares.clone() {
            let live = match run.strategy {
                Strategy::Update => match run.client.get_share(&declared.name).await {
                    Ok(live) => live,
                    Err(e) if e.is_not_found() => {
                        self.create_share(run, &declared.name, declared.description.as_deref())
                            .await?
                    }
                    Err(e) => return Err(e.into()),
                },
                _ => match self
                    .create_share(run, &declared.name, declared.description.as_deref())
                    .await
                {
                    Ok(live) => live,
                    Err(ProvisionError::Platform(PlatformError::AlreadyExists(_))) => {
                        warn!(share = %declared.name, "share already exists, adopting it");
                        run.client.get_share(&declared.name).await?
                    }
                    Err(e) => return Err(e),
                },
            };

            // Assets and grants are carried forward; steps 4 and 5 rewrite them
            let shares = &self.repositories().shares;
            let prior = shares.find_by_name(&declared.name, true).await?;
            let (share_assets, recipients_attached) = prior
                .map(|p| (p.fields.share_assets, p.fields.recipients_attached))
                .unwrap_or_default();
            let outcome = shares
                .upsert(
                    Share {
                        share_name: declared.name.clone(),
                        share_pack_id: Some(run.share_pack_id),
                        external_share_id: Some(live.id.clone()),
                        share_assets,
                        recipients_attached,
                        description: declared.description.clone(),
                    },
                    &self.meta("share provisioned"),
                )
                .await?;

            run.share_ids.insert(declared.name.clone(), outcome.business_id);
            run.live_shares.insert(declared.name.clone(), live);
        }
        Ok(())
    }

    async fn create_share(
        &self,
        run: &mut Run,
        name: &str,
        description: Option<&str>,
    ) -> ProvisionResult<ShareInfo> {
        let info = run.client.create_share(name, description).await?;
        run.ledger.shares_created.push(name.to_string());
        Ok(info)
    }

    // ── Step 4 ──

    async fn attach_assets(&self, run: &mut Run) -> ProvisionResult<()> {
        for declared in run.config.shares.clone() {
            let live = run.live_share(&declared.name)?;
            let live_objects: BTreeSet<&String> = live.objects.iter().collect();
            let desired: BTreeSet<&String> = declared.share_assets.iter().collect();

            let to_add: Vec<String> = desired
                .difference(&live_objects)
                .map(|a| a.to_string())
                .collect();
            let to_remove: Vec<String> = if run.strategy == Strategy::Update {
                live_objects
                    .difference(&desired)
                    .map(|a| a.to_string())
                    .collect()
            } else {
                Vec::new()
            };

            if !to_add.is_empty() {
                run.client.add_data_objects(&declared.name, &to_add).await?;
                run.ledger
                    .assets_added
                    .extend(to_add.iter().map(|a| format!("{}:{}", declared.name, a)));
            }
            if !to_remove.is_empty() {
                run.client
                    .remove_data_objects(&declared.name, &to_remove)
                    .await?;
                run.ledger
                    .assets_removed
                    .extend(to_remove.iter().map(|a| format!("{}:{}", declared.name, a)));
            }

            let shares = &self.repositories().shares;
            let Some(current) = shares.find_by_name(&declared.name, false).await? else {
                return Err(ProvisionError::InvalidState(format!(
                    "share row {} missing after step 3",
                    declared.name
                )));
            };
            let mut fields = current.fields;
            fields.share_assets = declared.share_assets.clone();
            let outcome = shares
                .upsert(fields, &self.meta("share assets updated"))
                .await?;
            debug!(share = %declared.name, change = ?outcome.change, "share assets recorded");
        }

        // Every UPDATE attempt, including retries whose share rows were
        // already rewritten by an earlier attempt
        if run.strategy == Strategy::Update {
            info!(share_pack_id = %run.share_pack_id, "running orphan cleanup");
            let cleaner = OrphanCleaner::new(
                self.repositories().clone(),
                run.client.clone(),
                self.actor(),
            );
            let report = cleaner.cleanup_share_pack(run.share_pack_id).await?;
            for orphan in &report.orphans {
                if orphan.action.external_deleted() {
                    run.ledger.deleted.push(format!("pipeline {}", orphan.pipeline_name));
                } else {
                    run.ledger.retained.push(format!("pipeline {}", orphan.pipeline_name));
                }
            }
            run.cleanup = Some(report);
        }
        Ok(())
    }

    // ── Step 5 ──

    async fn attach_recipients(&self, run: &mut Run) -> ProvisionResult<()> {
        for declared in run.config.shares.clone() {
            let live = run.live_share(&declared.name)?;
            let mut attached: Vec<String> = live.recipients.clone();

            for recipient in &declared.recipients {
                if attached.contains(recipient) {
                    continue;
                }
                run.client.grant_share(&declared.name, recipient).await?;
                run.ledger
                    .grants
                    .push(format!("{}->{}", declared.name, recipient));
                attached.push(recipient.clone());
            }

            let shares = &self.repositories().shares;
            let Some(current) = shares.find_by_name(&declared.name, false).await? else {
                return Err(ProvisionError::InvalidState(format!(
                    "share row {} missing after step 3",
                    declared.name
                )));
            };
            let mut fields = current.fields;
            fields.recipients_attached = attached;
            shares
                .upsert(fields, &self.meta("share recipients attached"))
                .await?;
        }
        Ok(())
    }

    // ── Step 6 ──

    async fn ensure_pipelines(&self, run: &mut Run) -> ProvisionResult<()> {
        let mut catalogs = BTreeSet::new();
        let declared: Vec<(String, PipelineConfig)> = run
            .config
            .pipelines()
            .map(|(share, p)| (share.name.clone(), p.clone()))
            .collect();

        for (share_name, p) in declared {
            if let Some(catalog) = catalog_of(&p.target_asset) {
                if catalogs.insert(catalog.to_string()) {
                    run.client.ensure_catalog(catalog).await?;
                }
            }

            let share_id = *run.share_ids.get(&share_name).ok_or_else(|| {
                ProvisionError::InvalidState(format!("share {} was not provisioned", share_name))
            })?;

            let pipelines = &self.repositories().pipelines;
            let existing = pipelines.find_by_name(&p.name, true).await?;
            let spec = pipeline_spec(&p);

            let external_id = match existing
                .as_ref()
                .and_then(|e| e.fields.external_pipeline_id.clone())
            {
                Some(id) => match run.client.update_pipeline(&id, &spec).await {
                    Ok(info) => {
                        run.ledger.pipelines_updated.push(p.name.clone());
                        info.id
                    }
                    // Row outlived its external pipeline
                    Err(e) if e.is_not_found() => {
                        let info = run.client.create_pipeline(&spec).await?;
                        run.ledger.pipelines_created.push(p.name.clone());
                        info.id
                    }
                    Err(e) => return Err(e.into()),
                },
                None => {
                    let info = run.client.create_pipeline(&spec).await?;
                    run.ledger.pipelines_created.push(p.name.clone());
                    info.id
                }
            };

            let external_schedule_id = existing
                .as_ref()
                .filter(|e| e.fields.external_pipeline_id.as_deref() == Some(external_id.as_str()))
                .and_then(|e| e.fields.external_schedule_id.clone());
            let outcome = pipelines
                .upsert(
                    Pipeline {
                        pipeline_name: p.name.clone(),
                        share_id,
                        share_pack_id: Some(run.share_pack_id),
                        external_pipeline_id: Some(external_id.clone()),
                        source_asset: p.source_asset.clone(),
                        target_asset: p.target_asset.clone(),
                        schedule: p.schedule.as_ref().map(PipelineSchedule::from),
                        external_schedule_id,
                        notification_emails: p.notification_emails.clone(),
                        tags: p.tags.clone(),
                        serverless: p.serverless,
                    },
                    &self.meta("pipeline provisioned"),
                )
                .await?;
            run.pipelines
                .insert(p.name.clone(), (outcome.business_id, external_id));
        }
        Ok(())
    }

    // ── Step 7 ──

    async fn schedule_pipelines(&self, run: &mut Run) -> ProvisionResult<()> {
        let declared: Vec<PipelineConfig> = run
            .config
            .pipelines()
            .filter(|(_, p)| p.schedule.is_some())
            .map(|(_, p)| p.clone())
            .collect();

        for p in declared {
            let Some(schedule) = p.schedule.as_ref().map(PipelineSchedule::from) else {
                continue;
            };
            let Some((business_id, external_id)) = run.pipelines.get(&p.name).cloned() else {
                return Err(ProvisionError::InvalidState(format!(
                    "pipeline {} was not provisioned",
                    p.name
                )));
            };

            let schedule_id = run
                .client
                .upsert_schedule(&ScheduleSpec::new(external_id, &schedule))
                .await?;
            run.ledger.schedules.push(p.name.clone());

            let pipelines = &self.repositories().pipelines;
            let Some(current) = pipelines.get(business_id).await? else {
                return Err(ProvisionError::InvalidState(format!(
                    "pipeline row {} missing after step 6",
                    p.name
                )));
            };
            let mut fields = current.fields;
            fields.external_schedule_id = Some(schedule_id);
            pipelines
                .upsert(fields, &self.meta("pipeline scheduled"))
                .await?;
        }
        Ok(())
    }
}

impl Run {
    fn live_share(&self, name: &str) -> ProvisionResult<ShareInfo> {
        self.live_shares.get(name).cloned().ok_or_else(|| {
            ProvisionError::InvalidState(format!("share {} was not provisioned", name))
        })
    }
}

fn recipient_spec(declared: &RecipientConfig) -> RecipientSpec {
    RecipientSpec {
        name: declared.name.clone(),
        recipient_type: declared.recipient_type,
        recipient_identifier: declared.recipient_identifier.clone(),
        ip_access_list: declared.ip_access_list.clone(),
        description: declared.description.clone(),
    }
}

fn pipeline_spec(p: &PipelineConfig) -> PipelineSpec {
    PipelineSpec {
        name: p.name.clone(),
        source_asset: p.source_asset.clone(),
        target_asset: p.target_asset.clone(),
        notification_emails: p.notification_emails.clone(),
        tags: p.tags.clone(),
        serverless: p.serverless,
    }
}
