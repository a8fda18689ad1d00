//! Orphan pipeline cleanup.
//!
//! A pipeline is orphaned when its source asset is no longer in its share's
//! current asset set. The external pipeline is only deleted when both hold:
//!
//! * no other live share, in any pack, still contains the source asset
//! * no other live pipeline row points at the same external pipeline
//!
//! The row itself is soft-deleted either way. Pipelines whose share cannot be
//! resolved are skipped and reported for manual intervention.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{Pipeline, Share};
use crate::error::ProvisionResult;
use crate::platform::{PlatformClient, PlatformResult};
use crate::repository::Repositories;
use crate::store::Versioned;

pub const ORPHAN_REASON: &str = "asset removed from share";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrphanAction {
    /// Schedule and pipeline removed from the platform
    ExternalDeleted,
    /// External pipeline left in place
    Retained {
        /// Other shares still containing the source asset
        shares_with_asset: Vec<String>,
        /// Other live rows pointing at the same external pipeline
        rows_sharing_pipeline: Vec<Uuid>,
    },
    /// The row never had an external pipeline
    NoExternalResource,
}

impl OrphanAction {
    pub fn external_deleted(&self) -> bool {
        matches!(self, Self::ExternalDeleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanOutcome {
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub source_asset: String,
    pub external_pipeline_id: Option<String>,
    pub action: OrphanAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedPipeline {
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub share_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub share_pack_id: Uuid,
    /// Live pipelines of the pack looked at
    pub examined: usize,
    pub orphans: Vec<OrphanOutcome>,
    pub unresolved: Vec<UnresolvedPipeline>,
}

impl CleanupReport {
    /// True when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn external_deletions(&self) -> usize {
        self.orphans
            .iter()
            .filter(|o| o.action.external_deleted())
            .count()
    }
}

pub struct OrphanCleaner {
    repos: Repositories,
    client: Arc<dyn PlatformClient>,
    actor: String,
}

impl OrphanCleaner {
    pub fn new(repos: Repositories, client: Arc<dyn PlatformClient>, actor: &str) -> Self {
        Self {
            repos,
            client,
            actor: actor.to_string(),
        }
    }

    #[instrument(skip_all, fields(share_pack_id = %share_pack_id))]
    pub async fn cleanup_share_pack(&self, share_pack_id: Uuid) -> ProvisionResult<CleanupReport> {
        let pipelines = self.repos.pipelines.list_by_share_pack(share_pack_id).await?;
        let mut report = CleanupReport {
            share_pack_id,
            examined: pipelines.len(),
            ..CleanupReport::default()
        };

        // Owning shares are looked up globally; they may live in another pack
        let mut owners: BTreeMap<Uuid, Option<Versioned<Share>>> = BTreeMap::new();
        for p in &pipelines {
            if !owners.contains_key(&p.fields.share_id) {
                let share = self.repos.shares.get(p.fields.share_id).await?;
                owners.insert(p.fields.share_id, share);
            }
        }

        for pipeline in pipelines {
            let share = match owners.get(&pipeline.fields.share_id) {
                Some(Some(share)) => share,
                _ => {
                    warn!(
                        pipeline = %pipeline.fields.pipeline_name,
                        share_id = %pipeline.fields.share_id,
                        "owning share not found, skipping pipeline; manual intervention required"
                    );
                    report.unresolved.push(UnresolvedPipeline {
                        pipeline_id: pipeline.business_id,
                        pipeline_name: pipeline.fields.pipeline_name.clone(),
                        share_id: pipeline.fields.share_id,
                    });
                    continue;
                }
            };
            if share.fields.contains_asset(&pipeline.fields.source_asset) {
                continue;
            }

            let action = self.retire(&pipeline, share.business_id).await?;
            report.orphans.push(OrphanOutcome {
                pipeline_id: pipeline.business_id,
                pipeline_name: pipeline.fields.pipeline_name.clone(),
                source_asset: pipeline.fields.source_asset.clone(),
                external_pipeline_id: pipeline.fields.external_pipeline_id.clone(),
                action,
            });
        }

        info!(
            examined = report.examined,
            orphans = report.orphans.len(),
            external_deletions = report.external_deletions(),
            unresolved = report.unresolved.len(),
            "orphan cleanup finished"
        );
        Ok(report)
    }

    /// Classify one orphan, delete externally when safe, soft-delete the row.
    async fn retire(
        &self,
        pipeline: &Versioned<Pipeline>,
        owning_share: Uuid,
    ) -> ProvisionResult<OrphanAction> {
        let fields = &pipeline.fields;

        let action = match fields.external_pipeline_id.as_deref() {
            None => OrphanAction::NoExternalResource,
            Some(external_id) => {
                let shares_with_asset: Vec<String> = self
                    .repos
                    .shares
                    .find_containing_asset(&fields.source_asset)
                    .await?
                    .into_iter()
                    .filter(|s| s.business_id != owning_share)
                    .map(|s| s.fields.share_name)
                    .collect();
                let rows_sharing_pipeline: Vec<Uuid> = self
                    .repos
                    .pipelines
                    .find_by_external_id(external_id)
                    .await?
                    .into_iter()
                    .filter(|p| p.business_id != pipeline.business_id)
                    .map(|p| p.business_id)
                    .collect();

                if shares_with_asset.is_empty() && rows_sharing_pipeline.is_empty() {
                    delete_external_pipeline(self.client.as_ref(), external_id).await?;
                    info!(
                        pipeline = %fields.pipeline_name,
                        external_pipeline_id = external_id,
                        "orphaned pipeline deleted from platform"
                    );
                    OrphanAction::ExternalDeleted
                } else {
                    info!(
                        pipeline = %fields.pipeline_name,
                        external_pipeline_id = external_id,
                        other_shares = shares_with_asset.len(),
                        other_rows = rows_sharing_pipeline.len(),
                        "orphaned pipeline still referenced, keeping platform resource"
                    );
                    OrphanAction::Retained {
                        shares_with_asset,
                        rows_sharing_pipeline,
                    }
                }
            }
        };

        self.repos
            .pipelines
            .soft_delete(pipeline.business_id, &self.actor, ORPHAN_REASON)
            .await?;
        Ok(action)
    }
}

/// Remove a pipeline's schedule, then the pipeline. Already gone is fine.
pub(crate) async fn delete_external_pipeline(
    client: &dyn PlatformClient,
    external_id: &str,
) -> PlatformResult<()> {
    tolerate_missing(client.delete_schedule(external_id).await)?;
    tolerate_missing(client.delete_pipeline(external_id).await)
}

pub(crate) fn tolerate_missing(result: PlatformResult<()>) -> PlatformResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{InMemoryPlatform, PlatformError, PlatformOp};
    use crate::store::InMemoryTemporalStore;
    use crate::types::ChangeMeta;

    struct Fixture {
        repos: Repositories,
        platform: Arc<InMemoryPlatform>,
        pack: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repos: Repositories::new(Arc::new(InMemoryTemporalStore::new())),
                platform: Arc::new(InMemoryPlatform::new()),
                pack: Uuid::now_v7(),
            }
        }

        fn cleaner(&self) -> OrphanCleaner {
            OrphanCleaner::new(self.repos.clone(), self.platform.clone(), "tester")
        }

        async fn share(&self, name: &str, pack: Option<Uuid>, assets: &[&str]) -> Uuid {
            self.repos
                .shares
                .upsert(
                    Share {
                        share_name: name.into(),
                        share_pack_id: pack,
                        share_assets: assets.iter().map(|a| a.to_string()).collect(),
                        ..Share::default()
                    },
                    &ChangeMeta::new("tester", "setup"),
                )
                .await
                .unwrap()
                .business_id
        }

        async fn pipeline(
            &self,
            name: &str,
            share_id: Uuid,
            source: &str,
            external: Option<&str>,
        ) -> Uuid {
            self.repos
                .pipelines
                .upsert(
                    Pipeline {
                        pipeline_name: name.into(),
                        share_id,
                        share_pack_id: Some(self.pack),
                        external_pipeline_id: external.map(str::to_string),
                        source_asset: source.into(),
                        target_asset: "shared.sales.t".into(),
                        ..Pipeline::default()
                    },
                    &ChangeMeta::new("tester", "setup"),
                )
                .await
                .unwrap()
                .business_id
        }
    }

    #[tokio::test]
    async fn unresolved_share_is_skipped_not_deleted() {
        let fx = Fixture::new();
        let ext = fx.platform.seed_pipeline("p1", "c.s.a").await;
        let p1 = fx.pipeline("p1", Uuid::now_v7(), "c.s.a", Some(ext.as_str())).await;

        let report = fx.cleaner().cleanup_share_pack(fx.pack).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(report.unresolved.len(), 1);
        assert!(fx.platform.pipeline(&ext).await.is_some());
        assert!(fx.repos.pipelines.get(p1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn shared_external_pipeline_is_retained() {
        let fx = Fixture::new();
        let s1 = fx.share("s1", Some(fx.pack), &["c.s.b"]).await;
        let ext = fx.platform.seed_pipeline("p1", "c.s.a").await;
        let p1 = fx.pipeline("p1", s1, "c.s.a", Some(ext.as_str())).await;
        // Another pack's row pointing at the same physical pipeline
        fx.share("s9", Some(Uuid::now_v7()), &["c.s.a"]).await;
        let twin = fx
            .repos
            .pipelines
            .upsert(
                Pipeline {
                    pipeline_name: "p1_twin".into(),
                    share_id: s1,
                    share_pack_id: Some(Uuid::now_v7()),
                    external_pipeline_id: Some(ext.clone()),
                    source_asset: "c.s.z".into(),
                    ..Pipeline::default()
                },
                &ChangeMeta::new("tester", "setup"),
            )
            .await
            .unwrap();

        let report = fx.cleaner().cleanup_share_pack(fx.pack).await.unwrap();

        assert_eq!(report.orphans.len(), 1);
        match &report.orphans[0].action {
            OrphanAction::Retained {
                shares_with_asset,
                rows_sharing_pipeline,
            } => {
                assert_eq!(shares_with_asset, &vec!["s9".to_string()]);
                assert_eq!(rows_sharing_pipeline, &vec![twin.business_id]);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(fx.platform.pipeline(&ext).await.is_some());
        assert!(fx.repos.pipelines.get(p1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn row_sharing_alone_blocks_external_deletion() {
        let fx = Fixture::new();
        let s1 = fx.share("s1", Some(fx.pack), &["c.s.b"]).await;
        let ext = fx.platform.seed_pipeline("p1", "c.s.a").await;
        fx.pipeline("p1", s1, "c.s.a", Some(ext.as_str())).await;
        fx.repos
            .pipelines
            .upsert(
                Pipeline {
                    pipeline_name: "elsewhere".into(),
                    share_id: Uuid::now_v7(),
                    external_pipeline_id: Some(ext.clone()),
                    source_asset: "c.s.q".into(),
                    ..Pipeline::default()
                },
                &ChangeMeta::new("tester", "setup"),
            )
            .await
            .unwrap();

        let report = fx.cleaner().cleanup_share_pack(fx.pack).await.unwrap();

        assert_eq!(report.external_deletions(), 0);
        assert_eq!(fx.platform.call_count(PlatformOp::DeletePipeline).await, 0);
    }

    #[tokio::test]
    async fn missing_external_resource_counts_as_deleted() {
        let fx = Fixture::new();
        let s1 = fx.share("s1", Some(fx.pack), &["c.s.b"]).await;
        fx.pipeline("p1", s1, "c.s.a", Some("pl-gone")).await;

        let report = fx.cleaner().cleanup_share_pack(fx.pack).await.unwrap();
        assert_eq!(report.external_deletions(), 1);
    }

    #[tokio::test]
    async fn platform_error_propagates_and_keeps_row() {
        let fx = Fixture::new();
        let s1 = fx.share("s1", Some(fx.pack), &["c.s.b"]).await;
        let ext = fx.platform.seed_pipeline("p1", "c.s.a").await;
        let p1 = fx.pipeline("p1", s1, "c.s.a", Some(ext.as_str())).await;
        fx.platform
            .fail_on(
                PlatformOp::DeletePipeline,
                PlatformError::PermissionDenied("delete pipeline".into()),
            )
            .await;

        assert!(fx.cleaner().cleanup_share_pack(fx.pack).await.is_err());
        assert!(fx.repos.pipelines.get(p1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pipeline_without_external_id_is_only_soft_deleted() {
        let fx = Fixture::new();
        let s1 = fx.share("s1", Some(fx.pack), &["c.s.b"]).await;
        let p1 = fx.pipeline("p1", s1, "c.s.a", None).await;

        let report = fx.cleaner().cleanup_share_pack(fx.pack).await.unwrap();
        assert_eq!(report.orphans[0].action, OrphanAction::NoExternalResource);
        assert!(fx.repos.pipelines.get(p1).await.unwrap().is_none());
        assert!(fx.platform.calls().await.is_empty());
    }
}
