//! In-memory platform used by tests and dry runs.
//!
//! Keeps recipients, shares, catalogs, pipelines and schedules in maps and
//! records every call. Failures can be injected per operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    PipelineInfo, PipelineSpec, PlatformClient, PlatformError, PlatformResult, RecipientInfo,
    RecipientSpec, ScheduleSpec, ShareInfo,
};
use crate::types::normalize_set;

/// Operation names used for call recording and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformOp {
    ListRecipients,
    GetRecipient,
    CreateRecipient,
    UpdateRecipient,
    DeleteRecipient,
    ListShares,
    GetShare,
    CreateShare,
    DeleteShare,
    AddDataObjects,
    RemoveDataObjects,
    GrantShare,
    EnsureCatalog,
    CreatePipeline,
    UpdatePipeline,
    DeletePipeline,
    UpsertSchedule,
    DeleteSchedule,
}

struct InjectedFailure {
    error: PlatformError,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    recipients: BTreeMap<String, RecipientInfo>,
    shares: BTreeMap<String, ShareInfo>,
    catalogs: BTreeSet<String>,
    pipelines: BTreeMap<String, PipelineSpec>,
    schedules: BTreeMap<String, ScheduleSpec>,
    next_id: u64,
    calls: Vec<PlatformOp>,
    failures: HashMap<PlatformOp, InjectedFailure>,
}

impl State {
    fn enter(&mut self, op: PlatformOp) -> PlatformResult<()> {
        self.calls.push(op);
        let Some(failure) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        let error = failure.error.clone();
        let exhausted = match failure.remaining.as_mut() {
            None => false,
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
        };
        if exhausted {
            self.failures.remove(&op);
        }
        Err(error)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn share_mut(&mut self, name: &str) -> PlatformResult<&mut ShareInfo> {
        self.shares
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("share {}", name)))
    }
}

#[derive(Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Failure injection ──

    /// Fail every call of `op` with `error` until cleared.
    pub async fn fail_on(&self, op: PlatformOp, error: PlatformError) {
        self.state.lock().await.failures.insert(
            op,
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls of `op`, then succeed.
    pub async fn fail_times(&self, op: PlatformOp, error: PlatformError, times: usize) {
        if times == 0 {
            return;
        }
        self.state.lock().await.failures.insert(
            op,
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    // ── Seeding ──

    pub async fn seed_recipient(&self, name: &str) {
        let mut state = self.state.lock().await;
        let id = state.next_id("rcp");
        state.recipients.insert(
            name.to_string(),
            RecipientInfo {
                name: name.to_string(),
                id,
                recipient_type: Default::default(),
                ip_access_list: Vec::new(),
            },
        );
    }

    pub async fn seed_share(&self, name: &str, objects: &[&str]) {
        let mut state = self.state.lock().await;
        let id = state.next_id("shr");
        let mut objects: Vec<String> = objects.iter().map(|o| o.to_string()).collect();
        normalize_set(&mut objects);
        state.shares.insert(
            name.to_string(),
            ShareInfo {
                name: name.to_string(),
                id,
                objects,
                recipients: Vec::new(),
            },
        );
    }

    /// Register a live pipeline and return its id.
    pub async fn seed_pipeline(&self, name: &str, source_asset: &str) -> String {
        let mut state = self.state.lock().await;
        let id = state.next_id("pl");
        state.pipelines.insert(
            id.clone(),
            PipelineSpec {
                name: name.to_string(),
                source_asset: source_asset.to_string(),
                target_asset: String::new(),
                notification_emails: Vec::new(),
                tags: BTreeMap::new(),
                serverless: true,
            },
        );
        id
    }

    pub async fn seed_schedule(&self, pipeline_id: &str, cron: &str) {
        self.state.lock().await.schedules.insert(
            pipeline_id.to_string(),
            ScheduleSpec {
                pipeline_id: pipeline_id.to_string(),
                cron: cron.to_string(),
                timezone: "UTC".to_string(),
            },
        );
    }

    // ── Inspection ──

    pub async fn calls(&self) -> Vec<PlatformOp> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, op: PlatformOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub async fn recipient(&self, name: &str) -> Option<RecipientInfo> {
        self.state.lock().await.recipients.get(name).cloned()
    }

    pub async fn share(&self, name: &str) -> Option<ShareInfo> {
        self.state.lock().await.shares.get(name).cloned()
    }

    pub async fn has_catalog(&self, name: &str) -> bool {
        self.state.lock().await.catalogs.contains(name)
    }

    pub async fn pipeline(&self, id: &str) -> Option<PipelineSpec> {
        self.state.lock().await.pipelines.get(id).cloned()
    }

    pub async fn pipeline_ids(&self) -> Vec<String> {
        self.state.lock().await.pipelines.keys().cloned().collect()
    }

    pub async fn schedule(&self, pipeline_id: &str) -> Option<ScheduleSpec> {
        self.state.lock().await.schedules.get(pipeline_id).cloned()
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn list_recipients(&self) -> PlatformResult<Vec<RecipientInfo>> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::ListRecipients)?;
        Ok(state.recipients.values().cloned().collect())
    }

    async fn get_recipient(&self, name: &str) -> PlatformResult<RecipientInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::GetRecipient)?;
        state
            .recipients
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("recipient {}", name)))
    }

    async fn create_recipient(&self, spec: &RecipientSpec) -> PlatformResult<RecipientInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::CreateRecipient)?;
        if state.recipients.contains_key(&spec.name) {
            return Err(PlatformError::AlreadyExists(format!("recipient {}", spec.name)));
        }
        let mut ip_access_list = spec.ip_access_list.clone();
        normalize_set(&mut ip_access_list);
        let info = RecipientInfo {
            name: spec.name.clone(),
            id: state.next_id("rcp"),
            recipient_type: spec.recipient_type,
            ip_access_list,
        };
        state.recipients.insert(spec.name.clone(), info.clone());
        Ok(info)
    }

    async fn update_recipient_ip_access(
        &self,
        name: &str,
        ip_access_list: &[String],
    ) -> PlatformResult<RecipientInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::UpdateRecipient)?;
        let recipient = state
            .recipients
            .get_mut(name)
            .ok_or_else(|| PlatformError::NotFound(format!("recipient {}", name)))?;
        recipient.ip_access_list = ip_access_list.to_vec();
        normalize_set(&mut recipient.ip_access_list);
        Ok(recipient.clone())
    }

    async fn delete_recipient(&self, name: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::DeleteRecipient)?;
        state
            .recipients
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("recipient {}", name)))
    }

    async fn list_shares(&self) -> PlatformResult<Vec<ShareInfo>> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::ListShares)?;
        Ok(state.shares.values().cloned().collect())
    }

    async fn get_share(&self, name: &str) -> PlatformResult<ShareInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::GetShare)?;
        state
            .shares
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("share {}", name)))
    }

    async fn create_share(
        &self,
        name: &str,
        _description: Option<&str>,
    ) -> PlatformResult<ShareInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::CreateShare)?;
        if state.shares.contains_key(name) {
            return Err(PlatformError::AlreadyExists(format!("share {}", name)));
        }
        let info = ShareInfo {
            name: name.to_string(),
            id: state.next_id("shr"),
            objects: Vec::new(),
            recipients: Vec::new(),
        };
        state.shares.insert(name.to_string(), info.clone());
        Ok(info)
    }

    async fn delete_share(&self, name: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::DeleteShare)?;
        state
            .shares
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("share {}", name)))
    }

    async fn add_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::AddDataObjects)?;
        let info = state.share_mut(share)?;
        info.objects.extend(objects.iter().cloned());
        normalize_set(&mut info.objects);
        Ok(())
    }

    async fn remove_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::RemoveDataObjects)?;
        let info = state.share_mut(share)?;
        info.objects.retain(|o| !objects.contains(o));
        Ok(())
    }

    async fn grant_share(&self, share: &str, recipient: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::GrantShare)?;
        if !state.recipients.contains_key(recipient) {
            return Err(PlatformError::NotFound(format!("recipient {}", recipient)));
        }
        let info = state.share_mut(share)?;
        info.recipients.push(recipient.to_string());
        normalize_set(&mut info.recipients);
        Ok(())
    }

    async fn ensure_catalog(&self, catalog: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::EnsureCatalog)?;
        state.catalogs.insert(catalog.to_string());
        Ok(())
    }

    async fn create_pipeline(&self, spec: &PipelineSpec) -> PlatformResult<PipelineInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::CreatePipeline)?;
        if state.pipelines.values().any(|p| p.name == spec.name) {
            return Err(PlatformError::AlreadyExists(format!("pipeline {}", spec.name)));
        }
        let id = state.next_id("pl");
        state.pipelines.insert(id.clone(), spec.clone());
        Ok(PipelineInfo {
            name: spec.name.clone(),
            id,
        })
    }

    async fn update_pipeline(&self, id: &str, spec: &PipelineSpec) -> PlatformResult<PipelineInfo> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::UpdatePipeline)?;
        let existing = state
            .pipelines
            .get_mut(id)
            .ok_or_else(|| PlatformError::NotFound(format!("pipeline {}", id)))?;
        *existing = spec.clone();
        Ok(PipelineInfo {
            name: spec.name.clone(),
            id: id.to_string(),
        })
    }

    async fn delete_pipeline(&self, id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::DeletePipeline)?;
        state
            .pipelines
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("pipeline {}", id)))
    }

    async fn upsert_schedule(&self, spec: &ScheduleSpec) -> PlatformResult<String> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::UpsertSchedule)?;
        if !state.pipelines.contains_key(&spec.pipeline_id) {
            return Err(PlatformError::NotFound(format!("pipeline {}", spec.pipeline_id)));
        }
        state
            .schedules
            .insert(spec.pipeline_id.clone(), spec.clone());
        Ok(format!("sch-{}", spec.pipeline_id))
    }

    async fn delete_schedule(&self, pipeline_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        state.enter(PlatformOp::DeleteSchedule)?;
        state
            .schedules
            .remove(pipeline_id)
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(format!("schedule for {}", pipeline_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RecipientType;

    fn spec(name: &str) -> RecipientSpec {
        RecipientSpec {
            name: name.into(),
            recipient_type: RecipientType::DataToOpen,
            recipient_identifier: None,
            ip_access_list: vec!["10.0.0.1".into()],
            description: None,
        }
    }

    #[tokio::test]
    async fn duplicate_recipient_is_rejected() {
        let p = InMemoryPlatform::new();
        p.create_recipient(&spec("r1")).await.unwrap();
        let err = p.create_recipient(&spec("r1")).await.unwrap_err();
        assert!(matches!(err, PlatformError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn fail_times_expires() {
        let p = InMemoryPlatform::new();
        p.fail_times(
            PlatformOp::ListShares,
            PlatformError::Timeout("slow".into()),
            1,
        )
        .await;
        assert!(p.list_shares().await.is_err());
        assert!(p.list_shares().await.is_ok());
        assert_eq!(p.call_count(PlatformOp::ListShares).await, 2);
    }

    #[tokio::test]
    async fn schedule_requires_pipeline() {
        let p = InMemoryPlatform::new();
        let err = p
            .upsert_schedule(&ScheduleSpec {
                pipeline_id: "pl-missing".into(),
                cron: "0 * * * *".into(),
                timezone: "UTC".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let id = p.seed_pipeline("p1", "c.s.t").await;
        p.seed_schedule(&id, "0 * * * *").await;
        p.delete_schedule(&id).await.unwrap();
        assert!(p.schedule(&id).await.is_none());
    }
}
