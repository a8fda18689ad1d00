//! Data platform management API over HTTPS.
//!
//! Thin `reqwest` adapter for [`PlatformClient`]: a static bearer token per
//! process, one client per workspace, HTTP failures folded into
//! [`PlatformError`] so the orchestrator and the retry classifier never see
//! transport types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use sharepack_core::entities::RecipientType;
use sharepack_core::platform::{
    PipelineInfo, PipelineSpec, PlatformClient, PlatformConnector, PlatformError, PlatformResult,
    RecipientInfo, RecipientSpec, ScheduleSpec, ShareInfo,
};
use sharepack_core::share_config::catalog_of;

const UC: [&str; 3] = ["api", "2.1", "unity-catalog"];

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IpAccessList {
    #[serde(default)]
    allowed_ip_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipientWire {
    name: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    authentication_type: Option<String>,
    #[serde(default)]
    ip_access_list: Option<IpAccessList>,
}

impl From<RecipientWire> for RecipientInfo {
    fn from(w: RecipientWire) -> Self {
        let recipient_type = match w.authentication_type.as_deref() {
            Some("DATABRICKS") => RecipientType::DataToData,
            _ => RecipientType::DataToOpen,
        };
        Self {
            id: w.id.unwrap_or_else(|| w.name.clone()),
            name: w.name,
            recipient_type,
            ip_access_list: w
                .ip_access_list
                .map(|l| l.allowed_ip_addresses)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecipientList {
    #[serde(default)]
    recipients: Vec<RecipientWire>,
}

#[derive(Debug, Deserialize)]
struct SharedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ShareWire {
    name: String,
    #[serde(default)]
    objects: Vec<SharedObject>,
}

impl ShareWire {
    fn into_info(self, recipients: Vec<String>) -> ShareInfo {
        ShareInfo {
            id: self.name.clone(),
            name: self.name,
            objects: self.objects.into_iter().map(|o| o.name).collect(),
            recipients,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShareList {
    #[serde(default)]
    shares: Vec<ShareWire>,
}

#[derive(Debug, Deserialize)]
struct PrivilegeAssignment {
    principal: String,
}

#[derive(Debug, Deserialize)]
struct SharePermissions {
    #[serde(default)]
    privilege_assignments: Vec<PrivilegeAssignment>,
}

#[derive(Debug, Deserialize)]
struct PipelineCreated {
    pipeline_id: String,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    job_id: i64,
}

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<JobRef>,
}

// ── Error mapping ────────────────────────────────────────────────

/// Map a non-success response onto the platform error taxonomy.
pub fn error_for_status(status: StatusCode, body: &str, what: &str) -> PlatformError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.error_code.clone());
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());
    let detail = if message.is_empty() {
        what.to_string()
    } else {
        format!("{}: {}", what, message)
    };

    match code.as_deref() {
        Some("RESOURCE_ALREADY_EXISTS") => return PlatformError::AlreadyExists(detail),
        Some("RESOURCE_DOES_NOT_EXIST") => return PlatformError::NotFound(detail),
        Some("PERMISSION_DENIED") => return PlatformError::PermissionDenied(detail),
        _ => {}
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => PlatformError::NotFound(detail),
        StatusCode::CONFLICT => PlatformError::AlreadyExists(detail),
        StatusCode::BAD_REQUEST => PlatformError::InvalidRequest(detail),
        StatusCode::REQUEST_TIMEOUT => PlatformError::Timeout(detail),
        other => PlatformError::Http {
            status: other.as_u16(),
            message: detail,
        },
    }
}

fn transport_error(e: reqwest::Error, what: &str) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout(format!("{}: {}", what, e))
    } else if e.is_decode() {
        PlatformError::InvalidRequest(format!("{}: unexpected response: {}", what, e))
    } else {
        PlatformError::Connection(format!("{}: {}", what, e))
    }
}

// ── Client ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: Client,
    base: Url,
    token: String,
}

impl HttpPlatformClient {
    pub fn new(workspace_url: &str, token: impl Into<String>, timeout: Duration) -> PlatformResult<Self> {
        let base = Url::parse(workspace_url).map_err(|e| {
            PlatformError::InvalidRequest(format!("workspace url {}: {}", workspace_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(PlatformError::InvalidRequest(format!(
                "workspace url {} cannot be a base",
                workspace_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    /// Workspace url with `segments` appended, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> PlatformResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::InvalidRequest(format!("bad workspace url {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn uc(&self, rest: &[&str]) -> PlatformResult<Url> {
        let segments: Vec<&str> = UC.iter().copied().chain(rest.iter().copied()).collect();
        self.endpoint(&segments)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>, what: &str) -> PlatformResult<String> {
        debug!(%method, %url, "platform request");
        let mut request = self.client.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| transport_error(e, what))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| transport_error(e, what))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(error_for_status(status, &text, what))
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        what: &str,
    ) -> PlatformResult<T> {
        let text = self.send(method, url, body, what).await?;
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| PlatformError::InvalidRequest(format!("{}: unexpected response: {}", what, e)))
    }

    async fn share_recipients(&self, name: &str) -> PlatformResult<Vec<String>> {
        let perms: SharePermissions = self
            .call(
                Method::GET,
                self.uc(&["shares", name, "permissions"])?,
                None,
                &format!("share {} permissions", name),
            )
            .await?;
        Ok(perms
            .privilege_assignments
            .into_iter()
            .map(|p| p.principal)
            .collect())
    }

    async fn update_share_objects(&self, share: &str, action: &str, objects: &[String]) -> PlatformResult<()> {
        let updates: Vec<Value> = objects
            .iter()
            .map(|o| json!({ "action": action, "data_object": { "name": o, "data_object_type": "TABLE" } }))
            .collect();
        self.send(
            Method::PATCH,
            self.uc(&["shares", share])?,
            Some(&json!({ "updates": updates })),
            &format!("share {}", share),
        )
        .await
        .map(|_| ())
    }

    async fn add_share_permission(&self, share: &str, recipient: &str) -> PlatformResult<()> {
        self.send(
            Method::PATCH,
            self.uc(&["shares", share, "permissions"])?,
            Some(&grant_body(recipient)),
            &format!("share {} grant for {}", share, recipient),
        )
        .await
        .map(|_| ())
    }

    async fn find_schedule_job(&self, pipeline_id: &str) -> PlatformResult<Option<i64>> {
        let mut url = self.endpoint(&["api", "2.1", "jobs", "list"])?;
        url.query_pairs_mut().append_pair("name", &schedule_job_name(pipeline_id));
        let list: JobList = self
            .call(Method::GET, url, None, &format!("schedule for {}", pipeline_id))
            .await?;
        Ok(list.jobs.first().map(|j| j.job_id))
    }
}

/// Permission change adding SELECT for one recipient; grants are only ever added.
fn grant_body(recipient: &str) -> Value {
    json!({ "changes": [{ "principal": recipient, "add": ["SELECT"] }] })
}

fn schedule_job_name(pipeline_id: &str) -> String {
    format!("sharepack-schedule-{}", pipeline_id)
}

fn pipeline_body(spec: &PipelineSpec, id: Option<&str>) -> Value {
    let mut parts = spec.target_asset.splitn(3, '.');
    let catalog = catalog_of(&spec.target_asset).unwrap_or_default();
    let schema = parts.nth(1).unwrap_or_default();
    let mut body = json!({
        "name": spec.name,
        "serverless": spec.serverless,
        "catalog": catalog,
        "target": schema,
        "configuration": {
            "source_asset": spec.source_asset,
            "target_asset": spec.target_asset,
        },
        "tags": spec.tags,
    });
    if !spec.notification_emails.is_empty() {
        body["notifications"] = json!([{
            "email_recipients": spec.notification_emails,
            "alerts": ["on-update-failure", "on-flow-failure"],
        }]);
    }
    if let Some(id) = id {
        body["id"] = json!(id);
    }
    body
}

fn recipient_body(spec: &RecipientSpec) -> Value {
    let mut body = json!({ "name": spec.name });
    match spec.recipient_type {
        RecipientType::DataToData => {
            body["authentication_type"] = json!("DATABRICKS");
            body["data_recipient_global_metastore_id"] = json!(spec.recipient_identifier);
        }
        RecipientType::DataToOpen => {
            body["authentication_type"] = json!("TOKEN");
        }
    }
    if !spec.ip_access_list.is_empty() {
        body["ip_access_list"] = json!({ "allowed_ip_addresses": spec.ip_access_list });
    }
    if let Some(description) = &spec.description {
        body["comment"] = json!(description);
    }
    body
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn list_recipients(&self) -> PlatformResult<Vec<RecipientInfo>> {
        let list: RecipientList = self
            .call(Method::GET, self.uc(&["recipients"])?, None, "list recipients")
            .await?;
        Ok(list.recipients.into_iter().map(Into::into).collect())
    }

    async fn get_recipient(&self, name: &str) -> PlatformResult<RecipientInfo> {
        let wire: RecipientWire = self
            .call(
                Method::GET,
                self.uc(&["recipients", name])?,
                None,
                &format!("recipient {}", name),
            )
            .await?;
        Ok(wire.into())
    }

    async fn create_recipient(&self, spec: &RecipientSpec) -> PlatformResult<RecipientInfo> {
        let wire: RecipientWire = self
            .call(
                Method::POST,
                self.uc(&["recipients"])?,
                Some(&recipient_body(spec)),
                &format!("recipient {}", spec.name),
            )
            .await?;
        Ok(wire.into())
    }

    async fn update_recipient_ip_access(
        &self,
        name: &str,
        ip_access_list: &[String],
    ) -> PlatformResult<RecipientInfo> {
        self.send(
            Method::PATCH,
            self.uc(&["recipients", name])?,
            Some(&json!({ "ip_access_list": { "allowed_ip_addresses": ip_access_list } })),
            &format!("recipient {}", name),
        )
        .await?;
        self.get_recipient(name).await
    }

    async fn delete_recipient(&self, name: &str) -> PlatformResult<()> {
        self.send(
            Method::DELETE,
            self.uc(&["recipients", name])?,
            None,
            &format!("recipient {}", name),
        )
        .await
        .map(|_| ())
    }

    async fn list_shares(&self) -> PlatformResult<Vec<ShareInfo>> {
        let list: ShareList = self
            .call(Method::GET, self.uc(&["shares"])?, None, "list shares")
            .await?;
        Ok(list
            .shares
            .into_iter()
            .map(|s| s.into_info(Vec::new()))
            .collect())
    }

    async fn get_share(&self, name: &str) -> PlatformResult<ShareInfo> {
        let mut url = self.uc(&["shares", name])?;
        url.query_pairs_mut().append_pair("include_shared_data", "true");
        let wire: ShareWire = self
            .call(Method::GET, url, None, &format!("share {}", name))
            .await?;
        let recipients = self.share_recipients(name).await?;
        Ok(wire.into_info(recipients))
    }

    async fn create_share(&self, name: &str, description: Option<&str>) -> PlatformResult<ShareInfo> {
        let mut body = json!({ "name": name });
        if let Some(description) = description {
            body["comment"] = json!(description);
        }
        let wire: ShareWire = self
            .call(
                Method::POST,
                self.uc(&["shares"])?,
                Some(&body),
                &format!("share {}", name),
            )
            .await?;
        Ok(wire.into_info(Vec::new()))
    }

    async fn delete_share(&self, name: &str) -> PlatformResult<()> {
        self.send(
            Method::DELETE,
            self.uc(&["shares", name])?,
            None,
            &format!("share {}", name),
        )
        .await
        .map(|_| ())
    }

    async fn add_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()> {
        self.update_share_objects(share, "ADD", objects).await
    }

    async fn remove_data_objects(&self, share: &str, objects: &[String]) -> PlatformResult<()> {
        self.update_share_objects(share, "REMOVE", objects).await
    }

    async fn grant_share(&self, share: &str, recipient: &str) -> PlatformResult<()> {
        self.add_share_permission(share, recipient).await
    }

    async fn ensure_catalog(&self, catalog: &str) -> PlatformResult<()> {
        let result = self
            .send(
                Method::POST,
                self.uc(&["catalogs"])?,
                Some(&json!({ "name": catalog })),
                &format!("catalog {}", catalog),
            )
            .await;
        match result {
            Ok(_) | Err(PlatformError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_pipeline(&self, spec: &PipelineSpec) -> PlatformResult<PipelineInfo> {
        let created: PipelineCreated = self
            .call(
                Method::POST,
                self.endpoint(&["api", "2.0", "pipelines"])?,
                Some(&pipeline_body(spec, None)),
                &format!("pipeline {}", spec.name),
            )
            .await?;
        Ok(PipelineInfo {
            name: spec.name.clone(),
            id: created.pipeline_id,
        })
    }

    async fn update_pipeline(&self, id: &str, spec: &PipelineSpec) -> PlatformResult<PipelineInfo> {
        self.send(
            Method::PUT,
            self.endpoint(&["api", "2.0", "pipelines", id])?,
            Some(&pipeline_body(spec, Some(id))),
            &format!("pipeline {}", id),
        )
        .await?;
        Ok(PipelineInfo {
            name: spec.name.clone(),
            id: id.to_string(),
        })
    }

    async fn delete_pipeline(&self, id: &str) -> PlatformResult<()> {
        self.send(
            Method::DELETE,
            self.endpoint(&["api", "2.0", "pipelines", id])?,
            None,
            &format!("pipeline {}", id),
        )
        .await
        .map(|_| ())
    }

    async fn upsert_schedule(&self, spec: &ScheduleSpec) -> PlatformResult<String> {
        let settings = json!({
            "name": schedule_job_name(&spec.pipeline_id),
            "schedule": {
                "quartz_cron_expression": spec.cron,
                "timezone_id": spec.timezone,
                "pause_status": "UNPAUSED",
            },
            "tasks": [{
                "task_key": "refresh",
                "pipeline_task": { "pipeline_id": spec.pipeline_id },
            }],
        });
        let what = format!("schedule for {}", spec.pipeline_id);

        if let Some(job_id) = self.find_schedule_job(&spec.pipeline_id).await? {
            self.send(
                Method::POST,
                self.endpoint(&["api", "2.1", "jobs", "reset"])?,
                Some(&json!({ "job_id": job_id, "new_settings": settings })),
                &what,
            )
            .await?;
            return Ok(job_id.to_string());
        }

        let created: JobRef = self
            .call(
                Method::POST,
                self.endpoint(&["api", "2.1", "jobs", "create"])?,
                Some(&settings),
                &what,
            )
            .await?;
        Ok(created.job_id.to_string())
    }

    async fn delete_schedule(&self, pipeline_id: &str) -> PlatformResult<()> {
        let what = format!("schedule for {}", pipeline_id);
        let Some(job_id) = self.find_schedule_job(pipeline_id).await? else {
            return Err(PlatformError::NotFound(what));
        };
        self.send(
            Method::POST,
            self.endpoint(&["api", "2.1", "jobs", "delete"])?,
            Some(&json!({ "job_id": job_id })),
            &what,
        )
        .await
        .map(|_| ())
    }
}

/// Builds an [`HttpPlatformClient`] per workspace with a shared token.
pub struct HttpConnector {
    token: String,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            token: token.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PlatformConnector for HttpConnector {
    async fn connect(&self, workspace_url: &str) -> PlatformResult<Arc<dyn PlatformClient>> {
        let client = HttpPlatformClient::new(workspace_url, self.token.clone(), self.timeout)?;
        Ok(Arc::new(client))
    }
}
