//! Canonical share-pack configuration.
//!
//! This is the validated shape an upload is parsed into. The orchestrator
//! reads it back from the share pack's stored `config` payload.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entities::{PipelineSchedule, RecipientType};
use crate::types::{normalize_set, Strategy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareConfig {
    pub metadata: ConfigMetadata,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
    #[serde(default)]
    pub shares: Vec<ShareDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    pub requestor: String,
    pub business_line: String,
    pub project_name: String,
    /// Management endpoint of the target workspace
    pub workspace_url: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub share_pack_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub recipient_type: RecipientType,
    /// Platform identifier of the receiving metastore (D2D only)
    #[serde(default)]
    pub recipient_identifier: Option<String>,
    #[serde(default)]
    pub ip_access_list: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareDefinition {
    pub name: String,
    #[serde(default)]
    pub share_assets: Vec<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub source_asset: String,
    pub target_asset: String,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default = "default_serverless")]
    pub serverless: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_serverless() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl From<&ScheduleConfig> for PipelineSchedule {
    fn from(s: &ScheduleConfig) -> Self {
        Self {
            cron: s.cron.clone(),
            timezone: s.timezone.clone(),
        }
    }
}

impl ShareConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Result<Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Explicit name, else `<business_line>-<project_name>`.
    pub fn share_pack_name(&self) -> String {
        self.metadata
            .share_pack_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{}-{}",
                    self.metadata.business_line, self.metadata.project_name
                )
            })
    }

    pub fn recipient_names(&self) -> BTreeSet<String> {
        self.recipients.iter().map(|r| r.name.clone()).collect()
    }

    pub fn share_names(&self) -> BTreeSet<String> {
        self.shares.iter().map(|s| s.name.clone()).collect()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = (&ShareDefinition, &PipelineConfig)> {
        self.shares
            .iter()
            .flat_map(|s| s.pipelines.iter().map(move |p| (s, p)))
    }

    /// Deduplicate and sort every set-valued list.
    pub fn normalize(&mut self) {
        for r in &mut self.recipients {
            normalize_set(&mut r.ip_access_list);
        }
        for s in &mut self.shares {
            normalize_set(&mut s.share_assets);
            normalize_set(&mut s.recipients);
            for p in &mut s.pipelines {
                normalize_set(&mut p.notification_emails);
            }
        }
    }

    /// Collect every validation problem; `Ok` when there are none.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let m = &self.metadata;

        for (field, value) in [
            ("requestor", &m.requestor),
            ("business_line", &m.business_line),
            ("project_name", &m.project_name),
            ("workspace_url", &m.workspace_url),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("metadata.{} is required", field));
            }
        }

        if self.recipients.is_empty() && self.shares.is_empty() {
            errors.push("configuration declares no recipients and no shares".to_string());
        }

        let mut seen = HashSet::new();
        for r in &self.recipients {
            if r.name.trim().is_empty() {
                errors.push("recipient name is required".to_string());
            } else if !seen.insert(r.name.as_str()) {
                errors.push(format!("duplicate recipient '{}'", r.name));
            }
            if r.recipient_type == RecipientType::DataToData
                && r.recipient_identifier
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
            {
                errors.push(format!(
                    "recipient '{}' is D2D and requires recipient_identifier",
                    r.name
                ));
            }
        }

        let declared_recipients = self.recipient_names();
        let mut seen_shares = HashSet::new();
        let mut seen_pipelines = HashSet::new();
        for s in &self.shares {
            if s.name.trim().is_empty() {
                errors.push("share name is required".to_string());
            } else if !seen_shares.insert(s.name.as_str()) {
                errors.push(format!("duplicate share '{}'", s.name));
            }
            for asset in &s.share_assets {
                if !is_three_part_name(asset) {
                    errors.push(format!(
                        "share '{}' asset '{}' is not a catalog.schema.object name",
                        s.name, asset
                    ));
                }
            }
            for r in &s.recipients {
                if !declared_recipients.contains(r) {
                    errors.push(format!(
                        "share '{}' references undeclared recipient '{}'",
                        s.name, r
                    ));
                }
            }
            for p in &s.pipelines {
                if p.name.trim().is_empty() {
                    errors.push(format!("share '{}' has a pipeline without a name", s.name));
                } else if !seen_pipelines.insert(p.name.as_str()) {
                    errors.push(format!("duplicate pipeline '{}'", p.name));
                }
                if !s.share_assets.contains(&p.source_asset) {
                    errors.push(format!(
                        "pipeline '{}' source_asset '{}' is not an asset of share '{}'",
                        p.name, p.source_asset, s.name
                    ));
                }
                if !is_three_part_name(&p.target_asset) {
                    errors.push(format!(
                        "pipeline '{}' target_asset '{}' is not a catalog.schema.object name",
                        p.name, p.target_asset
                    ));
                }
                if let Some(schedule) = &p.schedule {
                    if schedule.cron.trim().is_empty() {
                        errors.push(format!("pipeline '{}' schedule has an empty cron", p.name));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// `catalog.schema.object` with three non-empty parts.
pub fn is_three_part_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.trim().is_empty())
}

/// Catalog component of a three-part name.
pub fn catalog_of(name: &str) -> Option<&str> {
    name.split('.').next().filter(|c| !c.is_empty())
}
