//! Versioned domain entities.
//!
//! Each struct is the field payload of one SCD2 table. Cross-entity links are
//! weak references holding the other entity's business id; nothing here
//! embeds or assumes the referenced row exists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::Entity;
use crate::types::{normalize_set, EntityKind, SharePackStatus, Strategy};

/// Organisational tenant, keyed by business line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tenant {
    pub business_line: String,
    #[serde(default)]
    pub owner: Option<String>,
}

impl Entity for Tenant {
    const KIND: EntityKind = EntityKind::Tenant;
}

/// Project within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    pub project_name: String,
    pub tenant_id: Uuid,
    #[serde(default)]
    pub approver: Option<String>,
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;
}

/// An uploaded configuration and its provisioning progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharePack {
    pub share_pack_name: String,
    pub requested_by: String,
    pub business_line: String,
    pub project_name: String,
    pub workspace_url: String,
    pub strategy: Strategy,
    pub status: SharePackStatus,
    #[serde(default)]
    pub provisioning_status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    /// Parsed configuration, stored verbatim
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Default for SharePack {
    fn default() -> Self {
        Self {
            share_pack_name: String::new(),
            requested_by: String::new(),
            business_line: String::new(),
            project_name: String::new(),
            workspace_url: String::new(),
            strategy: Strategy::New,
            status: SharePackStatus::Uploaded,
            provisioning_status: String::new(),
            error_message: None,
            tenant_id: None,
            project_id: None,
            config: Value::Null,
            warnings: Vec::new(),
        }
    }
}

impl Entity for SharePack {
    const KIND: EntityKind = EntityKind::SharePack;
}

/// Data-to-data (platform identifier) or data-to-open (token) sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecipientType {
    #[serde(rename = "D2D")]
    DataToData,
    #[default]
    #[serde(rename = "D2O")]
    DataToOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Recipient {
    pub recipient_name: String,
    #[serde(default)]
    pub share_pack_id: Option<Uuid>,
    #[serde(default)]
    pub recipient_type: RecipientType,
    #[serde(default)]
    pub recipient_identifier: Option<String>,
    #[serde(default)]
    pub external_recipient_id: Option<String>,
    #[serde(default)]
    pub ip_access_list: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity for Recipient {
    const KIND: EntityKind = EntityKind::Recipient;

    fn normalize(&mut self) {
        normalize_set(&mut self.ip_access_list);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Share {
    pub share_name: String,
    #[serde(default)]
    pub share_pack_id: Option<Uuid>,
    #[serde(default)]
    pub external_share_id: Option<String>,
    /// Three-part asset names (`catalog.schema.table`)
    #[serde(default)]
    pub share_assets: Vec<String>,
    #[serde(default)]
    pub recipients_attached: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Share {
    pub fn contains_asset(&self, asset: &str) -> bool {
        self.share_assets.iter().any(|a| a == asset)
    }
}

impl Entity for Share {
    const KIND: EntityKind = EntityKind::Share;

    fn normalize(&mut self) {
        normalize_set(&mut self.share_assets);
        normalize_set(&mut self.recipients_attached);
    }
}

/// Cron schedule attached to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineSchedule {
    pub cron: String,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pipeline {
    pub pipeline_name: String,
    /// Owning share's business id; may belong to another share pack
    pub share_id: Uuid,
    #[serde(default)]
    pub share_pack_id: Option<Uuid>,
    #[serde(default)]
    pub external_pipeline_id: Option<String>,
    pub source_asset: String,
    pub target_asset: String,
    #[serde(default)]
    pub schedule: Option<PipelineSchedule>,
    #[serde(default)]
    pub external_schedule_id: Option<String>,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub serverless: bool,
}

impl Entity for Pipeline {
    const KIND: EntityKind = EntityKind::Pipeline;

    fn normalize(&mut self) {
        normalize_set(&mut self.notification_emails);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use super::Strategy;
    use serde_json::json;

    #[test]
    fn recipient_type_uses_short_codes() {
        assert_eq!(serde_json::to_value(RecipientType::DataToData).unwrap(), json!("D2D"));
        let t: RecipientType = serde_json::from_value(json!("D2O")).unwrap();
        assert_eq!(t, RecipientType::DataToOpen);
    }

    #[test]
    fn share_pack_round_trips_with_defaults() {
        let raw = json!({
            "share_pack_name": "finance",
            "requested_by": "alice@example.com",
            "business_line": "finance",
            "project_name": "ledger",
            "workspace_url": "https://ws.example.com",
            "strategy": "UPDATE",
            "status": "IN_PROGRESS"
        });
        let sp: SharePack = serde_json::from_value(raw).unwrap();
        assert_eq!(sp.strategy, Strategy::Update);
        assert_eq!(sp.status, SharePackStatus::InProgress);
        assert!(sp.error_message.is_none());
        assert_eq!(sp.config, Value::Null);
    }

    proptest! {
        #[test]
        fn share_normalization_is_sorted_unique_and_idempotent(
            assets in proptest::collection::vec("[a-c]\\.[a-c]\\.[a-e]", 0..12)
        ) {
            let mut share = Share { share_assets: assets.clone(), ..Share::default() };
            share.normalize();
            let once = share.clone();
            share.normalize();

            prop_assert_eq!(&once, &share);
            prop_assert!(once.share_assets.windows(2).all(|w| w[0] < w[1]));
            for a in &assets {
                prop_assert!(once.contains_asset(a));
            }
        }
    }
}
