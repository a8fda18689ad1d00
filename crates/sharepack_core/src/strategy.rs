//! Strategy detection.
//!
//! Reconciles the strategy a user declared against the live platform
//! inventory. Detection is advisory: it can switch `NEW` to `UPDATE`, and
//! when the platform cannot be queried it leaves the declared strategy alone.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::platform::{PlatformConnector, PlatformResult};
use crate::share_config::ShareConfig;
use crate::types::Strategy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDetection {
    pub declared_strategy: Strategy,
    pub final_strategy: Strategy,
    pub warnings: Vec<String>,
    /// Declared recipients already present on the platform
    pub existing_recipients: Vec<String>,
    /// Declared shares already present on the platform
    pub existing_shares: Vec<String>,
    pub new_recipient_count: usize,
    pub new_share_count: usize,
    /// False when the declared strategy was passed through or the platform
    /// could not be queried
    pub detection_ran: bool,
}

impl StrategyDetection {
    fn passthrough(declared: Strategy) -> Self {
        Self {
            declared_strategy: declared,
            final_strategy: declared,
            warnings: Vec::new(),
            existing_recipients: Vec::new(),
            existing_shares: Vec::new(),
            new_recipient_count: 0,
            new_share_count: 0,
            detection_ran: false,
        }
    }

    pub fn strategy_changed(&self) -> bool {
        self.declared_strategy != self.final_strategy
    }
}

struct Inventory {
    recipients: BTreeSet<String>,
    shares: BTreeSet<String>,
}

pub struct StrategyDetector {
    connector: Arc<dyn PlatformConnector>,
}

impl StrategyDetector {
    pub fn new(connector: Arc<dyn PlatformConnector>) -> Self {
        Self { connector }
    }

    pub async fn detect(
        &self,
        workspace_url: &str,
        config: &ShareConfig,
        declared: Strategy,
    ) -> StrategyDetection {
        let mut detection = StrategyDetection::passthrough(declared);
        if declared != Strategy::New {
            return detection;
        }

        let inventory = match self.inventory(workspace_url).await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!(workspace_url, error = %e, "strategy detection could not query platform");
                detection.warnings.push(format!(
                    "Could not check existing resources on {}: {}. Proceeding with declared strategy {}.",
                    workspace_url, e, declared
                ));
                return detection;
            }
        };
        detection.detection_ran = true;

        let declared_recipients = config.recipient_names();
        let declared_shares = config.share_names();

        detection.existing_recipients = declared_recipients
            .intersection(&inventory.recipients)
            .cloned()
            .collect();
        detection.existing_shares = declared_shares
            .intersection(&inventory.shares)
            .cloned()
            .collect();
        detection.new_recipient_count =
            declared_recipients.len() - detection.existing_recipients.len();
        detection.new_share_count = declared_shares.len() - detection.existing_shares.len();

        if detection.existing_recipients.is_empty() && detection.existing_shares.is_empty() {
            return detection;
        }

        detection.final_strategy = Strategy::Update;
        let mut existing = Vec::new();
        if !detection.existing_recipients.is_empty() {
            existing.push(format!(
                "recipients [{}]",
                detection.existing_recipients.join(", ")
            ));
        }
        if !detection.existing_shares.is_empty() {
            existing.push(format!("shares [{}]", detection.existing_shares.join(", ")));
        }
        let merged = detection.existing_recipients.len() + detection.existing_shares.len();
        let created = detection.new_recipient_count + detection.new_share_count;
        detection.warnings.push(format!(
            "Strategy changed from NEW to UPDATE: {} already exist. {} new resource(s) will be created and {} existing resource(s) will be merged.",
            existing.join(" and "),
            created,
            merged
        ));
        info!(
            workspace_url,
            merged,
            created,
            "declared NEW strategy switched to UPDATE"
        );
        detection
    }

    async fn inventory(&self, workspace_url: &str) -> PlatformResult<Inventory> {
        let client = self.connector.connect(workspace_url).await?;
        let recipients = client
            .list_recipients()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        let shares = client
            .list_shares()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        Ok(Inventory { recipients, shares })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        InMemoryPlatform, PlatformClient, PlatformError, PlatformOp, StaticConnector,
    };
    use async_trait::async_trait;

    const CONFIG: &str = r#"
metadata:
  requestor: alice@example.com
  business_line: finance
  project_name: ledger
  workspace_url: https://ws.example.com
recipients:
  - name: R1
  - name: R2
shares:
  - name: S1
    share_assets: [main.sales.orders]
    recipients: [R1]
"#;

    fn config() -> ShareConfig {
        ShareConfig::from_yaml_str(CONFIG).unwrap()
    }

    fn detector(platform: Arc<InMemoryPlatform>) -> StrategyDetector {
        StrategyDetector::new(Arc::new(StaticConnector::new(platform)))
    }

    #[tokio::test]
    async fn update_and_delete_pass_through_without_platform_calls() {
        let platform = Arc::new(InMemoryPlatform::new());
        let d = detector(platform.clone());
        for declared in [Strategy::Update, Strategy::Delete] {
            let out = d.detect("ws", &config(), declared).await;
            assert_eq!(out.final_strategy, declared);
            assert!(out.warnings.is_empty());
            assert!(!out.detection_ran);
        }
        assert!(platform.calls().await.is_empty());
    }

    #[tokio::test]
    async fn new_without_overlap_stays_new() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.seed_recipient("someone_else").await;
        let out = detector(platform).detect("ws", &config(), Strategy::New).await;

        assert_eq!(out.final_strategy, Strategy::New);
        assert!(out.detection_ran);
        assert!(out.warnings.is_empty());
        assert_eq!(out.new_recipient_count, 2);
        assert_eq!(out.new_share_count, 1);
    }

    #[tokio::test]
    async fn existing_share_switches_to_update() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.seed_share("S1", &[]).await;
        let out = detector(platform).detect("ws", &config(), Strategy::New).await;

        assert_eq!(out.final_strategy, Strategy::Update);
        assert_eq!(out.existing_shares, vec!["S1"]);
        assert!(out.existing_recipients.is_empty());
        assert!(out.warnings[0].contains("shares [S1]"));
        assert!(out.warnings[0].contains("2 new resource(s)"));
        assert!(out.warnings[0].contains("1 existing resource(s)"));
    }

    #[tokio::test]
    async fn platform_failure_keeps_declared_strategy() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform
            .fail_on(
                PlatformOp::ListRecipients,
                PlatformError::PermissionDenied("list recipients".into()),
            )
            .await;
        let out = detector(platform).detect("ws", &config(), Strategy::New).await;

        assert_eq!(out.final_strategy, Strategy::New);
        assert!(!out.detection_ran);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("permission denied"));
    }

    struct Unreachable;

    #[async_trait]
    impl PlatformConnector for Unreachable {
        async fn connect(&self, workspace_url: &str) -> PlatformResult<Arc<dyn PlatformClient>> {
            Err(PlatformError::Connection(format!("{workspace_url} unreachable")))
        }
    }

    #[tokio::test]
    async fn connector_failure_is_not_fatal() {
        let out = StrategyDetector::new(Arc::new(Unreachable))
            .detect("https://ws", &config(), Strategy::New)
            .await;
        assert_eq!(out.final_strategy, Strategy::New);
        assert!(out.warnings[0].contains("unreachable"));
    }
}
