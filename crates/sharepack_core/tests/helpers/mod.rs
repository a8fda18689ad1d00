//! Shared wiring for the in-memory scenario tests.

#![allow(dead_code)]

use std::sync::Arc;

use sharepack_core::platform::PlatformConnector;
use sharepack_core::{
    ConsumerConfig, InMemoryPlatform, InMemoryTemporalStore, InMemoryWorkQueue, Orchestrator,
    Repositories, SharePackConsumer, SharePackService, StaticConnector,
};

pub const FINANCE_PACK: &str = r#"
metadata:
  requestor: alice@example.com
  business_line: finance
  project_name: ledger
  workspace_url: https://ws.example.com
  strategy: NEW
recipients:
  - name: partner_a
    type: D2D
    recipient_identifier: "aws:us-east-1:abc"
  - name: partner_b
    type: D2O
    ip_access_list: ["10.0.0.1"]
shares:
  - name: finance_share
    share_assets: [main.sales.orders, main.sales.customers]
    recipients: [partner_a, partner_b]
    pipelines:
      - name: orders_pipeline
        source_asset: main.sales.orders
        target_asset: shared.sales.orders
        schedule:
          cron: "0 0 * * * ?"
"#;

/// Same pack after the orders asset and its pipeline were dropped.
pub const FINANCE_PACK_WITHOUT_ORDERS: &str = r#"
metadata:
  requestor: alice@example.com
  business_line: finance
  project_name: ledger
  workspace_url: https://ws.example.com
  strategy: NEW
recipients:
  - name: partner_a
    type: D2D
    recipient_identifier: "aws:us-east-1:abc"
  - name: partner_b
    type: D2O
    ip_access_list: ["10.0.0.1", "10.0.0.9"]
shares:
  - name: finance_share
    share_assets: [main.sales.customers]
    recipients: [partner_a, partner_b]
"#;

pub const FINANCE_PACK_DELETE: &str = r#"
metadata:
  requestor: alice@example.com
  business_line: finance
  project_name: ledger
  workspace_url: https://ws.example.com
  strategy: DELETE
recipients:
  - name: partner_a
    type: D2D
    recipient_identifier: "aws:us-east-1:abc"
  - name: partner_b
    type: D2O
shares:
  - name: finance_share
    share_assets: [main.sales.customers]
    recipients: [partner_a, partner_b]
"#;

pub struct Harness {
    pub store: Arc<InMemoryTemporalStore>,
    pub repos: Repositories,
    pub platform: Arc<InMemoryPlatform>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub service: SharePackService,
    pub consumer: SharePackConsumer,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryTemporalStore::new());
        let repos = Repositories::new(store.clone());
        let platform = Arc::new(InMemoryPlatform::new());
        let connector: Arc<dyn PlatformConnector> =
            Arc::new(StaticConnector::new(platform.clone()));
        let queue = Arc::new(InMemoryWorkQueue::new());

        let service =
            SharePackService::new(repos.share_packs.clone(), connector.clone(), queue.clone());
        let orchestrator = Arc::new(Orchestrator::new(repos.clone(), connector));
        let consumer = SharePackConsumer::new(
            queue.clone(),
            repos.share_packs.clone(),
            orchestrator,
            ConsumerConfig::default(),
        );

        Self {
            store,
            repos,
            platform,
            queue,
            service,
            consumer,
        }
    }
}
