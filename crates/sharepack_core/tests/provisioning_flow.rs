//! End-to-end provisioning over the in-memory adapters: submit, consume,
//! orchestrate, and what the platform and store look like afterwards.

mod helpers;

use std::time::Duration;

use helpers::{Harness, FINANCE_PACK, FINANCE_PACK_DELETE, FINANCE_PACK_WITHOUT_ORDERS};
use sharepack_core::platform::{PlatformError, PlatformOp};
use sharepack_core::{
    ChangeMeta, ConsumerConfig, MessageOutcome, ProvisioningRequest, Share, ShareConfig,
    SharePackStatus, Strategy, StrategyDetector, WorkQueue,
};
use tokio::time::Instant;
use uuid::Uuid;

#[tokio::test]
async fn declared_new_with_existing_recipient_becomes_update() {
    let h = Harness::new();
    h.platform.seed_recipient("partner_a").await;
    let config = ShareConfig::from_yaml_str(FINANCE_PACK).unwrap();

    let detector = StrategyDetector::new(std::sync::Arc::new(
        sharepack_core::StaticConnector::new(h.platform.clone()),
    ));
    let detection = detector
        .detect(&config.metadata.workspace_url, &config, Strategy::New)
        .await;

    assert_eq!(detection.final_strategy, Strategy::Update);
    assert_eq!(detection.existing_recipients, vec!["partner_a".to_string()]);
    assert!(!detection.warnings.is_empty());
    assert!(detection.warnings[0].contains("partner_a"));
}

#[tokio::test]
async fn message_for_unknown_share_pack_is_acknowledged_untouched() {
    let h = Harness::new();
    h.queue
        .enqueue(ProvisioningRequest::new(Uuid::now_v7()).to_value().unwrap())
        .await
        .unwrap();

    let outcome = h.consumer.process_one().await.unwrap();

    assert!(matches!(outcome, MessageOutcome::MissingEntity { .. }));
    assert_eq!(h.queue.approximate_length().await.unwrap(), 0);
    assert!(h.platform.calls().await.is_empty());
    assert_eq!(h.store.audit_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn permission_error_fails_the_pack_without_retry() {
    let h = Harness::new();
    h.platform
        .fail_on(
            PlatformOp::CreateShare,
            PlatformError::PermissionDenied("CREATE_SHARE on https://ws.example.com".into()),
        )
        .await;
    let receipt = h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();

    let started = Instant::now();
    let outcome = h.consumer.process_one().await.unwrap();

    assert_eq!(
        outcome,
        MessageOutcome::Failed {
            share_pack_id: receipt.share_pack_id,
            attempts: 1,
            retryable: false,
            error: "permission denied: CREATE_SHARE on https://ws.example.com".into(),
        }
    );
    assert!(started.elapsed() < ConsumerConfig::default().retry_cooldown);
    assert_eq!(h.platform.call_count(PlatformOp::CreateShare).await, 1);

    let status = h.service.status(receipt.share_pack_id).await.unwrap();
    assert_eq!(status.status, SharePackStatus::Failed);
    assert_eq!(
        status.error_message.as_deref(),
        Some("permission denied: CREATE_SHARE on https://ws.example.com")
    );
    assert_eq!(status.provisioning_status, "Failed at step 3/7: Creating shares");

    // Left in place for redelivery, not re-enqueued
    assert_eq!(h.queue.approximate_length().await.unwrap(), 1);
    assert_eq!(h.queue.visible_len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn transient_error_is_retried_once_and_recovers() {
    let h = Harness::new();
    h.platform
        .fail_times(
            PlatformOp::CreateRecipient,
            PlatformError::Timeout("recipient api".into()),
            1,
        )
        .await;
    let receipt = h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();

    let started = Instant::now();
    let outcome = h.consumer.process_one().await.unwrap();

    assert!(matches!(outcome, MessageOutcome::Completed { attempts: 2, .. }));
    assert!(started.elapsed() >= ConsumerConfig::default().retry_cooldown);

    let history = h.service.history(receipt.share_pack_id).await.unwrap();
    assert!(history.iter().any(|v| v.status == SharePackStatus::Failed));
    assert_eq!(
        history.last().map(|v| v.status),
        Some(SharePackStatus::Completed)
    );
}

#[tokio::test]
async fn new_pack_is_fully_provisioned() {
    let h = Harness::new();
    let receipt = h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    assert_eq!(receipt.final_strategy, Strategy::New);

    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { attempts: 1, .. }));
    assert_eq!(h.queue.approximate_length().await.unwrap(), 0);

    let status = h.service.status(receipt.share_pack_id).await.unwrap();
    assert_eq!(status.status, SharePackStatus::Completed);
    assert_eq!(status.provisioning_status, "All steps completed");
    assert!(status.error_message.is_none());

    let history = h.service.history(receipt.share_pack_id).await.unwrap();
    for step in ["Step 1/7: Resolving tenant and project", "Step 7/7: Scheduling pipelines"] {
        assert!(
            history.iter().any(|v| v.provisioning_status == step),
            "missing {}",
            step
        );
    }

    // Platform
    assert!(h.platform.recipient("partner_a").await.is_some());
    assert_eq!(
        h.platform.recipient("partner_b").await.unwrap().ip_access_list,
        vec!["10.0.0.1"]
    );
    let share = h.platform.share("finance_share").await.unwrap();
    assert_eq!(share.objects, vec!["main.sales.customers", "main.sales.orders"]);
    assert_eq!(share.recipients, vec!["partner_a", "partner_b"]);
    assert!(h.platform.has_catalog("shared").await);
    let pipeline_ids = h.platform.pipeline_ids().await;
    assert_eq!(pipeline_ids.len(), 1);
    assert_eq!(
        h.platform.schedule(&pipeline_ids[0]).await.unwrap().cron,
        "0 0 * * * ?"
    );

    // Store
    let pack = h.repos.share_packs.require(receipt.share_pack_id).await.unwrap();
    let tenant = h
        .repos
        .tenants
        .find_by_business_line("finance", false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pack.fields.tenant_id, Some(tenant.business_id));
    assert!(pack.fields.project_id.is_some());

    let share_row = h.repos.shares.find_by_name("finance_share", false).await.unwrap().unwrap();
    assert_eq!(share_row.fields.share_pack_id, Some(receipt.share_pack_id));
    assert_eq!(share_row.fields.recipients_attached, vec!["partner_a", "partner_b"]);

    let pipeline = h
        .repos
        .pipelines
        .find_by_name("orders_pipeline", false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pipeline.fields.share_id, share_row.business_id);
    assert_eq!(pipeline.fields.external_pipeline_id.as_deref(), Some(pipeline_ids[0].as_str()));
    assert!(pipeline.fields.external_schedule_id.is_some());
}

#[tokio::test]
async fn resubmission_updates_and_cleans_up_orphans() {
    let h = Harness::new();
    let first = h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    h.consumer.process_one().await.unwrap();
    let old_pipeline = h.platform.pipeline_ids().await.remove(0);

    let second = h
        .service
        .submit_yaml(FINANCE_PACK_WITHOUT_ORDERS, "alice")
        .await
        .unwrap();
    assert_eq!(second.share_pack_id, first.share_pack_id);
    assert_eq!(second.final_strategy, Strategy::Update);
    assert_eq!(second.warnings.len(), 1);

    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { .. }));

    let share = h.platform.share("finance_share").await.unwrap();
    assert_eq!(share.objects, vec!["main.sales.customers"]);
    assert!(h.platform.pipeline(&old_pipeline).await.is_none());
    assert_eq!(
        h.platform.recipient("partner_b").await.unwrap().ip_access_list,
        vec!["10.0.0.1", "10.0.0.9"]
    );
    // Recipients reconciled, never recreated
    assert_eq!(h.platform.call_count(PlatformOp::CreateRecipient).await, 2);
    assert_eq!(h.platform.call_count(PlatformOp::UpdateRecipient).await, 1);
    assert_eq!(h.platform.call_count(PlatformOp::CreateShare).await, 1);

    assert!(h
        .repos
        .pipelines
        .find_by_name("orders_pipeline", false)
        .await
        .unwrap()
        .is_none());
    let share_row = h.repos.shares.find_by_name("finance_share", false).await.unwrap().unwrap();
    assert_eq!(share_row.fields.share_assets, vec!["main.sales.customers"]);
    let share_history = h
        .repos
        .shares
        .table()
        .get_history(share_row.business_id)
        .await
        .unwrap();
    assert!(share_history.len() >= 2);
    assert!(share_history
        .iter()
        .any(|v| v.fields.share_assets.contains(&"main.sales.orders".to_string())));
}

#[tokio::test]
async fn delete_pack_tears_down_resources() {
    let h = Harness::new();
    h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    h.consumer.process_one().await.unwrap();

    // partner_b is also granted on a share owned by another pack
    h.repos
        .shares
        .upsert(
            Share {
                share_name: "treasury_share".into(),
                share_pack_id: Some(Uuid::now_v7()),
                share_assets: vec!["main.treasury.cash".into()],
                recipients_attached: vec!["partner_b".into()],
                ..Share::default()
            },
            &ChangeMeta::new("tester", "other pack"),
        )
        .await
        .unwrap();

    let receipt = h.service.submit_yaml(FINANCE_PACK_DELETE, "alice").await.unwrap();
    assert_eq!(receipt.final_strategy, Strategy::Delete);
    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { .. }));

    assert!(h.platform.share("finance_share").await.is_none());
    assert!(h.platform.pipeline_ids().await.is_empty());
    assert!(h.platform.recipient("partner_a").await.is_none());
    assert!(h.platform.recipient("partner_b").await.is_some());

    assert!(h.repos.shares.find_by_name("finance_share", false).await.unwrap().is_none());
    assert!(h.repos.recipients.find_by_name("partner_a", false).await.unwrap().is_none());
    assert!(h.repos.recipients.find_by_name("partner_b", false).await.unwrap().is_some());
    assert!(h
        .repos
        .pipelines
        .find_by_name("orders_pipeline", false)
        .await
        .unwrap()
        .is_none());

    let status = h.service.status(receipt.share_pack_id).await.unwrap();
    assert_eq!(status.status, SharePackStatus::Completed);
    assert!(h
        .service
        .history(receipt.share_pack_id)
        .await
        .unwrap()
        .iter()
        .any(|v| v.provisioning_status == "Step 3/3: Deleting recipients"));
}

#[tokio::test(start_paused = true)]
async fn redelivered_message_is_processed_again() {
    let h = Harness::new();
    h.platform
        .fail_on(
            PlatformOp::CreateShare,
            PlatformError::PermissionDenied("CREATE_SHARE".into()),
        )
        .await;
    h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    h.consumer.process_one().await.unwrap();
    assert_eq!(h.consumer.process_one().await.unwrap(), MessageOutcome::Idle);

    h.platform.clear_failures().await;
    tokio::time::advance(ConsumerConfig::default().visibility_timeout + Duration::from_secs(1))
        .await;

    // Second delivery runs NEW again and adopts what the first one created
    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { .. }));
    assert_eq!(h.platform.call_count(PlatformOp::CreateRecipient).await, 4);
    assert_eq!(h.platform.share("finance_share").await.unwrap().recipients.len(), 2);
}

async fn assert_orders_pipeline_gone(h: &Harness, external_id: &str) {
    assert!(h
        .repos
        .pipelines
        .find_by_name("orders_pipeline", false)
        .await
        .unwrap()
        .is_none());
    assert!(h.platform.pipeline(external_id).await.is_none());
    assert_eq!(
        h.platform.share("finance_share").await.unwrap().objects,
        vec!["main.sales.customers"]
    );
}

#[tokio::test(start_paused = true)]
async fn cleanup_interrupted_by_timeout_finishes_on_retry() {
    let h = Harness::new();
    h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    h.consumer.process_one().await.unwrap();
    let old_pipeline = h.platform.pipeline_ids().await.remove(0);

    h.platform
        .fail_times(
            PlatformOp::DeletePipeline,
            PlatformError::Timeout("pipelines api".into()),
            1,
        )
        .await;
    h.service
        .submit_yaml(FINANCE_PACK_WITHOUT_ORDERS, "alice")
        .await
        .unwrap();

    let outcome = h.consumer.process_one().await.unwrap();

    assert!(matches!(outcome, MessageOutcome::Completed { attempts: 2, .. }));
    assert_orders_pipeline_gone(&h, &old_pipeline).await;
}

#[tokio::test(start_paused = true)]
async fn cleanup_interrupted_twice_finishes_on_redelivery() {
    let h = Harness::new();
    h.service.submit_yaml(FINANCE_PACK, "alice").await.unwrap();
    h.consumer.process_one().await.unwrap();
    let old_pipeline = h.platform.pipeline_ids().await.remove(0);

    h.platform
        .fail_times(
            PlatformOp::DeletePipeline,
            PlatformError::Timeout("pipelines api".into()),
            2,
        )
        .await;
    let receipt = h
        .service
        .submit_yaml(FINANCE_PACK_WITHOUT_ORDERS, "alice")
        .await
        .unwrap();

    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(
        outcome,
        MessageOutcome::Failed { attempts: 2, retryable: true, .. }
    ));
    let status = h.service.status(receipt.share_pack_id).await.unwrap();
    assert_eq!(status.status, SharePackStatus::Failed);

    tokio::time::advance(ConsumerConfig::default().visibility_timeout + Duration::from_secs(1))
        .await;

    let outcome = h.consumer.process_one().await.unwrap();
    assert!(matches!(outcome, MessageOutcome::Completed { attempts: 1, .. }));
    assert_orders_pipeline_gone(&h, &old_pipeline).await;
    let status = h.service.status(receipt.share_pack_id).await.unwrap();
    assert_eq!(status.status, SharePackStatus::Completed);
}
