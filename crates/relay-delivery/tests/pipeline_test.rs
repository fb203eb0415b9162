//! End-to-end tests for the capture pipeline and retry scheduler working
//! off shared storage.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use relay_core::{AuditStream, Disposition, Message, Storage};
use relay_delivery::{
    CaptureOutcome, CapturePipeline, DeliveryClient, MessageBacklog, RelayConfig, RetryScheduler,
    SkipReason,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct FixedBacklog(Vec<Message>);

#[async_trait]
impl MessageBacklog for FixedBacklog {
    async fn recent(&self, window: usize) -> relay_delivery::Result<Vec<Message>> {
        let start = self.0.len().saturating_sub(window);
        Ok(self.0[start..].to_vec())
    }
}

fn test_config(endpoint: &str) -> RelayConfig {
    RelayConfig {
        endpoint_url: endpoint.to_string(),
        allow_list: "+79990000001".to_string(),
        delivery_timeout_ms: 1000,
        ..RelayConfig::default()
    }
}

fn open_storage(dir: &tempfile::TempDir) -> Storage {
    let db = sled::open(dir.path()).unwrap();
    Storage::open(&db, 64).unwrap()
}

/// A message that fails at capture is delivered by the next retry pass and
/// never delivered again afterwards.
#[tokio::test]
async fn failed_capture_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = open_storage(&dir);
    let config = test_config(&server.uri()).into_shared();
    let client = DeliveryClient::with_defaults().unwrap();

    let pipeline = CapturePipeline::new(config.clone(), client.clone(), storage.clone());
    let message = Message::new("+79990000001", "code 4242", 1_700_000_000_000);

    assert_eq!(pipeline.submit(&message).await.unwrap(), CaptureOutcome::Queued);

    let (_tx, connectivity) = watch::channel(relay_core::ConnectivityState::Online);
    let scheduler = RetryScheduler::new(config, client, storage.clone(), connectivity);
    let stats = scheduler.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.delivered, 1);
    assert!(storage.failures.is_empty());
    assert!(storage.dedup.contains(&message.fingerprint()).unwrap());

    // The retried success is recorded once, and re-submitting is a no-op.
    let retried = storage.audit.entries(AuditStream::Retried).unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].disposition, Disposition::Accepted);
    assert_eq!(
        pipeline.submit(&message).await.unwrap(),
        CaptureOutcome::Skipped(SkipReason::AlreadyForwarded)
    );
}

/// After a restart, a backlog scan forwards only what was never confirmed.
#[tokio::test]
async fn backlog_scan_after_restart_skips_forwarded_messages() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let forwarded = Message::new("+79990000001", "before restart", 1);
    let missed = Message::new("+79990000001", "during downtime", 2);

    {
        let storage = open_storage(&dir);
        let pipeline = CapturePipeline::new(
            test_config(&server.uri()).into_shared(),
            DeliveryClient::with_defaults().unwrap(),
            storage,
        );
        assert_eq!(pipeline.submit(&forwarded).await.unwrap(), CaptureOutcome::Forwarded);
    }

    // New process, same data directory.
    let storage = open_storage(&dir);
    let pipeline = CapturePipeline::new(
        test_config(&server.uri()).into_shared(),
        DeliveryClient::with_defaults().unwrap(),
        storage.clone(),
    );

    let backlog = FixedBacklog(vec![forwarded.clone(), missed.clone()]);
    let stats = pipeline.scan_backlog(&backlog).await.unwrap();

    assert_eq!(stats.examined, 2);
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.skipped, 1);
    assert!(storage.dedup.contains(&missed.fingerprint()).unwrap());
}

/// A live capture and a backlog scan observing the same failed message
/// produce exactly one queued record.
#[tokio::test]
async fn duplicate_capture_yields_single_queue_record() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open_storage(&dir);
    let pipeline = CapturePipeline::new(
        test_config("http://127.0.0.1:9").into_shared(),
        DeliveryClient::with_defaults().unwrap(),
        storage.clone(),
    );

    let message = Message::new("+79990000001", "code 4242", 1_700_000_000_000);
    assert_eq!(pipeline.submit(&message).await.unwrap(), CaptureOutcome::Queued);

    let backlog = FixedBacklog(vec![message.clone()]);
    let stats = pipeline.scan_backlog(&backlog).await.unwrap();

    assert_eq!(stats.queued, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(storage.failures.len(), 1);
}

/// A rotated signing key applies to queued work at retry time.
#[tokio::test]
async fn retry_signs_with_the_current_key() {
    let dir = tempfile::tempdir().unwrap();
    let storage = open_storage(&dir);
    let config = test_config("http://127.0.0.1:9").into_shared();
    let client = DeliveryClient::with_defaults().unwrap();

    let pipeline = CapturePipeline::new(config.clone(), client.clone(), storage.clone());
    let message = Message::new("+79990000001", "code 4242", 1_700_000_000_000);
    assert_eq!(pipeline.submit(&message).await.unwrap(), CaptureOutcome::Queued);

    // Rotate the key and point at a live endpoint that verifies the new
    // signature.
    let payload = relay_core::OutboundPayload::from_message(&message, "")
        .canonical_bytes()
        .unwrap();
    let expected = relay_delivery::signer::sign(&payload, "rotated-key").unwrap();

    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::query_param("sign", expected.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    {
        let mut live = config.write().await;
        live.signing_key = "rotated-key".to_string();
        live.endpoint_url = server.uri();
    }

    let (_tx, connectivity) = watch::channel(relay_core::ConnectivityState::Online);
    let scheduler = RetryScheduler::new(config, client, storage.clone(), connectivity);
    let stats = scheduler.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.delivered, 1);
    assert!(storage.failures.is_empty());
}

/// The scheduler loop drains the queue on its own once started.
#[tokio::test]
async fn scheduler_loop_drains_queue() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = open_storage(&dir);
    let config = RelayConfig {
        retry_interval_seconds: 1,
        ..test_config(&server.uri())
    }
    .into_shared();
    let client = DeliveryClient::with_defaults().unwrap();

    // Queue a record through a pipeline pointed at a dead endpoint.
    let dead = test_config("http://127.0.0.1:9").into_shared();
    let pipeline = CapturePipeline::new(dead, client.clone(), storage.clone());
    let message = Message::new("+79990000001", "code 4242", 1_700_000_000_000);
    assert_eq!(pipeline.submit(&message).await.unwrap(), CaptureOutcome::Queued);

    let (_tx, connectivity) = watch::channel(relay_core::ConnectivityState::Online);
    let shutdown = CancellationToken::new();
    let handle = Arc::new(RetryScheduler::new(config, client, storage.clone(), connectivity))
        .start(shutdown.clone());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !storage.failures.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    handle.stop().await;
    assert!(storage.dedup.contains(&message.fingerprint()).unwrap());
}
