use std::time::{Duration, Instant};

use aws_sdk_sqs::Client;
use fanout_consumer::{
    backends::{SqsBackend, SqsConfig},
    dead_letter::QueueSink,
    AckError, ConsumerConfig, ConsumerLoop, DeadLetter, DeadLetterReason, OrderLedger,
    QueueBuilder, QueueConsumer as _, QueueError, QueueProducer as _,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const ROOT_URL: &str = "http://localhost:9324";
const DEFAULT_CFG: [(&str, &str); 3] = [
    ("AWS_DEFAULT_REGION", "localhost"),
    ("AWS_ACCESS_KEY_ID", "x"),
    ("AWS_SECRET_ACCESS_KEY", "x"),
];

/// Returns a [`QueueBuilder`] configured to connect to the ElasticMQ instance
/// spawned by `testing-docker-compose.yaml` in the root of the repository.
///
/// Each call creates a fresh queue so tests never consume each other's
/// messages.
async fn make_test_queue(visibility_timeout: Option<Duration>) -> QueueBuilder<SqsBackend> {
    for (var, val) in &DEFAULT_CFG {
        if std::env::var(var).is_err() {
            std::env::set_var(var, val);
        }
    }

    let config = aws_config::from_env().endpoint_url(ROOT_URL).load().await;
    let client = Client::new(&config);

    let queue_name: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(8)
        .collect();
    client
        .create_queue()
        .queue_name(&queue_name)
        .send()
        .await
        .unwrap();

    SqsBackend::builder(SqsConfig {
        queue_dsn: format!("{ROOT_URL}/queue/{queue_name}"),
        override_endpoint: true,
        visibility_timeout,
    })
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct ExType {
    a: u8,
}

#[tokio::test]
async fn test_raw_send_recv() {
    let payload = "{\"test\": \"data\"}";
    let (p, mut c) = make_test_queue(None).await.build_pair().await.unwrap();

    p.send_raw(payload).await.unwrap();

    let d = c.receive().await.unwrap();
    assert_eq!(d.borrow_payload().unwrap(), payload.as_bytes());
    assert_eq!(d.receive_count(), 1);
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_serde_send_recv() {
    let payload = ExType { a: 2 };
    let (p, mut c) = make_test_queue(None).await.build_pair().await.unwrap();

    p.send_serde_json(&payload).await.unwrap();

    let d = c.receive().await.unwrap();
    assert_eq!(d.payload_serde_json::<ExType>().unwrap().unwrap(), payload);
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (p, _c) = make_test_queue(None).await.build_pair().await.unwrap();

    let payload = "x".repeat(256 * 1024 + 1);
    let err = p.send_raw(&payload).await.unwrap_err();
    assert!(matches!(err, QueueError::PayloadTooLarge { .. }));
}

/// Consumer will return immediately if there are fewer than max messages to
/// start with.
#[tokio::test]
async fn test_send_recv_all_partial() {
    let payload = ExType { a: 2 };
    let (p, mut c) = make_test_queue(None).await.build_pair().await.unwrap();

    p.send_serde_json(&payload).await.unwrap();
    let deadline = Duration::from_secs(1);

    let now = Instant::now();
    let mut xs = c.receive_all(2, deadline).await.unwrap();
    assert_eq!(xs.len(), 1);
    let d = xs.remove(0);
    assert_eq!(d.payload_serde_json::<ExType>().unwrap().unwrap(), payload);
    d.ack().await.unwrap();
    assert!(now.elapsed() <= deadline);
}

#[tokio::test]
async fn test_send_recv_all_late_arriving_items() {
    let (p, mut c) = make_test_queue(None).await.build_pair().await.unwrap();

    let deadline = Duration::from_secs(1);
    let now = Instant::now();
    let xs = c.receive_all(2, deadline).await.unwrap();
    let elapsed = now.elapsed();

    assert_eq!(xs.len(), 0);
    // Long polling is whole seconds, so allow some slack past the deadline.
    assert!(elapsed >= deadline);
    assert!(elapsed <= deadline + Duration::from_millis(500));

    p.send_serde_json(&ExType { a: 1 }).await.unwrap();
    let xs = c.receive_all(2, deadline).await.unwrap();
    assert_eq!(xs.len(), 1);
}

#[tokio::test]
async fn test_nack_redelivers_with_higher_receive_count() {
    let (p, mut c) = make_test_queue(Some(Duration::from_secs(30)))
        .await
        .build_pair()
        .await
        .unwrap();

    p.send_serde_json(&ExType { a: 3 }).await.unwrap();

    let d = c.receive().await.unwrap();
    assert_eq!(d.receive_count(), 1);
    d.nack().await.unwrap();

    let d = c.receive().await.unwrap();
    assert_eq!(d.receive_count(), 2);
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_ack_with_stale_handle_fails() {
    let (p, mut c) = make_test_queue(Some(Duration::from_secs(1)))
        .await
        .build_pair()
        .await
        .unwrap();

    p.send_serde_json(&ExType { a: 4 }).await.unwrap();

    let stale = c.receive().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let fresh = c.receive().await.unwrap();
    assert_eq!(fresh.receive_count(), 2);

    // ElasticMQ rejects superseded receipt handles like SQS does for expired
    // ones; either way the message must still be on the queue.
    if let Err((e, _)) = stale.ack().await {
        assert!(matches!(e, AckError::HandleExpired | AckError::NotFound));
    }
    fresh.ack().await.unwrap();
}

#[tokio::test]
async fn test_consumer_loop_dead_letters_to_second_queue() {
    let (p, c) = make_test_queue(None).await.build_pair().await.unwrap();
    let (dlq_p, mut dlq_c) = make_test_queue(None).await.build_pair().await.unwrap();

    p.send_serde_json(&serde_json::json!({
        "order_id": "123",
        "customer_id": "c-1",
        "amount": 99.99,
    }))
    .await
    .unwrap();
    p.send_raw("{not json").await.unwrap();

    let ledger = OrderLedger::default();
    let mut worker = ConsumerLoop::new(
        c,
        ledger.clone(),
        ConsumerConfig {
            wait_time: Duration::from_secs(1),
            ..ConsumerConfig::default()
        },
        CancellationToken::new(),
    )
    .unwrap()
    .with_dead_letter_sink(QueueSink::new(dlq_p));

    let mut received = 0;
    while received < 2 {
        let report = worker.run_once().await.unwrap();
        assert_eq!(report.pending_redelivery, 0);
        received += report.received;
    }
    assert_eq!(ledger.len(), 1);

    let d = dlq_c.receive().await.unwrap();
    let letter: DeadLetter = d.payload_serde_json().unwrap().unwrap();
    assert_eq!(letter.reason, DeadLetterReason::DecodeFailed);
    assert_eq!(letter.body, "{not json");
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_dynamic_pair() {
    let (p, mut c) = make_test_queue(None)
        .await
        .make_dynamic()
        .build_pair()
        .await
        .unwrap();

    p.send_bytes(b"hello").await.unwrap();
    let d = c.receive().await.unwrap();
    assert_eq!(d.borrow_payload().unwrap(), b"hello");
    d.ack().await.unwrap();
}
