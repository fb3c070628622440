//! Queue guarantees that must hold for every backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fixq_core::QueueError;
use fixq_core::domain::{NewEvent, RequestId, RequestStatus};
use fixq_core::impls::{InMemoryBroker, InMemoryDocumentStore};
use fixq_core::ports::{BrokerChannel, QueueBackend};
use fixq_core::queue::{BackendKind, BrokerQueue, DocumentStoreQueue};
use rstest::rstest;
use tokio::time::Instant;

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy)]
enum Flavor {
    Documents,
    Broker,
}

fn open(flavor: Flavor) -> Arc<dyn QueueBackend> {
    match flavor {
        Flavor::Documents => Arc::new(
            DocumentStoreQueue::new(InMemoryDocumentStore::new(), BackendKind::Memory)
                .with_poll_interval(POLL),
        ),
        Flavor::Broker => Arc::new(BrokerQueue::new(InMemoryBroker::new()).with_poll_interval(POLL)),
    }
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test]
async fn published_event_is_immediately_queued(#[case] flavor: Flavor) {
    let backend = open(flavor);
    let id = backend
        .publish("request_queue", NewEvent::queued("job-1", 0))
        .await
        .unwrap();

    assert_eq!(id, RequestId::from("job-1"));
    assert_eq!(
        backend.latest_status("request_queue", &id).await.unwrap(),
        Some(RequestStatus::Queued)
    );
    assert_eq!(
        backend.latest_status("status_queue", &id).await.unwrap(),
        None
    );
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner(#[case] flavor: Flavor) {
    let backend = open(flavor);
    backend
        .publish("request_queue", NewEvent::queued("job-1", 0))
        .await
        .unwrap();

    let claimers: Vec<_> = (0..8)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .claim_next("request_queue", Duration::from_millis(30))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for claimer in claimers {
        if claimer.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_is_claimed_once_across_workers(#[case] flavor: Flavor) {
    let backend = open(flavor);
    let ids: Vec<String> = (0..24).map(|i| format!("job-{i}")).collect();
    for id in &ids {
        backend
            .publish("request_queue", NewEvent::queued(id.as_str(), 0))
            .await
            .unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = backend
                    .claim_next("request_queue", Duration::from_millis(20))
                    .await
                    .unwrap()
                {
                    claimed.push(job.request_id().to_string());
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), ids.len());
    assert_eq!(unique, ids.into_iter().collect::<HashSet<_>>());
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test]
async fn claims_come_out_in_publish_order(#[case] flavor: Flavor) {
    let backend = open(flavor);
    for id in ["first", "second", "third"] {
        backend
            .publish("request_queue", NewEvent::queued(id, 0))
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = backend
        .claim_next("request_queue", Duration::ZERO)
        .await
        .unwrap()
    {
        assert_eq!(job.event().status, RequestStatus::Processing);
        order.push(job.request_id().to_string());
    }
    assert_eq!(order, ["first", "second", "third"]);
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test(start_paused = true)]
async fn empty_claim_returns_none_at_the_deadline(#[case] flavor: Flavor) {
    let backend = open(flavor);
    let timeout = Duration::from_secs(2);

    let start = Instant::now();
    let job = backend.claim_next("request_queue", timeout).await.unwrap();

    assert!(job.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed <= timeout + POLL, "overslept to {elapsed:?}");
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test]
async fn job_published_while_waiting_is_claimed(#[case] flavor: Flavor) {
    let backend = open(flavor);
    let waiter = tokio::spawn({
        let backend = backend.clone();
        async move {
            backend
                .claim_next("request_queue", Duration::from_secs(2))
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    backend
        .publish("request_queue", NewEvent::queued("late", 0))
        .await
        .unwrap();

    let job = waiter.await.unwrap().expect("claimed before the deadline");
    assert_eq!(job.request_id().as_str(), "late");
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test]
async fn claimed_but_unfinished_job_stays_processing(#[case] flavor: Flavor) {
    let backend = open(flavor);
    let id = backend
        .publish("request_queue", NewEvent::queued("job-1", 0))
        .await
        .unwrap();

    // The claimer dies here: no terminal event is ever written.
    let job = backend
        .claim_next("request_queue", Duration::ZERO)
        .await
        .unwrap();
    assert!(job.is_some());

    assert_eq!(
        backend.latest_status("request_queue", &id).await.unwrap(),
        Some(RequestStatus::Processing)
    );
    assert!(
        backend
            .claim_next("request_queue", Duration::from_millis(20))
            .await
            .unwrap()
            .is_none()
    );
    assert!(backend.pending("request_queue").await.unwrap().is_empty());
}

#[rstest]
#[case::documents(Flavor::Documents)]
#[case::broker(Flavor::Broker)]
#[tokio::test]
async fn closed_backend_rejects_operations(#[case] flavor: Flavor) {
    let backend = open(flavor);
    backend.close().await.unwrap();
    backend.close().await.unwrap();

    assert!(matches!(
        backend
            .publish("request_queue", NewEvent::queued("job-1", 0))
            .await,
        Err(QueueError::Closed)
    ));
    assert!(matches!(
        backend.claim_next("request_queue", Duration::ZERO).await,
        Err(QueueError::Closed)
    ));
}

#[tokio::test]
async fn broker_redelivers_what_a_crashed_consumer_never_acked() {
    let queue = BrokerQueue::new(InMemoryBroker::new()).with_poll_interval(POLL);
    queue
        .publish("request_queue", NewEvent::queued("job-1", 1))
        .await
        .unwrap();

    let taken = queue.broker().get("request_queue").await.unwrap();
    assert!(taken.is_some());
    assert!(
        queue
            .claim_next("request_queue", Duration::ZERO)
            .await
            .unwrap()
            .is_none()
    );

    queue.broker().recover().await;
    let job = queue
        .claim_next("request_queue", Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.request_id().as_str(), "job-1");
    assert_eq!(job.retry_count(), 1);
    assert!(job.redelivered());
}
