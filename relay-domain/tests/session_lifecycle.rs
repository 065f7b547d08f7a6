use async_trait::async_trait;
use futures_util::StreamExt;
use relay_domain::domain_event::{DomainEvent, LifecycleEvent};
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::event::EventPayload;
use relay_domain::eventing::MessageBus;
use relay_domain::lifecycle::SessionLifecycle;
use relay_domain::metrics::MetricsAggregator;
use relay_domain::persist::{
    ContingencyConfig, ContingencyLog, ContingencyRecord, InMemoryKvStore, KvStore, StagingStore,
};
use relay_domain::publisher::BatchPublisher;
use relay_domain::session::SessionStatus;
use relay_domain::value_object::RoutingDescriptor;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 记录每个批次；`down` 为真时拒绝发布
#[derive(Default)]
struct FlakyBus {
    batches: Mutex<Vec<(String, Vec<Value>)>>,
    down: AtomicBool,
}

impl FlakyBus {
    fn sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, b)| b.len())
            .collect()
    }
}

#[async_trait]
impl MessageBus for FlakyBus {
    async fn publish(&self, topic: &str, message: &Value) -> DomainResult<()> {
        self.publish_batch(topic, std::slice::from_ref(message))
            .await
    }

    async fn publish_batch(&self, topic: &str, messages: &[Value]) -> DomainResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DomainError::PublishFailure {
                topic: topic.to_string(),
                reason: "connection refused".into(),
            });
        }
        self.batches
            .lock()
            .unwrap()
            .push((topic.to_string(), messages.to_vec()));
        Ok(())
    }
}

struct Relay {
    _dir: tempfile::TempDir,
    bus: Arc<FlakyBus>,
    metrics: Arc<MetricsAggregator>,
    contingency: Arc<ContingencyLog>,
    store: Arc<StagingStore>,
    lifecycle: SessionLifecycle,
}

async fn relay_with(kv: Arc<dyn KvStore>, contingency_path: Option<std::path::PathBuf>) -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let path = contingency_path.unwrap_or_else(|| dir.path().join("contingency.jsonl"));
    let contingency = Arc::new(ContingencyLog::open(ContingencyConfig { path }).await.unwrap());
    let bus = Arc::new(FlakyBus::default());
    let metrics = Arc::new(MetricsAggregator::builder().kv(kv.clone()).build());

    let store = Arc::new(
        StagingStore::builder()
            .kv(kv)
            .contingency(contingency.clone())
            .build(),
    );
    let publisher = BatchPublisher::builder()
        .bus(bus.clone())
        .metrics(metrics.clone())
        .contingency(contingency.clone())
        .build();
    let lifecycle = SessionLifecycle::builder()
        .store(store.clone())
        .publisher(Arc::new(publisher))
        .build();

    Relay {
        _dir: dir,
        bus,
        metrics,
        contingency,
        store,
        lifecycle,
    }
}

async fn relay() -> Relay {
    relay_with(Arc::new(InMemoryKvStore::new()), None).await
}

fn route() -> RoutingDescriptor {
    RoutingDescriptor::new("prod", "1", "00", "A")
}

fn payload(n: usize) -> EventPayload {
    EventPayload::from_data(json!({ "n": n }))
}

#[tokio::test]
async fn new_session_is_active_with_derived_topic() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();

    assert_eq!(session.topic(), "prod-1-00-A");
    let stored = r.lifecycle.status(session.id()).await.unwrap();
    assert_eq!(stored.status(), SessionStatus::Active);
    assert_eq!(stored.event_count(), 0);
}

#[tokio::test]
async fn blank_routing_field_is_rejected() {
    let r = relay().await;
    let err = r
        .lifecycle
        .create(RoutingDescriptor::new("prod", "", "00", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidValue { .. }));
}

#[tokio::test]
async fn twelve_events_publish_in_two_ordered_batches() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    for n in 0..12 {
        r.lifecycle.add_event(session.id(), payload(n)).await.unwrap();
    }
    assert_eq!(
        r.lifecycle.status(session.id()).await.unwrap().event_count(),
        12
    );

    let outcome = r.lifecycle.commit(session.id()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Committed);
    assert_eq!(outcome.event_count, 12);

    assert_eq!(r.bus.sizes(), vec![10, 2]);
    let batches = r.bus.batches.lock().unwrap().clone();
    assert!(batches.iter().all(|(topic, _)| topic == "prod-1-00-A"));
    let order: Vec<Value> = batches
        .iter()
        .flat_map(|(_, b)| b.iter().map(|m| m["payload"]["data"]["n"].clone()))
        .collect();
    assert_eq!(order, (0..12).map(|n| json!(n)).collect::<Vec<_>>());

    // 提交后仍可从归档命名空间查询
    let archived = r.lifecycle.status(session.id()).await.unwrap();
    assert_eq!(archived.status(), SessionStatus::Committed);
    assert!(archived.archived_at().is_some());

    let m = r.metrics.get_metrics().await.unwrap();
    assert_eq!(m.total_events, 12);
    assert_eq!(m.success_rate, 100.0);
}

#[tokio::test]
async fn empty_commit_skips_the_bus() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();

    let outcome = r.lifecycle.commit(session.id()).await.unwrap();
    assert_eq!(outcome.event_count, 0);
    assert!(r.bus.sizes().is_empty());
    assert_eq!(
        r.lifecycle.status(session.id()).await.unwrap().status(),
        SessionStatus::Committed
    );
}

#[tokio::test]
async fn unknown_session_is_not_found_everywhere() {
    let r = relay().await;
    let id = "00000000-0000-4000-8000-000000000000";

    for err in [
        r.lifecycle.add_event(id, payload(0)).await.unwrap_err(),
        r.lifecycle.commit(id).await.unwrap_err(),
        r.lifecycle.rollback(id).await.unwrap_err(),
        r.lifecycle.events(id).await.unwrap_err(),
    ] {
        assert!(matches!(err, DomainError::NotFound { .. }), "{err:?}");
    }
}

#[tokio::test]
async fn committed_session_rejects_events_and_recommit() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(session.id(), payload(0)).await.unwrap();
    r.lifecycle.commit(session.id()).await.unwrap();

    let err = r
        .lifecycle
        .add_event(session.id(), payload(1))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }));
    let err = r.lifecycle.commit(session.id()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }));
}

#[tokio::test]
async fn rolled_back_session_cannot_be_committed() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(session.id(), payload(0)).await.unwrap();
    r.lifecycle.rollback(session.id()).await.unwrap();

    let err = r.lifecycle.commit(session.id()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }), "{err:?}");
    assert!(r.bus.sizes().is_empty());
    assert_eq!(
        r.lifecycle.status(session.id()).await.unwrap().status(),
        SessionStatus::RolledBack
    );
}

#[tokio::test]
async fn session_in_flight_cannot_be_committed_again() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(session.id(), payload(0)).await.unwrap();
    r.store
        .set_status(session.id(), SessionStatus::Processing)
        .await
        .unwrap();

    let err = r.lifecycle.commit(session.id()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState { .. }), "{err:?}");
    assert!(r.bus.sizes().is_empty());
    assert_eq!(
        r.lifecycle.status(session.id()).await.unwrap().status(),
        SessionStatus::Processing
    );
}

#[tokio::test]
async fn publish_failure_leaves_session_failed_and_retryable() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    for n in 0..3 {
        r.lifecycle.add_event(session.id(), payload(n)).await.unwrap();
    }

    r.bus.down.store(true, Ordering::SeqCst);
    let err = r.lifecycle.commit(session.id()).await.unwrap_err();
    assert!(matches!(err, DomainError::PublishFailure { .. }));
    assert_eq!(
        r.lifecycle.status(session.id()).await.unwrap().status(),
        SessionStatus::Failed
    );

    let parked = r.contingency.read_all().await.unwrap();
    assert_eq!(parked.len(), 1);
    match &parked[0] {
        ContingencyRecord::Batch {
            session_id,
            topic,
            events,
        } => {
            assert_eq!(session_id, session.id());
            assert_eq!(topic, "prod-1-00-A");
            assert_eq!(events.len(), 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    let m = r.metrics.get_metrics().await.unwrap();
    assert_eq!(m.dead_letter_count, 1);

    r.bus.down.store(false, Ordering::SeqCst);
    let outcome = r.lifecycle.commit(session.id()).await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Committed);
    assert_eq!(r.bus.sizes(), vec![3]);
}

#[tokio::test]
async fn rollback_is_unconditional_and_idempotent() {
    let r = relay().await;

    let active = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(active.id(), payload(0)).await.unwrap();

    let committed = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(committed.id(), payload(0)).await.unwrap();
    r.lifecycle.commit(committed.id()).await.unwrap();

    for (id, prior) in [
        (active.id(), SessionStatus::Active),
        (committed.id(), SessionStatus::Committed),
    ] {
        assert_eq!(r.lifecycle.rollback(id).await.unwrap(), prior);
        assert_eq!(
            r.lifecycle.rollback(id).await.unwrap(),
            SessionStatus::RolledBack
        );

        let s = r.lifecycle.status(id).await.unwrap();
        assert_eq!(s.status(), SessionStatus::RolledBack);
        assert!(s.archived_at().is_some());
        assert!(r.lifecycle.events(id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn purge_removes_every_trace() {
    let r = relay().await;
    let session = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(session.id(), payload(0)).await.unwrap();

    r.lifecycle.purge(session.id()).await.unwrap();
    let err = r.lifecycle.status(session.id()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

#[tokio::test]
async fn notifications_follow_the_lifecycle() {
    let r = relay().await;
    let mut stream = r.lifecycle.notifier().subscribe();

    let session = r.lifecycle.create(route()).await.unwrap();
    r.lifecycle.add_event(session.id(), payload(0)).await.unwrap();
    r.lifecycle.commit(session.id()).await.unwrap();
    r.lifecycle.rollback(session.id()).await.unwrap();

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.session_id(), session.id());
        seen.push(next.event_type());
    }
    assert_eq!(
        seen,
        vec![
            LifecycleEvent::SESSION_STARTED,
            LifecycleEvent::EVENT_ADDED,
            LifecycleEvent::SESSION_COMMITTED,
            LifecycleEvent::SESSION_ROLLED_BACK,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_appends_keep_count_and_list_in_step() {
    let r = Arc::new(relay().await);
    let session = r.lifecycle.create(route()).await.unwrap();

    let mut tasks = Vec::new();
    for n in 0..32 {
        let r = r.clone();
        let id = session.id().to_string();
        tasks.push(tokio::spawn(async move {
            r.lifecycle.add_event(&id, payload(n)).await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let count = r.lifecycle.status(session.id()).await.unwrap().event_count();
    let events = r.lifecycle.events(session.id()).await.unwrap();
    assert_eq!(count, 32);
    assert_eq!(events.len(), 32);
}
