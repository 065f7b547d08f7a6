use async_trait::async_trait;
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::event::{EventPayload, StagedEvent};
use relay_domain::persist::{
    ContingencyConfig, ContingencyLog, ContingencyRecord, KvOp, KvStore, StagingStore,
};
use relay_domain::session::{Session, SessionStatus};
use relay_domain::value_object::RoutingDescriptor;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 所有操作都失败的键值存储
struct UnreachableKv;

fn down<T>() -> DomainResult<T> {
    Err(DomainError::store_unavailable("connection refused"))
}

#[async_trait]
impl KvStore for UnreachableKv {
    async fn hset_all(&self, _key: &str, _fields: &[(String, String)]) -> DomainResult<()> {
        down()
    }
    async fn hset_existing(&self, _key: &str, _fields: &[(String, String)]) -> DomainResult<bool> {
        down()
    }
    async fn hget_all(&self, _key: &str) -> DomainResult<HashMap<String, String>> {
        down()
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> DomainResult<()> {
        down()
    }
    async fn del(&self, _keys: &[String]) -> DomainResult<()> {
        down()
    }
    async fn rpush(&self, _key: &str, _value: &str) -> DomainResult<()> {
        down()
    }
    async fn lrange(&self, _key: &str, _start: i64, _stop: i64) -> DomainResult<Vec<String>> {
        down()
    }
    async fn incr(&self, _key: &str, _delta: i64) -> DomainResult<i64> {
        down()
    }
    async fn get(&self, _key: &str) -> DomainResult<Option<String>> {
        down()
    }
    async fn zadd(&self, _key: &str, _score: i64, _member: &str) -> DomainResult<()> {
        down()
    }
    async fn zrange_by_score(&self, _key: &str, _min: i64, _max: i64) -> DomainResult<Vec<String>> {
        down()
    }
    async fn zrem_range_by_score(&self, _key: &str, _min: i64, _max: i64) -> DomainResult<()> {
        down()
    }
    async fn zrem_range_by_rank(&self, _key: &str, _start: i64, _stop: i64) -> DomainResult<()> {
        down()
    }
    async fn zrem(&self, _key: &str, _member: &str) -> DomainResult<()> {
        down()
    }
    async fn zrevrange(&self, _key: &str, _start: i64, _stop: i64) -> DomainResult<Vec<String>> {
        down()
    }
    async fn zcard(&self, _key: &str) -> DomainResult<u64> {
        down()
    }
    async fn atomic(&self, _ops: Vec<KvOp>) -> DomainResult<()> {
        down()
    }
}

async fn store_at(path: std::path::PathBuf) -> (StagingStore, Arc<ContingencyLog>) {
    let contingency = Arc::new(ContingencyLog::open(ContingencyConfig { path }).await.unwrap());
    let store = StagingStore::builder()
        .kv(Arc::new(UnreachableKv))
        .contingency(contingency.clone())
        .build();
    (store, contingency)
}

#[tokio::test]
async fn writes_are_parked_in_the_contingency_log() {
    let dir = tempfile::tempdir().unwrap();
    let (store, contingency) = store_at(dir.path().join("contingency.jsonl")).await;

    let session = Session::open(RoutingDescriptor::new("prod", "1", "00", "A"));
    let event = StagedEvent::ingest(EventPayload::from_data(json!({"k": "v"})));

    store.save(&session).await.unwrap();
    store.append_event(session.id(), &event).await.unwrap();
    store
        .set_status(session.id(), SessionStatus::Processing)
        .await
        .unwrap();
    store.archive(session.id()).await.unwrap();
    store.delete_all(session.id()).await.unwrap();

    let kinds: Vec<&str> = contingency
        .read_all()
        .await
        .unwrap()
        .iter()
        .map(ContingencyRecord::kind)
        .collect();
    assert_eq!(
        kinds,
        vec!["session", "event", "status_update", "move_to_archive", "delete"]
    );

    match &contingency.read_all().await.unwrap()[1] {
        ContingencyRecord::Event { session_id, data } => {
            assert_eq!(session_id, session.id());
            assert_eq!(data, &event);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn reads_degrade_to_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _) = store_at(dir.path().join("contingency.jsonl")).await;

    assert!(store.find_by_id("s-1").await.is_none());
    assert!(store.list_events("s-1").await.is_empty());
}

#[tokio::test]
async fn contingency_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // 应急日志路径指向目录，写入必然失败
    let (store, _) = store_at(dir.path().to_path_buf()).await;

    let session = Session::open(RoutingDescriptor::new("prod", "1", "00", "A"));
    let err = store.save(&session).await.unwrap_err();
    assert!(matches!(err, DomainError::ContingencyWrite { .. }));
    assert!(err.is_fatal());
}
