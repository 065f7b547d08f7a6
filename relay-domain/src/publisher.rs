//! 批次发布（BatchPublisher）
//!
//! 把会话事件按固定大小切块，按序逐块发布到消息总线。任一块失败即中止：
//! 未送达的事件（失败块及其后）作为一条 `batch` 记录写入应急日志，
//! 同时记录失败指标，并把 `PublishFailure` 返回给调用方。
//!
//! 投递语义为“至少一次”，不做去重。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::event::StagedEvent;
use crate::eventing::MessageBus;
use crate::metrics::{MetricsAggregator, ProcessingRecord};
use crate::persist::{ContingencyLog, ContingencyRecord};
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub batch_size: usize,
    /// 调用方未指定主题时使用
    pub default_topic: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            default_topic: "events".to_string(),
        }
    }
}

#[derive(Builder)]
pub struct BatchPublisher {
    bus: Arc<dyn MessageBus>,
    metrics: Arc<MetricsAggregator>,
    contingency: Arc<ContingencyLog>,
    #[builder(default)]
    config: PublisherConfig,
}

impl BatchPublisher {
    pub async fn publish(
        &self,
        session_id: &str,
        events: &[StagedEvent],
        topic: Option<&str>,
    ) -> Result<()> {
        let topic = topic.unwrap_or(&self.config.default_topic);
        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);

        for (idx, chunk) in events.chunks(batch_size).enumerate() {
            if let Err(err) = self.publish_chunk(topic, chunk).await {
                let unsent = &events[idx * batch_size..];
                return self
                    .abort(session_id, topic, unsent, events.len(), started.elapsed(), err)
                    .await;
            }
            tracing::debug!(session_id, topic, chunk = idx, size = chunk.len(), "chunk published");
        }

        let elapsed = started.elapsed();
        if let Err(err) = self
            .metrics
            .record_success(session_id, events.len() as u64, elapsed)
            .await
        {
            tracing::warn!(session_id, error = %err, "failed to record processing metrics");
        }
        tracing::info!(
            session_id,
            topic,
            events = events.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "session published"
        );
        Ok(())
    }

    async fn publish_chunk(&self, topic: &str, chunk: &[StagedEvent]) -> Result<()> {
        let messages = chunk
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.bus.publish_batch(topic, &messages).await
    }

    async fn abort(
        &self,
        session_id: &str,
        topic: &str,
        unsent: &[StagedEvent],
        total: usize,
        elapsed: Duration,
        cause: DomainError,
    ) -> Result<()> {
        let reason = match &cause {
            DomainError::PublishFailure { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        tracing::error!(
            session_id,
            topic,
            unsent = unsent.len(),
            error = %cause,
            "batch publish aborted"
        );

        let processing = ProcessingRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_count: total as u64,
            duration: elapsed.as_millis() as u64,
            success: false,
        };
        if let Err(err) = self.metrics.record_processing(processing).await {
            tracing::warn!(session_id, error = %err, "failed to record processing metrics");
        }
        if let Err(err) = self
            .metrics
            .record_failure(session_id, &reason, total as u64)
            .await
        {
            tracing::warn!(session_id, error = %err, "failed to record failure metrics");
        }

        self.contingency
            .append(&[ContingencyRecord::Batch {
                session_id: session_id.to_string(),
                topic: topic.to_string(),
                events: unsent.to_vec(),
            }])
            .await?;

        Err(DomainError::PublishFailure {
            topic: topic.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::persist::{ContingencyConfig, InMemoryKvStore};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// 记录每次调用的块；第 `fail_on` 次调用（从 0 计）返回失败
    #[derive(Default)]
    struct SpyBus {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl MessageBus for SpyBus {
        async fn publish(&self, topic: &str, message: &Value) -> Result<()> {
            self.publish_batch(topic, std::slice::from_ref(message)).await
        }

        async fn publish_batch(&self, topic: &str, messages: &[Value]) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_on == Some(calls.len()) {
                return Err(DomainError::PublishFailure {
                    topic: topic.to_string(),
                    reason: "nsqd unreachable".into(),
                });
            }
            calls.push((topic.to_string(), messages.to_vec()));
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        bus: Arc<SpyBus>,
        metrics: Arc<MetricsAggregator>,
        contingency: Arc<ContingencyLog>,
        publisher: BatchPublisher,
    }

    async fn fixture(fail_on: Option<usize>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let contingency = Arc::new(
            ContingencyLog::open(ContingencyConfig {
                path: dir.path().join("contingency.jsonl"),
            })
            .await
            .unwrap(),
        );
        let bus = Arc::new(SpyBus {
            fail_on,
            ..Default::default()
        });
        let metrics = Arc::new(
            MetricsAggregator::builder()
                .kv(Arc::new(InMemoryKvStore::new()))
                .build(),
        );
        let publisher = BatchPublisher::builder()
            .bus(bus.clone())
            .metrics(metrics.clone())
            .contingency(contingency.clone())
            .build();
        Fixture {
            _dir: dir,
            bus,
            metrics,
            contingency,
            publisher,
        }
    }

    fn events(n: usize) -> Vec<StagedEvent> {
        (0..n)
            .map(|i| StagedEvent::ingest(EventPayload::from_data(json!({ "seq": i }))))
            .collect()
    }

    #[tokio::test]
    async fn events_are_chunked_in_order() {
        let f = fixture(None).await;
        let staged = events(23);

        f.publisher
            .publish("s-1", &staged, Some("prod-1-00-A"))
            .await
            .unwrap();

        let calls = f.bus.calls.lock().unwrap().clone();
        let sizes: Vec<usize> = calls.iter().map(|(_, m)| m.len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert!(calls.iter().all(|(t, _)| t == "prod-1-00-A"));

        let seq: Vec<Value> = calls
            .iter()
            .flat_map(|(_, m)| m.iter().map(|v| v["payload"]["data"]["seq"].clone()))
            .collect();
        let expected: Vec<Value> = (0..23).map(|i| json!(i)).collect();
        assert_eq!(seq, expected);

        let m = f.metrics.get_metrics().await.unwrap();
        assert_eq!(m.total_events, 23);
        assert_eq!(m.success_rate, 100.0);
    }

    #[tokio::test]
    async fn missing_topic_falls_back_to_default() {
        let f = fixture(None).await;
        f.publisher.publish("s-1", &events(1), None).await.unwrap();
        assert_eq!(f.bus.calls.lock().unwrap()[0].0, "events");
    }

    #[tokio::test]
    async fn failure_diverts_unsent_events_and_records_metrics() {
        let f = fixture(Some(1)).await;
        let staged = events(25);

        let err = f
            .publisher
            .publish("s-9", &staged, Some("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PublishFailure { ref topic, .. } if topic == "t"));
        assert_eq!(f.bus.calls.lock().unwrap().len(), 1);

        let records = f.contingency.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            ContingencyRecord::Batch {
                session_id,
                topic,
                events,
            } => {
                assert_eq!(session_id, "s-9");
                assert_eq!(topic, "t");
                assert_eq!(events.as_slice(), &staged[10..]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let m = f.metrics.get_metrics().await.unwrap();
        assert_eq!(m.dead_letter_count, 1);
        assert_eq!(m.recent_failures[0].session_id, "s-9");
        assert_eq!(m.success_rate, 0.0);
    }
}
