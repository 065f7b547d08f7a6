//! 已消费消息存储（ConsumedMessageStore）
//!
//! 键布局：
//! - `nsq:messages:{id}`  消息哈希，TTL 7d
//! - `nsq:messages:list`  按接收时间（毫秒）排序的索引，只保留最新 1000 条
//!
//! 索引与消息哈希各自过期：哈希已过期而索引仍在时，列表跳过该条，计数仍包含它。
//!
use super::{KvOp, KvStore};
use crate::error::{DomainError, DomainResult as Result};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const CONSUMED_INDEX_KEY: &str = "nsq:messages:list";

pub fn consumed_key(message_id: &str) -> String {
    format!("nsq:messages:{message_id}")
}

/// 从下游主题消费到的一条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedMessage {
    pub id: String,
    pub topic: String,
    pub channel: String,
    pub data: Value,
    pub received_at: DateTime<Utc>,
    pub attempts: u32,
}

impl ConsumedMessage {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("id".to_string(), self.id.clone()),
            ("topic".to_string(), self.topic.clone()),
            ("channel".to_string(), self.channel.clone()),
            ("data".to_string(), serde_json::to_string(&self.data)?),
            ("receivedAt".to_string(), self.received_at.to_rfc3339()),
            ("attempts".to_string(), self.attempts.to_string()),
        ])
    }

    /// 空哈希视为不存在
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let field = |name: &str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| DomainError::Parse {
                    reason: format!("consumed message field missing: {name}"),
                })
        };

        Ok(Some(Self {
            id: field("id")?.to_string(),
            topic: field("topic")?.to_string(),
            channel: field("channel")?.to_string(),
            data: serde_json::from_str(field("data")?)?,
            received_at: DateTime::parse_from_rfc3339(field("receivedAt")?)?.with_timezone(&Utc),
            attempts: field("attempts")?.parse()?,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumedMessageConfig {
    pub ttl: Duration,
    pub retained: usize,
}

impl Default for ConsumedMessageConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            retained: 1000,
        }
    }
}

#[derive(Builder)]
pub struct ConsumedMessageStore {
    kv: Arc<dyn KvStore>,
    #[builder(default)]
    config: ConsumedMessageConfig,
}

impl ConsumedMessageStore {
    /// 写入消息哈希并登记索引，超出保留条数的最旧索引被裁掉
    pub async fn store(&self, message: &ConsumedMessage) -> Result<()> {
        if message.id.is_empty() {
            return Err(DomainError::InvalidValue {
                reason: "consumed message id must not be empty".into(),
            });
        }

        let key = consumed_key(&message.id);
        self.kv
            .atomic(vec![
                KvOp::HSetAll {
                    key: key.clone(),
                    fields: message.to_fields()?,
                },
                KvOp::Expire {
                    key,
                    ttl: self.config.ttl,
                },
            ])
            .await?;

        self.kv
            .zadd(
                CONSUMED_INDEX_KEY,
                message.received_at.timestamp_millis(),
                &message.id,
            )
            .await?;
        let keep = self.config.retained as i64;
        self.kv
            .zrem_range_by_rank(CONSUMED_INDEX_KEY, 0, -(keep + 1))
            .await?;

        tracing::debug!(message_id = %message.id, topic = %message.topic, "consumed message stored");
        Ok(())
    }

    /// 新的在前；`limit` 为 0 时返回空
    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ConsumedMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = offset as i64;
        let stop = start + limit as i64 - 1;

        let mut messages = Vec::new();
        for id in self.kv.zrevrange(CONSUMED_INDEX_KEY, start, stop).await? {
            match self.get(&id).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(message_id = %id, error = %err, "skipping unreadable consumed message");
                }
            }
        }
        Ok(messages)
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<ConsumedMessage>> {
        let fields = self.kv.hget_all(&consumed_key(message_id)).await?;
        ConsumedMessage::from_fields(&fields)
    }

    /// 索引中的条数
    pub async fn count(&self) -> Result<u64> {
        self.kv.zcard(CONSUMED_INDEX_KEY).await
    }

    pub async fn delete(&self, message_id: &str) -> Result<()> {
        self.kv.del(&[consumed_key(message_id)]).await?;
        self.kv.zrem(CONSUMED_INDEX_KEY, message_id).await?;
        tracing::debug!(message_id, "consumed message deleted");
        Ok(())
    }

    /// 删除索引登记的全部消息与索引本身，返回删除的条数
    pub async fn clear(&self) -> Result<usize> {
        let ids = self.kv.zrevrange(CONSUMED_INDEX_KEY, 0, -1).await?;
        let mut keys: Vec<String> = ids.iter().map(|id| consumed_key(id)).collect();
        keys.push(CONSUMED_INDEX_KEY.to_string());

        let ops = keys.into_iter().map(|key| KvOp::Del { key }).collect();
        self.kv.atomic(ops).await?;

        tracing::info!(cleared = ids.len(), "consumed messages cleared");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::InMemoryKvStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn message(id: &str, age_secs: i64) -> ConsumedMessage {
        ConsumedMessage {
            id: id.to_string(),
            topic: "prod-1-00-A".into(),
            channel: "events_channel".into(),
            data: json!({ "id": id }),
            received_at: Utc::now() - ChronoDuration::seconds(age_secs),
            attempts: 1,
        }
    }

    fn store_over(kv: Arc<InMemoryKvStore>) -> ConsumedMessageStore {
        ConsumedMessageStore::builder().kv(kv).build()
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_paging() {
        let store = store_over(Arc::new(InMemoryKvStore::new()));
        for (id, age) in [("m-old", 30), ("m-mid", 20), ("m-new", 10)] {
            store.store(&message(id, age)).await.unwrap();
        }

        let ids = |ms: Vec<ConsumedMessage>| ms.into_iter().map(|m| m.id).collect::<Vec<_>>();
        assert_eq!(ids(store.list(100, 0).await.unwrap()), ["m-new", "m-mid", "m-old"]);
        assert_eq!(ids(store.list(1, 1).await.unwrap()), ["m-mid"]);
        assert!(store.list(0, 0).await.unwrap().is_empty());
        assert!(store.list(5, 3).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 3);

        let found = store.get("m-mid").await.unwrap().unwrap();
        assert_eq!(found, store.list(1, 1).await.unwrap()[0]);
        assert_eq!(found.data, json!({ "id": "m-mid" }));
        assert!(store.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn index_keeps_the_latest_thousand() {
        let store = store_over(Arc::new(InMemoryKvStore::new()));
        for i in 0..1003 {
            store.store(&message(&format!("m-{i}"), 2000 - i)).await.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 1000);
        let newest = store.list(1, 0).await.unwrap();
        assert_eq!(newest[0].id, "m-1002");
        let oldest = store.list(1, 999).await.unwrap();
        assert_eq!(oldest[0].id, "m-3");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_drop_out_of_listings() {
        let store = store_over(Arc::new(InMemoryKvStore::new()));
        store.store(&message("m-1", 5)).await.unwrap();

        tokio::time::advance(ConsumedMessageConfig::default().ttl + Duration::from_secs(1)).await;
        assert!(store.get("m-1").await.unwrap().is_none());
        assert!(store.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear_remove_hashes_and_index() {
        let kv = Arc::new(InMemoryKvStore::new());
        let store = store_over(kv.clone());
        for (id, age) in [("m-1", 3), ("m-2", 2), ("m-3", 1)] {
            store.store(&message(id, age)).await.unwrap();
        }

        store.delete("m-2").await.unwrap();
        assert!(store.get("m-2").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 2);
        // 删除不存在的消息不是错误
        store.delete("m-2").await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(kv.is_empty().await);
    }

    #[tokio::test]
    async fn blank_id_is_rejected() {
        let store = store_over(Arc::new(InMemoryKvStore::new()));
        let err = store.store(&message("", 0)).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidValue { .. }));
    }
}
