//! 暂存持久化（persist）
//!
//! - `KvStore`：键值存储客户端协议（哈希、列表、有序集合、计数器、TTL、原子事务）；
//! - `InMemoryKvStore` / `RedisKvStore`（`redis` feature）：两种实现；
//! - `StagingStore`：会话与事件的暂存仓储，写失败转存应急日志；
//! - `ContingencyLog`：本地 NDJSON 应急日志；
//! - `ConsumedMessageStore`：从下游主题消费到的消息，保留最新 1000 条供查看。
//!
mod consumed_messages;
mod contingency;
mod kv;
mod kv_inmemory;
#[cfg(feature = "redis")]
mod kv_redis;
mod staging_store;

pub use consumed_messages::{
    CONSUMED_INDEX_KEY, ConsumedMessage, ConsumedMessageConfig, ConsumedMessageStore, consumed_key,
};
pub use contingency::{ContingencyConfig, ContingencyLog, ContingencyRecord};
pub use kv::{KvOp, KvStore};
pub use kv_inmemory::InMemoryKvStore;
#[cfg(feature = "redis")]
pub use kv_redis::RedisKvStore;
pub use staging_store::{StagingConfig, StagingStore, active_key, archived_key, events_key};
