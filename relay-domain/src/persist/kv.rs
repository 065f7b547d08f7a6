use crate::error::DomainResult as Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 原子事务中的单个写操作
#[derive(Debug, Clone, PartialEq)]
pub enum KvOp {
    RPush {
        key: String,
        value: String,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// 仅当哈希键存在时自增，不存在时不创建
    HIncrByExisting {
        key: String,
        field: String,
        delta: i64,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    HSetAll {
        key: String,
        fields: Vec<(String, String)>,
    },
    Del {
        key: String,
    },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            KvOp::RPush { key, .. }
            | KvOp::HIncrBy { key, .. }
            | KvOp::HIncrByExisting { key, .. }
            | KvOp::Expire { key, .. }
            | KvOp::HSetAll { key, .. }
            | KvOp::Del { key } => key,
        }
    }
}

/// 键值存储客户端协议
///
/// 语义对齐 Redis：哈希、列表、有序集合、计数器与按键 TTL；
/// 区间参数采用 Redis 的闭区间与负索引约定。
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// 仅当键存在时写入，返回是否写入
    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> Result<bool>;

    /// 键不存在时返回空表
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<()>;

    async fn rpush(&self, key: &str, value: &str) -> Result<()>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()>;

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>>;

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<()>;

    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// 按分值从高到低取区间
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    /// 全部成功或全部不生效
    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()>;
}

#[async_trait]
impl<T> KvStore for Arc<T>
where
    T: KvStore + ?Sized,
{
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        (**self).hset_all(key, fields).await
    }

    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> Result<bool> {
        (**self).hset_existing(key, fields).await
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        (**self).hget_all(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        (**self).expire(key, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        (**self).del(keys).await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        (**self).rpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        (**self).lrange(key, start, stop).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).incr(key, delta).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        (**self).zadd(key, score, member).await
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        (**self).zrange_by_score(key, min, max).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<()> {
        (**self).zrem_range_by_score(key, min, max).await
    }

    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        (**self).zrem_range_by_rank(key, start, stop).await
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        (**self).zrem(key, member).await
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        (**self).zrevrange(key, start, stop).await
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        (**self).zcard(key).await
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()> {
        (**self).atomic(ops).await
    }
}

/// 将 Redis 风格的闭区间 `[start, stop]`（可为负）换算为 `start..end`
pub(crate) fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}
