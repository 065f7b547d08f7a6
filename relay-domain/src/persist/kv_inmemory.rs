use super::kv::{KvOp, KvStore, normalize_range};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    /// 按 (score, member) 升序，member 唯一
    ZSet(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// 惰性过期：访问时清理已到期的键
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut HashMap<String, String>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.slot) {
            Some(Slot::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    fn list_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut Vec<String>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::List(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.slot) {
            Some(Slot::List(l)) => Ok(Some(l)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    fn zset_mut(&mut self, key: &str, create: bool) -> Result<Option<&mut Vec<(i64, String)>>> {
        if self.live(key).is_none() {
            if !create {
                return Ok(None);
            }
            self.entries.insert(
                key.to_string(),
                Entry {
                    slot: Slot::ZSet(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.slot) {
            Some(Slot::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    fn hset_all(&mut self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if let Some(hash) = self.hash_mut(key, true)? {
            for (f, v) in fields {
                hash.insert(f.clone(), v.clone());
            }
        }
        Ok(())
    }

    fn rpush(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(list) = self.list_mut(key, true)? {
            list.push(value.to_string());
        }
        Ok(())
    }

    fn hincr_by(&mut self, key: &str, field: &str, delta: i64, create: bool) -> Result<i64> {
        let Some(hash) = self.hash_mut(key, create)? else {
            return Ok(0);
        };
        let current: i64 = match hash.get(field) {
            Some(v) => v.parse()?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn expire(&mut self, key: &str, ttl: Duration) {
        if let Some(entry) = self.live(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    fn del(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// 只复制本批涉及的键，在副本上执行成功后再整体写回
    fn apply(&mut self, ops: Vec<KvOp>) -> Result<()> {
        let touched: HashSet<String> = ops.iter().map(|op| op.key().to_string()).collect();
        let mut staged = Keyspace {
            entries: touched
                .iter()
                .filter_map(|k| self.entries.get(k).map(|e| (k.clone(), e.clone())))
                .collect(),
        };
        for op in ops {
            match op {
                KvOp::RPush { key, value } => staged.rpush(&key, &value)?,
                KvOp::HIncrBy { key, field, delta } => {
                    staged.hincr_by(&key, &field, delta, true)?;
                }
                KvOp::HIncrByExisting { key, field, delta } => {
                    staged.hincr_by(&key, &field, delta, false)?;
                }
                KvOp::Expire { key, ttl } => staged.expire(&key, ttl),
                KvOp::HSetAll { key, fields } => staged.hset_all(&key, &fields)?,
                KvOp::Del { key } => staged.del(&key),
            }
        }

        for key in touched {
            match staged.entries.remove(&key) {
                Some(entry) => self.entries.insert(key, entry),
                None => self.entries.remove(&key),
            };
        }
        Ok(())
    }
}

fn wrong_type(key: &str) -> DomainError {
    DomainError::store_unavailable(format!(
        "WRONGTYPE operation against key holding the wrong kind of value: {key}"
    ))
}

/// 进程内键值存储
///
/// 过期基于 `tokio::time::Instant`，测试中可配合 `tokio::time::pause` 推进时间。
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    inner: Mutex<Keyspace>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub async fn len(&self) -> usize {
        let mut ks = self.inner.lock().await;
        let keys: Vec<String> = ks.entries.keys().cloned().collect();
        keys.iter().filter(|k| ks.live(k).is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.inner.lock().await.live(key).is_some()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.inner.lock().await.hset_all(key, fields)
    }

    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> Result<bool> {
        let mut ks = self.inner.lock().await;
        match ks.hash_mut(key, false)? {
            Some(hash) => {
                for (f, v) in fields {
                    hash.insert(f.clone(), v.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut ks = self.inner.lock().await;
        Ok(ks.hash_mut(key, false)?.cloned().unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.inner.lock().await.expire(key, ttl);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut ks = self.inner.lock().await;
        for key in keys {
            ks.del(key);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().await.rpush(key, value)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut ks = self.inner.lock().await;
        let Some(list) = ks.list_mut(key, false)? else {
            return Ok(Vec::new());
        };
        Ok(match normalize_range(list.len(), start, stop) {
            Some((from, to)) => list[from..to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut ks = self.inner.lock().await;
        let current: i64 = match ks.live(key).map(|e| &e.slot) {
            Some(Slot::Str(v)) => v.parse()?,
            Some(_) => return Err(wrong_type(key)),
            None => 0,
        };
        let next = current + delta;
        let expires_at = ks.entries.get(key).and_then(|e| e.expires_at);
        ks.entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut ks = self.inner.lock().await;
        match ks.live(key).map(|e| &e.slot) {
            Some(Slot::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        let mut ks = self.inner.lock().await;
        if let Some(zset) = ks.zset_mut(key, true)? {
            zset.retain(|(_, m)| m != member);
            let item = (score, member.to_string());
            let at = zset.partition_point(|slot| slot < &item);
            zset.insert(at, item);
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        let mut ks = self.inner.lock().await;
        Ok(ks
            .zset_mut(key, false)?
            .map(|zset| {
                zset.iter()
                    .filter(|(s, _)| (min..=max).contains(s))
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<()> {
        let mut ks = self.inner.lock().await;
        if let Some(zset) = ks.zset_mut(key, false)? {
            zset.retain(|(s, _)| !(min..=max).contains(s));
        }
        Ok(())
    }

    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut ks = self.inner.lock().await;
        if let Some(zset) = ks.zset_mut(key, false)? {
            if let Some((from, to)) = normalize_range(zset.len(), start, stop) {
                zset.drain(from..to);
            }
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut ks = self.inner.lock().await;
        if let Some(zset) = ks.zset_mut(key, false)? {
            zset.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut ks = self.inner.lock().await;
        let Some(zset) = ks.zset_mut(key, false)? else {
            return Ok(Vec::new());
        };
        let reversed: Vec<String> = zset.iter().rev().map(|(_, m)| m.clone()).collect();
        Ok(match normalize_range(reversed.len(), start, stop) {
            Some((from, to)) => reversed[from..to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut ks = self.inner.lock().await;
        Ok(ks.zset_mut(key, false)?.map_or(0, |z| z.len() as u64))
    }

    async fn atomic(&self, ops: Vec<KvOp>) -> Result<()> {
        self.inner.lock().await.apply(ops)
    }
}
