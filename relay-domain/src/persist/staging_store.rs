//! 暂存存储（StagingStore）
//!
//! 会话与事件在键值存储中的布局：
//! - `session:current:{id}`  活跃会话哈希，TTL 24h
//! - `session:archived:{id}` 归档会话哈希，TTL 7d
//! - `events:{id}`           事件列表（JSON），随活跃会话续期
//!
//! 写路径失败不会抛给调用方：变更被写入应急日志后按成功返回，
//! 只有应急日志自身失败才会向上传播。读路径失败降级为“不存在/空”。
//!
use super::{ContingencyLog, ContingencyRecord, KvOp, KvStore};
use crate::error::{DomainError, DomainResult as Result};
use crate::event::StagedEvent;
use crate::session::{Session, SessionStatus};
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub fn active_key(session_id: &str) -> String {
    format!("session:current:{session_id}")
}

pub fn archived_key(session_id: &str) -> String {
    format!("session:archived:{session_id}")
}

pub fn events_key(session_id: &str) -> String {
    format!("events:{session_id}")
}

#[derive(Debug, Clone, Copy)]
pub struct StagingConfig {
    pub active_ttl: Duration,
    pub archive_ttl: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            active_ttl: Duration::from_secs(24 * 60 * 60),
            archive_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Builder)]
pub struct StagingStore {
    kv: Arc<dyn KvStore>,
    contingency: Arc<ContingencyLog>,
    #[builder(default)]
    config: StagingConfig,
}

impl StagingStore {
    /// 写入会话记录并设置活跃 TTL
    pub async fn save(&self, session: &Session) -> Result<()> {
        let key = active_key(session.id());
        let written = self
            .kv
            .atomic(vec![
                KvOp::HSetAll {
                    key: key.clone(),
                    fields: session.to_fields(),
                },
                KvOp::Expire {
                    key,
                    ttl: self.config.active_ttl,
                },
            ])
            .await;

        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                let data = serde_json::to_value(session)?;
                self.divert(session.id(), err, ContingencyRecord::Session { data })
                    .await
            }
        }
    }

    /// 先查活跃命名空间，再查归档命名空间
    ///
    /// 活跃键读取失败或记录残缺时仍继续查归档记录。
    pub async fn find_by_id(&self, session_id: &str) -> Option<Session> {
        for key in [active_key(session_id), archived_key(session_id)] {
            match self.load(&key).await {
                Ok(Some(session)) => return Some(session),
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(session_id, key = %key, error = %err, "session read failed");
                }
            }
        }
        None
    }

    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let fields = self.kv.hget_all(key).await?;
        Session::from_fields(&fields)
    }

    /// 原子追加：RPUSH 事件、eventCount 自增、两个键续期
    ///
    /// 计数只在活跃记录仍存在时自增，与并发归档交错时不会留下残缺的活跃记录。
    pub async fn append_event(&self, session_id: &str, event: &StagedEvent) -> Result<()> {
        let session_key = active_key(session_id);
        let list_key = events_key(session_id);
        let ttl = self.config.active_ttl;

        let written = match serde_json::to_string(event) {
            Ok(value) => {
                self.kv
                    .atomic(vec![
                        KvOp::RPush {
                            key: list_key.clone(),
                            value,
                        },
                        KvOp::HIncrByExisting {
                            key: session_key.clone(),
                            field: "eventCount".to_string(),
                            delta: 1,
                        },
                        KvOp::Expire { key: list_key, ttl },
                        KvOp::Expire {
                            key: session_key,
                            ttl,
                        },
                    ])
                    .await
            }
            Err(err) => Err(err.into()),
        };

        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                self.divert(
                    session_id,
                    err,
                    ContingencyRecord::Event {
                        session_id: session_id.to_string(),
                        data: event.clone(),
                    },
                )
                .await
            }
        }
    }

    /// 按插入顺序返回全部事件；不存在或读取失败时为空
    pub async fn list_events(&self, session_id: &str) -> Vec<StagedEvent> {
        let raw = match self.kv.lrange(&events_key(session_id), 0, -1).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "event list read failed");
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|item| match serde_json::from_str(item) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(session_id, error = %err, "skipping undecodable staged event");
                    None
                }
            })
            .collect()
    }

    /// 更新会话状态（活跃记录优先，其次归档记录）并刷新 `updatedAt`
    pub async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let fields = vec![
            ("status".to_string(), status.as_str().to_string()),
            ("updatedAt".to_string(), Utc::now().to_rfc3339()),
        ];

        let written = async {
            if self
                .kv
                .hset_existing(&active_key(session_id), &fields)
                .await?
            {
                return Ok(());
            }
            if !self
                .kv
                .hset_existing(&archived_key(session_id), &fields)
                .await?
            {
                tracing::debug!(session_id, %status, "status update for unknown session ignored");
            }
            Ok::<(), DomainError>(())
        }
        .await;

        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                self.divert(
                    session_id,
                    err,
                    ContingencyRecord::StatusUpdate {
                        session_id: session_id.to_string(),
                        status,
                    },
                )
                .await
            }
        }
    }

    /// 活跃记录移入归档命名空间（TTL 7d）并删除活跃键
    pub async fn archive(&self, session_id: &str) -> Result<()> {
        let moved = async {
            let mut fields = self.kv.hget_all(&active_key(session_id)).await?;
            if fields.is_empty() {
                tracing::debug!(session_id, "no active record to archive");
                return Ok::<(), DomainError>(());
            }
            fields.insert("archivedAt".to_string(), Utc::now().to_rfc3339());

            let key = archived_key(session_id);
            self.kv
                .atomic(vec![
                    KvOp::HSetAll {
                        key: key.clone(),
                        fields: fields.into_iter().collect(),
                    },
                    KvOp::Expire {
                        key,
                        ttl: self.config.archive_ttl,
                    },
                    KvOp::Del {
                        key: active_key(session_id),
                    },
                ])
                .await
        }
        .await;

        match moved {
            Ok(()) => Ok(()),
            Err(err) => {
                self.divert(
                    session_id,
                    err,
                    ContingencyRecord::MoveToArchive {
                        session_id: session_id.to_string(),
                    },
                )
                .await
            }
        }
    }

    /// 删除事件列表（会话记录保留）
    pub async fn delete_events(&self, session_id: &str) -> Result<()> {
        self.delete_keys(session_id, vec![events_key(session_id)])
            .await
    }

    /// 删除会话在各命名空间下的全部数据
    pub async fn delete_all(&self, session_id: &str) -> Result<()> {
        self.delete_keys(
            session_id,
            vec![
                active_key(session_id),
                archived_key(session_id),
                events_key(session_id),
            ],
        )
        .await
    }

    async fn delete_keys(&self, session_id: &str, keys: Vec<String>) -> Result<()> {
        match self.kv.del(&keys).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.divert(
                    session_id,
                    err,
                    ContingencyRecord::Delete {
                        session_id: session_id.to_string(),
                    },
                )
                .await
            }
        }
    }

    /// 写入失败转存应急日志；应急日志失败原样上抛
    async fn divert(
        &self,
        session_id: &str,
        cause: DomainError,
        record: ContingencyRecord,
    ) -> Result<()> {
        tracing::warn!(
            session_id,
            kind = record.kind(),
            error = %cause,
            "staging store write failed, falling back to contingency log"
        );
        self.contingency.append(&[record]).await
    }
}
