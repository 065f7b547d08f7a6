//! 应急日志（ContingencyLog）
//!
//! 暂存存储或消息总线不可用时，把“本应完成的变更”以 NDJSON 追加到本地文件，
//! 供人工恢复。每行一条记录，以 `type` 字段区分种类。写入在进程内串行化，
//! 并在返回前 flush + sync。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::event::StagedEvent;
use crate::session::SessionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// 应急记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContingencyRecord {
    /// 会话记录写入
    Session { data: Value },
    /// 单条事件追加
    Event { session_id: String, data: StagedEvent },
    StatusUpdate {
        session_id: String,
        status: SessionStatus,
    },
    MoveToArchive { session_id: String },
    Delete { session_id: String },
    /// 发布中断后未送达的事件
    Batch {
        session_id: String,
        topic: String,
        events: Vec<StagedEvent>,
    },
}

impl ContingencyRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Event { .. } => "event",
            Self::StatusUpdate { .. } => "status_update",
            Self::MoveToArchive { .. } => "move_to_archive",
            Self::Delete { .. } => "delete",
            Self::Batch { .. } => "batch",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContingencyConfig {
    pub path: PathBuf,
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./contingency-log.jsonl"),
        }
    }
}

#[derive(Debug)]
pub struct ContingencyLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ContingencyLog {
    /// 打开应急日志，必要时创建父目录（文件在首次写入时创建）
    pub async fn open(config: ContingencyConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_failure(&config.path, e))?;
        }

        Ok(Self {
            path: config.path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加记录；失败即致命错误，不再有后备
    pub async fn append(&self, records: &[ContingencyRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|e| DomainError::ContingencyWrite {
                reason: e.to_string(),
            })?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| write_failure(&self.path, e))?;
        file.write_all(&buf)
            .await
            .map_err(|e| write_failure(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| write_failure(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| write_failure(&self.path, e))?;

        for record in records {
            tracing::warn!(
                kind = record.kind(),
                path = %self.path.display(),
                "mutation diverted to contingency log"
            );
        }
        Ok(())
    }

    /// 读取全部记录；文件不存在视为空
    pub async fn read_all(&self) -> Result<Vec<ContingencyRecord>> {
        let _guard = self.write_lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(DomainError::Parse {
                    reason: format!("{}: {e}", self.path.display()),
                });
            }
        };

        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| DomainError::Parse {
                reason: format!("{}:{}: {e}", self.path.display(), idx + 1),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// 人工恢复完成后清空
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::File::create(&self.path).await {
            Ok(file) => file
                .sync_all()
                .await
                .map_err(|e| write_failure(&self.path, e)),
            Err(e) => Err(write_failure(&self.path, e)),
        }
    }
}

fn write_failure(path: &Path, err: std::io::Error) -> DomainError {
    DomainError::ContingencyWrite {
        reason: format!("{}: {err}", path.display()),
    }
}
