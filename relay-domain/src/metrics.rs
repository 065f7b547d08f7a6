//! 处理指标（MetricsAggregator）
//!
//! - `metrics:processing`：处理记录有序集合（分值为毫秒时间戳），写入时清理 7 天前的记录；
//! - `failures:recent`：失败记录环，写入时只保留最新 100 条；
//! - `metrics:active_sessions`：活跃会话计数。
//!
//! `get_metrics` 基于最近一小时的处理记录计算。
//!
use crate::error::DomainResult as Result;
use crate::persist::KvStore;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const PROCESSING_KEY: &str = "metrics:processing";
pub const FAILURES_KEY: &str = "failures:recent";
pub const ACTIVE_SESSIONS_KEY: &str = "metrics:active_sessions";

/// 单次批次处理记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event_count: u64,
    /// 毫秒
    pub duration: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub error: String,
    pub event_count: u64,
}

/// 指标快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_events: u64,
    /// 百分比，0–100
    pub success_rate: f64,
    /// 每条处理记录的平均耗时（毫秒）
    pub average_duration: f64,
    pub events_per_minute: f64,
    pub dead_letter_count: u64,
    pub recent_failures: Vec<FailureRecord>,
    pub active_sessions: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    pub window: Duration,
    pub retention: Duration,
    pub failure_ring: usize,
    pub recent_failures: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            failure_ring: 100,
            recent_failures: 10,
        }
    }
}

#[derive(Builder)]
pub struct MetricsAggregator {
    kv: Arc<dyn KvStore>,
    #[builder(default)]
    config: MetricsConfig,
}

impl MetricsAggregator {
    /// 写入处理记录，并清理保留期之外的旧记录
    pub async fn record_processing(&self, record: ProcessingRecord) -> Result<()> {
        let score = record.timestamp.timestamp_millis();
        let member = serde_json::to_string(&record)?;
        self.kv.zadd(PROCESSING_KEY, score, &member).await?;

        let cutoff = Utc::now().timestamp_millis() - millis(self.config.retention);
        self.kv.zrem_range_by_score(PROCESSING_KEY, 0, cutoff).await
    }

    pub async fn record_success(
        &self,
        session_id: &str,
        event_count: u64,
        duration: Duration,
    ) -> Result<()> {
        self.record_processing(ProcessingRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            event_count,
            duration: duration.as_millis() as u64,
            success: true,
        })
        .await
    }

    /// 写入失败记录环，只保留最新的 `failure_ring` 条
    pub async fn record_failure(
        &self,
        session_id: &str,
        error: &str,
        event_count: u64,
    ) -> Result<()> {
        let record = FailureRecord {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            error: error.to_string(),
            event_count,
        };
        let member = serde_json::to_string(&record)?;
        self.kv
            .zadd(FAILURES_KEY, record.timestamp.timestamp_millis(), &member)
            .await?;

        let keep = self.config.failure_ring as i64;
        self.kv.zrem_range_by_rank(FAILURES_KEY, 0, -(keep + 1)).await?;

        tracing::error!(session_id, error, event_count, "batch processing failure recorded");
        Ok(())
    }

    pub async fn get_metrics(&self) -> Result<Metrics> {
        let now = Utc::now().timestamp_millis();
        let since = now - millis(self.config.window);

        let records: Vec<ProcessingRecord> = self
            .kv
            .zrange_by_score(PROCESSING_KEY, since, now)
            .await?
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();

        let total_events: u64 = records.iter().map(|r| r.event_count).sum();
        let successful_events: u64 = records
            .iter()
            .filter(|r| r.success)
            .map(|r| r.event_count)
            .sum();
        let total_duration: u64 = records.iter().map(|r| r.duration).sum();

        let success_rate = if total_events > 0 {
            successful_events as f64 / total_events as f64 * 100.0
        } else {
            0.0
        };
        let average_duration = if records.is_empty() {
            0.0
        } else {
            total_duration as f64 / records.len() as f64
        };
        let window_minutes = (self.config.window.as_secs_f64() / 60.0).max(1.0);

        Ok(Metrics {
            total_events,
            success_rate,
            average_duration,
            events_per_minute: total_events as f64 / window_minutes,
            dead_letter_count: self.kv.zcard(FAILURES_KEY).await?,
            recent_failures: self.recent_failures().await?,
            active_sessions: self.active_sessions().await?,
        })
    }

    /// 最新的若干条失败记录，新的在前
    pub async fn recent_failures(&self) -> Result<Vec<FailureRecord>> {
        let stop = self.config.recent_failures as i64 - 1;
        Ok(self
            .kv
            .zrevrange(FAILURES_KEY, 0, stop)
            .await?
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    pub async fn active_sessions(&self) -> Result<i64> {
        match self.kv.get(ACTIVE_SESSIONS_KEY).await? {
            Some(v) => Ok(v.parse()?),
            None => Ok(0),
        }
    }

    /// 后台自增活跃会话计数，调用方无需等待
    pub fn increment_active_sessions(&self) -> JoinHandle<()> {
        self.bump_active_sessions(1)
    }

    pub fn decrement_active_sessions(&self) -> JoinHandle<()> {
        self.bump_active_sessions(-1)
    }

    fn bump_active_sessions(&self, delta: i64) -> JoinHandle<()> {
        let kv = self.kv.clone();
        tokio::spawn(async move {
            if let Err(err) = kv.incr(ACTIVE_SESSIONS_KEY, delta).await {
                tracing::warn!(delta, error = %err, "active session gauge update failed");
            }
        })
    }
}

fn millis(d: Duration) -> i64 {
    d.as_millis() as i64
}
