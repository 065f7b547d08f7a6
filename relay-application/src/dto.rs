use chrono::{DateTime, Utc};
use relay_domain::event::StagedEvent;
use relay_domain::lifecycle::CommitOutcome;
use relay_domain::metrics::{FailureRecord, Metrics};
use relay_domain::persist::ConsumedMessage;
use relay_domain::session::{Session, SessionStatus};
use serde::Serialize;

/// 数据传输对象（DTO）
///
/// - 作为应用层的输出载体，面向接口/外部系统序列化友好；
/// - 与领域模型解耦，避免将领域对象直接暴露到接口层。
pub trait Dto: Serialize + Send + Sync + 'static {}

/// 开启会话的响应
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub topic: String,
    pub message: String,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id().to_string(),
            topic: session.topic().to_string(),
            message: "Session started successfully".to_string(),
        }
    }
}

impl Dto for SessionResponse {}

/// 事件受理回执
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReceipt {
    pub session_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Dto for EventReceipt {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub session_id: String,
    pub status: SessionStatus,
    pub event_count: usize,
}

impl From<CommitOutcome> for CommitReceipt {
    fn from(outcome: CommitOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            status: outcome.status,
            event_count: outcome.event_count,
        }
    }
}

impl Dto for CommitReceipt {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusDto {
    pub session_id: String,
    pub status: SessionStatus,
    pub event_count: u64,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionStatusDto {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id().to_string(),
            status: session.status(),
            event_count: session.event_count(),
            topic: session.topic().to_string(),
            created_at: session.created_at(),
            updated_at: session.updated_at(),
            archived_at: session.archived_at(),
        }
    }
}

impl Dto for SessionStatusDto {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventsDto {
    pub session_id: String,
    pub events: Vec<StagedEvent>,
}

impl Dto for SessionEventsDto {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDto {
    pub total_events: u64,
    pub success_rate: f64,
    pub average_duration: f64,
    pub events_per_minute: f64,
    pub dead_letter_count: u64,
    pub recent_failures: Vec<FailureRecord>,
    pub active_sessions: i64,
}

impl From<Metrics> for MetricsDto {
    fn from(m: Metrics) -> Self {
        Self {
            total_events: m.total_events,
            success_rate: m.success_rate,
            average_duration: m.average_duration,
            events_per_minute: m.events_per_minute,
            dead_letter_count: m.dead_letter_count,
            recent_failures: m.recent_failures,
            active_sessions: m.active_sessions,
        }
    }
}

impl Dto for MetricsDto {}

impl Dto for ConsumedMessage {}

/// 已消费消息分页，`total` 为索引中的总条数
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedMessagesDto {
    pub messages: Vec<ConsumedMessage>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

impl Dto for ConsumedMessagesDto {}
