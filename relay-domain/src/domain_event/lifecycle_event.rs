use super::DomainEvent;
use crate::event::StagedEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话生命周期通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: String,
        topic: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "event.added")]
    EventAdded {
        session_id: String,
        event: StagedEvent,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "session.committed")]
    SessionCommitted {
        session_id: String,
        event_count: usize,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "session.rolledback")]
    SessionRolledBack {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub const SESSION_STARTED: &'static str = "session.started";
    pub const EVENT_ADDED: &'static str = "event.added";
    pub const SESSION_COMMITTED: &'static str = "session.committed";
    pub const SESSION_ROLLED_BACK: &'static str = "session.rolledback";

    pub fn started(session_id: &str, topic: &str) -> Self {
        Self::SessionStarted {
            session_id: session_id.to_string(),
            topic: topic.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn event_added(session_id: &str, event: StagedEvent) -> Self {
        Self::EventAdded {
            session_id: session_id.to_string(),
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn committed(session_id: &str, event_count: usize) -> Self {
        Self::SessionCommitted {
            session_id: session_id.to_string(),
            event_count,
            timestamp: Utc::now(),
        }
    }

    pub fn rolled_back(session_id: &str) -> Self {
        Self::SessionRolledBack {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::SessionStarted { timestamp, .. }
            | LifecycleEvent::EventAdded { timestamp, .. }
            | LifecycleEvent::SessionCommitted { timestamp, .. }
            | LifecycleEvent::SessionRolledBack { timestamp, .. } => *timestamp,
        }
    }
}

impl DomainEvent for LifecycleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::SessionStarted { .. } => Self::SESSION_STARTED,
            LifecycleEvent::EventAdded { .. } => Self::EVENT_ADDED,
            LifecycleEvent::SessionCommitted { .. } => Self::SESSION_COMMITTED,
            LifecycleEvent::SessionRolledBack { .. } => Self::SESSION_ROLLED_BACK,
        }
    }

    fn session_id(&self) -> &str {
        match self {
            LifecycleEvent::SessionStarted { session_id, .. }
            | LifecycleEvent::EventAdded { session_id, .. }
            | LifecycleEvent::SessionCommitted { session_id, .. }
            | LifecycleEvent::SessionRolledBack { session_id, .. } => session_id,
        }
    }
}
