//! 会话（Session）与状态机
//!
//! 会话是暂存事件的有界单元：
//! - `ACTIVE` 接收事件；
//! - 提交路径 `ACTIVE/FAILED → PROCESSING → COMMITTED | FAILED`，空会话可直接 `COMMITTED`；
//! - 回滚可从任意状态进入 `ROLLED_BACK`（终态，可重复回滚）。
//!
//! 会话以扁平哈希字段持久化，`to_fields`/`from_fields` 负责双向转换。
//!
use crate::error::{DomainError, DomainResult};
use crate::value_object::RoutingDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Processing,
    Committed,
    Failed,
    RolledBack,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Processing => "PROCESSING",
            SessionStatus::Committed => "COMMITTED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::RolledBack => "ROLLED_BACK",
        }
    }

    /// 仅 `ACTIVE` 会话接收新事件
    pub fn accepts_events(&self) -> bool {
        matches!(self, SessionStatus::Active)
    }

    /// `FAILED` 允许重新提交
    pub fn can_commit(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Failed)
    }

    /// 仍计入活跃会话：尚未提交成功也未回滚
    pub fn is_open(&self) -> bool {
        !matches!(self, SessionStatus::Committed | SessionStatus::RolledBack)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        match (self, next) {
            (_, RolledBack) => true,
            (Active | Failed, Processing | Committed) => true,
            (Processing, Committed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "PROCESSING" => Ok(SessionStatus::Processing),
            "COMMITTED" => Ok(SessionStatus::Committed),
            "FAILED" => Ok(SessionStatus::Failed),
            "ROLLED_BACK" => Ok(SessionStatus::RolledBack),
            other => Err(DomainError::Parse {
                reason: format!("unknown session status: {other}"),
            }),
        }
    }
}

/// 暂存会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    event_count: u64,
    #[serde(flatten)]
    route: RoutingDescriptor,
    topic: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    archived_at: Option<DateTime<Utc>>,
}

impl Session {
    /// 打开一个新会话：生成标识、派生主题、状态 `ACTIVE`、事件数 0
    pub fn open(route: RoutingDescriptor) -> Self {
        let topic = route.topic();

        Self {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            updated_at: None,
            event_count: 0,
            route,
            topic,
            archived_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn route(&self) -> &RoutingDescriptor {
        &self.route
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn ensure_accepts_events(&self) -> DomainResult<()> {
        if self.status.accepts_events() {
            return Ok(());
        }

        Err(DomainError::invalid_state(format!(
            "session {} is not active (status: {})",
            self.id, self.status
        )))
    }

    pub fn ensure_committable(&self) -> DomainResult<()> {
        if self.status.can_commit() {
            return Ok(());
        }

        Err(DomainError::invalid_state(format!(
            "session {} cannot be committed (status: {})",
            self.id, self.status
        )))
    }

    /// 按状态机推进状态，并刷新 `updated_at`
    pub fn transition(&mut self, next: SessionStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "session {}: illegal transition {} -> {}",
                self.id, self.status, next
            )));
        }

        self.status = next;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// 转换为持久化哈希字段
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("id".to_string(), self.id.clone()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("createdAt".to_string(), self.created_at.to_rfc3339()),
            ("eventCount".to_string(), self.event_count.to_string()),
            (
                "environment".to_string(),
                self.route.environment().to_string(),
            ),
            ("originId".to_string(), self.route.origin_id().to_string()),
            (
                "originTaxId".to_string(),
                self.route.origin_tax_id().to_string(),
            ),
            ("sender".to_string(), self.route.sender().to_string()),
            ("topic".to_string(), self.topic.clone()),
        ];

        if let Some(updated_at) = self.updated_at {
            fields.push(("updatedAt".to_string(), updated_at.to_rfc3339()));
        }
        if let Some(archived_at) = self.archived_at {
            fields.push(("archivedAt".to_string(), archived_at.to_rfc3339()));
        }

        fields
    }

    /// 从持久化哈希字段还原；空哈希视为不存在
    pub fn from_fields(fields: &HashMap<String, String>) -> DomainResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let route = RoutingDescriptor::new(
            required(fields, "environment")?,
            required(fields, "originId")?,
            required(fields, "originTaxId")?,
            required(fields, "sender")?,
        );
        let topic = match fields.get("topic").filter(|t| !t.is_empty()) {
            Some(topic) => topic.clone(),
            None => route.topic(),
        };

        Ok(Some(Self {
            id: required(fields, "id")?.to_string(),
            status: required(fields, "status")?.parse()?,
            created_at: DateTime::parse_from_rfc3339(required(fields, "createdAt")?)?
                .with_timezone(&Utc),
            updated_at: timestamp(fields, "updatedAt")?,
            event_count: required(fields, "eventCount")?.parse()?,
            route,
            topic,
            archived_at: timestamp(fields, "archivedAt")?,
        }))
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> DomainResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DomainError::Parse {
            reason: format!("session field missing: {name}"),
        })
}

fn timestamp(
    fields: &HashMap<String, String>,
    name: &str,
) -> DomainResult<Option<DateTime<Utc>>> {
    match fields.get(name).filter(|v| !v.is_empty()) {
        Some(v) => Ok(Some(DateTime::parse_from_rfc3339(v)?.with_timezone(&Utc))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    fn session() -> Session {
        Session::open(RoutingDescriptor::new("prod", "1", "00", "A"))
    }

    #[test]
    fn open_session_starts_active_and_empty() {
        let s = session();
        assert_eq!(s.status(), Active);
        assert_eq!(s.event_count(), 0);
        assert_eq!(s.topic(), "prod-1-00-A");
        assert!(Uuid::parse_str(s.id()).is_ok());
        assert_ne!(s.id(), session().id());
    }

    #[test]
    fn commit_path_is_monotonic() {
        assert!(Active.can_transition_to(Processing));
        assert!(Active.can_transition_to(Committed));
        assert!(Processing.can_transition_to(Committed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));

        assert!(!Active.can_transition_to(Failed));
        assert!(!Committed.can_transition_to(Processing));
        assert!(!Committed.can_transition_to(Active));
        assert!(!RolledBack.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn rollback_is_reachable_from_every_status() {
        for status in [Active, Processing, Committed, Failed, RolledBack] {
            assert!(status.can_transition_to(RolledBack), "{status}");
        }
    }

    #[test]
    fn only_active_and_failed_are_committable() {
        let mut s = session();
        assert!(s.ensure_committable().is_ok());

        s.transition(Processing).unwrap();
        assert!(matches!(
            s.ensure_committable(),
            Err(DomainError::InvalidState { .. })
        ));
        assert!(matches!(
            s.ensure_accepts_events(),
            Err(DomainError::InvalidState { .. })
        ));

        s.transition(Failed).unwrap();
        assert!(s.ensure_committable().is_ok());
        assert!(s.updated_at().is_some());
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut s = session();
        s.transition(Committed).unwrap();
        let err = s.transition(Processing).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState { .. }));
        assert_eq!(s.status(), Committed);
    }

    #[test]
    fn fields_roundtrip_preserves_session() {
        let mut s = session();
        s.transition(Processing).unwrap();

        let fields: HashMap<String, String> = s.to_fields().into_iter().collect();
        let restored = Session::from_fields(&fields).unwrap().unwrap();

        assert_eq!(restored.id(), s.id());
        assert_eq!(restored.status(), Processing);
        assert_eq!(restored.topic(), s.topic());
        assert_eq!(restored.route(), s.route());
        assert!(restored.updated_at().is_some());
        assert!(restored.archived_at().is_none());
    }

    #[test]
    fn empty_hash_means_absent_and_garbage_is_a_parse_error() {
        assert!(Session::from_fields(&HashMap::new()).unwrap().is_none());

        let mut fields: HashMap<String, String> = session().to_fields().into_iter().collect();
        fields.insert("status".into(), "DONE".into());
        assert!(matches!(
            Session::from_fields(&fields),
            Err(DomainError::Parse { .. })
        ));
    }
}
