use serde::Serialize;
use std::fmt;

/// 领域事件载荷需要满足的通用能力边界
pub trait DomainEvent: Clone + fmt::Debug + Serialize + Send + Sync {
    /// 事件类型（形如 `session.started`）
    fn event_type(&self) -> &'static str;

    /// 事件归属的会话
    fn session_id(&self) -> &str;
}
