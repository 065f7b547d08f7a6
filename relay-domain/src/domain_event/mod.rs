//! 领域事件（Domain Event）
//!
//! 定义生命周期通知需要实现的最小接口（`DomainEvent`），
//! 以及会话生命周期管理器对外广播的通知类型 `LifecycleEvent`。

mod domain_event_trait;
mod lifecycle_event;

pub use domain_event_trait::DomainEvent;
pub use lifecycle_event::LifecycleEvent;
