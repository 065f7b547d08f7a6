//! 通知处理器（LifecycleHandler）
//!
//! 定义消费某类/多类/全部生命周期通知的处理逻辑与元信息（名称、订阅类型）。
//!
use crate::domain_event::LifecycleEvent;
use crate::error::DomainResult;
use async_trait::async_trait;

#[derive(Clone, Debug)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

/// 通知处理器：处理某一类型的生命周期通知
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// 处理器名称（用于失败日志）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的通知类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 处理通知
    async fn handle(&self, event: &LifecycleEvent) -> DomainResult<()>;
}
