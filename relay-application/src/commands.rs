//! 会话命令及其处理器
//!
//! 每个命令对应一个处理器，处理器只做编排：
//! 调用生命周期管理器完成状态推进，并维护活跃会话计数（后台执行，不阻塞响应）。
//! 另有两条针对已消费消息存储的管理命令。
//!
use crate::{
    command::{Command, CommandHandler},
    context::AppContext,
    dto::{CommitReceipt, EventReceipt, SessionResponse},
    error::AppError,
};
use async_trait::async_trait;
use relay_domain::event::EventPayload;
use relay_domain::lifecycle::SessionLifecycle;
use relay_domain::metrics::MetricsAggregator;
use relay_domain::persist::ConsumedMessageStore;
use relay_domain::value_object::RoutingDescriptor;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub environment: String,
    pub origin_id: String,
    pub origin_tax_id: String,
    pub sender: String,
}

impl Command for StartSession {
    const NAME: &'static str = "StartSession";
    type Output = SessionResponse;
}

#[derive(Debug, Clone)]
pub struct AddEvent {
    pub session_id: String,
    pub payload: EventPayload,
}

impl Command for AddEvent {
    const NAME: &'static str = "AddEvent";
    type Output = EventReceipt;
}

#[derive(Debug, Clone)]
pub struct CommitSession {
    pub session_id: String,
}

impl Command for CommitSession {
    const NAME: &'static str = "CommitSession";
    type Output = CommitReceipt;
}

#[derive(Debug, Clone)]
pub struct RollbackSession {
    pub session_id: String,
}

impl Command for RollbackSession {
    const NAME: &'static str = "RollbackSession";
    type Output = ();
}

/// 管理操作：删除会话在各命名空间下的全部数据
#[derive(Debug, Clone)]
pub struct PurgeSession {
    pub session_id: String,
}

impl Command for PurgeSession {
    const NAME: &'static str = "PurgeSession";
    type Output = ();
}

/// 删除一条已消费消息；消息不存在不是错误
#[derive(Debug, Clone)]
pub struct DeleteConsumedMessage {
    pub message_id: String,
}

impl Command for DeleteConsumedMessage {
    const NAME: &'static str = "DeleteConsumedMessage";
    type Output = ();
}

/// 清空已消费消息，返回删除的条数
#[derive(Debug, Clone, Default)]
pub struct ClearConsumedMessages;

impl Command for ClearConsumedMessages {
    const NAME: &'static str = "ClearConsumedMessages";
    type Output = usize;
}

pub struct StartSessionHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
    pub(crate) metrics: Arc<MetricsAggregator>,
}

#[async_trait]
impl CommandHandler<StartSession> for StartSessionHandler {
    async fn handle(&self, ctx: &AppContext, cmd: StartSession) -> Result<SessionResponse, AppError> {
        let route = RoutingDescriptor::new(
            cmd.environment,
            cmd.origin_id,
            cmd.origin_tax_id,
            cmd.sender,
        );
        let session = self.lifecycle.create(route).await?;
        let _ = self.metrics.increment_active_sessions();

        tracing::info!(
            session_id = session.id(),
            actor_id = ?ctx.actor_id,
            correlation_id = ?ctx.correlation_id,
            "session started"
        );
        Ok(SessionResponse::from(&session))
    }
}

pub struct AddEventHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
}

#[async_trait]
impl CommandHandler<AddEvent> for AddEventHandler {
    async fn handle(&self, _ctx: &AppContext, cmd: AddEvent) -> Result<EventReceipt, AppError> {
        let event = self
            .lifecycle
            .add_event(&cmd.session_id, cmd.payload)
            .await?;

        Ok(EventReceipt {
            session_id: cmd.session_id,
            message_id: event.message_id().to_string(),
            timestamp: event.timestamp(),
        })
    }
}

pub struct CommitSessionHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
    pub(crate) metrics: Arc<MetricsAggregator>,
}

#[async_trait]
impl CommandHandler<CommitSession> for CommitSessionHandler {
    async fn handle(&self, ctx: &AppContext, cmd: CommitSession) -> Result<CommitReceipt, AppError> {
        let outcome = match self.lifecycle.commit(&cmd.session_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_fatal() {
                    tracing::error!(
                        session_id = %cmd.session_id,
                        correlation_id = ?ctx.correlation_id,
                        error = %err,
                        "contingency log unavailable"
                    );
                }
                return Err(err.into());
            }
        };
        let _ = self.metrics.decrement_active_sessions();

        Ok(CommitReceipt::from(outcome))
    }
}

pub struct RollbackSessionHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
    pub(crate) metrics: Arc<MetricsAggregator>,
}

#[async_trait]
impl CommandHandler<RollbackSession> for RollbackSessionHandler {
    async fn handle(&self, _ctx: &AppContext, cmd: RollbackSession) -> Result<(), AppError> {
        let prior = self.lifecycle.rollback(&cmd.session_id).await?;
        if prior.is_open() {
            let _ = self.metrics.decrement_active_sessions();
        }
        Ok(())
    }
}

pub struct PurgeSessionHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
}

#[async_trait]
impl CommandHandler<PurgeSession> for PurgeSessionHandler {
    async fn handle(&self, ctx: &AppContext, cmd: PurgeSession) -> Result<(), AppError> {
        tracing::warn!(session_id = %cmd.session_id, actor_id = ?ctx.actor_id, "purging session");
        Ok(self.lifecycle.purge(&cmd.session_id).await?)
    }
}

pub struct DeleteConsumedMessageHandler {
    pub(crate) consumed: Arc<ConsumedMessageStore>,
}

#[async_trait]
impl CommandHandler<DeleteConsumedMessage> for DeleteConsumedMessageHandler {
    async fn handle(&self, _ctx: &AppContext, cmd: DeleteConsumedMessage) -> Result<(), AppError> {
        Ok(self.consumed.delete(&cmd.message_id).await?)
    }
}

pub struct ClearConsumedMessagesHandler {
    pub(crate) consumed: Arc<ConsumedMessageStore>,
}

#[async_trait]
impl CommandHandler<ClearConsumedMessages> for ClearConsumedMessagesHandler {
    async fn handle(&self, ctx: &AppContext, _cmd: ClearConsumedMessages) -> Result<usize, AppError> {
        tracing::warn!(actor_id = ?ctx.actor_id, "clearing consumed messages");
        Ok(self.consumed.clear().await?)
    }
}
