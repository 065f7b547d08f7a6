use crate::{
    InMemoryCommandBus, InMemoryQueryBus,
    command::Command,
    command_bus::CommandBus,
    commands::{
        AddEvent, AddEventHandler, ClearConsumedMessages, ClearConsumedMessagesHandler,
        CommitSession, CommitSessionHandler, DeleteConsumedMessage, DeleteConsumedMessageHandler,
        PurgeSession, PurgeSessionHandler, RollbackSession, RollbackSessionHandler, StartSession,
        StartSessionHandler,
    },
    context::AppContext,
    error::{AppError, ErrorKind},
    queries::{
        GetConsumedMessage, GetConsumedMessageHandler, GetMetrics, GetMetricsHandler,
        GetSessionEvents, GetSessionEventsHandler, GetSessionStatus, GetSessionStatusHandler,
        ListConsumedMessages, ListConsumedMessagesHandler,
    },
    query::Query,
    query_bus::QueryBus,
};
use relay_domain::lifecycle::SessionLifecycle;
use relay_domain::metrics::MetricsAggregator;
use relay_domain::persist::ConsumedMessageStore;
use std::sync::Arc;

/// 会话编排器：边界层的唯一入口
///
/// 构造时把全部会话与已消费消息的命令/查询处理器注册到进程内总线，
/// 之后通过 `execute` / `query` 按类型分发。
pub struct SessionOrchestrator {
    commands: InMemoryCommandBus,
    queries: InMemoryQueryBus,
}

impl SessionOrchestrator {
    pub fn new(
        lifecycle: Arc<SessionLifecycle>,
        metrics: Arc<MetricsAggregator>,
        consumed: Arc<ConsumedMessageStore>,
    ) -> Result<Self, AppError> {
        let commands = InMemoryCommandBus::new();
        commands.register::<StartSession, _>(Arc::new(StartSessionHandler {
            lifecycle: lifecycle.clone(),
            metrics: metrics.clone(),
        }))?;
        commands.register::<AddEvent, _>(Arc::new(AddEventHandler {
            lifecycle: lifecycle.clone(),
        }))?;
        commands.register::<CommitSession, _>(Arc::new(CommitSessionHandler {
            lifecycle: lifecycle.clone(),
            metrics: metrics.clone(),
        }))?;
        commands.register::<RollbackSession, _>(Arc::new(RollbackSessionHandler {
            lifecycle: lifecycle.clone(),
            metrics: metrics.clone(),
        }))?;
        commands.register::<PurgeSession, _>(Arc::new(PurgeSessionHandler {
            lifecycle: lifecycle.clone(),
        }))?;
        commands.register::<DeleteConsumedMessage, _>(Arc::new(DeleteConsumedMessageHandler {
            consumed: consumed.clone(),
        }))?;
        commands.register::<ClearConsumedMessages, _>(Arc::new(ClearConsumedMessagesHandler {
            consumed: consumed.clone(),
        }))?;

        let queries = InMemoryQueryBus::new();
        queries.register::<GetSessionStatus, _>(Arc::new(GetSessionStatusHandler {
            lifecycle: lifecycle.clone(),
        }))?;
        queries.register::<GetSessionEvents, _>(Arc::new(GetSessionEventsHandler {
            lifecycle,
        }))?;
        queries.register::<GetMetrics, _>(Arc::new(GetMetricsHandler { metrics }))?;
        queries.register::<ListConsumedMessages, _>(Arc::new(ListConsumedMessagesHandler {
            consumed: consumed.clone(),
        }))?;
        queries.register::<GetConsumedMessage, _>(Arc::new(GetConsumedMessageHandler {
            consumed,
        }))?;

        Ok(Self { commands, queries })
    }

    pub async fn execute<C: Command>(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError> {
        self.commands
            .dispatch(ctx, cmd)
            .await
            .inspect_err(|err| log_failure(C::NAME, ctx, err))
    }

    pub async fn query<Q: Query>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError> {
        self.queries
            .dispatch(ctx, q)
            .await
            .inspect_err(|err| log_failure(Q::NAME, ctx, err))
    }

    pub fn command_bus(&self) -> &InMemoryCommandBus {
        &self.commands
    }

    pub fn query_bus(&self) -> &InMemoryQueryBus {
        &self.queries
    }
}

fn log_failure(name: &'static str, ctx: &AppContext, err: &AppError) {
    match err.kind() {
        ErrorKind::Internal => tracing::error!(
            operation = name,
            correlation_id = ?ctx.correlation_id,
            error = %err,
            "request failed"
        ),
        kind => tracing::debug!(
            operation = name,
            correlation_id = ?ctx.correlation_id,
            status = kind.status_code(),
            error = %err,
            "request rejected"
        ),
    }
}
