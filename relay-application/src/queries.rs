use crate::{
    context::AppContext,
    dto::{ConsumedMessagesDto, MetricsDto, SessionEventsDto, SessionStatusDto},
    error::AppError,
    query::{Query, QueryHandler},
};
use async_trait::async_trait;
use relay_domain::lifecycle::SessionLifecycle;
use relay_domain::error::DomainError;
use relay_domain::metrics::MetricsAggregator;
use relay_domain::persist::{ConsumedMessage, ConsumedMessageStore};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GetSessionStatus {
    pub session_id: String,
}

impl Query for GetSessionStatus {
    const NAME: &'static str = "GetSessionStatus";
    type Dto = SessionStatusDto;
}

/// 会话不存在时返回 NotFound，而不是空列表
#[derive(Debug, Clone)]
pub struct GetSessionEvents {
    pub session_id: String,
}

impl Query for GetSessionEvents {
    const NAME: &'static str = "GetSessionEvents";
    type Dto = SessionEventsDto;
}

#[derive(Debug, Clone, Default)]
pub struct GetMetrics;

impl Query for GetMetrics {
    const NAME: &'static str = "GetMetrics";
    type Dto = MetricsDto;
}

/// 已消费消息列表，新的在前；默认 `limit = 100`、`offset = 0`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListConsumedMessages {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListConsumedMessages {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Query for ListConsumedMessages {
    const NAME: &'static str = "ListConsumedMessages";
    type Dto = ConsumedMessagesDto;
}

#[derive(Debug, Clone)]
pub struct GetConsumedMessage {
    pub message_id: String,
}

impl Query for GetConsumedMessage {
    const NAME: &'static str = "GetConsumedMessage";
    type Dto = ConsumedMessage;
}

pub struct GetSessionStatusHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
}

#[async_trait]
impl QueryHandler<GetSessionStatus> for GetSessionStatusHandler {
    async fn handle(&self, _ctx: &AppContext, q: GetSessionStatus) -> Result<SessionStatusDto, AppError> {
        let session = self.lifecycle.status(&q.session_id).await?;
        Ok(SessionStatusDto::from(&session))
    }
}

pub struct GetSessionEventsHandler {
    pub(crate) lifecycle: Arc<SessionLifecycle>,
}

#[async_trait]
impl QueryHandler<GetSessionEvents> for GetSessionEventsHandler {
    async fn handle(&self, _ctx: &AppContext, q: GetSessionEvents) -> Result<SessionEventsDto, AppError> {
        let events = self.lifecycle.events(&q.session_id).await?;
        Ok(SessionEventsDto {
            session_id: q.session_id,
            events,
        })
    }
}

pub struct GetMetricsHandler {
    pub(crate) metrics: Arc<MetricsAggregator>,
}

#[async_trait]
impl QueryHandler<GetMetrics> for GetMetricsHandler {
    async fn handle(&self, _ctx: &AppContext, _q: GetMetrics) -> Result<MetricsDto, AppError> {
        Ok(self.metrics.get_metrics().await?.into())
    }
}

pub struct ListConsumedMessagesHandler {
    pub(crate) consumed: Arc<ConsumedMessageStore>,
}

#[async_trait]
impl QueryHandler<ListConsumedMessages> for ListConsumedMessagesHandler {
    async fn handle(
        &self,
        _ctx: &AppContext,
        q: ListConsumedMessages,
    ) -> Result<ConsumedMessagesDto, AppError> {
        let messages = self.consumed.list(q.limit, q.offset).await?;
        Ok(ConsumedMessagesDto {
            messages,
            total: self.consumed.count().await?,
            limit: q.limit,
            offset: q.offset,
        })
    }
}

pub struct GetConsumedMessageHandler {
    pub(crate) consumed: Arc<ConsumedMessageStore>,
}

#[async_trait]
impl QueryHandler<GetConsumedMessage> for GetConsumedMessageHandler {
    async fn handle(&self, _ctx: &AppContext, q: GetConsumedMessage) -> Result<ConsumedMessage, AppError> {
        self.consumed
            .get(&q.message_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("message {}", q.message_id)).into())
    }
}
