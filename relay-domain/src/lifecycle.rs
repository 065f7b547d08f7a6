//! 会话生命周期（SessionLifecycle）
//!
//! 会话的唯一拥有者：负责状态校验与推进，委托暂存存储持久化、委托批次发布器发布，
//! 并通过 `LifecycleNotifier` 发出生命周期通知。
//!
//! 同一会话上的并发 commit/rollback/add_event 不做互斥，以最后落库的状态为准。
//!
use crate::domain_event::LifecycleEvent;
use crate::error::{DomainError, DomainResult as Result};
use crate::event::{EventPayload, StagedEvent};
use crate::eventing::LifecycleNotifier;
use crate::persist::StagingStore;
use crate::publisher::BatchPublisher;
use crate::session::{Session, SessionStatus};
use crate::value_object::{RoutingDescriptor, ValueObject};
use bon::Builder;
use std::sync::Arc;

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub event_count: usize,
}

#[derive(Builder)]
pub struct SessionLifecycle {
    store: Arc<StagingStore>,
    publisher: Arc<BatchPublisher>,
    #[builder(default)]
    notifier: LifecycleNotifier,
}

impl SessionLifecycle {
    pub fn notifier(&self) -> &LifecycleNotifier {
        &self.notifier
    }

    /// 创建会话：校验路由描述、持久化并发出 `session.started`
    pub async fn create(&self, route: RoutingDescriptor) -> Result<Session> {
        route.validate()?;

        let session = Session::open(route);
        self.store.save(&session).await?;

        tracing::info!(session_id = session.id(), topic = session.topic(), "session started");
        self.notifier
            .emit(LifecycleEvent::started(session.id(), session.topic()));
        Ok(session)
    }

    /// 向 `ACTIVE` 会话追加事件
    pub async fn add_event(&self, session_id: &str, payload: EventPayload) -> Result<StagedEvent> {
        let session = self.require(session_id).await?;
        session.ensure_accepts_events()?;

        let event = StagedEvent::ingest(payload);
        self.store.append_event(session_id, &event).await?;

        tracing::debug!(session_id, message_id = event.message_id(), "event staged");
        self.notifier
            .emit(LifecycleEvent::event_added(session_id, event.clone()));
        Ok(event)
    }

    /// 提交：发布全部暂存事件并归档会话
    ///
    /// - 空会话直接 `COMMITTED`，不经过发布器；
    /// - 发布失败时会话置为 `FAILED`（可重试提交），错误返回给调用方。
    pub async fn commit(&self, session_id: &str) -> Result<CommitOutcome> {
        let mut session = self.require(session_id).await?;
        session.ensure_committable()?;

        let events = self.store.list_events(session_id).await;
        if events.is_empty() {
            tracing::warn!(session_id, "session has no events to publish");
            session.transition(SessionStatus::Committed)?;
            return self.finish_commit(session_id, 0).await;
        }

        session.transition(SessionStatus::Processing)?;
        self.store
            .set_status(session_id, SessionStatus::Processing)
            .await?;

        match self
            .publisher
            .publish(session_id, &events, Some(session.topic()))
            .await
        {
            Ok(()) => {
                session.transition(SessionStatus::Committed)?;
                self.finish_commit(session_id, events.len()).await
            }
            Err(err) => {
                tracing::error!(session_id, error = %err, "commit failed");
                self.store
                    .set_status(session_id, SessionStatus::Failed)
                    .await?;
                Err(err)
            }
        }
    }

    async fn finish_commit(&self, session_id: &str, event_count: usize) -> Result<CommitOutcome> {
        self.store
            .set_status(session_id, SessionStatus::Committed)
            .await?;
        self.store.archive(session_id).await?;

        tracing::info!(session_id, event_count, "session committed");
        self.notifier
            .emit(LifecycleEvent::committed(session_id, event_count));
        Ok(CommitOutcome {
            session_id: session_id.to_string(),
            status: SessionStatus::Committed,
            event_count,
        })
    }

    /// 回滚：任意状态均可，重复回滚无副作用
    ///
    /// 返回回滚前的状态，调用方据此判断会话此前是否仍处于打开状态。
    pub async fn rollback(&self, session_id: &str) -> Result<SessionStatus> {
        let mut session = self.require(session_id).await?;
        let prior = session.status();
        session.transition(SessionStatus::RolledBack)?;

        self.store
            .set_status(session_id, SessionStatus::RolledBack)
            .await?;
        self.store.archive(session_id).await?;
        self.store.delete_events(session_id).await?;

        tracing::info!(session_id, %prior, "session rolled back");
        self.notifier.emit(LifecycleEvent::rolled_back(session_id));
        Ok(prior)
    }

    pub async fn status(&self, session_id: &str) -> Result<Session> {
        self.require(session_id).await
    }

    /// 会话存在时返回其事件（按插入顺序）
    pub async fn events(&self, session_id: &str) -> Result<Vec<StagedEvent>> {
        self.require(session_id).await?;
        Ok(self.store.list_events(session_id).await)
    }

    /// 管理操作：清除会话的全部数据
    pub async fn purge(&self, session_id: &str) -> Result<()> {
        self.store.delete_all(session_id).await?;
        tracing::info!(session_id, "session purged");
        Ok(())
    }

    async fn require(&self, session_id: &str) -> Result<Session> {
        self.store
            .find_by_id(session_id)
            .await
            .ok_or_else(|| DomainError::not_found(format!("session {session_id} not found")))
    }
}
