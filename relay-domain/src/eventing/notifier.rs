//! 生命周期通知通道（LifecycleNotifier）
//!
//! 生命周期管理器只负责 `emit`，订阅者各自 `subscribe` 获得独立的通知流，
//! 发布方不感知订阅方是谁、有多少。无订阅者时通知被丢弃。
//!
use crate::domain_event::{DomainEvent, LifecycleEvent};
use crate::error::{DomainError, DomainResult as Result};
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct LifecycleNotifier {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LifecycleNotifier {
    /// `capacity` 为广播缓冲区容量，慢订阅者超出后会收到 lag 错误
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 发布通知，不阻塞调用方
    pub fn emit(&self, event: LifecycleEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            "lifecycle notification"
        );
        let _ = self.tx.send(event);
    }

    /// 返回一个 'static 生命周期的通知流，便于在 tokio::spawn 中使用
    pub fn subscribe(&self) -> BoxStream<'static, Result<LifecycleEvent>> {
        let rx = self.tx.subscribe();
        Box::pin(
            BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::event_bus(e.to_string()))),
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
