//! 内存版消息总线（InMemoryMessageBus）
//!
//! 基于 `tokio::sync::broadcast` 实现的轻量总线，满足 `MessageBus` 协议：
//! - `publish`：克隆并广播消息；
//! - `subscribe`：返回 `'static` 生命周期消息流，便于在 `tokio::spawn` 中使用；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：若当前无订阅者，消息将被丢弃。

use crate::error::{DomainError, DomainResult as Result};
use crate::eventing::{BusMessage, MessageBus};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// 简单的内存消息总线实现
#[derive(Clone)]
pub struct InMemoryMessageBus {
    tx: broadcast::Sender<BusMessage>,
}

impl InMemoryMessageBus {
    /// 创建一个内存总线，`capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 订阅全部主题的消息流
    pub fn subscribe(&self) -> BoxStream<'static, Result<BusMessage>> {
        let rx = self.tx.subscribe();
        let stream =
            BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::event_bus(e.to_string())));
        Box::pin(stream)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, message: &Value) -> Result<()> {
        // 若当前无订阅者，broadcast 的 send 会返回错误，这里视为非致命并忽略
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload: message.clone(),
        });
        Ok(())
    }
}
