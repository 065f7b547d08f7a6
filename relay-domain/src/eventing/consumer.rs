//! 消息消费者（MessageConsumer）
//!
//! 订阅下游主题的消息流，逐条写入 `ConsumedMessageStore`：
//! - `start`：消费任意已解码的消息流（如 nsqd 读取器，见 `nsq` feature）；
//! - `start_on`：直接订阅 `InMemoryMessageBus`，用于本地开发与测试；
//! - 写入失败只记日志，不中断消费。
//!
use super::{BusMessage, EngineHandle, InMemoryMessageBus};
use crate::error::DomainResult as Result;
use crate::persist::{ConsumedMessage, ConsumedMessageStore};
use bon::Builder;
use chrono::Utc;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Builder)]
pub struct MessageConsumer {
    store: Arc<ConsumedMessageStore>,
    #[builder(into, default = String::from("events_channel"))]
    channel: String,
}

impl MessageConsumer {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 订阅内存总线；订阅在返回前完成
    pub fn start_on(self: Arc<Self>, bus: &InMemoryMessageBus) -> EngineHandle {
        let channel = self.channel.clone();
        let stream = bus
            .subscribe()
            .map(move |r| r.map(|msg| received(msg, &channel)))
            .boxed();
        self.start(stream)
    }

    pub fn start(self: Arc<Self>, stream: BoxStream<'static, Result<ConsumedMessage>>) -> EngineHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.consume_loop(stream, token.clone()));
        EngineHandle::new(token, vec![task])
    }

    async fn consume_loop(
        self: Arc<Self>,
        mut stream: BoxStream<'static, Result<ConsumedMessage>>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        if let Err(err) = self.store.store(&message).await {
                            tracing::error!(
                                message_id = %message.id,
                                topic = %message.topic,
                                error = %err,
                                "failed to store consumed message"
                            );
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(channel = %self.channel, error = %err, "consumer stream error");
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(channel = %self.channel, "consumer stopped");
    }
}

/// 总线消息没有独立的消息标识：优先取载荷中的 `messageId`，否则新分配
fn received(msg: BusMessage, channel: &str) -> ConsumedMessage {
    let id = msg
        .payload
        .get("messageId")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ConsumedMessage {
        id,
        topic: msg.topic,
        channel: channel.to_string(),
        data: msg.payload,
        received_at: Utc::now(),
        attempts: 1,
    }
}
