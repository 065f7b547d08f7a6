//! 消息总线（MessageBus）协议
//!
//! 定义向下游主题发布消息的统一抽象，对消费者提供“至少一次”语义。
//! 批量发布默认逐条发送，实现方可覆盖为原生批量接口。
//!
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 已发布到某一主题的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// 消息总线：负责将消息投递到指定主题
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &Value) -> Result<()>;

    async fn publish_batch(&self, topic: &str, messages: &[Value]) -> Result<()> {
        for message in messages {
            self.publish(topic, message).await?;
        }
        Ok(())
    }
}
