//! nsqd HTTP 消息总线（NsqHttpBus）
//!
//! 通过 nsqd 的 HTTP 接口发布：单条走 `/pub`，批量走 `/mpub`（换行分隔）。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::eventing::MessageBus;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Clone)]
pub struct NsqHttpBus {
    client: reqwest::Client,
    base_url: String,
}

impl NsqHttpBus {
    /// `addr` 形如 `127.0.0.1:4151` 或完整的 `http://host:port`
    pub fn new(addr: &str) -> Self {
        let base_url = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", addr.trim_end_matches('/'))
        };

        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post(&self, path: &str, topic: &str, body: String) -> Result<()> {
        let failure = |reason: String| DomainError::PublishFailure {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .post(format!("{}/{}", self.base_url, path))
            .query(&[("topic", topic)])
            .body(body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| failure(e.to_string()))?;

        tracing::debug!(topic, path, "nsqd accepted message(s)");
        Ok(())
    }
}

#[async_trait]
impl MessageBus for NsqHttpBus {
    async fn publish(&self, topic: &str, message: &Value) -> Result<()> {
        self.post("pub", topic, serde_json::to_string(message)?).await
    }

    async fn publish_batch(&self, topic: &str, messages: &[Value]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let lines = messages
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.post("mpub", topic, lines.join("\n")).await
    }
}
