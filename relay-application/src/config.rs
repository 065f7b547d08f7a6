//! 运行配置（RelayConfig）
//!
//! 从环境变量读取：
//! - `CONTINGENCY_FILE_PATH`：应急日志路径，默认 `./contingency-log.jsonl`
//! - `NSQ_TOPIC`：未指定主题时的默认发布主题，默认 `events`
//! - `PUBLISH_BATCH_SIZE`：单批事件数，默认 10
//! - `REDIS_URL`：设置后使用 Redis 键值存储
//! - `NSQD_HTTP_ADDR`：设置后通过 nsqd HTTP 接口发布
//! - `NSQD_TCP_ADDR`：设置后以 nsqd TCP 协议消费 `NSQ_TOPIC`
//! - `NSQ_CHANNEL`：消费所用的通道，默认 `events_channel`
//!
use crate::error::AppError;
use relay_domain::persist::ContingencyConfig;
use relay_domain::publisher::PublisherConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub contingency_path: PathBuf,
    pub default_topic: String,
    pub batch_size: usize,
    pub redis_url: Option<String>,
    pub nsqd_http_addr: Option<String>,
    pub nsqd_tcp_addr: Option<String>,
    pub nsq_channel: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let contingency = ContingencyConfig::default();
        let publisher = PublisherConfig::default();
        Self {
            contingency_path: contingency.path,
            default_topic: publisher.default_topic,
            batch_size: publisher.batch_size,
            redis_url: None,
            nsqd_http_addr: None,
            nsqd_tcp_addr: None,
            nsq_channel: "events_channel".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 以任意键值来源构建配置；空字符串视为未设置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("CONTINGENCY_FILE_PATH") {
            config.contingency_path = PathBuf::from(path);
        }
        if let Some(topic) = get("NSQ_TOPIC") {
            config.default_topic = topic;
        }
        if let Some(raw) = get("PUBLISH_BATCH_SIZE") {
            config.batch_size = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(AppError::Validation(format!(
                        "PUBLISH_BATCH_SIZE must be a positive integer, got {raw:?}"
                    )));
                }
            };
        }
        config.redis_url = get("REDIS_URL");
        config.nsqd_http_addr = get("NSQD_HTTP_ADDR");
        config.nsqd_tcp_addr = get("NSQD_TCP_ADDR");
        if let Some(channel) = get("NSQ_CHANNEL") {
            config.nsq_channel = channel;
        }

        Ok(config)
    }

    pub fn contingency(&self) -> ContingencyConfig {
        ContingencyConfig {
            path: self.contingency_path.clone(),
        }
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            batch_size: self.batch_size,
            default_topic: self.default_topic.clone(),
        }
    }
}
