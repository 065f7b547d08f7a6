//! 暂存事件（StagedEvent）
//!
//! 客户端提交的业务事件在入库时被分配 `message_id` 与时间戳，
//! 此后只追加、不修改，按插入顺序原样进入发布批次。
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 事件载荷：业务数据与分类/路由字段，对中继核心而言是不透明的
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// 业务数据
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// 业务侧唯一键
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tax_id: Option<String>,
}

impl EventPayload {
    pub fn from_data(data: Value) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
}

/// 已入库的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEvent {
    message_id: String,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl StagedEvent {
    /// 入库：分配消息标识与时间戳
    pub fn ingest(payload: EventPayload) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}
