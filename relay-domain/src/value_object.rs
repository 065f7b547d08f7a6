//! 值对象（Value Object）
//!
//! 无标识、以值相等为准的对象，用于封装不可变的概念性值与校验逻辑。
//!

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 值对象抽象
pub trait ValueObject {
    /// 业务校验失败时的错误类型
    type Error;

    /// 创建值对象时进行验证
    fn validate(&self) -> Result<(), Self::Error>;
}

/// 会话路由描述（环境、来源、来源税号、发送方）
///
/// 主题按 `environment-originId-originTaxId-sender` 的固定顺序拼接，
/// 同一描述总是得到同一主题。
///
/// # 示例
///
/// ```
/// use relay_domain::value_object::RoutingDescriptor;
///
/// let route = RoutingDescriptor::new("prod", "1", "00", "A");
/// assert_eq!(route.topic(), "prod-1-00-A");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDescriptor {
    environment: String,
    origin_id: String,
    origin_tax_id: String,
    sender: String,
}

impl RoutingDescriptor {
    pub fn new(
        environment: impl Into<String>,
        origin_id: impl Into<String>,
        origin_tax_id: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            origin_id: origin_id.into(),
            origin_tax_id: origin_tax_id.into(),
            sender: sender.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn origin_tax_id(&self) -> &str {
        &self.origin_tax_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// 派生路由主题
    pub fn topic(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.environment, self.origin_id, self.origin_tax_id, self.sender
        )
    }
}

impl ValueObject for RoutingDescriptor {
    type Error = DomainError;

    fn validate(&self) -> Result<(), Self::Error> {
        let fields = [
            ("environment", &self.environment),
            ("originId", &self.origin_id),
            ("originTaxId", &self.origin_tax_id),
            ("sender", &self.sender),
        ];

        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(DomainError::InvalidValue {
                    reason: format!("{name} must not be empty"),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for RoutingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_joined_in_fixed_order() {
        let route = RoutingDescriptor::new("hml", "42", "12345678000199", "erp");
        assert_eq!(route.topic(), "hml-42-12345678000199-erp");
        assert_eq!(route.to_string(), route.topic());
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(RoutingDescriptor::new("prod", "1", "00", "A").validate().is_ok());

        let err = RoutingDescriptor::new("prod", " ", "00", "A")
            .validate()
            .unwrap_err();
        match err {
            DomainError::InvalidValue { reason } => assert!(reason.contains("originId")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
