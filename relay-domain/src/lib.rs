//! 会话暂存事件中继：领域层（relay-domain）
//!
//! 客户端把事件暂存在一个“会话”中，提交时按批次原子地转发到下游消息总线；
//! 暂存存储或总线不可用时，变更落入本地应急日志。本 crate 提供：
//! - 会话状态机（`session`）、路由描述（`value_object`）与暂存事件（`event`）；
//! - 生命周期通知（`domain_event`）及其发布/订阅与处理引擎（`eventing`）；
//! - 键值存储协议、暂存仓储与应急日志（`persist`）；
//! - 处理指标聚合（`metrics`）与批次发布（`publisher`）；
//! - 串联上述组件的生命周期管理器（`lifecycle`）；
//! - 下游消息的消费与留存（`eventing::MessageConsumer`、`persist::ConsumedMessageStore`）。
//!
//! 基础设施实现通过 feature 选择：`redis`（Redis 键值存储）、`nsq`（nsqd HTTP 总线）。
//!
//! 典型装配：
//! 1. 选择 `KvStore` 与 `MessageBus` 实现并打开 `ContingencyLog`；
//! 2. 构建 `StagingStore`、`MetricsAggregator`、`BatchPublisher`；
//! 3. 用它们构建 `SessionLifecycle`，按需挂载 `NotificationEngine` 观察生命周期通知。
//!
pub mod domain_event;
pub mod error;
pub mod event;
pub mod eventing;
pub mod lifecycle;
pub mod metrics;
pub mod persist;
pub mod publisher;
pub mod session;
pub mod value_object;
