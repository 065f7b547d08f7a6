//! 事件子系统（eventing）
//!
//! 提供两类通道：
//! - `MessageBus`：下游消息总线协议，批次发布的出口（内存实现 / nsqd HTTP 实现）；
//! - `LifecycleNotifier`：进程内生命周期通知的发布/订阅通道；
//! - `LifecycleHandler`：对生命周期通知进行消费处理；
//! - `NotificationEngine`：订阅通知流，按处理器匹配分发并发执行，提供关闭与等待句柄；
//! - `MessageConsumer`：消费下游主题的消息并写入已消费消息存储（内存总线 / nsqd TCP 读取器）。
//!
//! 该模块仅定义协议与引擎，不绑定具体传输帧格式。
//!
pub mod bus;
pub mod bus_inmemory;
#[cfg(feature = "nsq")]
pub mod bus_nsq;
pub mod consumer;
#[cfg(feature = "nsq")]
pub mod consumer_nsq;
pub mod engine;
pub mod handler;
pub mod notifier;

pub use bus::{BusMessage, MessageBus};
pub use bus_inmemory::InMemoryMessageBus;
#[cfg(feature = "nsq")]
pub use bus_nsq::NsqHttpBus;
pub use consumer::MessageConsumer;
#[cfg(feature = "nsq")]
pub use consumer_nsq::NsqReader;
pub use engine::{EngineHandle, NotificationEngine, NotificationEngineConfig};
pub use handler::{HandledEventType, LifecycleHandler};
pub use notifier::LifecycleNotifier;
