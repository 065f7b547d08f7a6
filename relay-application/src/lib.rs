//! 会话暂存事件中继：应用层（relay-application）
//!
//! 以命令/查询总线承接边界层请求，编排领域层的会话生命周期与指标：
//! - `commands` / `queries`：会话命令、查询及其处理器，以及已消费消息的查看与清理；
//! - `SessionOrchestrator`：注册全部处理器并对外分发；
//! - `AppError::kind`：把失败归类为 404 / 400 / 500；
//! - `config`：从环境变量读取运行配置。
//!
pub mod command;
pub mod command_bus;
pub mod commands;
pub mod config;
pub mod context;
pub mod dto;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod orchestrator;
pub mod queries;
pub mod query;
pub mod query_bus;

pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;
pub use orchestrator::SessionOrchestrator;
