use crate::{context::AppContext, error::AppError};
use async_trait::async_trait;

/// 应用层命令（Command）
///
/// 表达“意图”的写操作请求，会改变会话状态。
/// - `Output` 为命令执行后回给调用方的最小结果（可为 `()`）；
/// - 与 [`Query`](crate::query::Query) 相对，`Command` 应避免读写混用；
/// - 建议保持语义化的“动宾结构”命名，如 `StartSession`、`CommitSession`。
///
/// 关联常量：
/// - `NAME`：命令的稳定名称，用于日志、追踪与路由。避免依赖 `type_name::<T>()`。
pub trait Command: Send + Sync + 'static {
    /// 命令的稳定名称（建议常量字符串，不随重构变化）
    const NAME: &'static str;

    /// 执行结果
    type Output: Send + 'static;
}

/// 命令处理器：每个命令类型对应一个实现，由命令总线按类型路由
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError>;
}
