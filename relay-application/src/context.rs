use bon::Builder;

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用（命令/查询）所需的横切信息：
/// - 关联追踪 `correlation_id`，贯穿日志；
/// - 执行者 `actor_id`（可选，用于审计）。
///
/// 典型用法：
/// ```rust
/// use relay_application::context::AppContext;
///
/// let ctx = AppContext::builder()
///     .maybe_correlation_id(Some("cor-123".into()))
///     .actor_id("u-1".into())
///     .build();
/// assert_eq!(ctx.correlation_id.as_deref(), Some("cor-123"));
/// ```
#[derive(Clone, Debug, Default, Builder)]
pub struct AppContext {
    pub correlation_id: Option<String>,
    pub actor_id: Option<String>,
}
