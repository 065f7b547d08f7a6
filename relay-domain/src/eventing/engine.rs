//! 通知引擎（NotificationEngine）
//!
//! 统一编排“订阅 → 分发处理”的长驻任务：
//! - 订阅生命周期通知流，按处理器匹配分发并发执行；
//! - 处理失败只记录日志，不回压发布方；
//! - 提供关闭与等待的 `EngineHandle`。
//!
use super::handler::HandledEventType;
use super::{LifecycleHandler, LifecycleNotifier};
use crate::domain_event::DomainEvent;
use bon::Builder;
use futures_util::{StreamExt, stream};
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::notification_engine_builder::{IsUnset, SetRegistry, State as BuilderState};

/// NotificationEngine：
/// - 订阅 Notifier 的通知流，分发到匹配的 Handler，并发处理
#[derive(Builder)]
pub struct NotificationEngine {
    notifier: LifecycleNotifier,
    #[builder(setters(vis = "pub(crate)"))]
    registry: HandlerRegistry,
    #[builder(default)]
    config: NotificationEngineConfig,
}

impl<S: BuilderState> NotificationEngineBuilder<S> {
    pub fn handlers(
        self,
        handlers: Vec<Arc<dyn LifecycleHandler>>,
    ) -> NotificationEngineBuilder<SetRegistry<S>>
    where
        <S as BuilderState>::Registry: IsUnset,
    {
        self.registry(HandlerRegistry::new(handlers))
    }
}

impl NotificationEngine {
    /// 启动通知引擎，返回可用于关闭/等待的句柄
    ///
    /// 订阅在返回前完成，此后发出的通知都不会丢失。
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let stream = self.notifier.subscribe();
        let task = tokio::spawn(Self::subscribe_loop(self.clone(), stream, token.clone()));

        EngineHandle::new(token, vec![task])
    }

    async fn subscribe_loop(
        self: Arc<Self>,
        mut stream: futures_core::stream::BoxStream<
            'static,
            crate::error::DomainResult<crate::domain_event::LifecycleEvent>,
        >,
        token: CancellationToken,
    ) {
        let concurrency = self.config.handler_concurrency;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    break;
                }
                maybe_event = stream.next() => {
                    match maybe_event {
                        Some(Ok(event)) => {
                            let matched = self.registry.matching(event.event_type());
                            if matched.is_empty() { continue; }

                            stream::iter(matched)
                                .for_each_concurrent(Some(concurrency), |h| {
                                    let ev = event.clone();
                                    async move {
                                        if let Err(err) = h.handle(&ev).await {
                                            tracing::warn!(
                                                handler = h.handler_name(),
                                                event_type = ev.event_type(),
                                                session_id = ev.session_id(),
                                                error = %err,
                                                "lifecycle handler failed"
                                            );
                                        }
                                    }
                                })
                                .await;
                        }
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "lifecycle notification stream lagged");
                        }
                        None => {
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Clone, Default)]
struct HandlerRegistry {
    by_type: HashMap<String, Vec<Arc<dyn LifecycleHandler>>>,
    all: Vec<Arc<dyn LifecycleHandler>>,
}

impl HandlerRegistry {
    fn new(handlers: Vec<Arc<dyn LifecycleHandler>>) -> Self {
        let mut by_type: HashMap<String, Vec<Arc<dyn LifecycleHandler>>> = HashMap::new();
        let mut all: Vec<Arc<dyn LifecycleHandler>> = Vec::new();

        for h in handlers {
            match h.handled_event_type() {
                HandledEventType::All => all.push(h),
                HandledEventType::One(t) => {
                    by_type.entry(t).or_default().push(h);
                }
                HandledEventType::Many(ts) => {
                    for t in ts {
                        by_type.entry(t).or_default().push(h.clone());
                    }
                }
            }
        }

        Self { by_type, all }
    }

    fn matching(&self, event_type: &str) -> Vec<Arc<dyn LifecycleHandler>> {
        let mut merged: Vec<Arc<dyn LifecycleHandler>> = Vec::new();
        if let Some(list) = self.by_type.get(event_type) {
            merged.extend(list.iter().cloned());
        }
        merged.extend(self.all.iter().cloned());
        merged
    }
}

/// 通知引擎配置
#[derive(Clone, Copy, Debug)]
pub struct NotificationEngineConfig {
    /// 单条通知的处理并发（同一通知广播给多个 handler）
    pub handler_concurrency: usize,
}

impl Default for NotificationEngineConfig {
    fn default() -> Self {
        Self {
            handler_concurrency: 8,
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub(crate) fn new(token: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { token, tasks }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::LifecycleEvent;
    use crate::error::{DomainError, DomainResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    struct SpyHandler {
        name: &'static str,
        types: HandledEventType,
        fail: bool,
        seen: Arc<Mutex<Vec<&'static str>>>,
        calls: Arc<AtomicUsize>,
    }

    impl SpyHandler {
        fn new(name: &'static str, types: HandledEventType) -> Self {
            Self {
                name,
                types,
                fail: false,
                seen: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl LifecycleHandler for SpyHandler {
        fn handler_name(&self) -> &str {
            self.name
        }
        fn handled_event_type(&self) -> HandledEventType {
            self.types.clone()
        }
        async fn handle(&self, event: &LifecycleEvent) -> DomainResult<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(DomainError::EventHandler {
                    handler: self.name.into(),
                    reason: "fail requested".into(),
                });
            }
            self.seen.lock().unwrap().push(event.event_type());
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_dispatches_by_type_and_survives_handler_failure() {
        let notifier = LifecycleNotifier::new(64);
        let all = SpyHandler::new("all", HandledEventType::All);
        let committed = SpyHandler::new(
            "committed",
            HandledEventType::One(LifecycleEvent::SESSION_COMMITTED.into()),
        );
        let mut broken = SpyHandler::new(
            "broken",
            HandledEventType::Many(vec![
                LifecycleEvent::SESSION_STARTED.into(),
                LifecycleEvent::SESSION_ROLLED_BACK.into(),
            ]),
        );
        broken.fail = true;

        let engine = Arc::new(
            NotificationEngine::builder()
                .notifier(notifier.clone())
                .handlers(vec![
                    Arc::new(all.clone()),
                    Arc::new(committed.clone()),
                    Arc::new(broken.clone()),
                ])
                .config(NotificationEngineConfig {
                    handler_concurrency: 4,
                })
                .build(),
        );
        let handle = engine.start();

        notifier.emit(LifecycleEvent::started("s-1", "t"));
        notifier.emit(LifecycleEvent::committed("s-1", 3));
        notifier.emit(LifecycleEvent::rolled_back("s-2"));

        // 使用 timeout + 条件轮询，减少固定 sleep 的脆弱性
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if all.calls.load(Ordering::Relaxed) >= 3
                    && broken.calls.load(Ordering::Relaxed) >= 2
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await;

        assert_eq!(all.seen.lock().unwrap().len(), 3);
        assert_eq!(
            *committed.seen.lock().unwrap(),
            vec![LifecycleEvent::SESSION_COMMITTED]
        );
        assert_eq!(broken.calls.load(Ordering::Relaxed), 2);
    }
}
