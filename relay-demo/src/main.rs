use async_trait::async_trait;
use relay_application::SessionOrchestrator;
use relay_application::commands::{AddEvent, CommitSession, RollbackSession, StartSession};
use relay_application::config::RelayConfig;
use relay_application::context::AppContext;
use relay_application::queries::{GetMetrics, GetSessionStatus, ListConsumedMessages};
use relay_domain::domain_event::{DomainEvent, LifecycleEvent};
use relay_domain::error::DomainResult;
use relay_domain::event::EventPayload;
use relay_domain::eventing::{
    EngineHandle, HandledEventType, InMemoryMessageBus, LifecycleHandler, LifecycleNotifier,
    MessageBus, MessageConsumer, NotificationEngine,
};
use relay_domain::lifecycle::SessionLifecycle;
use relay_domain::metrics::MetricsAggregator;
use relay_domain::persist::{
    ConsumedMessageStore, ContingencyLog, InMemoryKvStore, KvStore, StagingStore,
};
use relay_domain::publisher::BatchPublisher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// 把每条生命周期通知写入日志
struct AuditLog;

#[async_trait]
impl LifecycleHandler for AuditLog {
    fn handler_name(&self) -> &str {
        "audit-log"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }

    async fn handle(&self, event: &LifecycleEvent) -> DomainResult<()> {
        tracing::info!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            "lifecycle"
        );
        Ok(())
    }
}

async fn kv_store(config: &RelayConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        tracing::info!(%url, "using redis staging store");
        let store = relay_domain::persist::RedisKvStore::connect(url).await?;
        return Ok(Arc::new(store));
    }

    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but the redis feature is disabled; staying in memory");
    }
    Ok(Arc::new(InMemoryKvStore::new()))
}

/// 选择发布总线并挂上消费者；nsqd 模式下只有配置了 TCP 地址才消费
async fn message_bus(
    config: &RelayConfig,
    consumer: Arc<MessageConsumer>,
) -> anyhow::Result<(Arc<dyn MessageBus>, Option<EngineHandle>)> {
    #[cfg(feature = "nsq")]
    if let Some(addr) = &config.nsqd_http_addr {
        tracing::info!(%addr, "publishing through nsqd");
        let bus: Arc<dyn MessageBus> = Arc::new(relay_domain::eventing::NsqHttpBus::new(addr));
        let Some(tcp) = &config.nsqd_tcp_addr else {
            return Ok((bus, None));
        };
        let reader =
            relay_domain::eventing::NsqReader::new(tcp, &config.default_topic, consumer.channel());
        let handle = consumer.start(reader.subscribe().await?);
        return Ok((bus, Some(handle)));
    }

    if config.nsqd_http_addr.is_some() {
        tracing::warn!("NSQD_HTTP_ADDR set but the nsq feature is disabled; staying in memory");
    }
    let bus = InMemoryMessageBus::new(1024);
    let handle = consumer.start_on(&bus);
    Ok((Arc::new(bus), Some(handle)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env()?;
    let kv = kv_store(&config).await?;
    let contingency = Arc::new(ContingencyLog::open(config.contingency()).await?);
    let metrics = Arc::new(MetricsAggregator::builder().kv(kv.clone()).build());
    let consumed = Arc::new(ConsumedMessageStore::builder().kv(kv.clone()).build());
    let consumer = Arc::new(
        MessageConsumer::builder()
            .store(consumed.clone())
            .channel(config.nsq_channel.clone())
            .build(),
    );
    let (bus, consuming) = message_bus(&config, consumer).await?;

    let store = StagingStore::builder()
        .kv(kv)
        .contingency(contingency.clone())
        .build();
    let publisher = BatchPublisher::builder()
        .bus(bus)
        .metrics(metrics.clone())
        .contingency(contingency)
        .config(config.publisher())
        .build();

    let notifier = LifecycleNotifier::default();
    let handlers: Vec<Arc<dyn LifecycleHandler>> = vec![Arc::new(AuditLog)];
    let engine = Arc::new(
        NotificationEngine::builder()
            .notifier(notifier.clone())
            .handlers(handlers)
            .build(),
    );
    let handle = engine.start();

    let lifecycle = SessionLifecycle::builder()
        .store(Arc::new(store))
        .publisher(Arc::new(publisher))
        .notifier(notifier)
        .build();
    let relay = SessionOrchestrator::new(Arc::new(lifecycle), metrics, consumed)?;
    let ctx = AppContext::builder().actor_id("relay-demo".to_string()).build();

    let start = || StartSession {
        environment: "dev".into(),
        origin_id: "1".into(),
        origin_tax_id: "00".into(),
        sender: "demo".into(),
    };

    let kept = relay.execute(&ctx, start()).await?;
    for n in 0..12 {
        relay
            .execute(
                &ctx,
                AddEvent {
                    session_id: kept.session_id.clone(),
                    payload: EventPayload::from_data(json!({ "seq": n })),
                },
            )
            .await?;
    }
    let receipt = relay
        .execute(
            &ctx,
            CommitSession {
                session_id: kept.session_id.clone(),
            },
        )
        .await?;
    tracing::info!(
        session_id = %receipt.session_id,
        status = %receipt.status,
        events = receipt.event_count,
        "commit finished"
    );

    let dropped = relay.execute(&ctx, start()).await?;
    relay
        .execute(
            &ctx,
            AddEvent {
                session_id: dropped.session_id.clone(),
                payload: EventPayload::from_data(json!({ "seq": "discarded" })),
            },
        )
        .await?;
    relay
        .execute(
            &ctx,
            RollbackSession {
                session_id: dropped.session_id.clone(),
            },
        )
        .await?;

    let status = relay
        .query(
            &ctx,
            GetSessionStatus {
                session_id: dropped.session_id,
            },
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let metrics = relay.query(&ctx, GetMetrics).await?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    // 消费在后台进行，稍等片刻再查看
    tokio::time::sleep(Duration::from_millis(100)).await;
    let consumed = relay
        .query(&ctx, ListConsumedMessages { limit: 3, offset: 0 })
        .await?;
    tracing::info!(total = consumed.total, "consumed messages");
    println!("{}", serde_json::to_string_pretty(&consumed)?);

    if let Some(consuming) = consuming {
        consuming.shutdown();
        consuming.join().await;
    }
    handle.shutdown();
    handle.join().await;
    Ok(())
}
