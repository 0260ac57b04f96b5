use std::sync::Arc;

use rapport_domain::chat::ChatService;
use rapport_domain::clock::{Clock, SystemClock};
use rapport_domain::connections::ConnectionService;
use rapport_domain::discovery::DiscoveryService;
use rapport_domain::exchange::ExchangeService;
use rapport_domain::ports::presence::PresenceBroker;
use rapport_domain::ports::users::UserDirectory;
use rapport_domain::presence::{NotificationHub, PresenceRegistry};
use rapport_infra::config::AppConfig;
use rapport_infra::directory::InMemoryUserDirectory;
use rapport_infra::presence::RedisPresenceBroker;
use rapport_infra::repositories::Ledgers;

use crate::observability::PrometheusDeliveryObserver;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub hub: NotificationHub,
    pub connections: ConnectionService,
    pub chat: ChatService,
    pub exchange: ExchangeService,
    pub discovery: DiscoveryService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let directory = if config.directory_seed_path.trim().is_empty() {
            tracing::warn!("no directory seed configured; starting with an empty user directory");
            InMemoryUserDirectory::new()
        } else {
            InMemoryUserDirectory::load_seed_file(&config.directory_seed_path).await?
        };

        let registry = PresenceRegistry::new();
        let broker: Option<Arc<dyn PresenceBroker>> = if config.uses_redis_presence() {
            let broker = RedisPresenceBroker::connect(
                &config.redis_url,
                config.realtime_channel_prefix.clone(),
                config.presence_owner_ttl_ms,
            )
            .await?;
            broker.listen(registry.clone()).await?;
            tracing::info!(instance_id = %broker.instance_id(), "redis presence enabled");
            Some(Arc::new(broker))
        } else {
            None
        };

        let ledgers = Ledgers::from_config(&config).await?;
        tracing::info!(backend = ledgers.backend, "ledger store ready");

        Ok(Self::with_parts(
            config,
            ledgers,
            Arc::new(directory),
            registry,
            broker,
            Arc::new(SystemClock),
        ))
    }

    pub fn with_parts(
        config: AppConfig,
        ledgers: Ledgers,
        directory: Arc<dyn UserDirectory>,
        registry: PresenceRegistry,
        broker: Option<Arc<dyn PresenceBroker>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = NotificationHub::new(registry, broker)
            .with_observer(Arc::new(PrometheusDeliveryObserver));

        let connections = ConnectionService::new(
            ledgers.connections.clone(),
            directory.clone(),
            hub.clone(),
            clock.clone(),
            config.connection_policy(),
        );
        let chat = ChatService::new(
            connections.clone(),
            ledgers.messages,
            hub.clone(),
            clock.clone(),
        );
        let exchange = ExchangeService::new(
            connections.clone(),
            ledgers.exchanges,
            directory.clone(),
            hub.clone(),
            clock.clone(),
            config.exchange_policy(),
        );
        let discovery = DiscoveryService::new(ledgers.connections, directory, clock);

        Self {
            config,
            hub,
            connections,
            chat,
            exchange,
            discovery,
        }
    }
}
