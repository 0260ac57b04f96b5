mod memory;
mod surreal;

use std::sync::Arc;

use rapport_domain::ports::chat::MessageRepository;
use rapport_domain::ports::connections::ConnectionRepository;
use rapport_domain::ports::exchange::ExchangeRepository;

use crate::config::AppConfig;
use crate::db::DbConfig;

pub use memory::InMemoryStore;
pub use surreal::SurrealStore;

/// The three ledger ports, all served by one store so that multi-record
/// mutations stay inside a single transaction.
#[derive(Clone)]
pub struct Ledgers {
    pub backend: &'static str,
    pub connections: Arc<dyn ConnectionRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub exchanges: Arc<dyn ExchangeRepository>,
}

impl Ledgers {
    pub fn in_memory() -> Self {
        Self::from_store("memory", InMemoryStore::new())
    }

    pub fn from_store<S>(backend: &'static str, store: S) -> Self
    where
        S: ConnectionRepository + MessageRepository + ExchangeRepository + Clone + 'static,
    {
        Self {
            backend,
            connections: Arc::new(store.clone()),
            messages: Arc::new(store.clone()),
            exchanges: Arc::new(store),
        }
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        if config.uses_surreal() {
            let store = SurrealStore::new(&DbConfig::from_app_config(config)).await?;
            return Ok(Self::from_store("surrealdb", store));
        }
        Ok(Self::in_memory())
    }
}
