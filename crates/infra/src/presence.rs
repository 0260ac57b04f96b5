use futures_util::StreamExt;
use metrics::counter;
use rapport_domain::ports::BoxFuture;
use rapport_domain::ports::presence::{PresenceBroker, PresenceError};
use rapport_domain::presence::{CLOSE_SUPERSEDED, PresenceRegistry, RealtimeEvent};
use rapport_domain::util::new_id;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

const PRESENCE_FORWARD_TOTAL: &str = "rapport_presence_forward_total";

const RELEASE_IF_OWNER: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

const REFRESH_IF_OWNER: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('PEXPIRE', KEYS[1], ARGV[2])
    end
    return 0
"#;

/// Messages exchanged between instances on `{prefix}:instance:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum BrokerEnvelope {
    Deliver {
        user_id: String,
        event: RealtimeEvent,
    },
    Evict {
        user_id: String,
    },
}

/// Redis-backed ownership map: `{prefix}:owner:{user_id}` holds the id of the
/// instance serving that user's session.
#[derive(Clone)]
pub struct RedisPresenceBroker {
    client: redis::Client,
    manager: ConnectionManager,
    instance_id: String,
    prefix: String,
    owner_ttl_ms: u64,
}

impl RedisPresenceBroker {
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        owner_ttl_ms: u64,
    ) -> Result<Self, PresenceError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            manager,
            instance_id: new_id(),
            prefix: prefix.into(),
            owner_ttl_ms: owner_ttl_ms.max(1),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn owner_key(&self, user_id: &str) -> String {
        format!("{}:owner:{user_id}", self.prefix)
    }

    fn instance_channel(&self, instance_id: &str) -> String {
        format!("{}:instance:{instance_id}", self.prefix)
    }

    async fn publish(
        &self,
        instance_id: &str,
        envelope: &BrokerEnvelope,
    ) -> Result<i64, PresenceError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|err| PresenceError::Payload(err.to_string()))?;
        let mut conn = self.manager.clone();
        conn.publish(self.instance_channel(instance_id), payload)
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))
    }

    /// Subscribes to this instance's channel and applies incoming deliveries
    /// and evictions to the local registry until the subscription ends.
    pub async fn listen(
        &self,
        registry: PresenceRegistry,
    ) -> Result<JoinHandle<()>, PresenceError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        let channel = self.instance_channel(&self.instance_id);
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
        tracing::info!(channel = %channel, "presence broker subscribed");

        Ok(tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "unreadable presence payload");
                        continue;
                    }
                };
                match serde_json::from_str::<BrokerEnvelope>(&payload) {
                    Ok(BrokerEnvelope::Deliver { user_id, event }) => {
                        if !registry.deliver(&user_id, event).await {
                            tracing::debug!(user_id = %user_id, "forwarded event found no session");
                        }
                    }
                    Ok(BrokerEnvelope::Evict { user_id }) => {
                        registry
                            .evict(&user_id, CLOSE_SUPERSEDED, "session opened on another instance")
                            .await;
                    }
                    Err(err) => tracing::warn!(error = %err, "invalid presence envelope"),
                }
            }
            tracing::warn!(channel = %channel, "presence subscription closed");
        }))
    }
}

impl PresenceBroker for RedisPresenceBroker {
    fn transport(&self) -> &'static str {
        "redis"
    }

    fn claim(&self, user_id: &str) -> BoxFuture<'_, Result<(), PresenceError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let previous: Option<String> = redis::cmd("SET")
                .arg(self.owner_key(&user_id))
                .arg(&self.instance_id)
                .arg("PX")
                .arg(self.owner_ttl_ms)
                .arg("GET")
                .query_async(&mut conn)
                .await
                .map_err(|err| PresenceError::Unavailable(err.to_string()))?;

            if let Some(previous) = previous.filter(|owner| *owner != self.instance_id) {
                tracing::debug!(
                    user_id = %user_id,
                    previous_owner = %previous,
                    "evicting remote session"
                );
                self.publish(&previous, &BrokerEnvelope::Evict { user_id })
                    .await?;
            }
            Ok(())
        })
    }

    fn release(&self, user_id: &str) -> BoxFuture<'_, Result<(), PresenceError>> {
        let key = self.owner_key(user_id);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::Script::new(RELEASE_IF_OWNER)
                .key(key)
                .arg(&self.instance_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
            Ok(())
        })
    }

    fn refresh(&self, user_ids: &[String]) -> BoxFuture<'_, Result<(), PresenceError>> {
        let keys: Vec<String> = user_ids.iter().map(|user_id| self.owner_key(user_id)).collect();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let script = redis::Script::new(REFRESH_IF_OWNER);
            for key in keys {
                let _: i64 = script
                    .key(key)
                    .arg(&self.instance_id)
                    .arg(self.owner_ttl_ms)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
            }
            Ok(())
        })
    }

    fn forward(
        &self,
        user_id: &str,
        event: &RealtimeEvent,
    ) -> BoxFuture<'_, Result<bool, PresenceError>> {
        let user_id = user_id.to_string();
        let event = event.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let owner: Option<String> = conn
                .get(self.owner_key(&user_id))
                .await
                .map_err(|err| PresenceError::Unavailable(err.to_string()))?;
            let Some(owner) = owner.filter(|owner| *owner != self.instance_id) else {
                counter!(PRESENCE_FORWARD_TOTAL, "outcome" => "no_owner").increment(1);
                return Ok(false);
            };

            let receivers = self
                .publish(&owner, &BrokerEnvelope::Deliver { user_id, event })
                .await?;
            let outcome = if receivers > 0 { "published" } else { "no_subscriber" };
            counter!(PRESENCE_FORWARD_TOTAL, "outcome" => outcome).increment(1);
            Ok(receivers > 0)
        })
    }
}
