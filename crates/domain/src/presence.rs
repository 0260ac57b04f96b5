use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};

use crate::chat::ChatMessage;
use crate::ports::presence::{DeliveryObserver, DeliveryOutcome, PresenceBroker};
use crate::util::new_id;

pub const CLOSE_SUPERSEDED: u16 = 4000;
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_UNRESPONSIVE: u16 = 4002;

/// Events pushed to connected users, serialized as `{"type": .., "data": ..}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "connected")]
    Connected { user_id: String },
    #[serde(rename = "chat:message")]
    ChatMessage {
        message: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages_remaining: Option<u32>,
    },
    #[serde(rename = "chat:typing")]
    ChatTyping {
        connection_id: String,
        user_id: String,
        is_typing: bool,
    },
    #[serde(rename = "chat:expired")]
    ChatExpired { connection_id: String },
    #[serde(rename = "chat:limit_reached")]
    ChatLimitReached { connection_id: String },
    #[serde(rename = "connection:request")]
    ConnectionRequested {
        connection_id: String,
        requester_id: String,
        intro_message: String,
    },
    #[serde(rename = "connection:accepted")]
    ConnectionAccepted {
        connection_id: String,
        chat_expires_at_ms: i64,
    },
    #[serde(rename = "exchange:request")]
    ExchangeRequested {
        exchange_id: String,
        connection_id: String,
        requester_id: String,
    },
    #[serde(rename = "exchange:approved")]
    ExchangeApproved {
        exchange_id: String,
        connection_id: String,
        reveal_expires_at_ms: i64,
    },
    #[serde(rename = "exchange:declined")]
    ExchangeDeclined {
        exchange_id: String,
        connection_id: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl RealtimeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ChatMessage { .. } => "chat:message",
            Self::ChatTyping { .. } => "chat:typing",
            Self::ChatExpired { .. } => "chat:expired",
            Self::ChatLimitReached { .. } => "chat:limit_reached",
            Self::ConnectionRequested { .. } => "connection:request",
            Self::ConnectionAccepted { .. } => "connection:accepted",
            Self::ExchangeRequested { .. } => "exchange:request",
            Self::ExchangeApproved { .. } => "exchange:approved",
            Self::ExchangeDeclined { .. } => "exchange:declined",
            Self::Error { .. } => "error",
        }
    }
}

/// What a live session's writer task is asked to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionFrame {
    Event(RealtimeEvent),
    Probe,
    Close { code: u16, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionTicket {
    pub user_id: String,
    pub session_id: String,
}

struct SessionSlot {
    session_id: String,
    sender: mpsc::UnboundedSender<SessionFrame>,
    acknowledged: bool,
}

/// At most one live session per user on this instance.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, closing whatever session the user held before.
    pub async fn register(
        &self,
        user_id: &str,
    ) -> (SessionTicket, mpsc::UnboundedReceiver<SessionFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ticket = SessionTicket {
            user_id: user_id.to_string(),
            session_id: new_id(),
        };
        let previous = self.sessions.write().await.insert(
            user_id.to_string(),
            SessionSlot {
                session_id: ticket.session_id.clone(),
                sender,
                acknowledged: true,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.sender.send(SessionFrame::Close {
                code: CLOSE_SUPERSEDED,
                reason: "superseded by a newer session".into(),
            });
            tracing::debug!(user_id = %user_id, "replaced existing session");
        }
        (ticket, receiver)
    }

    /// Removes the session only if it is still the one registered for the user.
    pub async fn unregister(&self, ticket: &SessionTicket) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&ticket.user_id) {
            Some(slot) if slot.session_id == ticket.session_id => {
                sessions.remove(&ticket.user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn deliver(&self, user_id: &str, event: RealtimeEvent) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(user_id)
            .is_some_and(|slot| slot.sender.send(SessionFrame::Event(event)).is_ok())
    }

    pub async fn acknowledge(&self, ticket: &SessionTicket) {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(&ticket.user_id)
            && slot.session_id == ticket.session_id
        {
            slot.acknowledged = true;
        }
    }

    pub async fn evict(&self, user_id: &str, code: u16, reason: &str) -> bool {
        let removed = self.sessions.write().await.remove(user_id);
        match removed {
            Some(slot) => {
                let _ = slot.sender.send(SessionFrame::Close {
                    code,
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// One liveness round: sessions that never answered the previous probe are
    /// evicted, the rest are probed again. Returns the evicted user ids.
    pub async fn probe(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, slot)| !slot.acknowledged || slot.sender.is_closed())
            .map(|(user_id, _)| user_id.clone())
            .collect();

        for user_id in &stale {
            if let Some(slot) = sessions.remove(user_id) {
                let _ = slot.sender.send(SessionFrame::Close {
                    code: CLOSE_UNRESPONSIVE,
                    reason: "session unresponsive".into(),
                });
            }
        }

        for slot in sessions.values_mut() {
            slot.acknowledged = false;
            let _ = slot.sender.send(SessionFrame::Probe);
        }

        stale
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    pub async fn online_user_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

/// Best-effort fan-out: local sessions first, then the cross-instance broker.
#[derive(Clone, Default)]
pub struct NotificationHub {
    registry: PresenceRegistry,
    broker: Option<Arc<dyn PresenceBroker>>,
    observer: Option<Arc<dyn DeliveryObserver>>,
}

impl NotificationHub {
    pub fn new(registry: PresenceRegistry, broker: Option<Arc<dyn PresenceBroker>>) -> Self {
        Self {
            registry,
            broker,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &'static str {
        self.broker
            .as_ref()
            .map_or("local", |broker| broker.transport())
    }

    pub async fn notify(&self, user_id: &str, event: RealtimeEvent) -> bool {
        let kind = event.kind();
        let outcome = self.route(user_id, event).await;
        if outcome == DeliveryOutcome::Offline {
            tracing::debug!(user_id = %user_id, event = kind, "user offline, event dropped");
        }
        if let Some(observer) = &self.observer {
            observer.observe(kind, outcome);
        }
        outcome != DeliveryOutcome::Offline
    }

    async fn route(&self, user_id: &str, event: RealtimeEvent) -> DeliveryOutcome {
        let Some(broker) = &self.broker else {
            return if self.registry.deliver(user_id, event).await {
                DeliveryOutcome::Local
            } else {
                DeliveryOutcome::Offline
            };
        };
        if self.registry.deliver(user_id, event.clone()).await {
            return DeliveryOutcome::Local;
        }
        match broker.forward(user_id, &event).await {
            Ok(true) => DeliveryOutcome::Forwarded,
            Ok(false) => DeliveryOutcome::Offline,
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    event = event.kind(),
                    error = %err,
                    "presence forward failed"
                );
                DeliveryOutcome::Offline
            }
        }
    }

    pub async fn session_opened(
        &self,
        user_id: &str,
    ) -> (SessionTicket, mpsc::UnboundedReceiver<SessionFrame>) {
        let opened = self.registry.register(user_id).await;
        if let Some(broker) = &self.broker
            && let Err(err) = broker.claim(user_id).await
        {
            tracing::warn!(user_id = %user_id, error = %err, "presence claim failed");
        }
        opened
    }

    pub async fn session_closed(&self, ticket: &SessionTicket) {
        if !self.registry.unregister(ticket).await {
            return;
        }
        self.release(&ticket.user_id).await;
    }

    /// Runs one liveness round and refreshes broker ownership for survivors.
    pub async fn probe_sessions(&self) -> Vec<String> {
        let evicted = self.registry.probe().await;
        for user_id in &evicted {
            self.release(user_id).await;
        }
        if let Some(broker) = &self.broker {
            let online = self.registry.online_user_ids().await;
            if !online.is_empty()
                && let Err(err) = broker.refresh(&online).await
            {
                tracing::warn!(error = %err, "presence refresh failed");
            }
        }
        evicted
    }

    async fn release(&self, user_id: &str) {
        if let Some(broker) = &self.broker
            && let Err(err) = broker.release(user_id).await
        {
            tracing::warn!(user_id = %user_id, error = %err, "presence release failed");
        }
    }
}
