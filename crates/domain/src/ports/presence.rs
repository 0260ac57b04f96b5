use crate::ports::BoxFuture;
use crate::presence::RealtimeEvent;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("presence transport unavailable: {0}")]
    Unavailable(String),
    #[error("presence payload error: {0}")]
    Payload(String),
}

/// Cross-instance presence: who owns a user's session and how to reach it.
pub trait PresenceBroker: Send + Sync {
    fn transport(&self) -> &'static str;

    /// Records this instance as the session owner, evicting any prior owner.
    fn claim(&self, user_id: &str) -> BoxFuture<'_, Result<(), PresenceError>>;

    /// Drops ownership only if this instance still holds it.
    fn release(&self, user_id: &str) -> BoxFuture<'_, Result<(), PresenceError>>;

    /// Extends ownership of every locally held session.
    fn refresh(&self, user_ids: &[String]) -> BoxFuture<'_, Result<(), PresenceError>>;

    /// Routes an event to whichever instance owns the user. `Ok(false)` when
    /// nobody does.
    fn forward(
        &self,
        user_id: &str,
        event: &RealtimeEvent,
    ) -> BoxFuture<'_, Result<bool, PresenceError>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Local,
    Forwarded,
    Offline,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "delivered",
            Self::Forwarded => "forwarded",
            Self::Offline => "offline",
        }
    }
}

/// Hook for counting what happened to each pushed event.
pub trait DeliveryObserver: Send + Sync {
    fn observe(&self, event_kind: &'static str, outcome: DeliveryOutcome);
}
