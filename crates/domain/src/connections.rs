use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::ports::connections::ConnectionRepository;
use crate::ports::users::UserDirectory;
use crate::presence::{NotificationHub, RealtimeEvent};
use crate::users::SubscriptionTier;
use crate::util::{MS_PER_HOUR, day_start_ms, format_ms_rfc3339, new_id};

pub const INTRO_MIN_CHARS: usize = 20;
pub const INTRO_MAX_CHARS: usize = 200;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 50;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Declined,
    Expired,
    Graduated,
}

impl ConnectionStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "ACTIVE" => Some(Self::Active),
            "DECLINED" => Some(Self::Declined),
            "EXPIRED" => Some(Self::Expired),
            "GRADUATED" => Some(Self::Graduated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Declined => "DECLINED",
            Self::Expired => "EXPIRED",
            Self::Graduated => "GRADUATED",
        }
    }

    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Declined)
                | (Self::Active, Self::Graduated)
                | (Self::Active, Self::Expired)
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantSide {
    Requester,
    Recipient,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub intro_message: String,
    pub status: ConnectionStatus,
    pub chat_opened_at_ms: Option<i64>,
    pub chat_expires_at_ms: Option<i64>,
    pub messages_remaining_requester: u32,
    pub messages_remaining_recipient: u32,
    pub contact_exchanged: bool,
    pub created_at_ms: i64,
}

impl Connection {
    pub fn side_of(&self, user_id: &str) -> Option<ParticipantSide> {
        if self.requester_id == user_id {
            Some(ParticipantSide::Requester)
        } else if self.recipient_id == user_id {
            Some(ParticipantSide::Recipient)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.side_of(user_id).is_some()
    }

    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        match self.side_of(user_id)? {
            ParticipantSide::Requester => Some(self.recipient_id.as_str()),
            ParticipantSide::Recipient => Some(self.requester_id.as_str()),
        }
    }

    pub fn involves_pair(&self, user_a: &str, user_b: &str) -> bool {
        (self.requester_id == user_a && self.recipient_id == user_b)
            || (self.requester_id == user_b && self.recipient_id == user_a)
    }

    pub fn remaining_for(&self, side: ParticipantSide) -> u32 {
        match side {
            ParticipantSide::Requester => self.messages_remaining_requester,
            ParticipantSide::Recipient => self.messages_remaining_recipient,
        }
    }

    /// Consumes one message from `side`'s budget; `None` when it is exhausted.
    pub fn consume_budget(&mut self, side: ParticipantSide) -> Option<u32> {
        let slot = match side {
            ParticipantSide::Requester => &mut self.messages_remaining_requester,
            ParticipantSide::Recipient => &mut self.messages_remaining_recipient,
        };
        *slot = slot.checked_sub(1)?;
        Some(*slot)
    }

    pub fn chat_window_elapsed(&self, now_ms: i64) -> bool {
        self.status == ConnectionStatus::Active
            && self
                .chat_expires_at_ms
                .is_some_and(|expires_at_ms| now_ms > expires_at_ms)
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionPolicy {
    pub chat_window_ms: i64,
    pub message_budget: u32,
    pub daily_limit_free: usize,
    pub daily_limit_premium: usize,
    pub quota_utc_offset_minutes: i32,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            chat_window_ms: 48 * MS_PER_HOUR,
            message_budget: 10,
            daily_limit_free: 5,
            daily_limit_premium: 20,
            quota_utc_offset_minutes: 0,
        }
    }
}

impl ConnectionPolicy {
    pub fn daily_limit(&self, tier: SubscriptionTier) -> usize {
        match tier {
            SubscriptionTier::Free => self.daily_limit_free,
            SubscriptionTier::Premium => self.daily_limit_premium,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionRequest {
    pub recipient_id: String,
    pub intro_message: String,
}

/// Requests a user may still send: at most `limit` created at or after
/// `since_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestQuota {
    pub since_ms: i64,
    pub limit: usize,
}

impl RequestQuota {
    pub fn exceeded_by(&self, sent: usize) -> bool {
        sent >= self.limit
    }

    pub fn rejection(&self) -> DomainError {
        DomainError::RateLimited(format!(
            "daily connection limit reached ({}/day)",
            self.limit
        ))
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionDirection {
    Sent,
    Received,
    #[default]
    All,
}

#[derive(Clone, Debug)]
pub struct ConnectionListQuery {
    pub user_id: String,
    pub status: Option<ConnectionStatus>,
    pub direction: ConnectionDirection,
    pub limit: usize,
    pub offset: usize,
}

impl ConnectionListQuery {
    pub fn matches(&self, connection: &Connection) -> bool {
        let direction_ok = match self.direction {
            ConnectionDirection::Sent => connection.requester_id == self.user_id,
            ConnectionDirection::Received => connection.recipient_id == self.user_id,
            ConnectionDirection::All => connection.is_participant(&self.user_id),
        };
        direction_ok && self.status.is_none_or(|status| connection.status == status)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionPage {
    pub connections: Vec<Connection>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

pub fn build_list_query(
    user_id: &str,
    status: Option<ConnectionStatus>,
    direction: ConnectionDirection,
    limit: Option<usize>,
    offset: Option<usize>,
) -> ConnectionListQuery {
    ConnectionListQuery {
        user_id: user_id.to_string(),
        status,
        direction,
        limit: limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        offset: offset.unwrap_or(0),
    }
}

/// Owns the connection lifecycle: request, accept, decline and lazy expiry.
#[derive(Clone)]
pub struct ConnectionService {
    repository: Arc<dyn ConnectionRepository>,
    directory: Arc<dyn UserDirectory>,
    notifier: NotificationHub,
    clock: Arc<dyn Clock>,
    policy: ConnectionPolicy,
}

impl ConnectionService {
    pub fn new(
        repository: Arc<dyn ConnectionRepository>,
        directory: Arc<dyn UserDirectory>,
        notifier: NotificationHub,
        clock: Arc<dyn Clock>,
        policy: ConnectionPolicy,
    ) -> Self {
        Self {
            repository,
            directory,
            notifier,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.policy
    }

    pub async fn request(
        &self,
        requester_id: &str,
        input: ConnectionRequest,
    ) -> DomainResult<Connection> {
        let intro_message = validate_intro(&input.intro_message)?;
        let recipient_id = input.recipient_id.trim().to_string();
        if recipient_id == requester_id {
            return Err(DomainError::Validation(
                "cannot connect with yourself".into(),
            ));
        }

        self.directory
            .get_user(&recipient_id)
            .await?
            .filter(|user| user.is_active())
            .ok_or(DomainError::NotFound)?;

        let blocked = self.directory.blocked_user_ids(requester_id).await?;
        if blocked.contains(&recipient_id) {
            return Err(DomainError::Forbidden(
                "unable to connect with this user".into(),
            ));
        }

        if let Some(existing) = self
            .repository
            .find_between(requester_id, &recipient_id)
            .await?
        {
            return Err(DomainError::Conflict(format!(
                "connection already exists ({})",
                existing.status.as_str()
            )));
        }

        let tier = self
            .directory
            .get_user(requester_id)
            .await?
            .map(|user| user.tier)
            .unwrap_or_default();
        let daily_limit = self.policy.daily_limit(tier);
        let now = self.clock.now_ms();
        let quota = RequestQuota {
            since_ms: day_start_ms(now, self.policy.quota_utc_offset_minutes),
            limit: daily_limit,
        };

        let connection = Connection {
            connection_id: new_id(),
            requester_id: requester_id.to_string(),
            recipient_id: recipient_id.clone(),
            intro_message,
            status: ConnectionStatus::Pending,
            chat_opened_at_ms: None,
            chat_expires_at_ms: None,
            messages_remaining_requester: 0,
            messages_remaining_recipient: 0,
            contact_exchanged: false,
            created_at_ms: now,
        };
        let connection = self
            .repository
            .create_within_quota(&connection, quota)
            .await?;

        tracing::info!(
            connection_id = %connection.connection_id,
            from = %requester_id,
            to = %recipient_id,
            "connection request sent"
        );
        self.notifier
            .notify(
                &recipient_id,
                RealtimeEvent::ConnectionRequested {
                    connection_id: connection.connection_id.clone(),
                    requester_id: requester_id.to_string(),
                    intro_message: connection.intro_message.clone(),
                },
            )
            .await;

        Ok(connection)
    }

    pub async fn list(&self, query: ConnectionListQuery) -> DomainResult<ConnectionPage> {
        let (connections, total) = self.repository.list_connections(&query).await?;
        let mut refreshed = Vec::with_capacity(connections.len());
        for connection in connections {
            refreshed.push(self.check_expiry(connection).await?);
        }
        Ok(ConnectionPage {
            connections: refreshed,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub async fn accept(&self, actor_id: &str, connection_id: &str) -> DomainResult<Connection> {
        let pending = self.pending_for_recipient(actor_id, connection_id).await?;
        let current = pending.status;
        let now = self.clock.now_ms();
        let accepted = Connection {
            status: ConnectionStatus::Active,
            chat_opened_at_ms: Some(now),
            chat_expires_at_ms: Some(now + self.policy.chat_window_ms),
            messages_remaining_requester: self.policy.message_budget,
            messages_remaining_recipient: self.policy.message_budget,
            ..pending
        };
        let accepted = self
            .transition(current, &accepted)
            .await
            .map_err(fold_state_conflict)?;

        tracing::info!(
            connection_id = %accepted.connection_id,
            chat_expires_at = %format_ms_rfc3339(now + self.policy.chat_window_ms),
            "connection accepted"
        );
        self.notifier
            .notify(
                &accepted.requester_id,
                RealtimeEvent::ConnectionAccepted {
                    connection_id: accepted.connection_id.clone(),
                    chat_expires_at_ms: now + self.policy.chat_window_ms,
                },
            )
            .await;
        Ok(accepted)
    }

    pub async fn decline(&self, actor_id: &str, connection_id: &str) -> DomainResult<Connection> {
        let pending = self.pending_for_recipient(actor_id, connection_id).await?;
        let current = pending.status;
        let declined = Connection {
            status: ConnectionStatus::Declined,
            ..pending
        };
        let declined = self
            .transition(current, &declined)
            .await
            .map_err(fold_state_conflict)?;
        tracing::info!(connection_id = %declined.connection_id, "connection declined");
        Ok(declined)
    }

    /// Loads a connection the actor takes part in, applying lazy expiry.
    pub async fn load_for_participant(
        &self,
        actor_id: &str,
        connection_id: &str,
    ) -> DomainResult<Connection> {
        let connection = self
            .repository
            .get_connection(connection_id)
            .await?
            .filter(|connection| connection.is_participant(actor_id))
            .ok_or(DomainError::NotFound)?;
        self.check_expiry(connection).await
    }

    /// Moves an ACTIVE connection past its chat window to EXPIRED. Returns the
    /// stored state, which may differ if another writer got there first.
    pub async fn check_expiry(&self, connection: Connection) -> DomainResult<Connection> {
        if !connection.chat_window_elapsed(self.clock.now_ms()) {
            return Ok(connection);
        }

        let current = connection.status;
        let expired = Connection {
            status: ConnectionStatus::Expired,
            ..connection
        };
        match self.transition(current, &expired).await {
            Ok(stored) => {
                tracing::info!(connection_id = %stored.connection_id, "chat window expired");
                Ok(stored)
            }
            Err(DomainError::Conflict(_)) => self
                .repository
                .get_connection(&expired.connection_id)
                .await?
                .ok_or(DomainError::NotFound),
            Err(err) => Err(err),
        }
    }

    /// Expires every ACTIVE connection whose window has elapsed.
    pub async fn sweep_expired(&self) -> DomainResult<usize> {
        let elapsed = self
            .repository
            .list_elapsed_active(self.clock.now_ms())
            .await?;
        let mut expired = 0;
        for connection in elapsed {
            if self.check_expiry(connection).await?.status == ConnectionStatus::Expired {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Stores `next` over a record still in `current`, refusing moves the
    /// lifecycle does not allow. A refused move reads as `NotFound`.
    async fn transition(
        &self,
        current: ConnectionStatus,
        next: &Connection,
    ) -> DomainResult<Connection> {
        if !current.can_transition_to(next.status) {
            return Err(DomainError::NotFound);
        }
        self.repository.update_connection(next, current).await
    }

    async fn pending_for_recipient(
        &self,
        actor_id: &str,
        connection_id: &str,
    ) -> DomainResult<Connection> {
        self.repository
            .get_connection(connection_id)
            .await?
            .filter(|connection| {
                connection.recipient_id == actor_id
                    && connection.status == ConnectionStatus::Pending
            })
            .ok_or(DomainError::NotFound)
    }
}

/// Losing a compare-and-set race reads the same as the record not being in
/// the expected state.
pub(crate) fn fold_state_conflict(err: DomainError) -> DomainError {
    match err {
        DomainError::Conflict(_) => DomainError::NotFound,
        other => other,
    }
}

fn validate_intro(intro_message: &str) -> DomainResult<String> {
    let intro_message = intro_message.trim();
    let length = intro_message.chars().count();
    if !(INTRO_MIN_CHARS..=INTRO_MAX_CHARS).contains(&length) {
        return Err(DomainError::Validation(format!(
            "intro_message must be between {INTRO_MIN_CHARS} and {INTRO_MAX_CHARS} characters"
        )));
    }
    Ok(intro_message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(status: ConnectionStatus) -> Connection {
        Connection {
            connection_id: "c-1".into(),
            requester_id: "alice".into(),
            recipient_id: "bob".into(),
            intro_message: "hello there, fellow hiker!".into(),
            status,
            chat_opened_at_ms: Some(1_000),
            chat_expires_at_ms: Some(2_000),
            messages_remaining_requester: 1,
            messages_remaining_recipient: 0,
            contact_exchanged: false,
            created_at_ms: 500,
        }
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use ConnectionStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Declined));
        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Graduated));
        assert!(!Pending.can_transition_to(Graduated));
        assert!(!Declined.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Graduated.can_transition_to(Expired));
    }

    #[test]
    fn sides_and_counterparts_resolve() {
        let connection = connection(ConnectionStatus::Active);
        assert_eq!(connection.side_of("alice"), Some(ParticipantSide::Requester));
        assert_eq!(connection.side_of("bob"), Some(ParticipantSide::Recipient));
        assert_eq!(connection.side_of("carol"), None);
        assert_eq!(connection.counterpart_of("alice"), Some("bob"));
        assert_eq!(connection.counterpart_of("carol"), None);
        assert!(connection.involves_pair("bob", "alice"));
    }

    #[test]
    fn budget_never_goes_negative() {
        let mut connection = connection(ConnectionStatus::Active);
        assert_eq!(connection.consume_budget(ParticipantSide::Requester), Some(0));
        assert_eq!(connection.consume_budget(ParticipantSide::Requester), None);
        assert_eq!(connection.consume_budget(ParticipantSide::Recipient), None);
        assert_eq!(connection.messages_remaining_requester, 0);
        assert_eq!(connection.messages_remaining_recipient, 0);
    }

    #[test]
    fn window_elapses_strictly_after_expiry() {
        let connection = connection(ConnectionStatus::Active);
        assert!(!connection.chat_window_elapsed(2_000));
        assert!(connection.chat_window_elapsed(2_001));
        let pending = Connection {
            status: ConnectionStatus::Pending,
            ..connection
        };
        assert!(!pending.chat_window_elapsed(10_000));
    }

    #[test]
    fn intro_length_is_checked_after_trim() {
        assert!(validate_intro("too short").is_err());
        assert!(validate_intro(&format!("  {}  ", "x".repeat(19))).is_err());
        assert_eq!(
            validate_intro(&format!("  {}  ", "x".repeat(20))).unwrap(),
            "x".repeat(20)
        );
        assert!(validate_intro(&"x".repeat(201)).is_err());
    }

    #[test]
    fn list_query_clamps_limit() {
        let query = build_list_query("alice", None, ConnectionDirection::All, Some(500), None);
        assert_eq!(query.limit, 50);
        let query = build_list_query("alice", None, ConnectionDirection::Sent, None, Some(3));
        assert_eq!(query.limit, 20);
        assert_eq!(query.offset, 3);
        assert!(query.matches(&connection(ConnectionStatus::Pending)));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(ConnectionStatus::parse("active"), Some(ConnectionStatus::Active));
        assert_eq!(ConnectionStatus::parse("nope"), None);
    }
}
