use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::clock::Clock;
use crate::connections::{Connection, ConnectionService, ConnectionStatus, ParticipantSide};
use crate::error::DomainError;
use crate::ports::chat::MessageRepository;
use crate::presence::{NotificationHub, RealtimeEvent};
use crate::util::new_id;

pub const MESSAGE_MAX_CHARS: usize = 500;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub connection_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_ms: Option<i64>,
}

impl ChatMessage {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at_ms.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    pub message: ChatMessage,
    pub messages_remaining: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: usize,
    pub before_ms: Option<i64>,
}

impl HistoryQuery {
    pub fn new(limit: Option<usize>, before_ms: Option<i64>) -> Self {
        Self {
            limit: limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .clamp(1, MAX_HISTORY_LIMIT),
            before_ms,
        }
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatHistory {
    pub connection_id: String,
    pub status: ConnectionStatus,
    /// Oldest first.
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
    pub my_remaining: u32,
    pub chat_expires_at_ms: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatStatus {
    pub connection_id: String,
    pub status: ConnectionStatus,
    pub is_active: bool,
    pub is_expired: bool,
    pub chat_expires_at_ms: Option<i64>,
    pub time_remaining_ms: i64,
    pub my_remaining: u32,
    pub messages_remaining_requester: u32,
    pub messages_remaining_recipient: u32,
    pub counterpart_online: bool,
}

#[derive(Clone)]
pub struct ChatService {
    connections: ConnectionService,
    messages: Arc<dyn MessageRepository>,
    notifier: NotificationHub,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(
        connections: ConnectionService,
        messages: Arc<dyn MessageRepository>,
        notifier: NotificationHub,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections,
            messages,
            notifier,
            clock,
        }
    }

    pub async fn send(
        &self,
        sender_id: &str,
        connection_id: &str,
        content: &str,
    ) -> DomainResult<SendReceipt> {
        let content = validate_content(content)?;
        let connection = self
            .connections
            .load_for_participant(sender_id, connection_id)
            .await?;
        let side = open_side(&connection, sender_id)?;
        if connection.remaining_for(side) == 0 {
            return Err(DomainError::RateLimited(
                "message limit reached for this chat".into(),
            ));
        }

        let now = self.clock.now_ms();
        let message = ChatMessage {
            message_id: new_id(),
            connection_id: connection.connection_id.clone(),
            sender_id: sender_id.to_string(),
            content,
            created_at_ms: now,
            deleted_at_ms: None,
        };
        let receipt = match self.messages.append_message(&message, side, now).await {
            Ok(receipt) => receipt,
            Err(DomainError::Expired(reason)) => {
                // Lost the race against the window; make the transition stick.
                self.connections.check_expiry(connection).await?;
                return Err(DomainError::Expired(reason));
            }
            Err(err) => return Err(err),
        };

        tracing::debug!(
            connection_id = %receipt.message.connection_id,
            sender_id = %sender_id,
            remaining = receipt.messages_remaining,
            "chat message stored"
        );

        if let Some(counterpart) = connection.counterpart_of(sender_id) {
            self.notifier
                .notify(
                    counterpart,
                    RealtimeEvent::ChatMessage {
                        message: receipt.message.clone(),
                        messages_remaining: None,
                    },
                )
                .await;
        }

        Ok(receipt)
    }

    pub async fn history(
        &self,
        actor_id: &str,
        connection_id: &str,
        query: HistoryQuery,
    ) -> DomainResult<ChatHistory> {
        let connection = self
            .connections
            .load_for_participant(actor_id, connection_id)
            .await?;
        let probe = HistoryQuery {
            limit: query.limit + 1,
            before_ms: query.before_ms,
        };
        let mut messages = self
            .messages
            .list_messages(&connection.connection_id, &probe)
            .await?;
        let has_more = messages.len() > query.limit;
        messages.truncate(query.limit);
        messages.reverse();

        let my_remaining = connection
            .side_of(actor_id)
            .map_or(0, |side| connection.remaining_for(side));
        Ok(ChatHistory {
            connection_id: connection.connection_id,
            status: connection.status,
            messages,
            has_more,
            my_remaining,
            chat_expires_at_ms: connection.chat_expires_at_ms,
        })
    }

    pub async fn status(&self, actor_id: &str, connection_id: &str) -> DomainResult<ChatStatus> {
        let connection = self
            .connections
            .load_for_participant(actor_id, connection_id)
            .await?;
        let now = self.clock.now_ms();
        let time_remaining_ms = connection
            .chat_expires_at_ms
            .filter(|_| connection.status == ConnectionStatus::Active)
            .map_or(0, |expires_at_ms| (expires_at_ms - now).max(0));
        let my_remaining = connection
            .side_of(actor_id)
            .map_or(0, |side| connection.remaining_for(side));
        let counterpart_online = match connection.counterpart_of(actor_id) {
            Some(counterpart) => self.notifier.registry().is_online(counterpart).await,
            None => false,
        };

        Ok(ChatStatus {
            is_active: connection.status == ConnectionStatus::Active,
            is_expired: connection.status == ConnectionStatus::Expired,
            connection_id: connection.connection_id,
            status: connection.status,
            chat_expires_at_ms: connection.chat_expires_at_ms,
            time_remaining_ms,
            my_remaining,
            messages_remaining_requester: connection.messages_remaining_requester,
            messages_remaining_recipient: connection.messages_remaining_recipient,
            counterpart_online,
        })
    }

    /// Relays a typing signal to the other participant only. Returns whether it
    /// reached a live session.
    pub async fn typing(
        &self,
        actor_id: &str,
        connection_id: &str,
        is_typing: bool,
    ) -> DomainResult<bool> {
        let connection = self
            .connections
            .load_for_participant(actor_id, connection_id)
            .await?;
        if connection.status != ConnectionStatus::Active {
            return Ok(false);
        }
        let Some(counterpart) = connection.counterpart_of(actor_id) else {
            return Ok(false);
        };
        Ok(self
            .notifier
            .notify(
                counterpart,
                RealtimeEvent::ChatTyping {
                    connection_id: connection.connection_id.clone(),
                    user_id: actor_id.to_string(),
                    is_typing,
                },
            )
            .await)
    }

    /// Soft-deletes one of the actor's own messages. The budget is not refunded.
    pub async fn delete_message(
        &self,
        actor_id: &str,
        connection_id: &str,
        message_id: &str,
    ) -> DomainResult<ChatMessage> {
        let connection = self
            .connections
            .load_for_participant(actor_id, connection_id)
            .await?;
        self.messages
            .get_message(&connection.connection_id, message_id)
            .await?
            .filter(|message| message.sender_id == actor_id && !message.is_deleted())
            .ok_or(DomainError::NotFound)?;
        let deleted = self
            .messages
            .soft_delete_message(&connection.connection_id, message_id, self.clock.now_ms())
            .await?;
        tracing::info!(
            connection_id = %deleted.connection_id,
            message_id = %deleted.message_id,
            "chat message deleted"
        );
        Ok(deleted)
    }
}

fn open_side(connection: &Connection, sender_id: &str) -> DomainResult<ParticipantSide> {
    match connection.status {
        ConnectionStatus::Active => connection.side_of(sender_id).ok_or(DomainError::NotFound),
        ConnectionStatus::Expired => Err(DomainError::Expired("chat window has closed".into())),
        _ => Err(DomainError::NotFound),
    }
}

fn validate_content(content: &str) -> DomainResult<String> {
    let content = content.trim();
    let length = content.chars().count();
    if length == 0 || length > MESSAGE_MAX_CHARS {
        return Err(DomainError::Validation(format!(
            "content must be between 1 and {MESSAGE_MAX_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert!(validate_content("   ").is_err());
        assert_eq!(validate_content("  hi  ").unwrap(), "hi");
        assert!(validate_content(&"é".repeat(500)).is_ok());
        assert!(validate_content(&"é".repeat(501)).is_err());
    }

    #[test]
    fn history_limit_is_clamped() {
        assert_eq!(HistoryQuery::default().limit, 50);
        assert_eq!(HistoryQuery::new(Some(1_000), None).limit, 100);
        assert_eq!(HistoryQuery::new(Some(0), Some(5)).limit, 1);
    }

    #[test]
    fn only_active_connections_accept_messages() {
        let mut connection = Connection {
            connection_id: "c-1".into(),
            requester_id: "alice".into(),
            recipient_id: "bob".into(),
            intro_message: "x".repeat(20),
            status: ConnectionStatus::Active,
            chat_opened_at_ms: Some(0),
            chat_expires_at_ms: Some(10),
            messages_remaining_requester: 10,
            messages_remaining_recipient: 10,
            contact_exchanged: false,
            created_at_ms: 0,
        };
        assert_eq!(open_side(&connection, "bob").unwrap(), ParticipantSide::Recipient);

        connection.status = ConnectionStatus::Expired;
        assert!(matches!(open_side(&connection, "bob"), Err(DomainError::Expired(_))));

        connection.status = ConnectionStatus::Graduated;
        assert!(matches!(open_side(&connection, "bob"), Err(DomainError::NotFound)));
    }
}
