use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rapport_domain::DomainResult;
use rapport_domain::chat::{ChatMessage, HistoryQuery, SendReceipt};
use rapport_domain::connections::{
    Connection, ConnectionListQuery, ConnectionStatus, ParticipantSide, RequestQuota,
};
use rapport_domain::error::DomainError;
use rapport_domain::exchange::{ContactExchange, ExchangeApproval, ExchangeStatus};
use rapport_domain::ports::BoxFuture;
use rapport_domain::ports::chat::MessageRepository;
use rapport_domain::ports::connections::ConnectionRepository;
use rapport_domain::ports::exchange::ExchangeRepository;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    connections: HashMap<String, Connection>,
    messages: HashMap<String, Vec<ChatMessage>>,
    exchanges: HashMap<String, ContactExchange>,
}

impl Tables {
    fn pair_exists(&self, user_a: &str, user_b: &str) -> Option<&Connection> {
        self.connections
            .values()
            .find(|connection| connection.involves_pair(user_a, user_b))
    }
}

/// Connections, messages and exchanges behind one lock, so the multi-record
/// mutations (message + budget, approval + graduation) commit together.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRepository for InMemoryStore {
    fn create_within_quota(
        &self,
        connection: &Connection,
        quota: RequestQuota,
    ) -> BoxFuture<'_, DomainResult<Connection>> {
        let connection = connection.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            if let Some(existing) =
                tables.pair_exists(&connection.requester_id, &connection.recipient_id)
            {
                return Err(DomainError::Conflict(format!(
                    "connection already exists ({})",
                    existing.status.as_str()
                )));
            }
            let sent = tables
                .connections
                .values()
                .filter(|existing| {
                    existing.requester_id == connection.requester_id
                        && existing.created_at_ms >= quota.since_ms
                })
                .count();
            if quota.exceeded_by(sent) {
                return Err(quota.rejection());
            }
            tables
                .connections
                .insert(connection.connection_id.clone(), connection.clone());
            Ok(connection)
        })
    }

    fn get_connection(
        &self,
        connection_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Connection>>> {
        let connection_id = connection_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.connections.get(&connection_id).cloned()) })
    }

    fn find_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Connection>>> {
        let user_a = user_a.to_string();
        let user_b = user_b.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables.pair_exists(&user_a, &user_b).cloned())
        })
    }

    fn list_connections(
        &self,
        query: &ConnectionListQuery,
    ) -> BoxFuture<'_, DomainResult<(Vec<Connection>, usize)>> {
        let query = query.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let mut matching: Vec<Connection> = tables
                .connections
                .values()
                .filter(|connection| query.matches(connection))
                .cloned()
                .collect();
            matching.sort_by(|a, b| {
                b.created_at_ms
                    .cmp(&a.created_at_ms)
                    .then_with(|| b.connection_id.cmp(&a.connection_id))
            });
            let total = matching.len();
            let page = matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect();
            Ok((page, total))
        })
    }

    fn counterpart_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<HashSet<String>>> {
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .connections
                .values()
                .filter_map(|connection| connection.counterpart_of(&user_id).map(str::to_string))
                .collect())
        })
    }

    fn update_connection(
        &self,
        connection: &Connection,
        expected: ConnectionStatus,
    ) -> BoxFuture<'_, DomainResult<Connection>> {
        let connection = connection.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let stored = tables
                .connections
                .get_mut(&connection.connection_id)
                .ok_or(DomainError::NotFound)?;
            if stored.status != expected {
                return Err(DomainError::Conflict(format!(
                    "connection is {}",
                    stored.status.as_str()
                )));
            }
            *stored = connection.clone();
            Ok(connection)
        })
    }

    fn list_elapsed_active(&self, now_ms: i64) -> BoxFuture<'_, DomainResult<Vec<Connection>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .connections
                .values()
                .filter(|connection| connection.chat_window_elapsed(now_ms))
                .cloned()
                .collect())
        })
    }
}

impl MessageRepository for InMemoryStore {
    fn append_message(
        &self,
        message: &ChatMessage,
        side: ParticipantSide,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<SendReceipt>> {
        let message = message.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let connection = tables
                .connections
                .get_mut(&message.connection_id)
                .ok_or(DomainError::NotFound)?;
            if connection.status != ConnectionStatus::Active
                || connection.chat_window_elapsed(now_ms)
            {
                return Err(DomainError::Expired("chat window has closed".into()));
            }
            let messages_remaining = connection.consume_budget(side).ok_or_else(|| {
                DomainError::RateLimited("message limit reached for this chat".into())
            })?;
            tables
                .messages
                .entry(message.connection_id.clone())
                .or_default()
                .push(message.clone());
            Ok(SendReceipt {
                message,
                messages_remaining,
            })
        })
    }

    fn list_messages(
        &self,
        connection_id: &str,
        query: &HistoryQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let connection_id = connection_id.to_string();
        let query = query.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let Some(messages) = tables.messages.get(&connection_id) else {
                return Ok(Vec::new());
            };
            // Stored in insertion order, which is creation order.
            Ok(messages
                .iter()
                .rev()
                .filter(|message| !message.is_deleted())
                .filter(|message| {
                    query
                        .before_ms
                        .is_none_or(|before_ms| message.created_at_ms < before_ms)
                })
                .take(query.limit)
                .cloned()
                .collect())
        })
    }

    fn get_message(
        &self,
        connection_id: &str,
        message_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ChatMessage>>> {
        let connection_id = connection_id.to_string();
        let message_id = message_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables.messages.get(&connection_id).and_then(|messages| {
                messages
                    .iter()
                    .find(|message| message.message_id == message_id)
                    .cloned()
            }))
        })
    }

    fn soft_delete_message(
        &self,
        connection_id: &str,
        message_id: &str,
        deleted_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let connection_id = connection_id.to_string();
        let message_id = message_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let message = tables
                .messages
                .get_mut(&connection_id)
                .and_then(|messages| {
                    messages
                        .iter_mut()
                        .find(|message| message.message_id == message_id)
                })
                .ok_or(DomainError::NotFound)?;
            message.deleted_at_ms.get_or_insert(deleted_at_ms);
            Ok(message.clone())
        })
    }
}

impl ExchangeRepository for InMemoryStore {
    fn create_exchange(
        &self,
        exchange: &ContactExchange,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>> {
        let exchange = exchange.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let pending = tables.exchanges.values().any(|existing| {
                existing.connection_id == exchange.connection_id
                    && existing.status == ExchangeStatus::Pending
            });
            if pending {
                return Err(DomainError::Conflict(
                    "an exchange is already pending for this connection".into(),
                ));
            }
            tables
                .exchanges
                .insert(exchange.exchange_id.clone(), exchange.clone());
            Ok(exchange)
        })
    }

    fn get_exchange(
        &self,
        exchange_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactExchange>>> {
        let exchange_id = exchange_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.exchanges.get(&exchange_id).cloned()) })
    }

    fn latest_for_connection(
        &self,
        connection_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactExchange>>> {
        let connection_id = connection_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            Ok(tables
                .exchanges
                .values()
                .filter(|exchange| exchange.connection_id == connection_id)
                .max_by(|a, b| {
                    a.created_at_ms
                        .cmp(&b.created_at_ms)
                        .then_with(|| a.exchange_id.cmp(&b.exchange_id))
                })
                .cloned())
        })
    }

    fn approve_exchange(
        &self,
        approval: &ExchangeApproval,
    ) -> BoxFuture<'_, DomainResult<(ContactExchange, Connection)>> {
        let approval = approval.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let Tables {
                connections,
                exchanges,
                ..
            } = &mut *tables;

            let exchange = exchanges
                .get_mut(&approval.exchange_id)
                .filter(|exchange| exchange.status == ExchangeStatus::Pending)
                .ok_or(DomainError::NotFound)?;
            let connection = connections
                .get_mut(&exchange.connection_id)
                .filter(|connection| {
                    connection.status == ConnectionStatus::Active
                        && !connection.chat_window_elapsed(approval.approved_at_ms)
                })
                .ok_or(DomainError::NotFound)?;

            exchange.status = ExchangeStatus::Approved;
            exchange.rec_share_email = approval.rec_share_email;
            exchange.rec_share_phone = approval.rec_share_phone;
            exchange.reveal_expires_at_ms = Some(approval.reveal_expires_at_ms);
            exchange.archive_expires_at_ms = Some(approval.archive_expires_at_ms);
            exchange.completed_at_ms = Some(approval.approved_at_ms);
            connection.status = ConnectionStatus::Graduated;
            connection.contact_exchanged = true;

            Ok((exchange.clone(), connection.clone()))
        })
    }

    fn decline_exchange(
        &self,
        exchange_id: &str,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>> {
        let exchange_id = exchange_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let exchange = tables
                .exchanges
                .get_mut(&exchange_id)
                .filter(|exchange| exchange.status == ExchangeStatus::Pending)
                .ok_or(DomainError::NotFound)?;
            exchange.status = ExchangeStatus::Declined;
            Ok(exchange.clone())
        })
    }
}
