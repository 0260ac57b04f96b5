use std::collections::HashSet;
use std::sync::Arc;

use rapport_domain::DomainResult;
use rapport_domain::chat::{ChatMessage, HistoryQuery, SendReceipt};
use rapport_domain::connections::{
    Connection, ConnectionDirection, ConnectionListQuery, ConnectionStatus, ParticipantSide,
    RequestQuota,
};
use rapport_domain::error::DomainError;
use rapport_domain::exchange::{ContactExchange, ExchangeApproval};
use rapport_domain::ports::BoxFuture;
use rapport_domain::ports::chat::MessageRepository;
use rapport_domain::ports::connections::ConnectionRepository;
use rapport_domain::ports::exchange::ExchangeRepository;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{
    Response, Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};

use crate::db::DbConfig;

// Thrown from inside transactions and matched back into domain errors.
const NOT_FOUND: &str = "rapport:not_found";
const CHAT_CLOSED: &str = "rapport:chat_closed";
const BUDGET_SPENT: &str = "rapport:budget_spent";
const QUOTA_EXCEEDED: &str = "rapport:quota_exceeded";
const PAIR_EXISTS: &str = "rapport:pair_exists";
const EXCHANGE_PENDING: &str = "rapport:exchange_pending";
const STATUS_MOVED: &str = "rapport:status_moved";

const CONNECTION_FIELDS: &str = "connection_id, requester_id, recipient_id, intro_message, \
     status, chat_opened_at_ms, chat_expires_at_ms, messages_remaining_requester, \
     messages_remaining_recipient, contact_exchanged, created_at_ms";
const MESSAGE_FIELDS: &str =
    "message_id, connection_id, sender_id, content, created_at_ms, deleted_at_ms";
const EXCHANGE_FIELDS: &str = "exchange_id, connection_id, requester_id, recipient_id, \
     req_share_email, req_share_phone, req_wants_email, req_wants_phone, rec_share_email, \
     rec_share_phone, status, reveal_expires_at_ms, archive_expires_at_ms, completed_at_ms, \
     created_at_ms";

const SCHEMA: &str = "DEFINE TABLE IF NOT EXISTS connection SCHEMALESS;\n\
     DEFINE INDEX IF NOT EXISTS connection_pair ON TABLE connection FIELDS pair_key UNIQUE;\n\
     DEFINE INDEX IF NOT EXISTS connection_requester ON TABLE connection FIELDS requester_id, created_at_ms;\n\
     DEFINE INDEX IF NOT EXISTS connection_recipient ON TABLE connection FIELDS recipient_id;\n\
     DEFINE INDEX IF NOT EXISTS connection_status ON TABLE connection FIELDS status, chat_expires_at_ms;\n\
     DEFINE TABLE IF NOT EXISTS request_guard SCHEMALESS;\n\
     DEFINE TABLE IF NOT EXISTS exchange_guard SCHEMALESS;\n\
     DEFINE TABLE IF NOT EXISTS message SCHEMALESS;\n\
     DEFINE INDEX IF NOT EXISTS message_connection ON TABLE message FIELDS connection_id, created_at_ms;\n\
     DEFINE TABLE IF NOT EXISTS contact_exchange SCHEMALESS;\n\
     DEFINE INDEX IF NOT EXISTS exchange_connection ON TABLE contact_exchange FIELDS connection_id, created_at_ms;";

/// Stored connection: the domain record plus the direction-free pair key the
/// unique index is built on.
#[derive(Clone, Debug, Serialize)]
struct SurrealConnectionRecord {
    pair_key: String,
    #[serde(flatten)]
    connection: Connection,
}

#[derive(Debug, Deserialize)]
struct SurrealPairRow {
    requester_id: String,
    recipient_id: String,
}

#[derive(Debug, Deserialize)]
struct SurrealCountRow {
    total: usize,
}

/// SurrealDB-backed ledgers. Every multi-record mutation runs as a single
/// SurrealQL transaction.
#[derive(Clone)]
pub struct SurrealStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealStore {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        let db = Surreal::<Client>::init();
        db.connect::<Ws>(db_config.socket_address()).await?;
        db.signin(Root {
            username: &db_config.username,
            password: &db_config.password,
        })
        .await?;
        db.use_ns(&db_config.namespace)
            .use_db(&db_config.database)
            .await?;
        let store = Self {
            client: Arc::new(db),
        };
        store.ensure_schema().await?;
        tracing::info!(
            endpoint = %db_config.endpoint,
            namespace = %db_config.namespace,
            database = %db_config.database,
            "surreal ledgers connected"
        );
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> DomainResult<()> {
        let response = self
            .client
            .query(SCHEMA)
            .await
            .map_err(Self::map_surreal_error)?;
        Self::check(response)?;
        Ok(())
    }

    fn map_surreal_error(err: surrealdb::Error) -> DomainError {
        map_error_message(&err.to_string())
    }

    /// Surfaces the most specific failure of a multi-statement response. Inside
    /// an aborted transaction every statement reports an error, but only the
    /// one that threw carries a marker.
    fn check(mut response: Response) -> DomainResult<Response> {
        let errors = response.take_errors();
        if errors.is_empty() {
            return Ok(response);
        }
        let mut errors: Vec<(usize, String)> = errors
            .into_iter()
            .map(|(index, err)| (index, err.to_string()))
            .collect();
        errors.sort_by_key(|(index, _)| *index);
        let messages: Vec<String> = errors.into_iter().map(|(_, message)| message).collect();
        Err(most_specific_error(&messages))
    }

    fn take_rows(response: &mut Response, index: usize) -> DomainResult<Vec<Value>> {
        response
            .take(index)
            .map_err(|err| DomainError::Unavailable(format!("invalid query result: {err}")))
    }

    /// Rows of the final statement, which is where transactions put their
    /// read-back.
    fn take_last_rows(response: &mut Response, from_end: usize) -> DomainResult<Vec<Value>> {
        let index = response
            .num_statements()
            .checked_sub(from_end + 1)
            .ok_or_else(|| DomainError::Unavailable("missing statement result".to_string()))?;
        Self::take_rows(response, index)
    }

    async fn select_one<T: DeserializeOwned + Send>(
        &self,
        query: String,
        bindings: Vec<(&'static str, String)>,
        kind: &str,
    ) -> DomainResult<Option<T>> {
        let mut request = self.client.query(query);
        for binding in bindings {
            request = request.bind(binding);
        }
        let response = request.await.map_err(Self::map_surreal_error)?;
        let mut response = Self::check(response)?;
        let rows = Self::take_rows(&mut response, 0)?;
        Ok(decode_rows::<T>(rows, kind)?.into_iter().next())
    }
}

pub(crate) fn pair_key(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{user_a}|{user_b}")
    } else {
        format!("{user_b}|{user_a}")
    }
}

pub(crate) fn map_error_message(message: &str) -> DomainError {
    let lowered = message.to_lowercase();
    if lowered.contains(NOT_FOUND) {
        return DomainError::NotFound;
    }
    if lowered.contains(CHAT_CLOSED) {
        return DomainError::Expired("chat window has closed".into());
    }
    if lowered.contains(BUDGET_SPENT) {
        return DomainError::RateLimited("message limit reached for this chat".into());
    }
    if lowered.contains(QUOTA_EXCEEDED) {
        return DomainError::RateLimited("daily connection limit reached".into());
    }
    if lowered.contains(PAIR_EXISTS) {
        return DomainError::Conflict("connection already exists".into());
    }
    if lowered.contains(EXCHANGE_PENDING) {
        return DomainError::Conflict(
            "an exchange is already pending for this connection".into(),
        );
    }
    if lowered.contains(STATUS_MOVED) {
        return DomainError::Conflict("connection status changed".into());
    }
    if lowered.contains("already exists")
        || lowered.contains("already contains")
        || lowered.contains("duplicate")
        || lowered.contains("unique")
        || lowered.contains("conflict")
    {
        return DomainError::Conflict("concurrent write, retry the request".into());
    }
    DomainError::Unavailable(format!("surreal query failed: {message}"))
}

fn most_specific_error(messages: &[String]) -> DomainError {
    messages
        .iter()
        .map(|message| map_error_message(message))
        .find(|err| !matches!(err, DomainError::Unavailable(_)))
        .unwrap_or_else(|| {
            DomainError::Unavailable(format!(
                "surreal query failed: {}",
                messages.first().map(String::as_str).unwrap_or("unknown error")
            ))
        })
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, kind: &str) -> DomainResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<T>(row)
                .map_err(|err| DomainError::Unavailable(format!("invalid {kind} row: {err}")))
        })
        .collect()
}

fn list_filter(query: &ConnectionListQuery) -> String {
    let mut clauses = vec![match query.direction {
        ConnectionDirection::Sent => "requester_id = $user_id",
        ConnectionDirection::Received => "recipient_id = $user_id",
        ConnectionDirection::All => "(requester_id = $user_id OR recipient_id = $user_id)",
    }];
    if query.status.is_some() {
        clauses.push("status = $status");
    }
    clauses.join(" AND ")
}

fn budget_field(side: ParticipantSide) -> &'static str {
    match side {
        ParticipantSide::Requester => "messages_remaining_requester",
        ParticipantSide::Recipient => "messages_remaining_recipient",
    }
}

fn as_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl ConnectionRepository for SurrealStore {
    fn create_within_quota(
        &self,
        connection: &Connection,
        quota: RequestQuota,
    ) -> BoxFuture<'_, DomainResult<Connection>> {
        let record = SurrealConnectionRecord {
            pair_key: pair_key(&connection.requester_id, &connection.recipient_id),
            connection: connection.clone(),
        };
        let client = self.client.clone();
        Box::pin(async move {
            // Every request by the same requester writes its guard row, so
            // concurrent requests collide at commit instead of both passing.
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $pair = (SELECT VALUE connection_id FROM connection WHERE pair_key = $pair_key);\n\
                 IF array::len($pair) > 0 {{ THROW \"{PAIR_EXISTS}\"; }};\n\
                 LET $sent = (SELECT VALUE connection_id FROM connection \
                     WHERE requester_id = $requester_id AND created_at_ms >= $since_ms);\n\
                 IF array::len($sent) >= $limit {{ THROW \"{QUOTA_EXCEEDED}\"; }};\n\
                 UPSERT type::thing('request_guard', $requester_id) SET last_request_at_ms = $created_at_ms;\n\
                 CREATE type::thing('connection', $connection_id) CONTENT $record;\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("pair_key", record.pair_key.clone()))
                .bind(("requester_id", record.connection.requester_id.clone()))
                .bind(("since_ms", quota.since_ms))
                .bind(("limit", as_i64(quota.limit)))
                .bind(("created_at_ms", record.connection.created_at_ms))
                .bind(("connection_id", record.connection.connection_id.clone()))
                .bind(("record", record.clone()))
                .await
                .map_err(Self::map_surreal_error)?;
            Self::check(response).map_err(|err| match err {
                DomainError::RateLimited(_) => quota.rejection(),
                other => other,
            })?;
            Ok(record.connection)
        })
    }

    fn get_connection(
        &self,
        connection_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Connection>>> {
        let connection_id = connection_id.to_string();
        Box::pin(async move {
            self.select_one(
                format!(
                    "SELECT {CONNECTION_FIELDS} FROM type::thing('connection', $connection_id)"
                ),
                vec![("connection_id", connection_id)],
                "connection",
            )
            .await
        })
    }

    fn find_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Connection>>> {
        let pair_key = pair_key(user_a, user_b);
        Box::pin(async move {
            self.select_one(
                format!("SELECT {CONNECTION_FIELDS} FROM connection WHERE pair_key = $pair_key LIMIT 1"),
                vec![("pair_key", pair_key)],
                "connection",
            )
            .await
        })
    }

    fn list_connections(
        &self,
        query: &ConnectionListQuery,
    ) -> BoxFuture<'_, DomainResult<(Vec<Connection>, usize)>> {
        let filter = list_filter(query);
        let user_id = query.user_id.clone();
        let status = query.status.map(|status| status.as_str().to_string());
        let limit = as_i64(query.limit);
        let offset = as_i64(query.offset);
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query(format!(
                    "SELECT {CONNECTION_FIELDS} FROM connection WHERE {filter} \
                     ORDER BY created_at_ms DESC, connection_id DESC LIMIT $limit START $offset;\n\
                     SELECT count() AS total FROM connection WHERE {filter} GROUP ALL;"
                ))
                .bind(("user_id", user_id))
                .bind(("status", status))
                .bind(("limit", limit))
                .bind(("offset", offset))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            let page = decode_rows::<Connection>(Self::take_rows(&mut response, 0)?, "connection")?;
            let total = decode_rows::<SurrealCountRow>(Self::take_rows(&mut response, 1)?, "count")?
                .into_iter()
                .next()
                .map_or(0, |row| row.total);
            Ok((page, total))
        })
    }

    fn counterpart_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<HashSet<String>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query(
                    "SELECT requester_id, recipient_id FROM connection \
                     WHERE requester_id = $user_id OR recipient_id = $user_id",
                )
                .bind(("user_id", user_id.clone()))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            let rows = decode_rows::<SurrealPairRow>(Self::take_rows(&mut response, 0)?, "pair")?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    if row.requester_id == user_id {
                        row.recipient_id
                    } else {
                        row.requester_id
                    }
                })
                .collect())
        })
    }

    fn update_connection(
        &self,
        connection: &Connection,
        expected: ConnectionStatus,
    ) -> BoxFuture<'_, DomainResult<Connection>> {
        let record = SurrealConnectionRecord {
            pair_key: pair_key(&connection.requester_id, &connection.recipient_id),
            connection: connection.clone(),
        };
        let client = self.client.clone();
        Box::pin(async move {
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $current = (SELECT VALUE status FROM type::thing('connection', $connection_id))[0];\n\
                 IF $current = NONE {{ THROW \"{NOT_FOUND}\"; }};\n\
                 IF $current != $expected {{ THROW \"{STATUS_MOVED}\"; }};\n\
                 UPDATE type::thing('connection', $connection_id) CONTENT $record;\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("connection_id", record.connection.connection_id.clone()))
                .bind(("expected", expected.as_str().to_string()))
                .bind(("record", record.clone()))
                .await
                .map_err(Self::map_surreal_error)?;
            Self::check(response)?;
            Ok(record.connection)
        })
    }

    fn list_elapsed_active(&self, now_ms: i64) -> BoxFuture<'_, DomainResult<Vec<Connection>>> {
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query(format!(
                    "SELECT {CONNECTION_FIELDS} FROM connection \
                     WHERE status = 'ACTIVE' AND chat_expires_at_ms < $now_ms"
                ))
                .bind(("now_ms", now_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            decode_rows(Self::take_rows(&mut response, 0)?, "connection")
        })
    }
}

impl MessageRepository for SurrealStore {
    fn append_message(
        &self,
        message: &ChatMessage,
        side: ParticipantSide,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<SendReceipt>> {
        let message = message.clone();
        let budget = budget_field(side);
        let client = self.client.clone();
        Box::pin(async move {
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $chat = (SELECT status, chat_expires_at_ms, {budget} AS remaining \
                     FROM type::thing('connection', $connection_id))[0];\n\
                 IF $chat = NONE {{ THROW \"{NOT_FOUND}\"; }};\n\
                 IF $chat.status != 'ACTIVE' OR $chat.chat_expires_at_ms < $now_ms {{ THROW \"{CHAT_CLOSED}\"; }};\n\
                 IF $chat.remaining <= 0 {{ THROW \"{BUDGET_SPENT}\"; }};\n\
                 UPDATE type::thing('connection', $connection_id) SET {budget} -= 1;\n\
                 CREATE type::thing('message', $message_id) CONTENT $message;\n\
                 SELECT VALUE {budget} FROM type::thing('connection', $connection_id);\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("connection_id", message.connection_id.clone()))
                .bind(("message_id", message.message_id.clone()))
                .bind(("now_ms", now_ms))
                .bind(("message", message.clone()))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            let messages_remaining = decode_rows::<u32>(
                Self::take_last_rows(&mut response, 0)?,
                "message budget",
            )?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::Unavailable("message budget missing".to_string()))?;
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
        let before_clause = if query.before_ms.is_some() {
            " AND created_at_ms < $before_ms"
        } else {
            ""
        };
        let before_ms = query.before_ms;
        let limit = as_i64(query.limit);
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .query(format!(
                    "SELECT {MESSAGE_FIELDS} FROM message \
                     WHERE connection_id = $connection_id AND deleted_at_ms IS NONE{before_clause} \
                     ORDER BY created_at_ms DESC, message_id DESC LIMIT $limit"
                ))
                .bind(("connection_id", connection_id))
                .bind(("before_ms", before_ms))
                .bind(("limit", limit))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            decode_rows(Self::take_rows(&mut response, 0)?, "message")
        })
    }

    fn get_message(
        &self,
        connection_id: &str,
        message_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ChatMessage>>> {
        let connection_id = connection_id.to_string();
        let message_id = message_id.to_string();
        Box::pin(async move {
            self.select_one(
                format!(
                    "SELECT {MESSAGE_FIELDS} FROM type::thing('message', $message_id) \
                     WHERE connection_id = $connection_id"
                ),
                vec![("message_id", message_id), ("connection_id", connection_id)],
                "message",
            )
            .await
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
        let client = self.client.clone();
        Box::pin(async move {
            // A second delete keeps the first timestamp.
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $owner = (SELECT VALUE connection_id FROM type::thing('message', $message_id))[0];\n\
                 IF $owner != $connection_id {{ THROW \"{NOT_FOUND}\"; }};\n\
                 UPDATE type::thing('message', $message_id) SET deleted_at_ms = $deleted_at_ms \
                     WHERE deleted_at_ms IS NONE;\n\
                 SELECT {MESSAGE_FIELDS} FROM type::thing('message', $message_id);\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("message_id", message_id))
                .bind(("connection_id", connection_id))
                .bind(("deleted_at_ms", deleted_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            decode_rows::<ChatMessage>(Self::take_last_rows(&mut response, 0)?, "message")?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)
        })
    }
}

impl ExchangeRepository for SurrealStore {
    fn create_exchange(
        &self,
        exchange: &ContactExchange,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>> {
        let exchange = exchange.clone();
        let client = self.client.clone();
        Box::pin(async move {
            // Same guard idea as requests, keyed by connection.
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $pending = (SELECT VALUE exchange_id FROM contact_exchange \
                     WHERE connection_id = $connection_id AND status = 'PENDING');\n\
                 IF array::len($pending) > 0 {{ THROW \"{EXCHANGE_PENDING}\"; }};\n\
                 UPSERT type::thing('exchange_guard', $connection_id) SET last_exchange_at_ms = $created_at_ms;\n\
                 CREATE type::thing('contact_exchange', $exchange_id) CONTENT $exchange;\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("connection_id", exchange.connection_id.clone()))
                .bind(("exchange_id", exchange.exchange_id.clone()))
                .bind(("created_at_ms", exchange.created_at_ms))
                .bind(("exchange", exchange.clone()))
                .await
                .map_err(Self::map_surreal_error)?;
            Self::check(response)?;
            Ok(exchange)
        })
    }

    fn get_exchange(
        &self,
        exchange_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactExchange>>> {
        let exchange_id = exchange_id.to_string();
        Box::pin(async move {
            self.select_one(
                format!(
                    "SELECT {EXCHANGE_FIELDS} FROM type::thing('contact_exchange', $exchange_id)"
                ),
                vec![("exchange_id", exchange_id)],
                "exchange",
            )
            .await
        })
    }

    fn latest_for_connection(
        &self,
        connection_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactExchange>>> {
        let connection_id = connection_id.to_string();
        Box::pin(async move {
            self.select_one(
                format!(
                    "SELECT {EXCHANGE_FIELDS} FROM contact_exchange \
                     WHERE connection_id = $connection_id \
                     ORDER BY created_at_ms DESC, exchange_id DESC LIMIT 1"
                ),
                vec![("connection_id", connection_id)],
                "exchange",
            )
            .await
        })
    }

    fn approve_exchange(
        &self,
        approval: &ExchangeApproval,
    ) -> BoxFuture<'_, DomainResult<(ContactExchange, Connection)>> {
        let approval = approval.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $exchange = (SELECT connection_id, status \
                     FROM type::thing('contact_exchange', $exchange_id))[0];\n\
                 IF $exchange.status != 'PENDING' {{ THROW \"{NOT_FOUND}\"; }};\n\
                 LET $chat = (SELECT status, chat_expires_at_ms \
                     FROM type::thing('connection', $exchange.connection_id))[0];\n\
                 IF $chat.status != 'ACTIVE' OR $chat.chat_expires_at_ms < $approved_at_ms {{ THROW \"{NOT_FOUND}\"; }};\n\
                 UPDATE type::thing('contact_exchange', $exchange_id) SET \
                     status = 'APPROVED', \
                     rec_share_email = $rec_share_email, \
                     rec_share_phone = $rec_share_phone, \
                     reveal_expires_at_ms = $reveal_expires_at_ms, \
                     archive_expires_at_ms = $archive_expires_at_ms, \
                     completed_at_ms = $approved_at_ms;\n\
                 UPDATE type::thing('connection', $exchange.connection_id) SET \
                     status = 'GRADUATED', contact_exchanged = true;\n\
                 SELECT {EXCHANGE_FIELDS} FROM type::thing('contact_exchange', $exchange_id);\n\
                 SELECT {CONNECTION_FIELDS} FROM type::thing('connection', $exchange.connection_id);\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("exchange_id", approval.exchange_id.clone()))
                .bind(("rec_share_email", approval.rec_share_email))
                .bind(("rec_share_phone", approval.rec_share_phone))
                .bind(("approved_at_ms", approval.approved_at_ms))
                .bind(("reveal_expires_at_ms", approval.reveal_expires_at_ms))
                .bind(("archive_expires_at_ms", approval.archive_expires_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            let exchange =
                decode_rows::<ContactExchange>(Self::take_last_rows(&mut response, 1)?, "exchange")?
                    .into_iter()
                    .next()
                    .ok_or(DomainError::NotFound)?;
            let connection =
                decode_rows::<Connection>(Self::take_last_rows(&mut response, 0)?, "connection")?
                    .into_iter()
                    .next()
                    .ok_or(DomainError::NotFound)?;
            Ok((exchange, connection))
        })
    }

    fn decline_exchange(
        &self,
        exchange_id: &str,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>> {
        let exchange_id = exchange_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let query = format!(
                "BEGIN TRANSACTION;\n\
                 LET $status = (SELECT VALUE status FROM type::thing('contact_exchange', $exchange_id))[0];\n\
                 IF $status != 'PENDING' {{ THROW \"{NOT_FOUND}\"; }};\n\
                 UPDATE type::thing('contact_exchange', $exchange_id) SET status = 'DECLINED';\n\
                 SELECT {EXCHANGE_FIELDS} FROM type::thing('contact_exchange', $exchange_id);\n\
                 COMMIT TRANSACTION;"
            );
            let response = client
                .query(query)
                .bind(("exchange_id", exchange_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut response = Self::check(response)?;
            decode_rows::<ContactExchange>(Self::take_last_rows(&mut response, 0)?, "exchange")?
                .into_iter()
                .next()
                .ok_or(DomainError::NotFound)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn connection() -> Connection {
        Connection {
            connection_id: "c-1".to_string(),
            requester_id: "bob".to_string(),
            recipient_id: "alice".to_string(),
            intro_message: "hi".to_string(),
            status: ConnectionStatus::Pending,
            chat_opened_at_ms: None,
            chat_expires_at_ms: None,
            messages_remaining_requester: 10,
            messages_remaining_recipient: 10,
            contact_exchanged: false,
            created_at_ms: 1_000,
        }
    }

    #[test]
    fn pair_key_ignores_direction() {
        assert_eq!(pair_key("bob", "alice"), "alice|bob");
        assert_eq!(pair_key("alice", "bob"), "alice|bob");
    }

    #[test]
    fn thrown_markers_map_to_domain_errors() {
        let wrapped = |marker: &str| format!("There was a problem with the database: An error occurred: {marker}");
        assert!(matches!(map_error_message(&wrapped(NOT_FOUND)), DomainError::NotFound));
        assert!(matches!(map_error_message(&wrapped(CHAT_CLOSED)), DomainError::Expired(_)));
        assert!(matches!(map_error_message(&wrapped(BUDGET_SPENT)), DomainError::RateLimited(_)));
        assert!(matches!(map_error_message(&wrapped(QUOTA_EXCEEDED)), DomainError::RateLimited(_)));
        assert!(matches!(map_error_message(&wrapped(PAIR_EXISTS)), DomainError::Conflict(_)));
        assert!(matches!(map_error_message(&wrapped(EXCHANGE_PENDING)), DomainError::Conflict(_)));
        assert!(matches!(map_error_message(&wrapped(STATUS_MOVED)), DomainError::Conflict(_)));
    }

    #[test]
    fn write_conflicts_map_to_conflict_and_the_rest_to_unavailable() {
        let conflict = map_error_message(
            "Failed to commit transaction due to a read or write conflict. This transaction can be retried",
        );
        assert!(matches!(conflict, DomainError::Conflict(_)));

        let index = map_error_message("Database index `connection_pair` already contains 'alice|bob'");
        assert!(matches!(index, DomainError::Conflict(_)));

        let down = map_error_message("There was an error processing a remote WS request: connection reset");
        assert!(matches!(down, DomainError::Unavailable(message) if message.contains("connection reset")));
    }

    #[test]
    fn aborted_transactions_report_the_thrown_marker() {
        let messages = vec![
            "The query was not executed due to a failed transaction".to_string(),
            format!("An error occurred: {BUDGET_SPENT}"),
            "The query was not executed due to a failed transaction".to_string(),
        ];
        assert!(matches!(most_specific_error(&messages), DomainError::RateLimited(_)));

        let unknown = vec!["socket closed".to_string()];
        assert!(matches!(most_specific_error(&unknown), DomainError::Unavailable(_)));
    }

    #[test]
    fn stored_connection_carries_the_pair_key_beside_its_fields() {
        let record = SurrealConnectionRecord {
            pair_key: pair_key("bob", "alice"),
            connection: connection(),
        };
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["pair_key"], json!("alice|bob"));
        assert_eq!(value["status"], json!("PENDING"));
        assert_eq!(value["messages_remaining_requester"], json!(10));
    }

    #[test]
    fn rows_without_optional_fields_decode() {
        let row = json!({
            "connection_id": "c-1",
            "requester_id": "bob",
            "recipient_id": "alice",
            "intro_message": "hi",
            "status": "ACTIVE",
            "chat_expires_at_ms": 5_000,
            "messages_remaining_requester": 3,
            "messages_remaining_recipient": 10,
            "contact_exchanged": false,
            "created_at_ms": 1_000
        });
        let decoded = decode_rows::<Connection>(vec![row], "connection").expect("decode");
        assert_eq!(decoded[0].status, ConnectionStatus::Active);
        assert_eq!(decoded[0].chat_opened_at_ms, None);
        assert_eq!(decoded[0].chat_expires_at_ms, Some(5_000));

        let broken = decode_rows::<Connection>(vec![json!({"status": "ACTIVE"})], "connection");
        assert!(matches!(broken, Err(DomainError::Unavailable(_))));
    }

    #[test]
    fn list_filter_follows_direction_and_status() {
        let mut query = ConnectionListQuery {
            user_id: "alice".to_string(),
            status: None,
            direction: ConnectionDirection::Sent,
            limit: 20,
            offset: 0,
        };
        assert_eq!(list_filter(&query), "requester_id = $user_id");

        query.direction = ConnectionDirection::All;
        query.status = Some(ConnectionStatus::Active);
        assert_eq!(
            list_filter(&query),
            "(requester_id = $user_id OR recipient_id = $user_id) AND status = $status"
        );
    }

    #[test]
    fn budget_field_matches_the_sender_side() {
        assert_eq!(budget_field(ParticipantSide::Requester), "messages_remaining_requester");
        assert_eq!(budget_field(ParticipantSide::Recipient), "messages_remaining_recipient");
    }
}
