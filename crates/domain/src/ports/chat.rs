use crate::DomainResult;
use crate::chat::{ChatMessage, HistoryQuery, SendReceipt};
use crate::connections::ParticipantSide;
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait MessageRepository: Send + Sync {
    /// Atomically re-checks the connection (`NotFound` when missing, `Expired`
    /// when not ACTIVE or past its window at `now_ms`, `RateLimited` when the
    /// sender's budget is spent), stores the message and decrements the budget.
    fn append_message(
        &self,
        message: &ChatMessage,
        side: ParticipantSide,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<SendReceipt>>;

    /// Newest first, deleted messages excluded.
    fn list_messages(
        &self,
        connection_id: &str,
        query: &HistoryQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>>;

    fn get_message(
        &self,
        connection_id: &str,
        message_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ChatMessage>>>;

    fn soft_delete_message(
        &self,
        connection_id: &str,
        message_id: &str,
        deleted_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<ChatMessage>>;
}
