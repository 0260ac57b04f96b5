use std::collections::HashSet;

use crate::DomainResult;
use crate::connections::{Connection, ConnectionListQuery, ConnectionStatus, RequestQuota};
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait ConnectionRepository: Send + Sync {
    /// Inserts the connection as one atomic step that fails with `Conflict`
    /// when any connection already joins the pair (regardless of direction or
    /// status) and with `RateLimited` when the requester already created
    /// `quota.limit` connections since `quota.since_ms`.
    fn create_within_quota(
        &self,
        connection: &Connection,
        quota: RequestQuota,
    ) -> BoxFuture<'_, DomainResult<Connection>>;

    fn get_connection(&self, connection_id: &str)
    -> BoxFuture<'_, DomainResult<Option<Connection>>>;

    fn find_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Connection>>>;

    /// Newest first, paged; the second value is the unpaged total.
    fn list_connections(
        &self,
        query: &ConnectionListQuery,
    ) -> BoxFuture<'_, DomainResult<(Vec<Connection>, usize)>>;

    /// Every user the given user shares a connection with, in any status.
    fn counterpart_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<HashSet<String>>>;

    /// Replaces the stored record only if its status still equals `expected`.
    /// `NotFound` if missing, `Conflict` if the status moved.
    fn update_connection(
        &self,
        connection: &Connection,
        expected: ConnectionStatus,
    ) -> BoxFuture<'_, DomainResult<Connection>>;

    fn list_elapsed_active(&self, now_ms: i64) -> BoxFuture<'_, DomainResult<Vec<Connection>>>;
}
