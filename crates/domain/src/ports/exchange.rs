use crate::DomainResult;
use crate::connections::Connection;
use crate::exchange::{ContactExchange, ExchangeApproval};
use crate::ports::BoxFuture;

#[allow(clippy::needless_pass_by_value)]
pub trait ExchangeRepository: Send + Sync {
    /// Fails with `Conflict` while another exchange on the same connection is
    /// still PENDING.
    fn create_exchange(
        &self,
        exchange: &ContactExchange,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>>;

    fn get_exchange(&self, exchange_id: &str)
    -> BoxFuture<'_, DomainResult<Option<ContactExchange>>>;

    fn latest_for_connection(
        &self,
        connection_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ContactExchange>>>;

    /// Approves a PENDING exchange and graduates its ACTIVE connection as one
    /// unit. `NotFound` when either record is missing or in the wrong state;
    /// nothing is written in that case.
    fn approve_exchange(
        &self,
        approval: &ExchangeApproval,
    ) -> BoxFuture<'_, DomainResult<(ContactExchange, Connection)>>;

    /// PENDING to DECLINED; `NotFound` otherwise.
    fn decline_exchange(
        &self,
        exchange_id: &str,
    ) -> BoxFuture<'_, DomainResult<ContactExchange>>;
}
