use std::collections::HashSet;

use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::users::{ContactDetails, UserProfile};

/// Read-only view over the profile store owned by the surrounding system.
pub trait UserDirectory: Send + Sync {
    fn get_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<UserProfile>>>;

    fn list_active_users(&self) -> BoxFuture<'_, DomainResult<Vec<UserProfile>>>;

    /// Users blocked by, or blocking, `user_id`.
    fn blocked_user_ids(&self, user_id: &str) -> BoxFuture<'_, DomainResult<HashSet<String>>>;

    fn contact_details(&self, user_id: &str)
    -> BoxFuture<'_, DomainResult<Option<ContactDetails>>>;
}
