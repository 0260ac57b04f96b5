use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::clock::Clock;
use crate::connections::{ConnectionService, ConnectionStatus, fold_state_conflict};
use crate::error::DomainError;
use crate::ports::exchange::ExchangeRepository;
use crate::ports::users::UserDirectory;
use crate::presence::{NotificationHub, RealtimeEvent};
use crate::users::ContactDetails;
use crate::util::{MS_PER_DAY, MS_PER_MINUTE, format_ms_rfc3339, new_id};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeStatus {
    Pending,
    Approved,
    Declined,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRole {
    Requester,
    Recipient,
}

/// One attempt to swap contact details over an ACTIVE connection. The
/// requester here is whoever initiated the exchange.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactExchange {
    pub exchange_id: String,
    pub connection_id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub req_share_email: bool,
    pub req_share_phone: bool,
    pub req_wants_email: bool,
    pub req_wants_phone: bool,
    pub rec_share_email: bool,
    pub rec_share_phone: bool,
    pub status: ExchangeStatus,
    pub reveal_expires_at_ms: Option<i64>,
    pub archive_expires_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl ContactExchange {
    pub fn role_of(&self, user_id: &str) -> Option<ExchangeRole> {
        if self.requester_id == user_id {
            Some(ExchangeRole::Requester)
        } else if self.recipient_id == user_id {
            Some(ExchangeRole::Recipient)
        } else {
            None
        }
    }

    pub fn shared_by(&self, role: ExchangeRole) -> SharedFields {
        match role {
            ExchangeRole::Requester => SharedFields {
                email: self.req_share_email,
                phone: self.req_share_phone,
            },
            ExchangeRole::Recipient => SharedFields {
                email: self.rec_share_email,
                phone: self.rec_share_phone,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedFields {
    pub email: bool,
    pub phone: bool,
}

#[derive(Clone, Debug)]
pub struct ExchangePolicy {
    pub reveal_window_ms: i64,
    pub archive_window_ms: i64,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            reveal_window_ms: 5 * MS_PER_MINUTE,
            archive_window_ms: 7 * MS_PER_DAY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExchangeRequest {
    pub connection_id: String,
    pub share_email: bool,
    pub share_phone: bool,
    pub wants_email: bool,
    pub wants_phone: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeApproval {
    pub exchange_id: String,
    pub rec_share_email: bool,
    pub rec_share_phone: bool,
    pub approved_at_ms: i64,
    pub reveal_expires_at_ms: i64,
    pub archive_expires_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealedPerson {
    pub user_id: String,
    pub first_name: String,
    pub contact: ContactDetails,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeReveal {
    pub exchange_id: String,
    pub connection_id: String,
    pub role: ExchangeRole,
    pub other_person: RevealedPerson,
    pub my_shared: SharedFields,
    pub reveal_active: bool,
    pub reveal_expires_at_ms: i64,
    pub archive_expires_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeSummary {
    pub connection_id: String,
    pub has_exchange: bool,
    pub role: Option<ExchangeRole>,
    pub exchange: Option<ContactExchange>,
}

#[derive(Clone)]
pub struct ExchangeService {
    connections: ConnectionService,
    exchanges: Arc<dyn ExchangeRepository>,
    directory: Arc<dyn UserDirectory>,
    notifier: NotificationHub,
    clock: Arc<dyn Clock>,
    policy: ExchangePolicy,
}

impl ExchangeService {
    pub fn new(
        connections: ConnectionService,
        exchanges: Arc<dyn ExchangeRepository>,
        directory: Arc<dyn UserDirectory>,
        notifier: NotificationHub,
        clock: Arc<dyn Clock>,
        policy: ExchangePolicy,
    ) -> Self {
        Self {
            connections,
            exchanges,
            directory,
            notifier,
            clock,
            policy,
        }
    }

    pub async fn initiate(
        &self,
        actor_id: &str,
        input: ExchangeRequest,
    ) -> DomainResult<ContactExchange> {
        if !(input.share_email || input.share_phone) {
            return Err(DomainError::Validation(
                "share at least one of email or phone".into(),
            ));
        }
        if !(input.wants_email || input.wants_phone) {
            return Err(DomainError::Validation(
                "request at least one of email or phone".into(),
            ));
        }

        let connection = self
            .connections
            .load_for_participant(actor_id, &input.connection_id)
            .await?;
        if connection.status != ConnectionStatus::Active {
            return Err(DomainError::NotFound);
        }
        let recipient_id = connection
            .counterpart_of(actor_id)
            .ok_or(DomainError::NotFound)?
            .to_string();

        let exchange = ContactExchange {
            exchange_id: new_id(),
            connection_id: connection.connection_id.clone(),
            requester_id: actor_id.to_string(),
            recipient_id: recipient_id.clone(),
            req_share_email: input.share_email,
            req_share_phone: input.share_phone,
            req_wants_email: input.wants_email,
            req_wants_phone: input.wants_phone,
            rec_share_email: false,
            rec_share_phone: false,
            status: ExchangeStatus::Pending,
            reveal_expires_at_ms: None,
            archive_expires_at_ms: None,
            completed_at_ms: None,
            created_at_ms: self.clock.now_ms(),
        };
        let exchange = self.exchanges.create_exchange(&exchange).await?;

        tracing::info!(
            exchange_id = %exchange.exchange_id,
            connection_id = %exchange.connection_id,
            "contact exchange requested"
        );
        self.notifier
            .notify(
                &recipient_id,
                RealtimeEvent::ExchangeRequested {
                    exchange_id: exchange.exchange_id.clone(),
                    connection_id: exchange.connection_id.clone(),
                    requester_id: actor_id.to_string(),
                },
            )
            .await;
        Ok(exchange)
    }

    pub async fn approve(
        &self,
        actor_id: &str,
        exchange_id: &str,
        share_email: bool,
        share_phone: bool,
    ) -> DomainResult<ContactExchange> {
        if !(share_email || share_phone) {
            return Err(DomainError::Validation(
                "share at least one of email or phone".into(),
            ));
        }

        let pending = self.pending_for_recipient(actor_id, exchange_id).await?;
        let connection = self
            .connections
            .load_for_participant(actor_id, &pending.connection_id)
            .await?;
        if connection.status != ConnectionStatus::Active {
            return Err(DomainError::NotFound);
        }

        let now = self.clock.now_ms();
        let approval = ExchangeApproval {
            exchange_id: pending.exchange_id.clone(),
            rec_share_email: share_email,
            rec_share_phone: share_phone,
            approved_at_ms: now,
            reveal_expires_at_ms: now + self.policy.reveal_window_ms,
            archive_expires_at_ms: now + self.policy.archive_window_ms,
        };
        let (approved, graduated) = self
            .exchanges
            .approve_exchange(&approval)
            .await
            .map_err(fold_state_conflict)?;

        tracing::info!(
            exchange_id = %approved.exchange_id,
            connection_id = %graduated.connection_id,
            reveal_expires_at = %format_ms_rfc3339(approval.reveal_expires_at_ms),
            "contact exchange approved, connection graduated"
        );
        for participant in [&approved.requester_id, &approved.recipient_id] {
            self.notifier
                .notify(
                    participant,
                    RealtimeEvent::ExchangeApproved {
                        exchange_id: approved.exchange_id.clone(),
                        connection_id: approved.connection_id.clone(),
                        reveal_expires_at_ms: approval.reveal_expires_at_ms,
                    },
                )
                .await;
        }
        Ok(approved)
    }

    pub async fn decline(&self, actor_id: &str, exchange_id: &str) -> DomainResult<ContactExchange> {
        let pending = self.pending_for_recipient(actor_id, exchange_id).await?;
        let declined = self
            .exchanges
            .decline_exchange(&pending.exchange_id)
            .await
            .map_err(fold_state_conflict)?;

        tracing::info!(exchange_id = %declined.exchange_id, "contact exchange declined");
        self.notifier
            .notify(
                &declined.requester_id,
                RealtimeEvent::ExchangeDeclined {
                    exchange_id: declined.exchange_id.clone(),
                    connection_id: declined.connection_id.clone(),
                },
            )
            .await;
        Ok(declined)
    }

    /// Returns the contact fields the other side agreed to share. Available
    /// until the archive window closes; `reveal_active` is informational.
    pub async fn reveal(&self, actor_id: &str, exchange_id: &str) -> DomainResult<ExchangeReveal> {
        let exchange = self
            .exchanges
            .get_exchange(exchange_id)
            .await?
            .filter(|exchange| exchange.status == ExchangeStatus::Approved)
            .ok_or(DomainError::NotFound)?;
        let role = exchange.role_of(actor_id).ok_or(DomainError::NotFound)?;
        let (Some(reveal_expires_at_ms), Some(archive_expires_at_ms)) =
            (exchange.reveal_expires_at_ms, exchange.archive_expires_at_ms)
        else {
            return Err(DomainError::NotFound);
        };

        let now = self.clock.now_ms();
        if now > archive_expires_at_ms {
            return Err(DomainError::Expired("contact reveal has expired".into()));
        }

        let (other_id, other_role) = match role {
            ExchangeRole::Requester => (&exchange.recipient_id, ExchangeRole::Recipient),
            ExchangeRole::Recipient => (&exchange.requester_id, ExchangeRole::Requester),
        };
        let granted = exchange.shared_by(other_role);
        let first_name = self
            .directory
            .get_user(other_id)
            .await?
            .map(|user| user.first_name)
            .unwrap_or_default();
        let contact = self
            .directory
            .contact_details(other_id)
            .await?
            .unwrap_or_default()
            .filtered(granted.email, granted.phone);

        Ok(ExchangeReveal {
            exchange_id: exchange.exchange_id.clone(),
            connection_id: exchange.connection_id.clone(),
            role,
            other_person: RevealedPerson {
                user_id: other_id.clone(),
                first_name,
                contact,
            },
            my_shared: exchange.shared_by(role),
            reveal_active: now < reveal_expires_at_ms,
            reveal_expires_at_ms,
            archive_expires_at_ms,
        })
    }

    pub async fn status_for_connection(
        &self,
        actor_id: &str,
        connection_id: &str,
    ) -> DomainResult<ExchangeSummary> {
        let connection = self
            .connections
            .load_for_participant(actor_id, connection_id)
            .await?;
        let latest = self
            .exchanges
            .latest_for_connection(&connection.connection_id)
            .await?;
        Ok(ExchangeSummary {
            connection_id: connection.connection_id,
            has_exchange: latest.is_some(),
            role: latest.as_ref().and_then(|exchange| exchange.role_of(actor_id)),
            exchange: latest,
        })
    }

    async fn pending_for_recipient(
        &self,
        actor_id: &str,
        exchange_id: &str,
    ) -> DomainResult<ContactExchange> {
        self.exchanges
            .get_exchange(exchange_id)
            .await?
            .filter(|exchange| {
                exchange.recipient_id == actor_id && exchange.status == ExchangeStatus::Pending
            })
            .ok_or(DomainError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> ContactExchange {
        ContactExchange {
            exchange_id: "e-1".into(),
            connection_id: "c-1".into(),
            requester_id: "bob".into(),
            recipient_id: "alice".into(),
            req_share_email: true,
            req_share_phone: false,
            req_wants_email: true,
            req_wants_phone: true,
            rec_share_email: false,
            rec_share_phone: true,
            status: ExchangeStatus::Approved,
            reveal_expires_at_ms: Some(300_000),
            archive_expires_at_ms: Some(604_800_000),
            completed_at_ms: Some(0),
            created_at_ms: 0,
        }
    }

    #[test]
    fn roles_follow_the_initiator() {
        let exchange = exchange();
        assert_eq!(exchange.role_of("bob"), Some(ExchangeRole::Requester));
        assert_eq!(exchange.role_of("alice"), Some(ExchangeRole::Recipient));
        assert_eq!(exchange.role_of("carol"), None);
    }

    #[test]
    fn each_side_reports_its_own_share_flags() {
        let exchange = exchange();
        assert_eq!(
            exchange.shared_by(ExchangeRole::Requester),
            SharedFields {
                email: true,
                phone: false
            }
        );
        assert_eq!(
            exchange.shared_by(ExchangeRole::Recipient),
            SharedFields {
                email: false,
                phone: true
            }
        );
    }

    #[test]
    fn default_windows_keep_reveal_inside_archive() {
        let policy = ExchangePolicy::default();
        assert_eq!(policy.reveal_window_ms, 300_000);
        assert_eq!(policy.archive_window_ms, 7 * 24 * 3_600_000);
        assert!(policy.reveal_window_ms < policy.archive_window_ms);
    }
}
