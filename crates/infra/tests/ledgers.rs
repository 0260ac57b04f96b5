use std::sync::Arc;

use rapport_domain::chat::{ChatService, HistoryQuery};
use rapport_domain::clock::ManualClock;
use rapport_domain::connections::{
    ConnectionDirection, ConnectionPolicy, ConnectionRequest, ConnectionService, ConnectionStatus,
    build_list_query,
};
use rapport_domain::discovery::{DiscoveryService, SuggestionQuery};
use rapport_domain::error::DomainError;
use rapport_domain::exchange::{
    ExchangePolicy, ExchangeRequest, ExchangeRole, ExchangeService, ExchangeStatus,
};
use rapport_domain::ports::connections::ConnectionRepository;
use rapport_domain::presence::{NotificationHub, PresenceRegistry, RealtimeEvent, SessionFrame};
use rapport_domain::users::{ContactDetails, SubscriptionTier, UserProfile, UserStatus};
use rapport_domain::util::{MS_PER_DAY, MS_PER_HOUR, MS_PER_MINUTE};
use rapport_infra::directory::InMemoryUserDirectory;
use rapport_infra::repositories::InMemoryStore;

// 2024-03-10T12:00:00Z
const T0: i64 = 1_710_072_000_000;
const INTRO: &str = "Loved your trail photos, want to swap routes?";

struct Harness {
    clock: ManualClock,
    directory: InMemoryUserDirectory,
    store: InMemoryStore,
    hub: NotificationHub,
    connections: ConnectionService,
    chat: ChatService,
    exchange: ExchangeService,
    discovery: DiscoveryService,
}

fn profile(user_id: &str, interests: &[&str]) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        first_name: user_id[..1].to_uppercase() + &user_id[1..],
        interest_ids: interests.iter().map(|id| id.to_string()).collect(),
        city: Some("Melbourne".into()),
        state: Some("VIC".into()),
        country: Some("AU".into()),
        location: None,
        last_active_at_ms: Some(T0 - MS_PER_HOUR),
        status: UserStatus::Active,
        tier: SubscriptionTier::Free,
    }
}

fn contact(user_id: &str) -> ContactDetails {
    ContactDetails {
        email: Some(format!("{user_id}@example.com")),
        phone: Some(format!("+61-{user_id}")),
    }
}

async fn harness() -> Harness {
    harness_with_budget(10).await
}

async fn harness_with_budget(message_budget: u32) -> Harness {
    let clock = ManualClock::new(T0);
    let directory = InMemoryUserDirectory::new();
    for user_id in ["alice", "bob", "carol"] {
        directory
            .upsert_user(profile(user_id, &["hiking", "coffee"]), contact(user_id))
            .await;
    }
    let store = InMemoryStore::new();
    let hub = NotificationHub::new(PresenceRegistry::new(), None);
    let clock_port: Arc<ManualClock> = Arc::new(clock.clone());

    let connections = ConnectionService::new(
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        hub.clone(),
        clock_port.clone(),
        ConnectionPolicy {
            message_budget,
            ..ConnectionPolicy::default()
        },
    );
    let chat = ChatService::new(
        connections.clone(),
        Arc::new(store.clone()),
        hub.clone(),
        clock_port.clone(),
    );
    let exchange = ExchangeService::new(
        connections.clone(),
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        hub.clone(),
        clock_port.clone(),
        ExchangePolicy::default(),
    );
    let discovery = DiscoveryService::new(
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        clock_port,
    );

    Harness {
        clock,
        directory,
        store,
        hub,
        connections,
        chat,
        exchange,
        discovery,
    }
}

fn request_to(recipient_id: &str) -> ConnectionRequest {
    ConnectionRequest {
        recipient_id: recipient_id.to_string(),
        intro_message: INTRO.to_string(),
    }
}

/// alice -> bob, accepted by bob.
async fn active_connection(h: &Harness) -> String {
    let connection = h.connections.request("alice", request_to("bob")).await.unwrap();
    h.connections
        .accept("bob", &connection.connection_id)
        .await
        .unwrap();
    connection.connection_id
}

#[tokio::test]
async fn sixth_request_of_the_day_is_rate_limited() {
    let h = harness().await;
    for index in 0..6 {
        h.directory
            .upsert_user(profile(&format!("r{index}"), &[]), ContactDetails::default())
            .await;
    }
    for index in 0..5 {
        h.connections
            .request("alice", request_to(&format!("r{index}")))
            .await
            .unwrap();
    }

    let err = h
        .connections
        .request("alice", request_to("r5"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RateLimited(_)));
    assert!(h.store.find_between("alice", "r5").await.unwrap().is_none());

    // quota resets at the next midnight
    h.clock.set(T0 + MS_PER_DAY);
    h.connections
        .request("alice", request_to("r5"))
        .await
        .unwrap();
}

#[tokio::test]
async fn premium_tier_gets_the_larger_quota() {
    let h = harness().await;
    let mut alice = profile("alice", &[]);
    alice.tier = SubscriptionTier::Premium;
    h.directory.upsert_user(alice, contact("alice")).await;
    for index in 0..6 {
        let recipient = format!("r{index}");
        h.directory
            .upsert_user(profile(&recipient, &[]), ContactDetails::default())
            .await;
        h.connections
            .request("alice", request_to(&recipient))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn request_rejections() {
    let h = harness().await;
    let mut banned = profile("mallory", &[]);
    banned.status = UserStatus::Banned;
    h.directory.upsert_user(banned, ContactDetails::default()).await;
    h.directory.block("carol", "alice").await;

    let err = h.connections.request("alice", request_to("alice")).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let err = h.connections.request("alice", request_to("mallory")).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    let err = h.connections.request("alice", request_to("carol")).await.unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));

    let short = ConnectionRequest {
        recipient_id: "bob".into(),
        intro_message: "hey".into(),
    };
    let err = h.connections.request("alice", short).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn declined_pair_can_never_reconnect() {
    let h = harness().await;
    let connection = h.connections.request("alice", request_to("bob")).await.unwrap();
    h.connections
        .decline("bob", &connection.connection_id)
        .await
        .unwrap();

    let err = h.connections.request("bob", request_to("alice")).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    let err = h.connections.request("alice", request_to("bob")).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn accept_opens_a_48_hour_window_with_both_budgets() {
    let h = harness().await;
    let connection = h.connections.request("alice", request_to("bob")).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Pending);
    assert!(connection.chat_expires_at_ms.is_none());

    h.clock.set(T0 + 5 * MS_PER_MINUTE);
    let accepted = h
        .connections
        .accept("bob", &connection.connection_id)
        .await
        .unwrap();
    assert_eq!(accepted.status, ConnectionStatus::Active);
    assert_eq!(accepted.chat_opened_at_ms, Some(T0 + 5 * MS_PER_MINUTE));
    assert_eq!(
        accepted.chat_expires_at_ms,
        Some(T0 + 5 * MS_PER_MINUTE + 48 * MS_PER_HOUR)
    );
    assert_eq!(accepted.messages_remaining_requester, 10);
    assert_eq!(accepted.messages_remaining_recipient, 10);
}

#[tokio::test]
async fn only_the_recipient_may_answer_a_pending_request() {
    let h = harness().await;
    let connection = h.connections.request("alice", request_to("bob")).await.unwrap();

    let err = h
        .connections
        .accept("alice", &connection.connection_id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
    let err = h
        .connections
        .decline("carol", &connection.connection_id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    h.connections
        .accept("bob", &connection.connection_id)
        .await
        .unwrap();
    let err = h
        .connections
        .decline("bob", &connection.connection_id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn listing_filters_by_direction_and_status() {
    let h = harness().await;
    let sent = h.connections.request("alice", request_to("bob")).await.unwrap();
    h.clock.advance(1_000);
    h.connections.request("carol", request_to("alice")).await.unwrap();
    h.connections
        .accept("bob", &sent.connection_id)
        .await
        .unwrap();

    let all = h
        .connections
        .list(build_list_query("alice", None, ConnectionDirection::All, None, None))
        .await
        .unwrap();
    assert_eq!(all.total, 2);
    assert_eq!(all.connections[0].requester_id, "carol");

    let sent_only = h
        .connections
        .list(build_list_query("alice", None, ConnectionDirection::Sent, None, None))
        .await
        .unwrap();
    assert_eq!(sent_only.total, 1);

    let pending = h
        .connections
        .list(build_list_query(
            "alice",
            Some(ConnectionStatus::Pending),
            ConnectionDirection::All,
            None,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.connections[0].recipient_id, "alice");
}

#[tokio::test]
async fn send_with_spent_budget_writes_nothing() {
    let h = harness_with_budget(1).await;
    let connection_id = active_connection(&h).await;

    let receipt = h.chat.send("alice", &connection_id, "hello bob").await.unwrap();
    assert_eq!(receipt.messages_remaining, 0);

    let err = h
        .chat
        .send("alice", &connection_id, "are you there?")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RateLimited(_)));

    let history = h
        .chat
        .history("bob", &connection_id, HistoryQuery::default())
        .await
        .unwrap();
    assert_eq!(history.messages.len(), 1);
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.messages_remaining_requester, 0);
    assert_eq!(stored.messages_remaining_recipient, 1);

    // the other side still has its own budget
    h.chat.send("bob", &connection_id, "hi alice").await.unwrap();
}

#[tokio::test]
async fn oversized_message_is_rejected_before_any_write() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;

    let err = h
        .chat
        .send("alice", &connection_id, &"x".repeat(501))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.messages_remaining_requester, 10);
    let history = h
        .chat
        .history("alice", &connection_id, HistoryQuery::default())
        .await
        .unwrap();
    assert!(history.messages.is_empty());

    h.chat
        .send("alice", &connection_id, &"x".repeat(500))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_sends_never_overspend_the_budget() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;

    let mut tasks = Vec::new();
    for index in 0..25 {
        let chat = h.chat.clone();
        let connection_id = connection_id.clone();
        tasks.push(tokio::spawn(async move {
            chat.send("alice", &connection_id, &format!("message {index}"))
                .await
        }));
    }
    let mut delivered = 0;
    let mut limited = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => delivered += 1,
            Err(DomainError::RateLimited(_)) => limited += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(delivered, 10);
    assert_eq!(limited, 15);

    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.messages_remaining_requester, 0);
    let history = h
        .chat
        .history("bob", &connection_id, HistoryQuery::new(Some(100), None))
        .await
        .unwrap();
    assert_eq!(history.messages.len(), 10);
}

#[tokio::test]
async fn expired_window_is_persisted_on_touch() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;

    h.clock.advance(48 * MS_PER_HOUR);
    h.chat.send("bob", &connection_id, "last call").await.unwrap();

    h.clock.advance(1);
    // untouched records keep their stale status
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Active);

    let err = h
        .chat
        .send("alice", &connection_id, "too late?")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Expired(_)));
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Expired);

    let status = h.chat.status("alice", &connection_id).await.unwrap();
    assert!(status.is_expired);
    assert_eq!(status.time_remaining_ms, 0);
}

#[tokio::test]
async fn sweep_expires_untouched_connections() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    assert_eq!(h.connections.sweep_expired().await.unwrap(), 0);

    h.clock.advance(48 * MS_PER_HOUR + 1);
    assert_eq!(h.connections.sweep_expired().await.unwrap(), 1);
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Expired);
}

#[tokio::test]
async fn history_pages_backwards_in_chronological_order() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    for index in 0..5 {
        h.clock.advance(1_000);
        h.chat
            .send("alice", &connection_id, &format!("message {index}"))
            .await
            .unwrap();
    }

    let latest = h
        .chat
        .history("bob", &connection_id, HistoryQuery::new(Some(2), None))
        .await
        .unwrap();
    let contents: Vec<&str> = latest.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["message 3", "message 4"]);
    assert!(latest.has_more);
    assert_eq!(latest.my_remaining, 10);

    let cursor = latest.messages[0].created_at_ms;
    let older = h
        .chat
        .history("bob", &connection_id, HistoryQuery::new(Some(10), Some(cursor)))
        .await
        .unwrap();
    assert_eq!(older.messages.len(), 3);
    assert!(!older.has_more);
    assert_eq!(older.messages[0].content, "message 0");

    let err = h
        .chat
        .history("carol", &connection_id, HistoryQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn deleted_messages_leave_history_but_keep_budget_spent() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    let receipt = h.chat.send("alice", &connection_id, "oops").await.unwrap();

    let err = h
        .chat
        .delete_message("bob", &connection_id, &receipt.message.message_id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    h.chat
        .delete_message("alice", &connection_id, &receipt.message.message_id)
        .await
        .unwrap();
    let history = h
        .chat
        .history("alice", &connection_id, HistoryQuery::default())
        .await
        .unwrap();
    assert!(history.messages.is_empty());
    assert_eq!(history.my_remaining, 9);
}

#[tokio::test]
async fn messages_and_typing_reach_only_the_counterpart() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    let (_bob, mut bob_rx) = h.hub.session_opened("bob").await;
    let (_carol, mut carol_rx) = h.hub.session_opened("carol").await;

    let receipt = h.chat.send("alice", &connection_id, "hello").await.unwrap();
    match bob_rx.recv().await {
        Some(SessionFrame::Event(RealtimeEvent::ChatMessage { message, .. })) => {
            assert_eq!(message, receipt.message)
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    assert!(h.chat.typing("alice", &connection_id, true).await.unwrap());
    assert!(matches!(
        bob_rx.recv().await,
        Some(SessionFrame::Event(RealtimeEvent::ChatTyping { is_typing: true, .. }))
    ));
    assert!(carol_rx.try_recv().is_err());

    // bob is the counterpart but alice is offline
    assert!(!h.chat.typing("bob", &connection_id, true).await.unwrap());
}

#[tokio::test]
async fn requests_and_acceptances_notify_the_other_side() {
    let h = harness().await;
    let (_alice, mut alice_rx) = h.hub.session_opened("alice").await;
    let (_bob, mut bob_rx) = h.hub.session_opened("bob").await;

    let connection = h.connections.request("alice", request_to("bob")).await.unwrap();
    assert!(matches!(
        bob_rx.recv().await,
        Some(SessionFrame::Event(RealtimeEvent::ConnectionRequested { .. }))
    ));

    h.connections
        .accept("bob", &connection.connection_id)
        .await
        .unwrap();
    assert!(matches!(
        alice_rx.recv().await,
        Some(SessionFrame::Event(RealtimeEvent::ConnectionAccepted { .. }))
    ));
}

#[tokio::test]
async fn approval_graduates_the_connection_atomically() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;

    let exchange = h
        .exchange
        .initiate(
            "bob",
            ExchangeRequest {
                connection_id: connection_id.clone(),
                share_email: true,
                share_phone: true,
                wants_email: true,
                wants_phone: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(exchange.requester_id, "bob");
    assert_eq!(exchange.recipient_id, "alice");

    let approved = h
        .exchange
        .approve("alice", &exchange.exchange_id, true, false)
        .await
        .unwrap();
    assert_eq!(approved.status, ExchangeStatus::Approved);
    assert!(approved.rec_share_email);
    assert!(!approved.rec_share_phone);
    assert_eq!(approved.reveal_expires_at_ms, Some(T0 + 5 * MS_PER_MINUTE));
    assert_eq!(approved.archive_expires_at_ms, Some(T0 + 7 * MS_PER_DAY));
    assert_eq!(approved.completed_at_ms, Some(T0));

    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Graduated);
    assert!(stored.contact_exchanged);

    // chat is closed once graduated
    let err = h.chat.send("alice", &connection_id, "still here?").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn exchange_guards() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    let request = ExchangeRequest {
        connection_id: connection_id.clone(),
        share_email: true,
        share_phone: false,
        wants_email: false,
        wants_phone: true,
    };

    let err = h
        .exchange
        .initiate(
            "alice",
            ExchangeRequest {
                wants_phone: false,
                ..request.clone()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let err = h.exchange.initiate("carol", request.clone()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    let first = h.exchange.initiate("alice", request.clone()).await.unwrap();
    let err = h.exchange.initiate("bob", request.clone()).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    // the initiator cannot approve their own request
    let err = h
        .exchange
        .approve("alice", &first.exchange_id, true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    let err = h
        .exchange
        .approve("bob", &first.exchange_id, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    // decline leaves the connection open for another attempt
    let declined = h.exchange.decline("bob", &first.exchange_id).await.unwrap();
    assert_eq!(declined.status, ExchangeStatus::Declined);
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Active);
    h.exchange.initiate("bob", request).await.unwrap();
}

#[tokio::test]
async fn exchange_on_expired_connection_is_not_found() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    let pending = h
        .exchange
        .initiate(
            "alice",
            ExchangeRequest {
                connection_id: connection_id.clone(),
                share_email: true,
                share_phone: false,
                wants_email: true,
                wants_phone: false,
            },
        )
        .await
        .unwrap();

    h.clock.advance(48 * MS_PER_HOUR + 1);
    let err = h
        .exchange
        .approve("bob", &pending.exchange_id, true, true)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
    let stored = h.store.get_connection(&connection_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Expired);
    assert!(!stored.contact_exchanged);
}

#[tokio::test]
async fn reveal_shows_only_what_the_other_side_shared() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;
    let exchange = h
        .exchange
        .initiate(
            "alice",
            ExchangeRequest {
                connection_id: connection_id.clone(),
                share_email: false,
                share_phone: true,
                wants_email: true,
                wants_phone: true,
            },
        )
        .await
        .unwrap();

    let err = h.exchange.reveal("alice", &exchange.exchange_id).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    h.exchange
        .approve("bob", &exchange.exchange_id, true, false)
        .await
        .unwrap();

    let for_alice = h.exchange.reveal("alice", &exchange.exchange_id).await.unwrap();
    assert_eq!(for_alice.role, ExchangeRole::Requester);
    assert_eq!(for_alice.other_person.first_name, "Bob");
    assert_eq!(for_alice.other_person.contact.email.as_deref(), Some("bob@example.com"));
    assert!(for_alice.other_person.contact.phone.is_none());
    assert!(for_alice.my_shared.phone && !for_alice.my_shared.email);
    assert!(for_alice.reveal_active);

    let for_bob = h.exchange.reveal("bob", &exchange.exchange_id).await.unwrap();
    assert!(for_bob.other_person.contact.email.is_none());
    assert_eq!(for_bob.other_person.contact.phone.as_deref(), Some("+61-alice"));

    let err = h.exchange.reveal("carol", &exchange.exchange_id).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    // past the reveal window the contact is still readable
    h.clock.advance(5 * MS_PER_MINUTE);
    let later = h.exchange.reveal("alice", &exchange.exchange_id).await.unwrap();
    assert!(!later.reveal_active);

    h.clock.set(T0 + 7 * MS_PER_DAY);
    h.exchange.reveal("alice", &exchange.exchange_id).await.unwrap();

    h.clock.advance(1);
    let err = h.exchange.reveal("alice", &exchange.exchange_id).await.unwrap_err();
    assert!(matches!(err, DomainError::Expired(_)));
}

#[tokio::test]
async fn exchange_status_reports_latest_attempt() {
    let h = harness().await;
    let connection_id = active_connection(&h).await;

    let summary = h
        .exchange
        .status_for_connection("bob", &connection_id)
        .await
        .unwrap();
    assert!(!summary.has_exchange);

    h.exchange
        .initiate(
            "bob",
            ExchangeRequest {
                connection_id: connection_id.clone(),
                share_email: true,
                share_phone: false,
                wants_email: true,
                wants_phone: false,
            },
        )
        .await
        .unwrap();
    let summary = h
        .exchange
        .status_for_connection("alice", &connection_id)
        .await
        .unwrap();
    assert!(summary.has_exchange);
    assert_eq!(summary.role, Some(ExchangeRole::Recipient));
}

#[tokio::test]
async fn suggestions_exclude_blocked_and_connected_users() {
    let h = harness().await;
    h.directory
        .upsert_user(profile("dave", &["chess"]), ContactDetails::default())
        .await;
    h.directory
        .upsert_user(profile("erin", &["hiking"]), ContactDetails::default())
        .await;
    h.directory.block("erin", "alice").await;
    h.connections.request("alice", request_to("bob")).await.unwrap();

    let page = h
        .discovery
        .suggest("alice", SuggestionQuery::default())
        .await
        .unwrap();
    let ids: Vec<&str> = page.matches.iter().map(|m| m.user_id.as_str()).collect();
    assert_eq!(ids, vec!["carol", "dave"]);
    assert_eq!(page.total, 2);
    assert!(page.matches[0].score.total > page.matches[1].score.total);
    assert_eq!(
        page.matches[0].shared_interest_ids,
        vec!["hiking".to_string(), "coffee".to_string()]
    );
    assert_eq!(page.matches[0].shared_count, 2);
    assert_eq!(page.matches[0].total_interests, 2);
    assert!(page.matches[1].shared_interest_ids.is_empty());
    assert_eq!(page.matches[1].shared_count, 0);
    assert_eq!(page.matches[1].total_interests, 1);

    let strict = h
        .discovery
        .suggest("alice", SuggestionQuery::new(None, None, Some(0.9)))
        .await
        .unwrap();
    assert!(strict.matches.iter().all(|m| m.score.total >= 0.9));

    let err = h.discovery.candidate_detail("alice", "erin").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    let detail = h.discovery.candidate_detail("alice", "bob").await.unwrap();
    assert_eq!(detail.shared_interest_count, 2);
    assert_eq!(
        detail.connection.map(|c| c.status),
        Some(ConnectionStatus::Pending)
    );
}

#[tokio::test]
async fn inactive_viewer_cannot_browse() {
    let h = harness().await;
    let mut alice = profile("alice", &[]);
    alice.status = UserStatus::PendingVerification;
    h.directory.upsert_user(alice, contact("alice")).await;

    let err = h
        .discovery
        .suggest("alice", SuggestionQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
}
