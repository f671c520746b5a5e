use std::sync::Arc;

use serde_json::json;
use ticket_desk::adapters::{enhanced, live, relay, webhook};
use ticket_desk::app::build_state;
use ticket_desk::config::Config;
use ticket_desk::engine::{Inbound, InboundEvent, Prompt};
use ticket_desk::outbound::RecordingMessenger;
use ticket_desk::prompting;
use ticket_desk::store::{ConversationStore, DeskRepository, MemoryStore};
use ticket_desk::types::{AppState, Category, EventEnvelopeIn, Step, TicketStatus};

struct Harness {
    store: Arc<MemoryStore>,
    messenger: Arc<RecordingMessenger>,
    state: Arc<AppState>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let state = build_state(
        Config::for_memory("verify-me"),
        store.clone(),
        store.clone(),
        messenger.clone(),
    );
    Harness {
        store,
        messenger,
        state,
    }
}

impl Harness {
    async fn send(&self, phone: &str, event: InboundEvent) -> Vec<Prompt> {
        relay(&self.state, self.messenger.as_ref(), Inbound::new(phone, event))
            .await
            .prompts
    }

    async fn text(&self, phone: &str, text: &str) -> Vec<Prompt> {
        self.send(phone, InboundEvent::from_text(text)).await
    }

    async fn select(&self, phone: &str, id: &str, title: &str) -> Vec<Prompt> {
        self.send(phone, InboundEvent::selection(Some(id), title)).await
    }

    async fn step(&self, phone: &str) -> Option<Step> {
        self.store.get(phone).await.unwrap().map(|s| s.step)
    }
}

fn option_ids(prompt: &Prompt) -> Vec<String> {
    match prompt {
        Prompt::Buttons { options, .. } => options.iter().map(|o| o.id.clone()).collect(),
        Prompt::List { sections, .. } => sections
            .iter()
            .flat_map(|s| s.rows.iter().map(|r| r.id.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn new_customer_is_offered_a_ticket() {
    let h = harness();
    let prompts = h.text("48111", "Hello").await;

    assert_eq!(prompts, vec![prompting::new_ticket_offer()]);
    assert_eq!(h.step("48111").await, Some(Step::NewTicketPrompt));
    assert_eq!(h.store.customer_count().await, 1);
    assert_eq!(h.store.ticket_count().await, 0);
}

#[tokio::test]
async fn bulk_form_creates_and_binds_ticket() {
    let h = harness();
    h.text("48111", "Hello").await;
    h.select("48111", "create_new_ticket", "Yes, create").await;
    h.select("48111", "type_lock_open", "Lock Open").await;
    h.text("48111", "ABC123, DRV001, Warsaw, urgent").await;

    let state = h.store.get("48111").await.unwrap().unwrap();
    assert_eq!(state.step, Step::BoundToTicket);
    let ticket_id = state.bound_ticket_id.expect("bound ticket");
    let ticket = h.store.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.issue_type, Category::LockOpen);
    assert_eq!(ticket.status, TicketStatus::Open);
    assert_eq!(ticket.vehicle_number.as_deref(), Some("ABC123"));
    assert_eq!(ticket.driver_number.as_deref(), Some("DRV001"));
    assert_eq!(ticket.location.as_deref(), Some("Warsaw"));
    assert_eq!(ticket.comment.as_deref(), Some("urgent"));
}

#[tokio::test]
async fn short_bulk_entry_creates_nothing() {
    let h = harness();
    h.text("48111", "Hello").await;
    h.select("48111", "create_new_ticket", "Yes, create").await;
    h.select("48111", "type_lock_open", "Lock Open").await;
    let before = h.store.get("48111").await.unwrap().unwrap();

    h.text("48111", "ABC123, DRV001").await;

    let after = h.store.get("48111").await.unwrap().unwrap();
    assert_eq!(after.step, Step::FormFilling);
    assert_eq!(after.form_data, before.form_data);
    assert_eq!(h.store.ticket_count().await, 0);
}

#[tokio::test]
async fn open_ticket_is_offered_before_a_new_one() {
    let h = harness();
    h.text("48111", "Hello").await;
    h.select("48111", "create_new_ticket", "Yes").await;
    h.select("48111", "type_lock_open", "Lock Open").await;
    h.text("48111", "ABC123, DRV001, Warsaw").await;
    h.text("48111", "/close").await;

    let prompts = h.text("48111", "my lock is stuck again").await;
    assert_eq!(h.step("48111").await, Some(Step::TicketSelection));
    let ids = option_ids(&prompts[0]);
    assert_eq!(ids.len(), 2);
    assert!(ids[0].starts_with("select_ticket_"));
    assert_eq!(ids[1], "create_new_ticket");
    assert_eq!(h.store.ticket_count().await, 1);
}

#[tokio::test]
async fn agent_close_releases_conversation_and_notifies_once() {
    let h = harness();
    h.text("48111", "Hello").await;
    h.select("48111", "create_new_ticket", "Yes").await;
    h.select("48111", "type_lock_open", "Lock Open").await;
    h.text("48111", "ABC123, DRV001, Warsaw").await;
    let ticket_id = h
        .store
        .get("48111")
        .await
        .unwrap()
        .unwrap()
        .bound_ticket_id
        .unwrap();

    let closed = h.state.desk.close(&ticket_id).await.unwrap();

    let state = h.store.get("48111").await.unwrap().unwrap();
    assert_eq!(state.step, Step::Closed);
    assert!(state.bound_ticket_id.is_none());
    let notices = h
        .messenger
        .sent_to("48111")
        .await
        .into_iter()
        .filter(|p| *p == prompting::ticket_closed(&closed))
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn close_command_without_binding_only_acknowledges() {
    let h = harness();
    h.text("48111", "Hello").await;
    let before = h.store.get("48111").await.unwrap().unwrap();

    let prompts = h.text("48111", "/close").await;

    assert_eq!(prompts, vec![prompting::no_active_conversation()]);
    let after = h.store.get("48111").await.unwrap().unwrap();
    assert_eq!(after.step, before.step);
}

#[tokio::test]
async fn bound_messages_reach_the_ticket() {
    let h = harness();
    h.text("48111", "Hello").await;
    h.select("48111", "create_new_ticket", "Yes").await;
    h.select("48111", "type_lock_open", "Lock Open").await;
    h.text("48111", "ABC123, DRV001, Warsaw").await;

    let prompts = h.text("48111", "the truck is at gate 4").await;
    assert!(prompts.is_empty());

    let ticket_id = h
        .store
        .get("48111")
        .await
        .unwrap()
        .unwrap()
        .bound_ticket_id
        .unwrap();
    let messages = h.store.messages_for_ticket(&ticket_id).await.unwrap();
    assert!(messages.iter().any(|m| m.text == "the truck is at gate 4"));
}

#[tokio::test]
async fn webhook_retry_is_processed_once() {
    let h = harness();
    let payload = json!({ "entry": [{ "changes": [{ "value": {
        "messages": [{ "from": "48111", "id": "wamid.A", "type": "text", "text": { "body": "Hello" } }]
    }}]}]});

    webhook::process_batch(h.state.clone(), webhook::parse(&payload)).await;
    webhook::process_batch(h.state.clone(), webhook::parse(&payload)).await;

    assert_eq!(h.messenger.sent_to("48111").await.len(), 1);
    assert_eq!(h.step("48111").await, Some(Step::NewTicketPrompt));
}

#[tokio::test]
async fn live_and_webhook_share_one_conversation() {
    let h = harness();
    let (client, _rx) = h.state.realtime.connect().await;
    for (event, data) in [
        ("customer:join", json!({ "phone": "48111" })),
        ("customer:message", json!({ "text": "Hello" })),
        ("customer:select", json!({ "optionId": "create_new_ticket", "title": "Yes" })),
    ] {
        let envelope = EventEnvelopeIn {
            event: event.to_string(),
            data,
        };
        live::handle_event(&h.state, client, envelope).await.unwrap();
    }
    assert_eq!(h.step("48111").await, Some(Step::TypeSelection));

    let payload = json!({ "entry": [{ "changes": [{ "value": {
        "messages": [
            { "from": "48111", "id": "w1", "type": "interactive", "interactive": {
                "list_reply": { "id": "type_fund_request", "title": "Fund Request" } } }
        ]
    }}]}]});
    webhook::process_batch(h.state.clone(), webhook::parse(&payload)).await;

    let state = h.store.get("48111").await.unwrap().unwrap();
    assert_eq!(state.step, Step::FormFilling);
    assert_eq!(state.ticket_type, Some(Category::FundRequest));
}

#[tokio::test]
async fn enhanced_webhook_captures_profile_name() {
    let h = harness();
    let payload = json!({ "entry": [{ "changes": [{ "value": {
        "contacts": [{ "wa_id": "48111", "profile": { "name": "Marta" } }],
        "messages": [{ "from": "48111", "id": "w1", "type": "text", "text": { "body": "Hello" } }]
    }}]}]});

    enhanced::process_batch(h.state.clone(), enhanced::parse(&payload, "")).await;

    let customer = h.store.find_customer_by_phone("48111").await.unwrap().unwrap();
    assert_eq!(customer.name.as_deref(), Some("Marta"));
    assert_eq!(h.step("48111").await, Some(Step::NewTicketPrompt));
}

#[tokio::test]
async fn webhook_handshake_checks_verify_token() {
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::collections::HashMap;

    let h = harness();
    let params = |token: &str| -> HashMap<String, String> {
        [
            ("hub.mode", "subscribe"),
            ("hub.verify_token", token),
            ("hub.challenge", "1158201444"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    };

    let accepted = webhook::verify(Query(params("verify-me")), State(h.state.clone()))
        .await
        .into_response();
    assert_eq!(accepted.status(), StatusCode::OK);

    let rejected = webhook::verify(Query(params("wrong")), State(h.state.clone()))
        .await
        .into_response();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
}
