//! Entry adapters: translate transport payloads into engine events and relay
//! the engine's output back out.

pub mod enhanced;
pub mod live;
pub mod webhook;

use serde_json::{json, Value};
use tracing::debug;

use crate::engine::{EngineOutput, Inbound, InboundEvent, SideEffect};
use crate::outbound::{deliver_all, Messenger};
use crate::realtime::{customer_channel, ticket_channel, Publisher, AGENTS_CHANNEL};
use crate::types::AppState;

/// Webhook handshake: echo `challenge` only for a subscribe request carrying
/// the configured token.
pub fn verify_subscription(
    mode: &str,
    token: &str,
    challenge: &str,
    expected_token: &str,
) -> Option<String> {
    if mode == "subscribe"
        && !challenge.is_empty()
        && !expected_token.is_empty()
        && token == expected_token
    {
        Some(challenge.to_string())
    } else {
        None
    }
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Runs one event through the engine, then delivers prompts and fans out
/// side effects. State is already committed when delivery starts.
pub async fn relay(state: &AppState, messenger: &dyn Messenger, inbound: Inbound) -> EngineOutput {
    let phone = inbound.phone.clone();
    let output = state.engine.handle(inbound).await;
    if output.duplicate {
        return output;
    }
    deliver_all(messenger, &phone, &output.prompts).await;
    publish_effects(state.realtime.as_ref(), &output.effects).await;
    output
}

pub async fn publish_effects(publisher: &dyn Publisher, effects: &[SideEffect]) {
    for effect in effects {
        match effect {
            SideEffect::TicketCreated(ticket) => {
                publisher
                    .publish(AGENTS_CHANNEL, "newTicket", json!({ "ticket": ticket }))
                    .await;
            }
            SideEffect::CustomerMessage { ticket, message } => {
                let payload = json!({ "ticket": ticket, "message": message });
                publisher
                    .publish(AGENTS_CHANNEL, "newCustomerMessage", payload.clone())
                    .await;
                publisher
                    .publish(&ticket_channel(&ticket.id), "newCustomerMessage", payload)
                    .await;
            }
            SideEffect::ConversationBound { phone, ticket_id } => {
                publisher
                    .publish(
                        &customer_channel(phone),
                        "conversation:bound",
                        json!({ "ticketId": ticket_id }),
                    )
                    .await;
            }
            SideEffect::ConversationEnded { phone } => {
                publisher
                    .publish(&customer_channel(phone), "conversation:ended", json!({}))
                    .await;
            }
        }
    }
}

fn text_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return "",
        }
    }
    current.as_str().unwrap_or("").trim()
}

/// Text, quick-reply buttons and interactive button/list replies. Anything
/// else yields `None`.
pub fn basic_message_event(message: &Value) -> Option<InboundEvent> {
    match text_at(message, &["type"]) {
        "text" => {
            let body = text_at(message, &["text", "body"]);
            (!body.is_empty()).then(|| InboundEvent::from_text(body))
        }
        "button" => {
            let title = text_at(message, &["button", "text"]);
            let payload = text_at(message, &["button", "payload"]);
            if title.is_empty() && payload.is_empty() {
                return None;
            }
            Some(InboundEvent::selection(Some(payload), title))
        }
        "interactive" => {
            let interactive = message.get("interactive")?;
            let reply = interactive
                .get("button_reply")
                .or_else(|| interactive.get("list_reply"))?;
            let id = text_at(reply, &["id"]);
            let title = text_at(reply, &["title"]);
            if id.is_empty() && title.is_empty() {
                return None;
            }
            Some(InboundEvent::selection(Some(id), title))
        }
        other => {
            debug!(message_type = other, "ignoring unsupported message type");
            None
        }
    }
}

/// Walks `entry[].changes[].value`, the envelope shared by both webhooks.
pub fn change_values(payload: &Value) -> Vec<Value> {
    payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|entry| {
            entry
                .get("changes")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        })
        .filter_map(|change| change.get("value").cloned())
        .collect()
}

/// Turns one `messages[]` element into an engine input.
pub fn inbound_from(message: &Value, event: InboundEvent) -> Option<Inbound> {
    let phone = normalize_phone(text_at(message, &["from"]))?;
    let external_id = text_at(message, &["id"]);
    Some(
        Inbound::new(&phone, event)
            .with_external_id((!external_id.is_empty()).then(|| external_id.to_string())),
    )
}
