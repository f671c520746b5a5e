//! Plain WhatsApp webhook: text, quick-reply buttons and interactive replies.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use super::{basic_message_event, change_values, inbound_from, relay, verify_subscription};
use crate::engine::Inbound;
use crate::types::AppState;

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

pub async fn verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match verify_subscription(
        param(&params, "hub.mode"),
        param(&params, "hub.verify_token"),
        param(&params, "hub.challenge"),
        &state.config.whatsapp.verify_token,
    ) {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "invalid webhook verification token" })),
        )
            .into_response(),
    }
}

/// Acknowledges immediately; the batch is processed in the background.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let batch = parse(&payload);
    if !batch.is_empty() {
        info!(count = batch.len(), "webhook delivery received");
        tokio::spawn(process_batch(state, batch));
    }
    (StatusCode::OK, Json(json!({ "ok": true })))
}

pub fn parse(payload: &Value) -> Vec<Inbound> {
    change_values(payload)
        .iter()
        .flat_map(|value| {
            value
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        })
        .filter_map(|message| {
            let event = basic_message_event(&message)?;
            inbound_from(&message, event)
        })
        .collect()
}

/// Runs a delivery's messages strictly in array order.
pub async fn process_batch(state: Arc<AppState>, batch: Vec<Inbound>) {
    for inbound in batch {
        relay(&state, state.messenger.as_ref(), inbound).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InboundEvent;

    fn delivery(messages: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{ "changes": [{ "value": {
                "metadata": { "phone_number_id": "100" },
                "messages": messages
            }}]}]
        })
    }

    #[test]
    fn parse_keeps_delivery_order() {
        let payload = delivery(json!([
            { "from": "+48 111", "id": "wamid.1", "type": "text", "text": { "body": "Hello" } },
            { "from": "48111", "id": "wamid.2", "type": "interactive", "interactive": {
                "button_reply": { "id": "create_new_ticket", "title": "Yes" } } },
            { "from": "48111", "id": "wamid.3", "type": "image" }
        ]));
        let batch = parse(&payload);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].phone, "48111");
        assert_eq!(batch[0].external_id.as_deref(), Some("wamid.1"));
        assert_eq!(batch[0].event, InboundEvent::FreeText("Hello".into()));
        assert_eq!(
            batch[1].event,
            InboundEvent::selection(Some("create_new_ticket"), "Yes")
        );
    }

    #[test]
    fn parse_ignores_status_only_deliveries() {
        let payload = json!({ "entry": [{ "changes": [{ "value": {
            "statuses": [{ "id": "wamid.1", "status": "delivered" }]
        }}]}]});
        assert!(parse(&payload).is_empty());
        assert!(parse(&json!({})).is_empty());
    }
}
