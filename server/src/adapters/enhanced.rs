//! Enhanced WhatsApp webhook: signed deliveries, phone-number filtering,
//! contact names and template form replies on top of the plain message kinds.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use super::{basic_message_event, change_values, inbound_from, normalize_phone, relay};
use crate::engine::template_form::normalize_submission;
use crate::engine::{Inbound, InboundEvent};
use crate::realtime::{Publisher, AGENTS_CHANNEL};
use crate::types::AppState;

pub use super::webhook::verify;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// One inbound message plus the sender's WhatsApp profile name, if given.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub inbound: Inbound,
    pub profile_name: Option<String>,
}

/// An empty secret disables the check.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !verify_signature(&state.config.whatsapp.app_secret, signature, &body) {
        warn!("rejected webhook delivery with bad signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    let batch = parse(&payload, &state.config.whatsapp.phone_number_id);
    if !batch.is_empty() {
        info!(count = batch.len(), "enhanced webhook delivery received");
        tokio::spawn(process_batch(state, batch));
    }
    (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
}

fn contact_profile_names(value: &Value) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for contact in value
        .get("contacts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let wa_id = contact.get("wa_id").and_then(Value::as_str).unwrap_or("");
        let Some(phone) = normalize_phone(wa_id) else {
            continue;
        };
        let name = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if !name.is_empty() {
            names.insert(phone, name.to_string());
        }
    }
    names
}

/// Decodes a template form reply carried as `nfm_reply.response_json`.
pub fn template_form_event(message: &Value) -> Option<InboundEvent> {
    let raw = message
        .get("interactive")?
        .get("nfm_reply")?
        .get("response_json")?
        .as_str()?;
    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => fields,
        _ => {
            warn!("unreadable template form response");
            return None;
        }
    };
    let category = normalize_submission(&parsed).category;
    Some(InboundEvent::TemplateFormSubmitted {
        category,
        raw_fields: parsed,
    })
}

/// Messages addressed to another business number are dropped when
/// `phone_number_id` is configured. Status callbacks carry no messages and
/// fall out naturally.
pub fn parse(payload: &Value, phone_number_id: &str) -> Vec<Delivery> {
    let mut batch = Vec::new();
    for value in change_values(payload) {
        let metadata_id = value
            .get("metadata")
            .and_then(|m| m.get("phone_number_id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if !phone_number_id.is_empty() && !metadata_id.is_empty() && metadata_id != phone_number_id
        {
            continue;
        }

        let names = contact_profile_names(&value);
        for message in value
            .get("messages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(event) =
                template_form_event(message).or_else(|| basic_message_event(message))
            else {
                continue;
            };
            let Some(inbound) = inbound_from(message, event) else {
                continue;
            };
            let profile_name = names.get(&inbound.phone).cloned();
            batch.push(Delivery {
                inbound,
                profile_name,
            });
        }
    }
    batch
}

/// Stores a newly learned profile name and tells the dashboards.
async fn capture_profile_name(state: &AppState, phone: &str, name: &str) {
    let before = match state.repo.find_customer_by_phone(phone).await {
        Ok(customer) => customer,
        Err(err) => {
            warn!(phone, error = %err, "customer lookup failed");
            return;
        }
    };
    if before.as_ref().and_then(|c| c.name.as_deref()).is_some() {
        return;
    }
    match state.repo.find_or_create_customer(phone, Some(name)).await {
        Ok(customer) => {
            info!(phone, "customer profile name captured");
            state
                .realtime
                .publish(AGENTS_CHANNEL, "customerUpdated", json!({ "customer": customer }))
                .await;
        }
        Err(err) => warn!(phone, error = %err, "failed to store customer name"),
    }
}

pub async fn process_batch(state: Arc<AppState>, batch: Vec<Delivery>) {
    for delivery in batch {
        if let Some(name) = delivery.profile_name.as_deref() {
            capture_profile_name(&state, &delivery.inbound.phone, name).await;
        }
        relay(&state, state.messenger.as_ref(), delivery.inbound).await;
    }
}
