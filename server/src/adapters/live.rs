//! Live socket channel for web customers and agent dashboards.
//!
//! Customers drive the same conversation engine as the WhatsApp webhooks;
//! prompts come back as `bot:prompt` events instead of Cloud API calls.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{normalize_phone, relay};
use crate::engine::template_form::normalize_submission;
use crate::engine::{ChoiceOption, Inbound, InboundEvent, ListSection, Prompt};
use crate::error::{DeliveryError, DeskError};
use crate::outbound::{Messenger, SendReceipt};
use crate::realtime::{customer_channel, ClientId, Publisher, Realtime};
use crate::types::{AppState, Category, EventEnvelopeIn};

/// Delivers prompts to the customer's open live sessions.
pub struct LiveMessenger {
    realtime: Arc<Realtime>,
}

impl LiveMessenger {
    pub fn new(realtime: Arc<Realtime>) -> Self {
        Self { realtime }
    }

    async fn push(&self, phone: &str, prompt: Prompt) -> Result<SendReceipt, DeliveryError> {
        self.realtime
            .publish(&customer_channel(phone), "bot:prompt", json!(prompt))
            .await;
        Ok(SendReceipt::default())
    }
}

#[async_trait]
impl Messenger for LiveMessenger {
    async fn send_text(&self, phone: &str, body: &str) -> Result<SendReceipt, DeliveryError> {
        self.push(phone, Prompt::text(body)).await
    }

    async fn send_buttons(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        options: &[ChoiceOption],
    ) -> Result<SendReceipt, DeliveryError> {
        let prompt = Prompt::Buttons {
            header: header.to_string(),
            body: body.to_string(),
            footer: footer.to_string(),
            options: options.to_vec(),
        };
        self.push(phone, prompt).await
    }

    async fn send_list(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> Result<SendReceipt, DeliveryError> {
        let prompt = Prompt::List {
            header: header.to_string(),
            body: body.to_string(),
            footer: footer.to_string(),
            button_label: button_label.to_string(),
            sections: sections.to_vec(),
        };
        self.push(phone, prompt).await
    }

    async fn send_template_form(
        &self,
        phone: &str,
        template_name: &str,
        template_id: &str,
        locale: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        let prompt = Prompt::TemplateForm {
            template_name: template_name.to_string(),
            template_id: template_id.to_string(),
            locale: locale.to_string(),
        };
        self.push(phone, prompt).await
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut rx) = state.realtime.connect().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            debug!(client_id, "ignoring malformed socket frame");
            continue;
        };
        if let Err(err) = handle_event(&state, client_id, envelope).await {
            state
                .realtime
                .emit_to_client(client_id, "error", json!({ "message": err.to_string() }))
                .await;
        }
    }

    state.realtime.disconnect(client_id).await;
    send_task.abort();
}

fn data_text<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("").trim()
}

fn required<'a>(data: &'a Value, key: &str) -> Result<&'a str, DeskError> {
    let value = data_text(data, key);
    if value.is_empty() {
        return Err(DeskError::Validation {
            field: key.to_string(),
            reason: "is required".to_string(),
        });
    }
    Ok(value)
}

async fn joined_customer(state: &AppState, client_id: ClientId) -> Result<String, DeskError> {
    state
        .realtime
        .customer_phone(client_id)
        .await
        .ok_or_else(|| DeskError::BadRequest("join as a customer first".to_string()))
}

async fn joined_agent(state: &AppState, client_id: ClientId) -> Result<String, DeskError> {
    state
        .realtime
        .agent_id(client_id)
        .await
        .ok_or_else(|| DeskError::BadRequest("join as an agent first".to_string()))
}

async fn customer_event(state: &AppState, client_id: ClientId, event: InboundEvent) -> Result<(), DeskError> {
    let phone = joined_customer(state, client_id).await?;
    let messenger = LiveMessenger::new(state.realtime.clone());
    relay(state, &messenger, Inbound::new(&phone, event)).await;
    Ok(())
}

fn form_event(data: &Value) -> Result<InboundEvent, DeskError> {
    let Some(fields) = data.get("fields").and_then(Value::as_object) else {
        return Err(DeskError::Validation {
            field: "fields".to_string(),
            reason: "must be an object".to_string(),
        });
    };
    let raw_fields: Map<String, Value> = fields.clone();
    let category = Category::parse(data_text(data, "category"))
        .or_else(|| normalize_submission(&raw_fields).category);
    Ok(InboundEvent::TemplateFormSubmitted {
        category,
        raw_fields,
    })
}

/// Dispatches one socket envelope. Errors go back to the sender only.
pub async fn handle_event(
    state: &AppState,
    client_id: ClientId,
    envelope: EventEnvelopeIn,
) -> Result<(), DeskError> {
    let data = &envelope.data;
    match envelope.event.as_str() {
        "customer:join" => {
            let phone = normalize_phone(data_text(data, "phone")).ok_or_else(|| {
                DeskError::Validation {
                    field: "phone".to_string(),
                    reason: "must contain digits".to_string(),
                }
            })?;
            state.realtime.join_customer(client_id, &phone).await;
            let conversation = state.conversations.get(&phone).await?;
            info!(client_id, phone = %phone, "live customer joined");
            state
                .realtime
                .emit_to_client(
                    client_id,
                    "customer:joined",
                    json!({ "phone": phone, "conversation": conversation }),
                )
                .await;
        }
        "customer:message" => {
            let text = required(data, "text")?;
            customer_event(state, client_id, InboundEvent::from_text(text)).await?;
        }
        "customer:select" => {
            let option_id = data_text(data, "optionId");
            let title = data_text(data, "title");
            if option_id.is_empty() && title.is_empty() {
                return Err(DeskError::Validation {
                    field: "optionId".to_string(),
                    reason: "an option id or title is required".to_string(),
                });
            }
            let event = InboundEvent::selection(Some(option_id), title);
            customer_event(state, client_id, event).await?;
        }
        "customer:form" => {
            let event = form_event(data)?;
            customer_event(state, client_id, event).await?;
        }
        "agent:join" => {
            let agent_id = required(data, "agentId")?;
            let agent = state
                .repo
                .get_agent(agent_id)
                .await?
                .ok_or_else(|| DeskError::NotFound(format!("agent {agent_id}")))?;
            state.realtime.join_agent(client_id, &agent.id).await;
            info!(client_id, agent_id = %agent.id, "agent joined");
            state
                .realtime
                .emit_to_client(client_id, "agent:joined", json!({ "agent": agent }))
                .await;
        }
        "agent:watch-ticket" => {
            joined_agent(state, client_id).await?;
            let ticket_id = required(data, "ticketId")?;
            let ticket = state
                .repo
                .get_ticket(ticket_id)
                .await?
                .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))?;
            let messages = state.repo.messages_for_ticket(&ticket.id).await?;
            state.realtime.watch_ticket(client_id, &ticket.id).await;
            state
                .realtime
                .emit_to_client(
                    client_id,
                    "ticket:history",
                    json!({ "ticket": ticket, "messages": messages }),
                )
                .await;
        }
        "agent:reply" => {
            let agent_id = joined_agent(state, client_id).await?;
            let ticket_id = required(data, "ticketId")?;
            let text = data_text(data, "text");
            state.desk.agent_reply(ticket_id, Some(agent_id), text).await?;
        }
        "agent:close-ticket" => {
            joined_agent(state, client_id).await?;
            let ticket_id = required(data, "ticketId")?;
            state.desk.close(ticket_id).await?;
        }
        other => debug!(client_id, event = other, "ignoring unknown socket event"),
    }
    Ok(())
}
