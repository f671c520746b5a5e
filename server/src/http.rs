//! Agent-facing JSON API.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::error::DeskError;
use crate::escalation;
use crate::types::{
    AgentReplyBody, AppState, AssigneeBody, CreateAgentBody, StatusBody, TicketListQuery,
    TicketStatus,
};

type ApiResult = Result<Json<Value>, DeskError>;

fn parse_status(raw: &str) -> Result<TicketStatus, DeskError> {
    TicketStatus::parse(raw).ok_or_else(|| DeskError::Validation {
        field: "status".to_string(),
        reason: format!("unknown status '{raw}'"),
    })
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TicketListQuery>,
) -> ApiResult {
    let status = match query.status.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_status(raw)?),
        _ => None,
    };
    let tickets = state.repo.list_tickets(status).await?;
    Ok(Json(json!({ "tickets": tickets })))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> ApiResult {
    let ticket = state
        .repo
        .get_ticket(&ticket_id)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> ApiResult {
    if state.repo.get_ticket(&ticket_id).await?.is_none() {
        return Err(DeskError::NotFound(format!("ticket {ticket_id}")));
    }
    let messages = state.repo.messages_for_ticket(&ticket_id).await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
    Json(body): Json<AgentReplyBody>,
) -> Result<impl IntoResponse, DeskError> {
    let message = state
        .desk
        .agent_reply(&ticket_id, body.agent_id, &body.text)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

pub async fn patch_assignee(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
    Json(body): Json<AssigneeBody>,
) -> ApiResult {
    let ticket = state.desk.assign(&ticket_id, body.agent_id.trim()).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn patch_status(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
    Json(body): Json<StatusBody>,
) -> ApiResult {
    let status = parse_status(body.status.trim())?;
    let ticket = state.desk.set_status(&ticket_id, status).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<String>,
) -> ApiResult {
    let ticket = state.desk.close(&ticket_id).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

pub async fn escalations(State(state): State<Arc<AppState>>) -> ApiResult {
    let flagged = escalation::scan(
        state.repo.as_ref(),
        state.config.escalation_threshold_minutes,
        Utc::now(),
    )
    .await?;
    Ok(Json(json!({ "escalations": flagged })))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(phone): Path<String>,
) -> ApiResult {
    let phone = crate::adapters::normalize_phone(&phone)
        .ok_or_else(|| DeskError::NotFound(format!("conversation {phone}")))?;
    let conversation = state
        .conversations
        .get(&phone)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("conversation {phone}")))?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAgentBody>,
) -> Result<impl IntoResponse, DeskError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(DeskError::Validation {
            field: "name".to_string(),
            reason: "is required".to_string(),
        });
    }
    let agent = state.repo.create_agent(name).await?;
    info!(agent_id = %agent.id, "agent created");
    Ok((StatusCode::CREATED, Json(json!({ "agent": agent }))))
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> ApiResult {
    let agents = state.repo.list_agents().await?;
    Ok(Json(json!({ "agents": agents })))
}
