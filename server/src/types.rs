use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    config::Config,
    desk::DeskService,
    engine::ConversationEngine,
    outbound::Messenger,
    realtime::Realtime,
    store::{ConversationStore, DeskRepository},
};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Where a customer currently is in the chat bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Idle,
    TicketSelection,
    NewTicketPrompt,
    TypeSelection,
    FuelSubtypeSelection,
    FormFilling,
    TemplateFormPending,
    BoundToTicket,
    Closed,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "IDLE",
            Step::TicketSelection => "TICKET_SELECTION",
            Step::NewTicketPrompt => "NEW_TICKET_PROMPT",
            Step::TypeSelection => "TYPE_SELECTION",
            Step::FuelSubtypeSelection => "FUEL_SUBTYPE_SELECTION",
            Step::FormFilling => "FORM_FILLING",
            Step::TemplateFormPending => "TEMPLATE_FORM_PENDING",
            Step::BoundToTicket => "BOUND_TO_TICKET",
            Step::Closed => "CLOSED",
        }
    }

    /// Unknown values read back from storage are treated as `Idle` so the
    /// customer is greeted again instead of being stuck.
    pub fn parse(value: &str) -> Step {
        match value.trim().to_ascii_uppercase().as_str() {
            "TICKET_SELECTION" => Step::TicketSelection,
            "NEW_TICKET_PROMPT" => Step::NewTicketPrompt,
            "TYPE_SELECTION" => Step::TypeSelection,
            "FUEL_SUBTYPE_SELECTION" => Step::FuelSubtypeSelection,
            "FORM_FILLING" => Step::FormFilling,
            "TEMPLATE_FORM_PENDING" => Step::TemplateFormPending,
            "BOUND_TO_TICKET" => Step::BoundToTicket,
            "CLOSED" => Step::Closed,
            _ => Step::Idle,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket topic, also called issue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    LockOpen,
    LockRepair,
    FundRequest,
    FuelRequest,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::LockOpen,
        Category::LockRepair,
        Category::FundRequest,
        Category::FuelRequest,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::LockOpen => "lock_open",
            Category::LockRepair => "lock_repair",
            Category::FundRequest => "fund_request",
            Category::FuelRequest => "fuel_request",
            Category::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == value.trim().to_ascii_lowercase())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::LockOpen => "Lock Open",
            Category::LockRepair => "Lock Repair",
            Category::FundRequest => "Fund Request",
            Category::FuelRequest => "Fuel Request",
            Category::Other => "Other",
        }
    }

    pub fn option_id(&self) -> String {
        format!("type_{}", self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    ByAmount,
    ByQuantity,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::ByAmount => "by_amount",
            FuelType::ByQuantity => "by_quantity",
        }
    }

    pub fn parse(value: &str) -> Option<FuelType> {
        match value.trim().to_ascii_lowercase().as_str() {
            "by_amount" | "amount" => Some(FuelType::ByAmount),
            "by_quantity" | "quantity" => Some(FuelType::ByQuantity),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FuelType::ByAmount => "By Amount",
            FuelType::ByQuantity => "By Quantity",
        }
    }

    pub fn option_id(&self) -> &'static str {
        match self {
            FuelType::ByAmount => "fuel_amount",
            FuelType::ByQuantity => "fuel_quantity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    PendingCustomer,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::PendingCustomer => "pending_customer",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<TicketStatus> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(TicketStatus::Open),
            "in_progress" => Some(TicketStatus::InProgress),
            "pending_customer" => Some(TicketStatus::PendingCustomer),
            "closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TicketStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Agent,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Agent => "agent",
            SenderType::System => "system",
        }
    }

    pub fn parse(value: &str) -> SenderType {
        match value {
            "agent" => SenderType::Agent,
            "system" => SenderType::System,
            _ => SenderType::Customer,
        }
    }
}

/// A single accepted answer. Numbers stay numbers so ticket columns such as
/// `amount` can be populated without re-parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Number(f64),
    Text(String),
}

impl FormValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormValue::Number(n) => Some(*n),
            FormValue::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    fn from_json(value: &Value) -> Option<FormValue> {
        match value {
            Value::Number(n) => n.as_f64().map(FormValue::Number),
            Value::String(s) => Some(FormValue::Text(s.clone())),
            Value::Bool(b) => Some(FormValue::Text(b.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for FormValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            FormValue::Number(n) => write!(f, "{n}"),
            FormValue::Text(text) => f.write_str(text),
        }
    }
}

/// Accumulated form answers keyed by canonical field name.
///
/// Always an object on the wire. Reads go through [`FormData::from_stored`],
/// which tolerates rows written by older releases that persisted the literal
/// string `"[object Object]"` or otherwise broken JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData(BTreeMap<String, FormValue>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FormValue> {
        self.0.get(field)
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.0
            .get(field)
            .map(|value| value.to_string())
            .filter(|value| !value.trim().is_empty())
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(FormValue::as_number)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FormValue) {
        self.0.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fuel_type(&self) -> Option<FuelType> {
        self.text("fuel_type").as_deref().and_then(FuelType::parse)
    }

    /// Accepts any JSON value; anything that is not an object becomes empty.
    pub fn from_value(value: &Value) -> FormData {
        let Some(object) = value.as_object() else {
            return FormData::new();
        };
        FormData(
            object
                .iter()
                .filter_map(|(key, value)| FormValue::from_json(value).map(|v| (key.clone(), v)))
                .collect(),
        )
    }

    pub fn from_stored(raw: &str) -> FormData {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return FormData::new();
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => FormData::from_value(&value),
            Ok(Value::String(inner)) if inner.trim_start().starts_with('{') => {
                FormData::from_stored(&inner)
            }
            Ok(other) => {
                warn!(stored = %other, "discarding non-object form data");
                FormData::new()
            }
            Err(_) => {
                warn!(stored = trimmed, "discarding malformed form data");
                FormData::new()
            }
        }
    }

    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl FromIterator<(String, FormValue)> for FormData {
    fn from_iter<T: IntoIterator<Item = (String, FormValue)>>(iter: T) -> Self {
        FormData(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub phone_number: String,
    pub step: Step,
    pub ticket_type: Option<Category>,
    pub form_data: FormData,
    pub bound_ticket_id: Option<String>,
    pub updated_at: String,
}

impl ConversationState {
    pub fn idle(phone_number: &str) -> Self {
        Self {
            phone_number: phone_number.to_string(),
            step: Step::Idle,
            ticket_type: None,
            form_data: FormData::new(),
            bound_ticket_id: None,
            updated_at: now_iso(),
        }
    }

    pub fn apply(&mut self, patch: &StatePatch) {
        if let Some(step) = patch.step {
            self.step = step;
        }
        if let Some(ticket_type) = patch.ticket_type {
            self.ticket_type = ticket_type;
        }
        if let Some(form_data) = &patch.form_data {
            self.form_data = form_data.clone();
        }
        if let Some(bound) = &patch.bound_ticket_id {
            self.bound_ticket_id = bound.clone();
        }
        self.updated_at = now_iso();
    }
}

/// Partial update for [`ConversationState`]; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub step: Option<Step>,
    pub ticket_type: Option<Option<Category>>,
    pub form_data: Option<FormData>,
    pub bound_ticket_id: Option<Option<String>>,
}

impl StatePatch {
    pub fn step(step: Step) -> Self {
        Self {
            step: Some(step),
            ..Self::default()
        }
    }

    pub fn with_ticket_type(mut self, category: Option<Category>) -> Self {
        self.ticket_type = Some(category);
        self
    }

    pub fn with_form_data(mut self, form_data: FormData) -> Self {
        self.form_data = Some(form_data);
        self
    }

    pub fn with_bound_ticket(mut self, ticket_id: Option<String>) -> Self {
        self.bound_ticket_id = Some(ticket_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub phone_number: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub ticket_number: String,
    pub customer_id: String,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub assigned_agent_id: Option<String>,
    pub assigned_agent_name: Option<String>,
    pub status: TicketStatus,
    pub priority: String,
    pub issue_type: Category,
    pub fuel_type: Option<FuelType>,
    pub vehicle_number: Option<String>,
    pub driver_number: Option<String>,
    pub location: Option<String>,
    pub request_date: Option<String>,
    pub request_time: Option<String>,
    pub amount: Option<f64>,
    pub quantity: Option<f64>,
    pub upi_id: Option<String>,
    pub comment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Column values for a ticket about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub id: String,
    pub ticket_number: String,
    pub customer_id: String,
    pub status: TicketStatus,
    pub priority: String,
    pub issue_type: Category,
    pub fuel_type: Option<FuelType>,
    pub vehicle_number: Option<String>,
    pub driver_number: Option<String>,
    pub location: Option<String>,
    pub request_date: Option<String>,
    pub request_time: Option<String>,
    pub amount: Option<f64>,
    pub quantity: Option<f64>,
    pub upi_id: Option<String>,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub ticket_id: Option<String>,
    pub phone_number: String,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub text: String,
    pub message_type: String,
    pub external_message_id: Option<String>,
    pub created_at: String,
}

impl Message {
    pub fn customer(
        phone_number: &str,
        ticket_id: Option<String>,
        text: &str,
        message_type: &str,
        external_message_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id,
            phone_number: phone_number.to_string(),
            sender_type: SenderType::Customer,
            sender_id: None,
            text: text.to_string(),
            message_type: message_type.to_string(),
            external_message_id,
            created_at: now_iso(),
        }
    }

    pub fn agent(ticket: &Ticket, agent_id: Option<String>, text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticket_id: Some(ticket.id.clone()),
            phone_number: ticket.customer_phone.clone(),
            sender_type: SenderType::Agent,
            sender_id: agent_id,
            text: text.to_string(),
            message_type: "text".to_string(),
            external_message_id: None,
            created_at: now_iso(),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub conversations: Arc<dyn ConversationStore>,
    pub repo: Arc<dyn DeskRepository>,
    pub engine: Arc<ConversationEngine>,
    pub messenger: Arc<dyn Messenger>,
    pub realtime: Arc<Realtime>,
    pub desk: DeskService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReplyBody {
    pub agent_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeBody {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentBody {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct EventEnvelopeIn {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}
