use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{Category, ConversationState, Message, Ticket};

pub const CLOSE_COMMAND: &str = "/close";

/// What the customer did, independent of the transport it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    FreeText(String),
    /// A button or list-row choice. Some channels only deliver the label.
    Selection {
        option_id: Option<String>,
        display_text: String,
    },
    TemplateFormSubmitted {
        category: Option<Category>,
        raw_fields: Map<String, Value>,
    },
    CloseCommand,
}

impl InboundEvent {
    pub fn from_text(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case(CLOSE_COMMAND) {
            InboundEvent::CloseCommand
        } else {
            InboundEvent::FreeText(text.trim().to_string())
        }
    }

    pub fn selection(option_id: Option<&str>, display_text: &str) -> Self {
        InboundEvent::Selection {
            option_id: option_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            display_text: display_text.trim().to_string(),
        }
    }

    /// Text to store in the message log.
    pub fn transcript(&self) -> String {
        match self {
            InboundEvent::FreeText(text) => text.clone(),
            InboundEvent::Selection { display_text, option_id } => {
                if display_text.is_empty() {
                    option_id.clone().unwrap_or_default()
                } else {
                    display_text.clone()
                }
            }
            InboundEvent::TemplateFormSubmitted { raw_fields, .. } => {
                serde_json::to_string(raw_fields).unwrap_or_else(|_| "{}".to_string())
            }
            InboundEvent::CloseCommand => CLOSE_COMMAND.to_string(),
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            InboundEvent::FreeText(_) | InboundEvent::CloseCommand => "text",
            InboundEvent::Selection { .. } => "interactive",
            InboundEvent::TemplateFormSubmitted { .. } => "form",
        }
    }
}

/// One inbound event for one phone number, as produced by an entry adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub phone: String,
    pub event: InboundEvent,
    pub external_id: Option<String>,
}

impl Inbound {
    pub fn new(phone: &str, event: InboundEvent) -> Self {
        Self {
            phone: phone.to_string(),
            event,
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id.filter(|id| !id.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChoiceOption {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ChoiceOption>,
}

/// A customer-facing message the engine wants delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Prompt {
    Text {
        body: String,
    },
    Buttons {
        header: String,
        body: String,
        footer: String,
        options: Vec<ChoiceOption>,
    },
    #[serde(rename_all = "camelCase")]
    List {
        header: String,
        body: String,
        footer: String,
        button_label: String,
        sections: Vec<ListSection>,
    },
    #[serde(rename_all = "camelCase")]
    TemplateForm {
        template_name: String,
        template_id: String,
        locale: String,
    },
}

impl Prompt {
    pub fn text(body: impl Into<String>) -> Self {
        Prompt::Text { body: body.into() }
    }

    /// The main human-readable text, used for logs and live previews.
    pub fn body(&self) -> &str {
        match self {
            Prompt::Text { body } => body,
            Prompt::Buttons { body, .. } => body,
            Prompt::List { body, .. } => body,
            Prompt::TemplateForm { template_name, .. } => template_name,
        }
    }
}

/// Something the dashboards should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    TicketCreated(Ticket),
    CustomerMessage { ticket: Ticket, message: Message },
    ConversationBound { phone: String, ticket_id: String },
    ConversationEnded { phone: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub prompts: Vec<Prompt>,
    pub effects: Vec<SideEffect>,
    /// State after the transition; `None` when the record was cleared or
    /// the event was a duplicate.
    pub state: Option<ConversationState>,
    pub duplicate: bool,
}

impl EngineOutput {
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompts.push(prompt);
        self
    }

    pub fn effect(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_state(mut self, state: Option<ConversationState>) -> Self {
        self.state = state;
        self
    }
}
