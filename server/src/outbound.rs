//! Outbound customer messaging over the WhatsApp Cloud API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WhatsAppConfig;
use crate::engine::{ChoiceOption, ListSection, Prompt};
use crate::error::DeliveryError;

const MAX_BUTTONS: usize = 3;
const BUTTON_TITLE_LEN: usize = 20;
const MAX_LIST_ROWS: usize = 10;
const ROW_TITLE_LEN: usize = 24;
const ROW_DESCRIPTION_LEN: usize = 72;
const HEADER_LEN: usize = 60;
const FOOTER_LEN: usize = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider message id, when the provider returns one.
    pub id: Option<String>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, phone: &str, body: &str) -> Result<SendReceipt, DeliveryError>;

    async fn send_buttons(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        options: &[ChoiceOption],
    ) -> Result<SendReceipt, DeliveryError>;

    async fn send_list(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        button_label: &str,
        sections: &[ListSection],
    ) -> Result<SendReceipt, DeliveryError>;

    async fn send_template_form(
        &self,
        phone: &str,
        template_name: &str,
        template_id: &str,
        locale: &str,
    ) -> Result<SendReceipt, DeliveryError>;
}

pub async fn deliver(
    messenger: &dyn Messenger,
    phone: &str,
    prompt: &Prompt,
) -> Result<SendReceipt, DeliveryError> {
    match prompt {
        Prompt::Text { body } => messenger.send_text(phone, body).await,
        Prompt::Buttons {
            header,
            body,
            footer,
            options,
        } => {
            messenger
                .send_buttons(phone, header, body, footer, options)
                .await
        }
        Prompt::List {
            header,
            body,
            footer,
            button_label,
            sections,
        } => {
            messenger
                .send_list(phone, header, body, footer, button_label, sections)
                .await
        }
        Prompt::TemplateForm {
            template_name,
            template_id,
            locale,
        } => {
            messenger
                .send_template_form(phone, template_name, template_id, locale)
                .await
        }
    }
}

/// Sends prompts in order. Failures are logged and do not stop later prompts.
/// Returns how many were delivered.
pub async fn deliver_all(messenger: &dyn Messenger, phone: &str, prompts: &[Prompt]) -> usize {
    let mut delivered = 0;
    for prompt in prompts {
        match deliver(messenger, phone, prompt).await {
            Ok(receipt) => {
                delivered += 1;
                debug!(phone, message_id = ?receipt.id, "prompt delivered");
            }
            Err(err) => warn!(phone, error = %err, "failed to deliver prompt"),
        }
    }
    delivered
}

fn clip(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}

fn base_payload(to: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
    })
}

fn interactive_frame(header: &str, body: &str, footer: &str) -> Value {
    let mut interactive = json!({ "body": { "text": body } });
    if !header.trim().is_empty() {
        interactive["header"] = json!({ "type": "text", "text": clip(header, HEADER_LEN) });
    }
    if !footer.trim().is_empty() {
        interactive["footer"] = json!({ "text": clip(footer, FOOTER_LEN) });
    }
    interactive
}

pub fn text_payload(to: &str, body: &str) -> Value {
    let mut payload = base_payload(to);
    payload["type"] = json!("text");
    payload["text"] = json!({ "preview_url": false, "body": body });
    payload
}

pub fn buttons_payload(
    to: &str,
    header: &str,
    body: &str,
    footer: &str,
    options: &[ChoiceOption],
) -> Value {
    let buttons = options
        .iter()
        .take(MAX_BUTTONS)
        .map(|option| {
            json!({
                "type": "reply",
                "reply": { "id": option.id, "title": clip(&option.title, BUTTON_TITLE_LEN) }
            })
        })
        .collect::<Vec<_>>();
    let mut interactive = interactive_frame(header, body, footer);
    interactive["type"] = json!("button");
    interactive["action"] = json!({ "buttons": buttons });

    let mut payload = base_payload(to);
    payload["type"] = json!("interactive");
    payload["interactive"] = interactive;
    payload
}

pub fn list_payload(
    to: &str,
    header: &str,
    body: &str,
    footer: &str,
    button_label: &str,
    sections: &[ListSection],
) -> Value {
    let mut remaining = MAX_LIST_ROWS;
    let sections = sections
        .iter()
        .filter_map(|section| {
            let rows = section
                .rows
                .iter()
                .take(remaining)
                .map(|row| {
                    let mut value = json!({ "id": row.id, "title": clip(&row.title, ROW_TITLE_LEN) });
                    if let Some(description) = &row.description {
                        value["description"] = json!(clip(description, ROW_DESCRIPTION_LEN));
                    }
                    value
                })
                .collect::<Vec<_>>();
            remaining -= rows.len();
            (!rows.is_empty()).then(|| json!({ "title": clip(&section.title, ROW_TITLE_LEN), "rows": rows }))
        })
        .collect::<Vec<_>>();

    let mut interactive = interactive_frame(header, body, footer);
    interactive["type"] = json!("list");
    interactive["action"] = json!({
        "button": clip(button_label, BUTTON_TITLE_LEN),
        "sections": sections,
    });

    let mut payload = base_payload(to);
    payload["type"] = json!("interactive");
    payload["interactive"] = interactive;
    payload
}

pub fn template_form_payload(to: &str, template_name: &str, template_id: &str, locale: &str) -> Value {
    let mut payload = base_payload(to);
    payload["type"] = json!("template");
    payload["template"] = json!({
        "name": template_name,
        "language": { "code": locale },
        "components": [{
            "type": "button",
            "sub_type": "flow",
            "index": "0",
            "parameters": [{
                "type": "action",
                "action": { "flow_token": template_id }
            }]
        }]
    });
    payload
}

pub struct WhatsAppCloudMessenger {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    phone_number_id: String,
    timeout: Duration,
}

impl WhatsAppCloudMessenger {
    pub fn new(config: &WhatsAppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            timeout: config.timeout,
        }
    }

    async fn post(&self, payload: Value) -> Result<SendReceipt, DeliveryError> {
        if self.access_token.is_empty() || self.phone_number_id.is_empty() {
            return Err(DeliveryError::Config(
                "missing whatsapp access token or phone number id".to_string(),
            ));
        }
        let response = self
            .client
            .post(format!("{}/{}/messages", self.api_base, self.phone_number_id))
            .bearer_auth(&self.access_token)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: raw_body,
            });
        }
        let body = serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({}));
        let id = body
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .and_then(|message| message.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(SendReceipt { id })
    }
}

#[async_trait]
impl Messenger for WhatsAppCloudMessenger {
    async fn send_text(&self, phone: &str, body: &str) -> Result<SendReceipt, DeliveryError> {
        self.post(text_payload(phone, body)).await
    }

    async fn send_buttons(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        options: &[ChoiceOption],
    ) -> Result<SendReceipt, DeliveryError> {
        self.post(buttons_payload(phone, header, body, footer, options))
            .await
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
        self.post(list_payload(
            phone,
            header,
            body,
            footer,
            button_label,
            sections,
        ))
        .await
    }

    async fn send_template_form(
        &self,
        phone: &str,
        template_name: &str,
        template_id: &str,
        locale: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        self.post(template_form_payload(
            phone,
            template_name,
            template_id,
            locale,
        ))
        .await
    }
}

/// Stands in for the Cloud API when no credentials are configured.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send_text(&self, phone: &str, body: &str) -> Result<SendReceipt, DeliveryError> {
        info!(phone, body, "outbound text (not sent, whatsapp not configured)");
        Ok(SendReceipt::default())
    }

    async fn send_buttons(
        &self,
        phone: &str,
        _header: &str,
        body: &str,
        _footer: &str,
        options: &[ChoiceOption],
    ) -> Result<SendReceipt, DeliveryError> {
        let ids: Vec<&str> = options.iter().map(|o| o.id.as_str()).collect();
        info!(phone, body, options = ?ids, "outbound buttons (not sent, whatsapp not configured)");
        Ok(SendReceipt::default())
    }

    async fn send_list(
        &self,
        phone: &str,
        _header: &str,
        body: &str,
        _footer: &str,
        _button_label: &str,
        sections: &[ListSection],
    ) -> Result<SendReceipt, DeliveryError> {
        let rows: usize = sections.iter().map(|s| s.rows.len()).sum();
        info!(phone, body, rows, "outbound list (not sent, whatsapp not configured)");
        Ok(SendReceipt::default())
    }

    async fn send_template_form(
        &self,
        phone: &str,
        template_name: &str,
        _template_id: &str,
        _locale: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        info!(phone, template_name, "outbound template form (not sent, whatsapp not configured)");
        Ok(SendReceipt::default())
    }
}

/// Keeps every prompt it is asked to send. Used by tests and local demos.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, Prompt)>>,
    failures: AtomicUsize,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` sends fail.
    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<(String, Prompt)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, phone: &str) -> Vec<Prompt> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == phone)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    async fn record(&self, phone: &str, prompt: Prompt) -> Result<SendReceipt, DeliveryError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Request("simulated delivery failure".to_string()));
        }
        let mut sent = self.sent.lock().await;
        sent.push((phone.to_string(), prompt));
        Ok(SendReceipt {
            id: Some(format!("recorded-{}", sent.len())),
        })
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, phone: &str, body: &str) -> Result<SendReceipt, DeliveryError> {
        self.record(phone, Prompt::text(body)).await
    }

    async fn send_buttons(
        &self,
        phone: &str,
        header: &str,
        body: &str,
        footer: &str,
        options: &[ChoiceOption],
    ) -> Result<SendReceipt, DeliveryError> {
        self.record(
            phone,
            Prompt::Buttons {
                header: header.to_string(),
                body: body.to_string(),
                footer: footer.to_string(),
                options: options.to_vec(),
            },
        )
        .await
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
        self.record(
            phone,
            Prompt::List {
                header: header.to_string(),
                body: body.to_string(),
                footer: footer.to_string(),
                button_label: button_label.to_string(),
                sections: sections.to_vec(),
            },
        )
        .await
    }

    async fn send_template_form(
        &self,
        phone: &str,
        template_name: &str,
        template_id: &str,
        locale: &str,
    ) -> Result<SendReceipt, DeliveryError> {
        self.record(
            phone,
            Prompt::TemplateForm {
                template_name: template_name.to_string(),
                template_id: template_id.to_string(),
                locale: locale.to_string(),
            },
        )
        .await
    }
}
