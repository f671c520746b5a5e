//! The customer conversation state machine shared by every entry adapter.

mod event;
pub mod form;
pub mod selection;
pub mod template_form;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::TemplateFormConfig;
use crate::error::DeskError;
use crate::fields::{find_field, next_missing_required_field};
use crate::materializer;
use crate::prompting;
use crate::store::{ConversationStore, DeskRepository, PhoneLocks};
use crate::types::{
    Category, ConversationState, FormData, FormValue, Message, StatePatch, Step, Ticket,
    TicketStatus,
};
use crate::validate::validate;

pub use event::{
    ChoiceOption, EngineOutput, Inbound, InboundEvent, ListSection, Prompt, SideEffect,
    CLOSE_COMMAND,
};
use form::{BulkRejection, SingleOutcome};
use selection::{Answer, TicketChoice};

pub struct ConversationEngine {
    conversations: Arc<dyn ConversationStore>,
    repo: Arc<dyn DeskRepository>,
    locks: PhoneLocks,
    template_form: Option<TemplateFormConfig>,
}

/// The state a transition starts from, with a bound ticket already resolved.
struct Current {
    state: ConversationState,
    bound: Option<Ticket>,
    message: Message,
}

impl ConversationEngine {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        repo: Arc<dyn DeskRepository>,
        template_form: Option<TemplateFormConfig>,
    ) -> Self {
        Self {
            conversations,
            repo,
            locks: PhoneLocks::new(),
            template_form,
        }
    }

    /// Runs one inbound event to completion. Events for the same phone number
    /// are serialized; failures are logged and answered with a retry prompt.
    pub async fn handle(&self, inbound: Inbound) -> EngineOutput {
        let _guard = self.locks.lock(&inbound.phone).await;
        match self.process(&inbound).await {
            Ok(output) => output,
            Err(err) => {
                error!(
                    phone = %inbound.phone,
                    error = %err,
                    "conversation transition failed"
                );
                EngineOutput::default().prompt(prompting::retry_later())
            }
        }
    }

    async fn process(&self, inbound: &Inbound) -> Result<EngineOutput, DeskError> {
        let phone = inbound.phone.as_str();
        let stored = self.conversations.get(phone).await?;

        let bound = match stored.as_ref() {
            Some(state) if state.step == Step::BoundToTicket => {
                self.live_bound_ticket(state).await?
            }
            _ => None,
        };

        let message = Message::customer(
            phone,
            bound.as_ref().map(|ticket| ticket.id.clone()),
            &inbound.event.transcript(),
            inbound.event.message_type(),
            inbound.external_id.clone(),
        );
        let Some(message) = self.repo.insert_message(&message).await? else {
            info!(
                phone,
                external_id = ?inbound.external_id,
                "duplicate inbound message skipped"
            );
            return Ok(EngineOutput {
                duplicate: true,
                ..EngineOutput::default()
            });
        };
        debug!(phone, text = %message.text, "inbound customer message");

        if inbound.event == InboundEvent::CloseCommand {
            return self.close_conversation(phone, stored).await;
        }

        let state = match stored {
            Some(state) => state,
            None => return self.greet(phone).await,
        };
        let current = Current {
            state,
            bound,
            message,
        };

        match current.state.step {
            Step::Idle | Step::Closed => self.greet(phone).await,
            Step::TicketSelection => self.on_ticket_selection(phone, &inbound.event).await,
            Step::NewTicketPrompt => self.on_new_ticket_prompt(phone, &inbound.event).await,
            Step::TypeSelection => self.on_type_selection(phone, &inbound.event).await,
            Step::FuelSubtypeSelection => self.on_fuel_subtype(phone, &inbound.event).await,
            Step::FormFilling | Step::TemplateFormPending => {
                self.on_form_input(phone, &current.state, &inbound.event).await
            }
            Step::BoundToTicket => self.on_bound_message(phone, current).await,
        }
    }

    /// The bound ticket, or `None` when it was closed or deleted underneath
    /// the conversation.
    async fn live_bound_ticket(
        &self,
        state: &ConversationState,
    ) -> Result<Option<Ticket>, DeskError> {
        let Some(ticket_id) = state.bound_ticket_id.as_deref() else {
            return Ok(None);
        };
        let ticket = self.repo.get_ticket(ticket_id).await?;
        Ok(ticket.filter(|ticket| ticket.status.is_open()))
    }

    /// Entry point for a conversation with no usable state: offer the
    /// customer's open tickets, or a new one.
    async fn greet(&self, phone: &str) -> Result<EngineOutput, DeskError> {
        self.repo.find_or_create_customer(phone, None).await?;
        let open = self.repo.open_tickets_for_phone(phone).await?;
        let fresh = StatePatch::default()
            .with_ticket_type(None)
            .with_form_data(FormData::new())
            .with_bound_ticket(None);

        if open.is_empty() {
            let state = self
                .conversations
                .set(
                    phone,
                    StatePatch {
                        step: Some(Step::NewTicketPrompt),
                        ..fresh
                    },
                )
                .await?;
            return Ok(EngineOutput::default()
                .prompt(prompting::new_ticket_offer())
                .with_state(Some(state)));
        }

        let state = self
            .conversations
            .set(
                phone,
                StatePatch {
                    step: Some(Step::TicketSelection),
                    ..fresh
                },
            )
            .await?;
        Ok(EngineOutput::default()
            .prompt(prompting::ticket_selection(&open))
            .with_state(Some(state)))
    }

    async fn close_conversation(
        &self,
        phone: &str,
        stored: Option<ConversationState>,
    ) -> Result<EngineOutput, DeskError> {
        let bound_ticket = stored.as_ref().and_then(|s| s.bound_ticket_id.clone());
        let Some(ticket_id) = bound_ticket else {
            return Ok(EngineOutput::default()
                .prompt(prompting::no_active_conversation())
                .with_state(stored));
        };

        let state = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::Closed)
                    .with_bound_ticket(None)
                    .with_ticket_type(None)
                    .with_form_data(FormData::new()),
            )
            .await?;
        info!(phone, ticket_id = %ticket_id, "customer closed conversation");
        Ok(EngineOutput::default()
            .prompt(prompting::conversation_ended())
            .effect(SideEffect::ConversationEnded {
                phone: phone.to_string(),
            })
            .with_state(Some(state)))
    }

    async fn on_ticket_selection(
        &self,
        phone: &str,
        event: &InboundEvent,
    ) -> Result<EngineOutput, DeskError> {
        let open = self.repo.open_tickets_for_phone(phone).await?;
        match selection::resolve_ticket_choice(event, &open) {
            Some(TicketChoice::CreateNew) => self.offer_categories(phone).await,
            Some(TicketChoice::Existing(ticket_id)) => {
                let Some(ticket) = open.into_iter().find(|t| t.id == ticket_id) else {
                    return Err(DeskError::NotFound(format!("ticket {ticket_id}")));
                };
                self.bind(phone, ticket).await
            }
            None if open.is_empty() => self.greet(phone).await,
            None => Ok(EngineOutput::default()
                .prompt(prompting::invalid_selection(
                    "pick one of your tickets or create a new one",
                ))
                .prompt(prompting::ticket_selection(&open))),
        }
    }

    async fn on_new_ticket_prompt(
        &self,
        phone: &str,
        event: &InboundEvent,
    ) -> Result<EngineOutput, DeskError> {
        match selection::resolve_answer(event) {
            Some(Answer::Yes) => self.offer_categories(phone).await,
            Some(Answer::No) => {
                self.conversations.clear(phone).await?;
                info!(phone, "customer declined to open a ticket");
                Ok(EngineOutput::default().prompt(prompting::declined()))
            }
            None => Ok(EngineOutput::default()
                .prompt(prompting::invalid_selection("answer yes or no"))
                .prompt(prompting::new_ticket_offer())),
        }
    }

    async fn offer_categories(&self, phone: &str) -> Result<EngineOutput, DeskError> {
        let state = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::TypeSelection)
                    .with_ticket_type(None)
                    .with_form_data(FormData::new()),
            )
            .await?;
        Ok(EngineOutput::default()
            .prompt(prompting::category_menu())
            .with_state(Some(state)))
    }

    async fn on_type_selection(
        &self,
        phone: &str,
        event: &InboundEvent,
    ) -> Result<EngineOutput, DeskError> {
        let Some(category) = selection::resolve_category(event) else {
            return Ok(EngineOutput::default()
                .prompt(prompting::invalid_selection("choose a ticket type from the list"))
                .prompt(prompting::category_menu()));
        };
        info!(phone, category = %category, "ticket type selected");

        if category == Category::FuelRequest {
            let state = self
                .conversations
                .set(
                    phone,
                    StatePatch::step(Step::FuelSubtypeSelection)
                        .with_ticket_type(Some(category))
                        .with_form_data(FormData::new()),
                )
                .await?;
            return Ok(EngineOutput::default()
                .prompt(prompting::fuel_subtype_menu())
                .with_state(Some(state)));
        }
        self.begin_form(phone, category, FormData::new()).await
    }

    async fn on_fuel_subtype(
        &self,
        phone: &str,
        event: &InboundEvent,
    ) -> Result<EngineOutput, DeskError> {
        let Some(fuel) = selection::resolve_fuel_type(event) else {
            return Ok(EngineOutput::default()
                .prompt(prompting::invalid_selection("choose by amount or by quantity"))
                .prompt(prompting::fuel_subtype_menu()));
        };
        let mut answers = FormData::new();
        answers.insert("fuel_type", FormValue::Text(fuel.as_str().to_string()));
        self.begin_form(phone, Category::FuelRequest, answers).await
    }

    /// Dispatches the template form when one is configured, otherwise asks
    /// for the first required field.
    async fn begin_form(
        &self,
        phone: &str,
        category: Category,
        answers: FormData,
    ) -> Result<EngineOutput, DeskError> {
        if let Some(template) = &self.template_form {
            let state = self
                .conversations
                .set(
                    phone,
                    StatePatch::step(Step::TemplateFormPending)
                        .with_ticket_type(Some(category))
                        .with_form_data(answers),
                )
                .await?;
            return Ok(EngineOutput::default()
                .prompt(prompting::template_form(template))
                .with_state(Some(state)));
        }

        let Some(field) = next_missing_required_field(category, &answers) else {
            return self.finish(phone, category, answers).await;
        };
        let prompt = prompting::field_prompt(category, &answers, field, None);
        let state = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::FormFilling)
                    .with_ticket_type(Some(category))
                    .with_form_data(answers),
            )
            .await?;
        Ok(EngineOutput::default().prompt(prompt).with_state(Some(state)))
    }

    async fn on_form_input(
        &self,
        phone: &str,
        state: &ConversationState,
        event: &InboundEvent,
    ) -> Result<EngineOutput, DeskError> {
        let submitted_category = match event {
            InboundEvent::TemplateFormSubmitted { category, .. } => *category,
            _ => None,
        };
        let Some(category) = state.ticket_type.or(submitted_category) else {
            warn!(phone, step = %state.step, "form state without ticket type, restarting type selection");
            return self.offer_categories(phone).await;
        };
        let answers = &state.form_data;

        if let InboundEvent::TemplateFormSubmitted { raw_fields, .. } = event {
            return self
                .on_template_submission(phone, category, answers, raw_fields)
                .await;
        }

        let text = event.transcript();
        if form::is_bulk(category, answers, &text) {
            return match form::apply_bulk(category, answers, &text) {
                Ok(complete) => self.finish(phone, category, complete).await,
                Err(rejection) => {
                    if let BulkRejection::Invalid(problems) = &rejection {
                        debug!(phone, problems = problems.len(), "bulk entry rejected");
                    }
                    Ok(EngineOutput::default()
                        .prompt(prompting::bulk_rejected(category, answers, &rejection)))
                }
            };
        }

        match form::apply_single(category, answers, &text) {
            SingleOutcome::Complete => self.finish(phone, category, answers.clone()).await,
            SingleOutcome::Rejected(rejection) => {
                let field = find_field(category, answers.fuel_type(), rejection.field);
                let prompt = match field {
                    Some(field) => prompting::field_prompt(category, answers, field, Some(&rejection)),
                    None => prompting::invalid_selection(&rejection.to_string()),
                };
                Ok(EngineOutput::default().prompt(prompt))
            }
            SingleOutcome::Accepted {
                answers: updated,
                next: None,
            } => self.finish(phone, category, updated).await,
            SingleOutcome::Accepted {
                answers: updated,
                next: Some(next),
            } => {
                let prompt = prompting::field_prompt(category, &updated, next, None);
                let state = self
                    .conversations
                    .set(
                        phone,
                        StatePatch::step(Step::FormFilling).with_form_data(updated),
                    )
                    .await?;
                Ok(EngineOutput::default().prompt(prompt).with_state(Some(state)))
            }
        }
    }

    /// Validates every recognised value. Anything still missing afterwards is
    /// collected one field at a time.
    async fn on_template_submission(
        &self,
        phone: &str,
        category: Category,
        answers: &FormData,
        raw_fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<EngineOutput, DeskError> {
        let submission = template_form::normalize_submission(raw_fields);
        if !submission.unrecognized.is_empty() {
            debug!(phone, keys = ?submission.unrecognized, "template form keys not recognised");
        }

        let mut merged = answers.clone();
        if category == Category::FuelRequest && merged.fuel_type().is_none() {
            if let Some(fuel) = submission.fuel_type {
                merged.insert("fuel_type", FormValue::Text(fuel.as_str().to_string()));
            }
        }
        let fuel = merged.fuel_type();

        let mut first_rejection = None;
        for (name, raw) in &submission.fields {
            let Some(field) = find_field(category, fuel, name) else {
                continue;
            };
            if raw.trim().is_empty() && !field.required {
                continue;
            }
            match validate(field, raw) {
                Ok(value) => merged.insert(field.name, value),
                Err(rejection) => {
                    first_rejection.get_or_insert(rejection);
                }
            }
        }

        let Some(missing) = next_missing_required_field(category, &merged) else {
            return self.finish(phone, category, merged).await;
        };
        let rejection = first_rejection.filter(|r| r.field == missing.name);
        let prompt = prompting::field_prompt(category, &merged, missing, rejection.as_ref());
        let state = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::FormFilling)
                    .with_ticket_type(Some(category))
                    .with_form_data(merged),
            )
            .await?;
        info!(phone, missing = missing.name, "template form incomplete, collecting remaining fields");
        Ok(EngineOutput::default().prompt(prompt).with_state(Some(state)))
    }

    /// Creates the ticket, then binds the conversation to it. If the bind
    /// write fails the ticket is deleted again, so a retry cannot duplicate it.
    async fn finish(
        &self,
        phone: &str,
        category: Category,
        answers: FormData,
    ) -> Result<EngineOutput, DeskError> {
        let ticket = materializer::create_ticket(self.repo.as_ref(), phone, category, &answers).await?;
        let bound = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::BoundToTicket)
                    .with_bound_ticket(Some(ticket.id.clone()))
                    .with_ticket_type(None)
                    .with_form_data(FormData::new()),
            )
            .await;
        let state = match bound {
            Ok(state) => state,
            Err(err) => {
                if let Err(rollback) = self.repo.delete_ticket(&ticket.id).await {
                    error!(
                        phone,
                        ticket_id = %ticket.id,
                        error = %rollback,
                        "failed to remove unbound ticket"
                    );
                }
                return Err(err.into());
            }
        };
        Ok(EngineOutput::default()
            .prompt(prompting::ticket_created(&ticket))
            .effect(SideEffect::ConversationBound {
                phone: phone.to_string(),
                ticket_id: ticket.id.clone(),
            })
            .effect(SideEffect::TicketCreated(ticket))
            .with_state(Some(state)))
    }

    async fn bind(&self, phone: &str, ticket: Ticket) -> Result<EngineOutput, DeskError> {
        let state = self
            .conversations
            .set(
                phone,
                StatePatch::step(Step::BoundToTicket)
                    .with_bound_ticket(Some(ticket.id.clone()))
                    .with_ticket_type(None)
                    .with_form_data(FormData::new()),
            )
            .await?;
        info!(phone, ticket_id = %ticket.id, "conversation bound to existing ticket");
        Ok(EngineOutput::default()
            .prompt(prompting::bound_to_ticket(&ticket))
            .effect(SideEffect::ConversationBound {
                phone: phone.to_string(),
                ticket_id: ticket.id,
            })
            .with_state(Some(state)))
    }

    /// Appends to the bound ticket. A ticket that is no longer open sends the
    /// customer back to the greeting.
    async fn on_bound_message(
        &self,
        phone: &str,
        current: Current,
    ) -> Result<EngineOutput, DeskError> {
        let Some(mut ticket) = current.bound else {
            info!(phone, "bound ticket closed or missing, restarting conversation");
            return self.greet(phone).await;
        };
        if ticket.status == TicketStatus::PendingCustomer {
            if let Some(updated) = self
                .repo
                .update_ticket_status(&ticket.id, TicketStatus::InProgress)
                .await?
            {
                ticket = updated;
            }
        }
        Ok(EngineOutput::default()
            .effect(SideEffect::CustomerMessage {
                ticket,
                message: current.message,
            })
            .with_state(Some(current.state)))
    }

    /// Moves every conversation attached to `ticket` to `CLOSED`, looking up
    /// both the customer's own record and any record bound by ticket id.
    /// Each record is rewritten under its phone lock. Returns the affected
    /// phone numbers.
    pub async fn release_ticket(&self, ticket: &Ticket) -> Result<Vec<String>, DeskError> {
        let mut candidates = vec![ticket.customer_phone.clone()];
        for phone in self.conversations.phones_bound_to(&ticket.id).await? {
            if !candidates.contains(&phone) {
                candidates.push(phone);
            }
        }

        let mut released = Vec::new();
        for phone in candidates {
            if self.release_phone(&phone, &ticket.id).await? {
                released.push(phone);
            }
        }
        if !released.is_empty() {
            info!(ticket_id = %ticket.id, phones = ?released, "released conversations bound to closed ticket");
        }
        Ok(released)
    }

    async fn release_phone(&self, phone: &str, ticket_id: &str) -> Result<bool, DeskError> {
        let _guard = self.locks.lock(phone).await;
        let Some(state) = self.conversations.get(phone).await? else {
            return Ok(false);
        };
        if state.bound_ticket_id.as_deref() != Some(ticket_id) {
            return Ok(false);
        }
        self.conversations
            .set(
                phone,
                StatePatch::step(Step::Closed)
                    .with_bound_ticket(None)
                    .with_ticket_type(None)
                    .with_form_data(FormData::new()),
            )
            .await?;
        Ok(true)
    }
}
