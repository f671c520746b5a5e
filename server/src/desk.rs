//! Agent-side ticket actions shared by the HTTP API and the live channel.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::engine::ConversationEngine;
use crate::error::DeskError;
use crate::outbound::{deliver, Messenger};
use crate::prompting;
use crate::realtime::{customer_channel, ticket_channel, Publisher, AGENTS_CHANNEL};
use crate::store::DeskRepository;
use crate::types::{Message, Ticket, TicketStatus};

#[derive(Clone)]
pub struct DeskService {
    repo: Arc<dyn DeskRepository>,
    engine: Arc<ConversationEngine>,
    messenger: Arc<dyn Messenger>,
    publisher: Arc<dyn Publisher>,
}

impl DeskService {
    pub fn new(
        repo: Arc<dyn DeskRepository>,
        engine: Arc<ConversationEngine>,
        messenger: Arc<dyn Messenger>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            repo,
            engine,
            messenger,
            publisher,
        }
    }

    async fn ticket(&self, ticket_id: &str) -> Result<Ticket, DeskError> {
        self.repo
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))
    }

    async fn announce(&self, ticket: &Ticket) {
        let payload = json!({ "ticket": ticket });
        self.publisher
            .publish(AGENTS_CHANNEL, "ticketUpdated", payload.clone())
            .await;
        self.publisher
            .publish(&ticket_channel(&ticket.id), "ticketUpdated", payload)
            .await;
    }

    pub async fn assign(&self, ticket_id: &str, agent_id: &str) -> Result<Ticket, DeskError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status == TicketStatus::Closed {
            return Err(DeskError::BadRequest(format!(
                "ticket {} is closed",
                ticket.ticket_number
            )));
        }
        if self.repo.get_agent(agent_id).await?.is_none() {
            return Err(DeskError::NotFound(format!("agent {agent_id}")));
        }
        let ticket = self
            .repo
            .assign_ticket(ticket_id, agent_id)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))?;
        info!(ticket_id, agent_id, "ticket assigned");
        self.announce(&ticket).await;
        Ok(ticket)
    }

    /// Status change; moving to `closed` runs the full close flow.
    pub async fn set_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> Result<Ticket, DeskError> {
        if status == TicketStatus::Closed {
            return self.close(ticket_id).await;
        }
        self.ticket(ticket_id).await?;
        let ticket = self
            .repo
            .update_ticket_status(ticket_id, status)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))?;
        info!(ticket_id, status = status.as_str(), "ticket status changed");
        self.announce(&ticket).await;
        Ok(ticket)
    }

    /// Releases every conversation bound to the ticket, then closes it. The
    /// status only changes once the release succeeded, so a failed close is
    /// retried in full and the customer is told exactly once. Closing an
    /// already closed ticket only repeats the release.
    pub async fn close(&self, ticket_id: &str) -> Result<Ticket, DeskError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status == TicketStatus::Closed {
            self.engine.release_ticket(&ticket).await?;
            return Ok(ticket);
        }

        let released = self.engine.release_ticket(&ticket).await?;
        let ticket = self
            .repo
            .update_ticket_status(ticket_id, TicketStatus::Closed)
            .await?
            .ok_or_else(|| DeskError::NotFound(format!("ticket {ticket_id}")))?;
        info!(
            ticket_id,
            ticket_number = %ticket.ticket_number,
            released = released.len(),
            "ticket closed"
        );

        let notice = prompting::ticket_closed(&ticket);
        if let Err(err) = deliver(self.messenger.as_ref(), &ticket.customer_phone, &notice).await {
            warn!(ticket_id, error = %err, "failed to notify customer of closed ticket");
        }
        self.publisher
            .publish(
                &customer_channel(&ticket.customer_phone),
                "bot:prompt",
                json!(notice),
            )
            .await;
        self.announce(&ticket).await;
        Ok(ticket)
    }

    /// Stores the reply, delivers it to the customer and marks the ticket as
    /// waiting on the customer.
    pub async fn agent_reply(
        &self,
        ticket_id: &str,
        agent_id: Option<String>,
        text: &str,
    ) -> Result<Message, DeskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DeskError::Validation {
                field: "text".to_string(),
                reason: "reply text is required".to_string(),
            });
        }
        let ticket = self.ticket(ticket_id).await?;
        if ticket.status == TicketStatus::Closed {
            return Err(DeskError::BadRequest(format!(
                "ticket {} is closed",
                ticket.ticket_number
            )));
        }

        let message = Message::agent(&ticket, agent_id, text);
        let message = self.repo.insert_message(&message).await?.unwrap_or(message);

        if let Err(err) = self.messenger.send_text(&ticket.customer_phone, text).await {
            warn!(ticket_id, error = %err, "failed to deliver agent reply");
        }
        self.publisher
            .publish(
                &customer_channel(&ticket.customer_phone),
                "agent:reply",
                json!({ "ticketId": ticket.id, "message": message }),
            )
            .await;

        let ticket = if matches!(ticket.status, TicketStatus::Open | TicketStatus::InProgress) {
            self.repo
                .update_ticket_status(&ticket.id, TicketStatus::PendingCustomer)
                .await?
                .unwrap_or(ticket)
        } else {
            ticket
        };
        self.announce(&ticket).await;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Inbound, InboundEvent, Prompt};
    use crate::outbound::RecordingMessenger;
    use crate::realtime::Realtime;
    use crate::store::{ConversationStore, FailPoint, MemoryStore};
    use crate::types::Step;

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: Arc<ConversationEngine>,
        messenger: Arc<RecordingMessenger>,
        desk: DeskService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(ConversationEngine::new(store.clone(), store.clone(), None));
        let messenger = Arc::new(RecordingMessenger::new());
        let desk = DeskService::new(
            store.clone(),
            engine.clone(),
            messenger.clone(),
            Arc::new(Realtime::new()),
        );
        Fixture {
            store,
            engine,
            messenger,
            desk,
        }
    }

    async fn bound_ticket(f: &Fixture, phone: &str) -> Ticket {
        for event in [
            InboundEvent::from_text("hi"),
            InboundEvent::from_text("yes"),
            InboundEvent::selection(Some("type_lock_open"), "Lock Open"),
            InboundEvent::from_text("ABC123, DRV001, Warsaw"),
        ] {
            f.engine.handle(Inbound::new(phone, event)).await;
        }
        let state = f.store.get(phone).await.unwrap().unwrap();
        f.store
            .get_ticket(state.bound_ticket_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn close_releases_conversation_and_notifies_once() {
        let f = fixture();
        let ticket = bound_ticket(&f, "4811").await;

        f.desk.close(&ticket.id).await.unwrap();
        f.desk.close(&ticket.id).await.unwrap();

        let state = f.store.get("4811").await.unwrap().unwrap();
        assert_eq!(state.step, Step::Closed);
        assert!(state.bound_ticket_id.is_none());
        let notices = f.messenger.sent_to("4811").await;
        assert_eq!(notices, vec![prompting::ticket_closed(&f.store.get_ticket(&ticket.id).await.unwrap().unwrap())]);
    }

    #[tokio::test]
    async fn failed_release_keeps_ticket_open_and_retry_notifies() {
        let f = fixture();
        let ticket = bound_ticket(&f, "4811").await;

        f.store.fail_next(FailPoint::StateWrite, 1).await;
        assert!(f.desk.close(&ticket.id).await.is_err());
        let after_failure = f.store.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_ne!(after_failure.status, TicketStatus::Closed);
        assert!(f.messenger.sent_to("4811").await.is_empty());

        let closed = f.desk.close(&ticket.id).await.unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(
            f.messenger.sent_to("4811").await,
            vec![prompting::ticket_closed(&closed)]
        );
        let state = f.store.get("4811").await.unwrap().unwrap();
        assert_eq!(state.step, Step::Closed);
        assert!(state.bound_ticket_id.is_none());
    }

    #[tokio::test]
    async fn close_survives_delivery_failure() {
        let f = fixture();
        let ticket = bound_ticket(&f, "4811").await;
        f.messenger.fail_next(1);
        let closed = f.desk.close(&ticket.id).await.unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(
            f.store.get("4811").await.unwrap().unwrap().step,
            Step::Closed
        );
    }

    #[tokio::test]
    async fn assign_moves_to_in_progress() {
        let f = fixture();
        let ticket = bound_ticket(&f, "1").await;
        let agent = f.store.create_agent("Ada").await.unwrap();
        let assigned = f.desk.assign(&ticket.id, &agent.id).await.unwrap();
        assert_eq!(assigned.status, TicketStatus::InProgress);
        assert_eq!(assigned.assigned_agent_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn assign_unknown_agent_is_not_found() {
        let f = fixture();
        let ticket = bound_ticket(&f, "1").await;
        let err = f.desk.assign(&ticket.id, "nobody").await.unwrap_err();
        assert!(matches!(err, DeskError::NotFound(_)));
    }

    #[tokio::test]
    async fn agent_reply_is_stored_sent_and_awaits_customer() {
        let f = fixture();
        let ticket = bound_ticket(&f, "1").await;
        let message = f
            .desk
            .agent_reply(&ticket.id, Some("a-1".into()), "On my way")
            .await
            .unwrap();
        assert_eq!(message.text, "On my way");
        assert_eq!(f.messenger.sent_to("1").await, vec![Prompt::text("On my way")]);
        let ticket = f.store.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::PendingCustomer);
    }

    #[tokio::test]
    async fn blank_reply_and_closed_ticket_are_rejected() {
        let f = fixture();
        let ticket = bound_ticket(&f, "1").await;
        assert!(matches!(
            f.desk.agent_reply(&ticket.id, None, "  ").await,
            Err(DeskError::Validation { .. })
        ));
        f.desk.close(&ticket.id).await.unwrap();
        assert!(matches!(
            f.desk.agent_reply(&ticket.id, None, "hello").await,
            Err(DeskError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_ticket_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.desk.close("missing").await,
            Err(DeskError::NotFound(_))
        ));
    }
}
