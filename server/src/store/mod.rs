//! Persistence capability: conversation state plus customers, agents,
//! tickets and messages.

mod locks;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    Agent, ConversationState, Customer, Message, NewTicket, StatePatch, Step, Ticket, TicketStatus,
};

pub use locks::PhoneLocks;
pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

/// One state record per phone number, upserted in place.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, phone: &str) -> Result<Option<ConversationState>, StoreError>;

    /// Merges `patch` into the stored record (or a fresh idle one) and writes
    /// every field in a single upsert.
    async fn set(&self, phone: &str, patch: StatePatch) -> Result<ConversationState, StoreError>;

    async fn clear(&self, phone: &str) -> Result<(), StoreError>;

    async fn bind_ticket(
        &self,
        phone: &str,
        ticket_id: &str,
    ) -> Result<ConversationState, StoreError> {
        self.set(
            phone,
            StatePatch::step(Step::BoundToTicket).with_bound_ticket(Some(ticket_id.to_string())),
        )
        .await
    }

    /// Phone numbers whose record is bound to `ticket_id`, sorted.
    async fn phones_bound_to(&self, ticket_id: &str) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait DeskRepository: Send + Sync {
    /// Idempotent by phone number; concurrent callers get the same row.
    async fn find_or_create_customer(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Customer, StoreError>;

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError>;

    async fn create_agent(&self, name: &str) -> Result<Agent, StoreError>;

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError>;

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the ticket number is taken.
    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<(), StoreError>;

    /// Removes a ticket that was never handed to anyone.
    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError>;

    /// Ticket joined with customer and agent display names.
    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError>;

    async fn open_tickets_for_phone(&self, phone: &str) -> Result<Vec<Ticket>, StoreError>;

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>, StoreError>;

    async fn update_ticket_status(
        &self,
        id: &str,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError>;

    async fn assign_ticket(&self, id: &str, agent_id: &str) -> Result<Option<Ticket>, StoreError>;

    /// Appends a message. Returns `None` when a message with the same
    /// upstream id was already recorded.
    async fn insert_message(&self, message: &Message) -> Result<Option<Message>, StoreError>;

    async fn messages_for_ticket(&self, ticket_id: &str) -> Result<Vec<Message>, StoreError>;
}
