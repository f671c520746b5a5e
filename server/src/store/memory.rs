use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConversationStore, DeskRepository};
use crate::error::StoreError;
use crate::types::{
    now_iso, Agent, Category, ConversationState, Customer, FormData, Message, NewTicket,
    StatePatch, Step, Ticket, TicketStatus,
};

/// Row shape mirrors `conversation_states`: form data is kept in its stored
/// text form so reads go through the same normalization as Postgres.
#[derive(Debug, Clone)]
struct StateRow {
    step: String,
    ticket_type: Option<String>,
    form_data: String,
    bound_ticket_id: Option<String>,
    updated_at: String,
}

impl StateRow {
    fn hydrate(&self, phone: &str) -> ConversationState {
        ConversationState {
            phone_number: phone.to_string(),
            step: Step::parse(&self.step),
            ticket_type: self.ticket_type.as_deref().and_then(Category::parse),
            form_data: FormData::from_stored(&self.form_data),
            bound_ticket_id: self.bound_ticket_id.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    fn from_state(state: &ConversationState) -> Self {
        Self {
            step: state.step.as_str().to_string(),
            ticket_type: state.ticket_type.map(|c| c.as_str().to_string()),
            form_data: state.form_data.to_stored(),
            bound_ticket_id: state.bound_ticket_id.clone(),
            updated_at: state.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct TicketRow {
    ticket: NewTicket,
    assigned_agent_id: Option<String>,
    updated_at: String,
}

/// Operations that can be told to fail, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    StateWrite,
    TicketInsertDuplicate,
    TicketInsert,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, StateRow>,
    customers: HashMap<String, Customer>,
    agents: HashMap<String, Agent>,
    tickets: Vec<TicketRow>,
    messages: Vec<Message>,
    failures: HashMap<FailPoint, usize>,
}

impl Inner {
    fn take_failure(&mut self, point: FailPoint) -> bool {
        match self.failures.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn hydrate(&self, row: &TicketRow) -> Ticket {
        let customer = self
            .customers
            .values()
            .find(|c| c.id == row.ticket.customer_id);
        let agent = row
            .assigned_agent_id
            .as_ref()
            .and_then(|id| self.agents.get(id));
        let t = &row.ticket;
        Ticket {
            id: t.id.clone(),
            ticket_number: t.ticket_number.clone(),
            customer_id: t.customer_id.clone(),
            customer_phone: customer.map(|c| c.phone_number.clone()).unwrap_or_default(),
            customer_name: customer.and_then(|c| c.name.clone()),
            assigned_agent_id: row.assigned_agent_id.clone(),
            assigned_agent_name: agent.map(|a| a.name.clone()),
            status: t.status,
            priority: t.priority.clone(),
            issue_type: t.issue_type,
            fuel_type: t.fuel_type,
            vehicle_number: t.vehicle_number.clone(),
            driver_number: t.driver_number.clone(),
            location: t.location.clone(),
            request_date: t.request_date.clone(),
            request_time: t.request_time.clone(),
            amount: t.amount,
            quantity: t.quantity,
            upi_id: t.upi_id.clone(),
            comment: t.comment.clone(),
            created_at: t.created_at.clone(),
            updated_at: row.updated_at.clone(),
        }
    }

    fn ticket_mut(&mut self, id: &str) -> Option<&mut TicketRow> {
        self.tickets.iter_mut().find(|row| row.ticket.id == id)
    }
}

/// In-process backend used by the demo mode and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls through `point` fail.
    pub async fn fail_next(&self, point: FailPoint, times: usize) {
        self.inner.lock().await.failures.insert(point, times);
    }

    /// Writes a state row exactly as given, bypassing normalization.
    pub async fn put_raw_state(&self, phone: &str, step: &str, form_data: &str) {
        self.inner.lock().await.states.insert(
            phone.to_string(),
            StateRow {
                step: step.to_string(),
                ticket_type: None,
                form_data: form_data.to_string(),
                bound_ticket_id: None,
                updated_at: now_iso(),
            },
        );
    }

    pub async fn customer_count(&self) -> usize {
        self.inner.lock().await.customers.len()
    }

    pub async fn ticket_count(&self) -> usize {
        self.inner.lock().await.tickets.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, phone: &str) -> Result<Option<ConversationState>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.states.get(phone).map(|row| row.hydrate(phone)))
    }

    async fn set(&self, phone: &str, patch: StatePatch) -> Result<ConversationState, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.take_failure(FailPoint::StateWrite) {
            return Err(StoreError::Backend("state write failed".to_string()));
        }
        let mut state = inner
            .states
            .get(phone)
            .map(|row| row.hydrate(phone))
            .unwrap_or_else(|| ConversationState::idle(phone));
        state.apply(&patch);
        inner
            .states
            .insert(phone.to_string(), StateRow::from_state(&state));
        Ok(state)
    }

    async fn clear(&self, phone: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.take_failure(FailPoint::StateWrite) {
            return Err(StoreError::Backend("state write failed".to_string()));
        }
        inner.states.remove(phone);
        Ok(())
    }

    async fn phones_bound_to(&self, ticket_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut phones = inner
            .states
            .iter()
            .filter(|(_, row)| row.bound_ticket_id.as_deref() == Some(ticket_id))
            .map(|(phone, _)| phone.clone())
            .collect::<Vec<_>>();
        phones.sort();
        Ok(phones)
    }
}

#[async_trait]
impl DeskRepository for MemoryStore {
    async fn find_or_create_customer(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Customer, StoreError> {
        let mut inner = self.inner.lock().await;
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(existing) = inner.customers.get_mut(phone) {
            if let (Some(name), None) = (name, existing.name.as_ref()) {
                existing.name = Some(name.to_string());
                existing.updated_at = now_iso();
            }
            return Ok(existing.clone());
        }
        let now = now_iso();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            phone_number: phone.to_string(),
            name: name.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        };
        inner.customers.insert(phone.to_string(), customer.clone());
        Ok(customer)
    }

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self.inner.lock().await.customers.get(phone).cloned())
    }

    async fn create_agent(&self, name: &str) -> Result<Agent, StoreError> {
        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: now_iso(),
        };
        self.inner
            .lock()
            .await
            .agents
            .insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.inner.lock().await.agents.get(id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let mut agents = self
            .inner
            .lock()
            .await
            .agents
            .values()
            .cloned()
            .collect::<Vec<_>>();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.take_failure(FailPoint::TicketInsert) {
            return Err(StoreError::Backend("ticket insert failed".to_string()));
        }
        if inner.take_failure(FailPoint::TicketInsertDuplicate)
            || inner
                .tickets
                .iter()
                .any(|row| row.ticket.ticket_number == ticket.ticket_number)
        {
            return Err(StoreError::UniqueViolation(
                "tickets_ticket_number_key".to_string(),
            ));
        }
        inner.tickets.push(TicketRow {
            ticket: ticket.clone(),
            assigned_agent_id: None,
            updated_at: ticket.created_at.clone(),
        });
        Ok(())
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .tickets
            .retain(|row| row.ticket.id != id);
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tickets
            .iter()
            .find(|row| row.ticket.id == id)
            .map(|row| inner.hydrate(row)))
    }

    async fn open_tickets_for_phone(&self, phone: &str) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(customer) = inner.customers.get(phone) else {
            return Ok(Vec::new());
        };
        let mut tickets = inner
            .tickets
            .iter()
            .filter(|row| row.ticket.customer_id == customer.id && row.ticket.status.is_open())
            .map(|row| inner.hydrate(row))
            .collect::<Vec<_>>();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>, StoreError> {
        let inner = self.inner.lock().await;
        let mut tickets = inner
            .tickets
            .iter()
            .filter(|row| status.map_or(true, |s| row.ticket.status == s))
            .map(|row| inner.hydrate(row))
            .collect::<Vec<_>>();
        tickets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tickets)
    }

    async fn update_ticket_status(
        &self,
        id: &str,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.ticket_mut(id) else {
            return Ok(None);
        };
        row.ticket.status = status;
        row.updated_at = now_iso();
        let row = row.clone();
        Ok(Some(inner.hydrate(&row)))
    }

    async fn assign_ticket(&self, id: &str, agent_id: &str) -> Result<Option<Ticket>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(row) = inner.ticket_mut(id) else {
            return Ok(None);
        };
        row.assigned_agent_id = Some(agent_id.to_string());
        if row.ticket.status == TicketStatus::Open {
            row.ticket.status = TicketStatus::InProgress;
        }
        row.updated_at = now_iso();
        let row = row.clone();
        Ok(Some(inner.hydrate(&row)))
    }

    async fn insert_message(&self, message: &Message) -> Result<Option<Message>, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(external_id) = message.external_message_id.as_deref() {
            if inner
                .messages
                .iter()
                .any(|m| m.external_message_id.as_deref() == Some(external_id))
            {
                return Ok(None);
            }
        }
        inner.messages.push(message.clone());
        if let Some(ticket_id) = message.ticket_id.as_deref() {
            if let Some(row) = inner.ticket_mut(ticket_id) {
                row.updated_at = message.created_at.clone();
            }
        }
        Ok(Some(message.clone()))
    }

    async fn messages_for_ticket(&self, ticket_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.ticket_id.as_deref() == Some(ticket_id))
            .cloned()
            .collect())
    }
}
