use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use super::{ConversationStore, DeskRepository};
use crate::error::StoreError;
use crate::types::{
    now_iso, Agent, Category, ConversationState, Customer, FormData, FuelType, Message, NewTicket,
    SenderType, StatePatch, Step, Ticket, TicketStatus,
};

const TICKET_SELECT: &str = "SELECT t.id, t.ticket_number, t.customer_id, t.assigned_agent_id, t.status, t.priority, \
            t.issue_type, t.fuel_type, t.vehicle_number, t.driver_number, t.location, t.request_date, \
            t.request_time, t.amount, t.quantity, t.upi_id, t.comment, t.created_at, t.updated_at, \
            c.phone_number AS customer_phone, c.name AS customer_name, a.name AS agent_name \
     FROM tickets t \
     JOIN customers c ON c.id = t.customer_id \
     LEFT JOIN agents a ON a.id = t.assigned_agent_id";

fn parse_state_row(row: &PgRow) -> ConversationState {
    ConversationState {
        phone_number: row.get("phone_number"),
        step: Step::parse(&row.get::<String, _>("step")),
        ticket_type: row
            .get::<Option<String>, _>("ticket_type")
            .as_deref()
            .and_then(Category::parse),
        form_data: FormData::from_stored(&row.get::<String, _>("form_data")),
        bound_ticket_id: row.get("bound_ticket_id"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_customer_row(row: &PgRow) -> Customer {
    Customer {
        id: row.get("id"),
        phone_number: row.get("phone_number"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_agent_row(row: &PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn parse_ticket_row(row: &PgRow) -> Ticket {
    Ticket {
        id: row.get("id"),
        ticket_number: row.get("ticket_number"),
        customer_id: row.get("customer_id"),
        customer_phone: row.get("customer_phone"),
        customer_name: row.get("customer_name"),
        assigned_agent_id: row.get("assigned_agent_id"),
        assigned_agent_name: row.get("agent_name"),
        status: TicketStatus::parse(&row.get::<String, _>("status")).unwrap_or(TicketStatus::Open),
        priority: row.get("priority"),
        issue_type: Category::parse(&row.get::<String, _>("issue_type")).unwrap_or(Category::Other),
        fuel_type: row
            .get::<Option<String>, _>("fuel_type")
            .as_deref()
            .and_then(FuelType::parse),
        vehicle_number: row.get("vehicle_number"),
        driver_number: row.get("driver_number"),
        location: row.get("location"),
        request_date: row.get("request_date"),
        request_time: row.get("request_time"),
        amount: row.get("amount"),
        quantity: row.get("quantity"),
        upi_id: row.get("upi_id"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_message_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        ticket_id: row.get("ticket_id"),
        phone_number: row.get("phone_number"),
        sender_type: SenderType::parse(&row.get::<String, _>("sender_type")),
        sender_id: row.get("sender_id"),
        text: row.get("text"),
        message_type: row.get("message_type"),
        external_message_id: row.get("external_message_id"),
        created_at: row.get("created_at"),
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn ticket_where(&self, clause: &str, value: &str) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(&format!("{TICKET_SELECT} WHERE {clause} LIMIT 1"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_ticket_row))
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn get(&self, phone: &str) -> Result<Option<ConversationState>, StoreError> {
        let row = sqlx::query(
            "SELECT phone_number, step, ticket_type, form_data, bound_ticket_id, updated_at \
             FROM conversation_states WHERE phone_number = $1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(parse_state_row))
    }

    async fn set(&self, phone: &str, patch: StatePatch) -> Result<ConversationState, StoreError> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT phone_number, step, ticket_type, form_data, bound_ticket_id, updated_at \
             FROM conversation_states WHERE phone_number = $1 FOR UPDATE",
        )
        .bind(phone)
        .fetch_optional(&mut *tx)
        .await?;

        let mut state = existing
            .as_ref()
            .map(parse_state_row)
            .unwrap_or_else(|| ConversationState::idle(phone));
        state.apply(&patch);

        sqlx::query(
            r#"
            INSERT INTO conversation_states (phone_number, step, ticket_type, form_data, bound_ticket_id, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (phone_number) DO UPDATE SET
                step = EXCLUDED.step,
                ticket_type = EXCLUDED.ticket_type,
                form_data = EXCLUDED.form_data,
                bound_ticket_id = EXCLUDED.bound_ticket_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(phone)
        .bind(state.step.as_str())
        .bind(state.ticket_type.map(|c| c.as_str()))
        .bind(state.form_data.to_stored())
        .bind(&state.bound_ticket_id)
        .bind(&state.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(state)
    }

    async fn clear(&self, phone: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversation_states WHERE phone_number = $1")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn phones_bound_to(&self, ticket_id: &str) -> Result<Vec<String>, StoreError> {
        let phones = sqlx::query_scalar::<_, String>(
            "SELECT phone_number FROM conversation_states WHERE bound_ticket_id = $1 ORDER BY phone_number",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(phones)
    }
}

#[async_trait]
impl DeskRepository for PgStore {
    async fn find_or_create_customer(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Customer, StoreError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let now = now_iso();
        sqlx::query(
            "INSERT INTO customers (id, phone_number, name, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (phone_number) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(phone)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if let Some(name) = name {
            sqlx::query(
                "UPDATE customers SET name = $1, updated_at = $2 \
                 WHERE phone_number = $3 AND (name IS NULL OR name = '')",
            )
            .bind(name)
            .bind(&now)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        }

        let row = sqlx::query(
            "SELECT id, phone_number, name, created_at, updated_at FROM customers WHERE phone_number = $1",
        )
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(parse_customer_row(&row))
    }

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            "SELECT id, phone_number, name, created_at, updated_at FROM customers WHERE phone_number = $1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(parse_customer_row))
    }

    async fn create_agent(&self, name: &str) -> Result<Agent, StoreError> {
        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: now_iso(),
        };
        sqlx::query("INSERT INTO agents (id, name, created_at) VALUES ($1,$2,$3)")
            .bind(&agent.id)
            .bind(&agent.name)
            .bind(&agent.created_at)
            .execute(&self.pool)
            .await?;
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query("SELECT id, name, created_at FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(parse_agent_row))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query("SELECT id, name, created_at FROM agents ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(parse_agent_row).collect())
    }

    async fn insert_ticket(&self, ticket: &NewTicket) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, ticket_number, customer_id, assigned_agent_id, status, priority, issue_type, fuel_type,
                vehicle_number, driver_number, location, request_date, request_time, amount, quantity,
                upi_id, comment, created_at, updated_at
            ) VALUES ($1,$2,$3,NULL,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$17)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.ticket_number)
        .bind(&ticket.customer_id)
        .bind(ticket.status.as_str())
        .bind(&ticket.priority)
        .bind(ticket.issue_type.as_str())
        .bind(ticket.fuel_type.map(|f| f.as_str()))
        .bind(&ticket.vehicle_number)
        .bind(&ticket.driver_number)
        .bind(&ticket.location)
        .bind(&ticket.request_date)
        .bind(&ticket.request_time)
        .bind(ticket.amount)
        .bind(ticket.quantity)
        .bind(&ticket.upi_id)
        .bind(&ticket.comment)
        .bind(&ticket.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, StoreError> {
        self.ticket_where("t.id = $1", id).await
    }

    async fn open_tickets_for_phone(&self, phone: &str) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query(&format!(
            "{TICKET_SELECT} WHERE c.phone_number = $1 AND t.status <> 'closed' ORDER BY t.created_at DESC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_ticket_row).collect())
    }

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "{TICKET_SELECT} WHERE t.status = $1 ORDER BY t.updated_at DESC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{TICKET_SELECT} ORDER BY t.updated_at DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(parse_ticket_row).collect())
    }

    async fn update_ticket_status(
        &self,
        id: &str,
        status: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError> {
        let updated = sqlx::query("UPDATE tickets SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(now_iso())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_ticket(id).await
    }

    async fn assign_ticket(&self, id: &str, agent_id: &str) -> Result<Option<Ticket>, StoreError> {
        let updated = sqlx::query(
            "UPDATE tickets SET assigned_agent_id = $1, \
                 status = CASE WHEN status = 'open' THEN 'in_progress' ELSE status END, \
                 updated_at = $2 \
             WHERE id = $3",
        )
        .bind(agent_id)
        .bind(now_iso())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_ticket(id).await
    }

    async fn insert_message(&self, message: &Message) -> Result<Option<Message>, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (id, ticket_id, phone_number, sender_type, sender_id, text, message_type, external_message_id, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (external_message_id) DO NOTHING
            "#,
        )
        .bind(&message.id)
        .bind(&message.ticket_id)
        .bind(&message.phone_number)
        .bind(message.sender_type.as_str())
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(&message.message_type)
        .bind(&message.external_message_id)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(None);
        }
        if let Some(ticket_id) = &message.ticket_id {
            sqlx::query("UPDATE tickets SET updated_at = $1 WHERE id = $2")
                .bind(&message.created_at)
                .bind(ticket_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(Some(message.clone()))
    }

    async fn messages_for_ticket(&self, ticket_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, ticket_id, phone_number, sender_type, sender_id, text, message_type, external_message_id, created_at \
             FROM messages WHERE ticket_id = $1 ORDER BY created_at ASC",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(parse_message_row).collect())
    }
}
