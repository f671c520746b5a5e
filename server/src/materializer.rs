//! Turns a completed answer set into a customer + ticket.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DeskError, StoreError};
use crate::store::DeskRepository;
use crate::types::{now_iso, Category, FormData, NewTicket, Ticket, TicketStatus};

const TICKET_PREFIX: &str = "TKT";

/// `TKT-<last 6 digits of epoch millis>-<4 random characters>`.
pub fn generate_ticket_number() -> String {
    let millis = Utc::now().timestamp_millis().to_string();
    let short = &millis[millis.len().saturating_sub(6)..];
    let suffix = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect::<String>();
    format!("{TICKET_PREFIX}-{short}-{suffix}")
}

fn new_ticket(customer_id: &str, category: Category, answers: &FormData) -> NewTicket {
    NewTicket {
        id: Uuid::new_v4().to_string(),
        ticket_number: generate_ticket_number(),
        customer_id: customer_id.to_string(),
        status: TicketStatus::Open,
        priority: "medium".to_string(),
        issue_type: category,
        fuel_type: if category == Category::FuelRequest {
            answers.fuel_type()
        } else {
            None
        },
        vehicle_number: answers.text("vehicle_number"),
        driver_number: answers.text("driver_number"),
        location: answers.text("location"),
        request_date: answers.text("request_date"),
        request_time: answers.text("request_time"),
        amount: answers.number("amount"),
        quantity: answers.number("quantity"),
        upi_id: answers.text("upi_id"),
        comment: answers.text("comment"),
        created_at: now_iso(),
    }
}

/// Creates the ticket and returns it re-read with display names joined in.
///
/// A ticket-number collision is retried once with a fresh number; any other
/// failure aborts without leaving a ticket behind.
pub async fn create_ticket(
    repo: &dyn DeskRepository,
    phone: &str,
    category: Category,
    answers: &FormData,
) -> Result<Ticket, DeskError> {
    let customer = repo.find_or_create_customer(phone, None).await?;

    let mut ticket = new_ticket(&customer.id, category, answers);
    match repo.insert_ticket(&ticket).await {
        Ok(()) => {}
        Err(StoreError::UniqueViolation(constraint)) => {
            warn!(
                phone,
                ticket_number = %ticket.ticket_number,
                constraint = %constraint,
                "ticket number collision, retrying once"
            );
            ticket.ticket_number = generate_ticket_number();
            repo.insert_ticket(&ticket).await?;
        }
        Err(err) => return Err(err.into()),
    }

    let created = repo
        .get_ticket(&ticket.id)
        .await?
        .ok_or_else(|| DeskError::NotFound(format!("ticket {}", ticket.id)))?;
    info!(
        phone,
        ticket_id = %created.id,
        ticket_number = %created.ticket_number,
        issue_type = %category,
        "ticket created"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FailPoint, MemoryStore};
    use crate::types::{FormValue, FuelType};

    fn lock_open_answers() -> FormData {
        [
            ("vehicle_number", "ABC123"),
            ("driver_number", "DRV001"),
            ("location", "Warsaw"),
            ("comment", "urgent"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FormValue::Text(v.to_string())))
        .collect()
    }

    #[test]
    fn ticket_numbers_have_prefix_and_differ() {
        let a = generate_ticket_number();
        let b = generate_ticket_number();
        assert!(a.starts_with("TKT-"));
        assert_eq!(a.len(), "TKT-123456-ABCD".len());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn creates_open_medium_ticket_with_columns() {
        let store = MemoryStore::new();
        let ticket = create_ticket(&store, "4811", Category::LockOpen, &lock_open_answers())
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, "medium");
        assert_eq!(ticket.vehicle_number.as_deref(), Some("ABC123"));
        assert_eq!(ticket.driver_number.as_deref(), Some("DRV001"));
        assert_eq!(ticket.location.as_deref(), Some("Warsaw"));
        assert_eq!(ticket.comment.as_deref(), Some("urgent"));
        assert_eq!(ticket.customer_phone, "4811");
        assert!(ticket.amount.is_none());
        assert!(ticket.upi_id.is_none());
    }

    #[tokio::test]
    async fn fuel_subtype_and_numbers_are_carried() {
        let store = MemoryStore::new();
        let mut answers = FormData::new();
        answers.insert("fuel_type", FormValue::Text(FuelType::ByQuantity.as_str().into()));
        answers.insert("vehicle_number", FormValue::Text("KA01".into()));
        answers.insert("driver_number", FormValue::Text("D1".into()));
        answers.insert("quantity", FormValue::Number(40.0));
        let ticket = create_ticket(&store, "1", Category::FuelRequest, &answers)
            .await
            .unwrap();
        assert_eq!(ticket.fuel_type, Some(FuelType::ByQuantity));
        assert_eq!(ticket.quantity, Some(40.0));
    }

    #[tokio::test]
    async fn retries_once_on_ticket_number_collision() {
        let store = MemoryStore::new();
        store.fail_next(FailPoint::TicketInsertDuplicate, 1).await;
        let ticket = create_ticket(&store, "1", Category::Other, &lock_open_answers()).await;
        assert!(ticket.is_ok());
        assert_eq!(store.ticket_count().await, 1);
    }

    #[tokio::test]
    async fn second_collision_is_an_error() {
        let store = MemoryStore::new();
        store.fail_next(FailPoint::TicketInsertDuplicate, 2).await;
        let result = create_ticket(&store, "1", Category::Other, &lock_open_answers()).await;
        assert!(matches!(
            result,
            Err(DeskError::Storage(StoreError::UniqueViolation(_)))
        ));
        assert_eq!(store.ticket_count().await, 0);
    }

    #[tokio::test]
    async fn reuses_existing_customer() {
        let store = MemoryStore::new();
        let first = create_ticket(&store, "7", Category::Other, &lock_open_answers())
            .await
            .unwrap();
        let second = create_ticket(&store, "7", Category::Other, &lock_open_answers())
            .await
            .unwrap();
        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(store.customer_count().await, 1);
    }
}
