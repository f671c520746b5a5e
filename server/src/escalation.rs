//! Flags in-progress tickets whose customer has been waiting too long.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::DeskError;
use crate::store::DeskRepository;
use crate::types::{parse_iso, Message, SenderType, Ticket, TicketStatus};

pub const DEFAULT_THRESHOLD_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationCheck {
    pub ticket_id: String,
    pub ticket_number: String,
    pub needs_escalation: bool,
    /// `None` when the customer never wrote on this ticket.
    pub minutes_since_last_customer_message: Option<i64>,
}

/// Pure check over a ticket and its messages.
pub fn check_escalation(
    ticket: &Ticket,
    messages: &[Message],
    now: DateTime<Utc>,
    threshold: Duration,
) -> EscalationCheck {
    let last_customer_message = messages
        .iter()
        .filter(|m| m.sender_type == SenderType::Customer)
        .filter_map(|m| parse_iso(&m.created_at))
        .max();
    let elapsed = last_customer_message.map(|at| now - at);

    EscalationCheck {
        ticket_id: ticket.id.clone(),
        ticket_number: ticket.ticket_number.clone(),
        needs_escalation: ticket.status.is_open()
            && elapsed.is_some_and(|elapsed| elapsed >= threshold),
        minutes_since_last_customer_message: elapsed.map(|e| e.num_minutes()),
    }
}

/// Checks every `in_progress` ticket and returns the ones needing escalation.
pub async fn scan(
    repo: &dyn DeskRepository,
    threshold_minutes: i64,
    now: DateTime<Utc>,
) -> Result<Vec<EscalationCheck>, DeskError> {
    let threshold = Duration::minutes(threshold_minutes);
    let mut flagged = Vec::new();
    for ticket in repo.list_tickets(Some(TicketStatus::InProgress)).await? {
        let messages = repo.messages_for_ticket(&ticket.id).await?;
        let check = check_escalation(&ticket, &messages, now, threshold);
        if check.needs_escalation {
            flagged.push(check);
        }
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Category;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: "t-1".into(),
            ticket_number: "TKT-1".into(),
            customer_id: "c-1".into(),
            customer_phone: "4811".into(),
            customer_name: None,
            assigned_agent_id: None,
            assigned_agent_name: None,
            status,
            priority: "medium".into(),
            issue_type: Category::Other,
            fuel_type: None,
            vehicle_number: None,
            driver_number: None,
            location: None,
            request_date: None,
            request_time: None,
            amount: None,
            quantity: None,
            upi_id: None,
            comment: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn customer_message_at(at: DateTime<Utc>) -> Message {
        let mut message = Message::customer("4811", Some("t-1".into()), "hi", "text", None);
        message.created_at = at.to_rfc3339();
        message
    }

    fn five_minutes() -> Duration {
        Duration::minutes(DEFAULT_THRESHOLD_MINUTES)
    }

    #[test]
    fn four_fifty_nine_is_not_flagged() {
        let now = Utc::now();
        let messages = [customer_message_at(now - Duration::seconds(299))];
        let check = check_escalation(&ticket(TicketStatus::InProgress), &messages, now, five_minutes());
        assert!(!check.needs_escalation);
        assert_eq!(check.minutes_since_last_customer_message, Some(4));
    }

    #[test]
    fn five_minutes_exactly_is_flagged() {
        let now = Utc::now();
        let messages = [customer_message_at(now - Duration::seconds(300))];
        let check = check_escalation(&ticket(TicketStatus::InProgress), &messages, now, five_minutes());
        assert!(check.needs_escalation);
        assert_eq!(check.minutes_since_last_customer_message, Some(5));
    }

    #[test]
    fn closed_ticket_is_never_flagged() {
        let now = Utc::now();
        let messages = [customer_message_at(now - Duration::minutes(30))];
        let check = check_escalation(&ticket(TicketStatus::Closed), &messages, now, five_minutes());
        assert!(!check.needs_escalation);
    }

    #[test]
    fn latest_customer_message_counts_and_agent_messages_do_not() {
        let now = Utc::now();
        let mut agent = customer_message_at(now);
        agent.sender_type = SenderType::Agent;
        let messages = [
            customer_message_at(now - Duration::minutes(20)),
            customer_message_at(now - Duration::minutes(2)),
            agent,
        ];
        let check = check_escalation(&ticket(TicketStatus::InProgress), &messages, now, five_minutes());
        assert!(!check.needs_escalation);
        assert_eq!(check.minutes_since_last_customer_message, Some(2));
    }

    #[test]
    fn no_customer_message_is_not_flagged() {
        let check = check_escalation(&ticket(TicketStatus::InProgress), &[], Utc::now(), five_minutes());
        assert!(!check.needs_escalation);
        assert!(check.minutes_since_last_customer_message.is_none());
    }

    #[tokio::test]
    async fn scan_only_looks_at_in_progress_tickets() {
        let store = MemoryStore::new();
        let agent = store.create_agent("Ada").await.unwrap();
        let answers = [("comment".to_string(), crate::types::FormValue::Text("help".into()))]
            .into_iter()
            .collect();
        let waiting = crate::materializer::create_ticket(&store, "1", Category::Other, &answers)
            .await
            .unwrap();
        let untouched = crate::materializer::create_ticket(&store, "2", Category::Other, &answers)
            .await
            .unwrap();
        store.assign_ticket(&waiting.id, &agent.id).await.unwrap();
        for ticket in [&waiting, &untouched] {
            store
                .insert_message(&Message::customer("x", Some(ticket.id.clone()), "hi", "text", None))
                .await
                .unwrap();
        }

        let later = Utc::now() + Duration::minutes(10);
        let flagged = scan(&store, DEFAULT_THRESHOLD_MINUTES, later).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].ticket_id, waiting.id);
    }
}
