//! Resolves menu choices.
//!
//! Option ids are matched exactly against the tables below. Label or free
//! text only reaches the keyword tables when no id matched, because some
//! channels deliver the button title without its id.

use super::event::InboundEvent;
use crate::types::{Category, FuelType, Ticket};

pub const CREATE_NEW_TICKET: &str = "create_new_ticket";
pub const DECLINE_NEW_TICKET: &str = "decline_new_ticket";
pub const SELECT_TICKET_PREFIX: &str = "select_ticket_";

const CATEGORY_IDS: [(&str, Category); 5] = [
    ("type_lock_open", Category::LockOpen),
    ("type_lock_repair", Category::LockRepair),
    ("type_fund_request", Category::FundRequest),
    ("type_fuel_request", Category::FuelRequest),
    ("type_other", Category::Other),
];

/// Checked in order; the first keyword contained in the text wins.
const CATEGORY_KEYWORDS: [(&str, Category); 12] = [
    ("repair", Category::LockRepair),
    ("broken", Category::LockRepair),
    ("unlock", Category::LockOpen),
    ("lock open", Category::LockOpen),
    ("open", Category::LockOpen),
    ("fund", Category::FundRequest),
    ("money", Category::FundRequest),
    ("fuel", Category::FuelRequest),
    ("diesel", Category::FuelRequest),
    ("petrol", Category::FuelRequest),
    ("other", Category::Other),
    ("something else", Category::Other),
];

const FUEL_IDS: [(&str, FuelType); 4] = [
    ("fuel_amount", FuelType::ByAmount),
    ("fuel_quantity", FuelType::ByQuantity),
    ("by_amount", FuelType::ByAmount),
    ("by_quantity", FuelType::ByQuantity),
];

const FUEL_KEYWORDS: [(&str, FuelType); 6] = [
    ("amount", FuelType::ByAmount),
    ("rupee", FuelType::ByAmount),
    ("price", FuelType::ByAmount),
    ("quantity", FuelType::ByQuantity),
    ("litre", FuelType::ByQuantity),
    ("liter", FuelType::ByQuantity),
];

const AFFIRMATIVE: [&str; 7] = ["yes", "y", "1", "create", "ok", "okay", "sure"];
const NEGATIVE: [&str; 6] = ["no", "n", "2", "nope", "decline", "not now"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketChoice {
    CreateNew,
    Existing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
}

fn option_id(event: &InboundEvent) -> Option<&str> {
    match event {
        InboundEvent::Selection { option_id, .. } => option_id.as_deref(),
        _ => None,
    }
}

/// The human text of the event, lowercased and trimmed.
fn spoken(event: &InboundEvent) -> Option<String> {
    let text = match event {
        InboundEvent::FreeText(text) => text.as_str(),
        InboundEvent::Selection { display_text, .. } => display_text.as_str(),
        _ => return None,
    };
    let text = text.trim().to_lowercase();
    (!text.is_empty()).then_some(text)
}

fn index_choice<T: Copy>(text: &str, options: &[T]) -> Option<T> {
    let index = text.parse::<usize>().ok()?;
    index.checked_sub(1).and_then(|i| options.get(i).copied())
}

pub fn resolve_category(event: &InboundEvent) -> Option<Category> {
    if let Some(id) = option_id(event) {
        let id = id.to_ascii_lowercase();
        if let Some((_, category)) = CATEGORY_IDS.iter().find(|(known, _)| *known == id) {
            return Some(*category);
        }
        if let Some(category) = Category::parse(&id) {
            return Some(category);
        }
    }

    let text = spoken(event)?;
    if let Some(category) = Category::parse(&text.replace(' ', "_")) {
        return Some(category);
    }
    if let Some(category) = index_choice(&text, &Category::ALL) {
        return Some(category);
    }
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, category)| *category)
}

pub fn resolve_fuel_type(event: &InboundEvent) -> Option<FuelType> {
    if let Some(id) = option_id(event) {
        let id = id.to_ascii_lowercase();
        if let Some((_, fuel)) = FUEL_IDS.iter().find(|(known, _)| *known == id) {
            return Some(*fuel);
        }
    }

    let text = spoken(event)?;
    if let Some((_, fuel)) = FUEL_IDS.iter().find(|(known, _)| *known == text) {
        return Some(*fuel);
    }
    if let Some(fuel) = index_choice(&text, &[FuelType::ByAmount, FuelType::ByQuantity]) {
        return Some(fuel);
    }
    FUEL_KEYWORDS
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, fuel)| *fuel)
}

/// Answer to "create a new ticket?".
pub fn resolve_answer(event: &InboundEvent) -> Option<Answer> {
    match option_id(event) {
        Some(CREATE_NEW_TICKET) => return Some(Answer::Yes),
        Some(DECLINE_NEW_TICKET) => return Some(Answer::No),
        _ => {}
    }

    let text = spoken(event)?;
    if AFFIRMATIVE.contains(&text.as_str()) {
        return Some(Answer::Yes);
    }
    if NEGATIVE.contains(&text.as_str()) {
        return Some(Answer::No);
    }
    if text.contains("yes") || text.contains("create") {
        return Some(Answer::Yes);
    }
    None
}

/// Picks an existing open ticket or "create new". A reference to an open
/// ticket beats the create keywords so an open ticket is never duplicated by
/// accident.
pub fn resolve_ticket_choice(event: &InboundEvent, open_tickets: &[Ticket]) -> Option<TicketChoice> {
    if let Some(id) = option_id(event) {
        if id == CREATE_NEW_TICKET {
            return Some(TicketChoice::CreateNew);
        }
        if let Some(ticket_id) = id.strip_prefix(SELECT_TICKET_PREFIX) {
            return open_tickets
                .iter()
                .find(|ticket| ticket.id == ticket_id)
                .map(|ticket| TicketChoice::Existing(ticket.id.clone()));
        }
    }

    let text = spoken(event)?;
    if let Some(ticket) = open_tickets.iter().find(|ticket| {
        text == ticket.id.to_lowercase() || text.contains(&ticket.ticket_number.to_lowercase())
    }) {
        return Some(TicketChoice::Existing(ticket.id.clone()));
    }
    if text.contains("create") || text.contains("new") {
        return Some(TicketChoice::CreateNew);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TicketStatus;

    fn id(option: &str) -> InboundEvent {
        InboundEvent::selection(Some(option), "")
    }

    fn said(text: &str) -> InboundEvent {
        InboundEvent::FreeText(text.to_string())
    }

    fn ticket(id: &str, number: &str) -> Ticket {
        Ticket {
            id: id.into(),
            ticket_number: number.into(),
            customer_id: "c1".into(),
            customer_phone: "4811".into(),
            customer_name: None,
            assigned_agent_id: None,
            assigned_agent_name: None,
            status: TicketStatus::Open,
            priority: "medium".into(),
            issue_type: Category::LockOpen,
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

    #[test]
    fn every_category_id_resolves() {
        for category in Category::ALL {
            assert_eq!(resolve_category(&id(&category.option_id())), Some(category));
            assert_eq!(
                resolve_category(&InboundEvent::selection(None, category.label())),
                Some(category)
            );
        }
    }

    #[test]
    fn category_id_beats_conflicting_label() {
        let event = InboundEvent::selection(Some("type_fund_request"), "Lock Open");
        assert_eq!(resolve_category(&event), Some(Category::FundRequest));
    }

    #[test]
    fn category_keyword_table() {
        let cases = [
            ("please unlock my car", Category::LockOpen),
            ("the lock is broken", Category::LockRepair),
            ("need a repair", Category::LockRepair),
            ("I need money", Category::FundRequest),
            ("fund", Category::FundRequest),
            ("diesel please", Category::FuelRequest),
            ("petrol", Category::FuelRequest),
            ("something else", Category::Other),
            ("3", Category::FundRequest),
            ("5", Category::Other),
        ];
        for (text, expected) in cases {
            assert_eq!(resolve_category(&said(text)), Some(expected), "{text}");
        }
        assert_eq!(resolve_category(&said("hello")), None);
        assert_eq!(resolve_category(&said("9")), None);
        assert_eq!(resolve_category(&said("0")), None);
    }

    #[test]
    fn fuel_subtype_table() {
        assert_eq!(resolve_fuel_type(&id("fuel_amount")), Some(FuelType::ByAmount));
        assert_eq!(resolve_fuel_type(&id("fuel_quantity")), Some(FuelType::ByQuantity));
        assert_eq!(resolve_fuel_type(&said("by_quantity")), Some(FuelType::ByQuantity));
        assert_eq!(resolve_fuel_type(&said("By Amount")), Some(FuelType::ByAmount));
        assert_eq!(resolve_fuel_type(&said("40 litres")), Some(FuelType::ByQuantity));
        assert_eq!(resolve_fuel_type(&said("2")), Some(FuelType::ByQuantity));
        assert_eq!(resolve_fuel_type(&said("whatever")), None);
    }

    #[test]
    fn answers_to_new_ticket_prompt() {
        assert_eq!(resolve_answer(&id(CREATE_NEW_TICKET)), Some(Answer::Yes));
        assert_eq!(resolve_answer(&id(DECLINE_NEW_TICKET)), Some(Answer::No));
        for yes in ["yes", "Y", "1", "create", "Yes please", "create a ticket"] {
            assert_eq!(resolve_answer(&said(yes)), Some(Answer::Yes), "{yes}");
        }
        for no in ["no", "N", "2", "not now"] {
            assert_eq!(resolve_answer(&said(no)), Some(Answer::No), "{no}");
        }
        assert_eq!(resolve_answer(&said("Hello")), None);
    }

    #[test]
    fn ticket_choice_by_id_number_or_keyword() {
        let open = vec![ticket("t-1", "TKT-123456-ABCD")];
        assert_eq!(
            resolve_ticket_choice(&id("select_ticket_t-1"), &open),
            Some(TicketChoice::Existing("t-1".into()))
        );
        assert_eq!(resolve_ticket_choice(&id("select_ticket_gone"), &open), None);
        assert_eq!(
            resolve_ticket_choice(&said("tkt-123456-abcd"), &open),
            Some(TicketChoice::Existing("t-1".into()))
        );
        assert_eq!(
            resolve_ticket_choice(&id(CREATE_NEW_TICKET), &open),
            Some(TicketChoice::CreateNew)
        );
        assert_eq!(
            resolve_ticket_choice(&said("new one please"), &open),
            Some(TicketChoice::CreateNew)
        );
        assert_eq!(resolve_ticket_choice(&said("hello"), &open), None);
    }

    #[test]
    fn existing_ticket_reference_wins_over_create_keyword() {
        let open = vec![ticket("t-1", "TKT-1")];
        assert_eq!(
            resolve_ticket_choice(&said("new message about TKT-1"), &open),
            Some(TicketChoice::Existing("t-1".into()))
        );
    }
}
