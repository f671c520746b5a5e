use minijinja::{context, Environment, Value};
use serde::Serialize;
use tracing::warn;

use crate::config::TemplateFormConfig;
use crate::engine::form::{has_answers, BulkRejection};
use crate::engine::selection::{CREATE_NEW_TICKET, DECLINE_NEW_TICKET, SELECT_TICKET_PREFIX};
use crate::engine::{ChoiceOption, ListSection, Prompt};
use crate::fields::{fields_for, required_fields, FieldSpec};
use crate::types::{Category, FormData, FormValue, FuelType, Ticket, TicketStatus};
use crate::validate::Rejection;

const FIELD_PROMPT_TEMPLATE: &str = include_str!("prompts/field_prompt.j2");
const BULK_REJECTED_TEMPLATE: &str = include_str!("prompts/bulk_rejected.j2");
const TICKET_CREATED_TEMPLATE: &str = include_str!("prompts/ticket_created.j2");
const TICKET_SELECTION_TEMPLATE: &str = include_str!("prompts/ticket_selection.j2");

const HEADER: &str = "Support";
const FOOTER: &str = "Send /close to stop";
/// One list row is reserved for "create new ticket".
const MAX_TICKET_ROWS: usize = 9;

fn render(name: &str, source: &str, ctx: Value) -> Option<String> {
    let mut env = Environment::new();
    if let Err(err) = env.add_template(name, source) {
        warn!(template = name, error = %err, "prompt template failed to parse");
        return None;
    }
    let template = env.get_template(name).ok()?;
    match template.render(ctx) {
        Ok(text) => Some(text.trim().to_string()),
        Err(err) => {
            warn!(template = name, error = %err, "prompt template failed to render");
            None
        }
    }
}

fn status_label(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "open",
        TicketStatus::InProgress => "in progress",
        TicketStatus::PendingCustomer => "awaiting your reply",
        TicketStatus::Closed => "closed",
    }
}

pub fn new_ticket_offer() -> Prompt {
    Prompt::Buttons {
        header: HEADER.to_string(),
        body: "Hi! You don't have any open tickets. Would you like to create a new ticket?"
            .to_string(),
        footer: FOOTER.to_string(),
        options: vec![
            ChoiceOption::new(CREATE_NEW_TICKET, "Yes, create"),
            ChoiceOption::new(DECLINE_NEW_TICKET, "No, thanks"),
        ],
    }
}

#[derive(Serialize)]
struct TicketLine<'a> {
    number: &'a str,
    category: &'a str,
    status: &'a str,
}

pub fn ticket_selection(tickets: &[Ticket]) -> Prompt {
    let shown = &tickets[..tickets.len().min(MAX_TICKET_ROWS)];
    let lines: Vec<TicketLine<'_>> = shown
        .iter()
        .map(|ticket| TicketLine {
            number: &ticket.ticket_number,
            category: ticket.issue_type.label(),
            status: status_label(ticket.status),
        })
        .collect();

    let body = render(
        "ticket_selection",
        TICKET_SELECTION_TEMPLATE,
        context! { count => tickets.len(), tickets => lines },
    )
    .unwrap_or_else(|| {
        format!(
            "You have {} open ticket(s). Pick a ticket to continue or create a new one.",
            tickets.len()
        )
    });

    let mut rows: Vec<ChoiceOption> = shown
        .iter()
        .map(|ticket| {
            ChoiceOption::new(
                format!("{SELECT_TICKET_PREFIX}{}", ticket.id),
                ticket.ticket_number.clone(),
            )
            .describe(format!(
                "{} · {}",
                ticket.issue_type.label(),
                status_label(ticket.status)
            ))
        })
        .collect();
    rows.push(ChoiceOption::new(CREATE_NEW_TICKET, "Create new ticket"));

    Prompt::List {
        header: HEADER.to_string(),
        body,
        footer: FOOTER.to_string(),
        button_label: "Choose".to_string(),
        sections: vec![ListSection {
            title: "Your tickets".to_string(),
            rows,
        }],
    }
}

pub fn category_menu() -> Prompt {
    let rows = Category::ALL
        .into_iter()
        .map(|category| {
            let hint = match category {
                Category::LockOpen => "Vehicle lock won't open",
                Category::LockRepair => "Lock is damaged or faulty",
                Category::FundRequest => "Request a fund transfer",
                Category::FuelRequest => "Request fuel by amount or litres",
                Category::Other => "Anything else",
            };
            ChoiceOption::new(category.option_id(), category.label()).describe(hint)
        })
        .collect();
    Prompt::List {
        header: HEADER.to_string(),
        body: "What do you need help with?".to_string(),
        footer: FOOTER.to_string(),
        button_label: "Ticket type".to_string(),
        sections: vec![ListSection {
            title: "Ticket types".to_string(),
            rows,
        }],
    }
}

pub fn fuel_subtype_menu() -> Prompt {
    Prompt::Buttons {
        header: Category::FuelRequest.label().to_string(),
        body: "Would you like to request fuel by amount or by quantity?".to_string(),
        footer: FOOTER.to_string(),
        options: [FuelType::ByAmount, FuelType::ByQuantity]
            .into_iter()
            .map(|fuel| ChoiceOption::new(fuel.option_id(), fuel.label()))
            .collect(),
    }
}

fn bulk_labels(category: Category, fuel: Option<FuelType>) -> Vec<String> {
    fields_for(category, fuel)
        .iter()
        .map(|field| {
            if field.required {
                field.label.to_string()
            } else {
                format!("{} (optional)", field.label)
            }
        })
        .collect()
}

/// Asks for `field`, optionally restating why the previous value was refused.
pub fn field_prompt(
    category: Category,
    answers: &FormData,
    field: &FieldSpec,
    rejection: Option<&Rejection>,
) -> Prompt {
    let required = required_fields(category, answers.fuel_type());
    let step_index = required
        .iter()
        .position(|f| f.name == field.name)
        .map(|i| i + 1)
        .unwrap_or(1);
    let first = !has_answers(category, answers) && rejection.is_none();
    let reason = rejection.map(|r| r.to_string());

    let body = render(
        "field_prompt",
        FIELD_PROMPT_TEMPLATE,
        context! {
            rejection => reason.as_deref(),
            first => first,
            category => category.label(),
            label => field.label,
            step_index => step_index,
            step_total => required.len(),
            bulk_fields => bulk_labels(category, answers.fuel_type()),
        },
    )
    .unwrap_or_else(|| match &reason {
        Some(reason) => format!("{reason}\nPlease enter {}.", field.label),
        None => format!("Please enter {}.", field.label),
    });
    Prompt::text(body)
}

pub fn bulk_rejected(category: Category, answers: &FormData, rejection: &BulkRejection) -> Prompt {
    let (too_few, expected, got, problems) = match rejection {
        BulkRejection::TooFew { expected, got } => (true, *expected, *got, Vec::new()),
        BulkRejection::Invalid(problems) => (
            false,
            0,
            0,
            problems.iter().map(ToString::to_string).collect::<Vec<_>>(),
        ),
    };
    let fields = bulk_labels(category, answers.fuel_type());
    let body = render(
        "bulk_rejected",
        BULK_REJECTED_TEMPLATE,
        context! {
            too_few => too_few,
            expected => expected,
            got => got,
            problems => problems,
            bulk_fields => &fields,
        },
    )
    .unwrap_or_else(|| format!("Please send the values separated by commas: {}", fields.join(", ")));
    Prompt::text(body)
}

/// Display value of a ticket column by field name.
pub fn ticket_field_value(ticket: &Ticket, field: &str) -> Option<String> {
    let number = |n: Option<f64>| n.map(|n| FormValue::Number(n).to_string());
    match field {
        "vehicle_number" => ticket.vehicle_number.clone(),
        "driver_number" => ticket.driver_number.clone(),
        "location" => ticket.location.clone(),
        "request_date" => ticket.request_date.clone(),
        "request_time" => ticket.request_time.clone(),
        "amount" => number(ticket.amount),
        "quantity" => number(ticket.quantity),
        "upi_id" => ticket.upi_id.clone(),
        "comment" => ticket.comment.clone(),
        _ => None,
    }
}

#[derive(Serialize)]
struct SummaryLine {
    label: &'static str,
    value: String,
}

pub fn ticket_created(ticket: &Ticket) -> Prompt {
    let category = match ticket.fuel_type {
        Some(fuel) => format!("{}, {}", ticket.issue_type.label(), fuel.label()),
        None => ticket.issue_type.label().to_string(),
    };
    let summary: Vec<SummaryLine> = fields_for(ticket.issue_type, ticket.fuel_type)
        .iter()
        .filter_map(|field| {
            ticket_field_value(ticket, field.name).map(|value| SummaryLine {
                label: field.label,
                value,
            })
        })
        .collect();

    let body = render(
        "ticket_created",
        TICKET_CREATED_TEMPLATE,
        context! {
            ticket_number => &ticket.ticket_number,
            category => category,
            summary => summary,
        },
    )
    .unwrap_or_else(|| format!("Ticket {} created. An agent will reply here shortly.", ticket.ticket_number));
    Prompt::text(body)
}

pub fn bound_to_ticket(ticket: &Ticket) -> Prompt {
    Prompt::text(format!(
        "You're now chatting on ticket {} ({}). Send your message and an agent will reply here.",
        ticket.ticket_number,
        ticket.issue_type.label()
    ))
}

pub fn invalid_selection(expected: &str) -> Prompt {
    Prompt::text(format!("Sorry, I didn't understand that. Please {expected}."))
}

pub fn declined() -> Prompt {
    Prompt::text("No problem. Message us any time if you need help.")
}

pub fn conversation_ended() -> Prompt {
    Prompt::text("Conversation ended. Send any message to start again.")
}

pub fn no_active_conversation() -> Prompt {
    Prompt::text("There is no active conversation to close.")
}

pub fn retry_later() -> Prompt {
    Prompt::text("Sorry, something went wrong on our side. Please try again in a moment.")
}

pub fn ticket_closed(ticket: &Ticket) -> Prompt {
    Prompt::text(format!(
        "Ticket {} has been closed. Send any message if you need more help.",
        ticket.ticket_number
    ))
}

pub fn template_form(config: &TemplateFormConfig) -> Prompt {
    Prompt::TemplateForm {
        template_name: config.template_name.clone(),
        template_id: config.template_id.clone(),
        locale: config.locale.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::find_field;

    fn ticket() -> Ticket {
        Ticket {
            id: "t-1".into(),
            ticket_number: "TKT-123456-ABCD".into(),
            customer_id: "c-1".into(),
            customer_phone: "4811".into(),
            customer_name: None,
            assigned_agent_id: None,
            assigned_agent_name: None,
            status: TicketStatus::Open,
            priority: "medium".into(),
            issue_type: Category::FundRequest,
            fuel_type: None,
            vehicle_number: Some("KA01".into()),
            driver_number: Some("D1".into()),
            location: None,
            request_date: None,
            request_time: None,
            amount: Some(2500.0),
            quantity: None,
            upi_id: Some("me@upi".into()),
            comment: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn first_field_prompt_offers_bulk_entry() {
        let field = find_field(Category::LockOpen, None, "vehicle_number").unwrap();
        let body = field_prompt(Category::LockOpen, &FormData::new(), field, None)
            .body()
            .to_string();
        assert!(body.contains("Lock Open"));
        assert!(body.contains("Vehicle Number"));
        assert!(body.contains("(1/3)"));
        assert!(body.contains("Vehicle Number, Driver Number, Location, Comment (optional)"));
    }

    #[test]
    fn rejection_is_restated_before_the_question() {
        let field = find_field(Category::FundRequest, None, "amount").unwrap();
        let rejection = crate::validate::validate(field, "abc").unwrap_err();
        let body = field_prompt(Category::FundRequest, &FormData::new(), field, Some(&rejection))
            .body()
            .to_string();
        assert!(body.starts_with("⚠️ Amount: must be a number"));
        assert!(body.contains("Please enter *Amount* (3/4)"));
        assert!(!body.contains("Tip:"));
    }

    #[test]
    fn bulk_rejection_lists_problems() {
        let field = find_field(Category::FundRequest, None, "amount").unwrap();
        let problem = crate::validate::validate(field, "0").unwrap_err();
        let body = bulk_rejected(
            Category::FundRequest,
            &FormData::new(),
            &BulkRejection::Invalid(vec![problem]),
        )
        .body()
        .to_string();
        assert!(body.contains("• Amount: must be at least 1"));

        let body = bulk_rejected(
            Category::LockOpen,
            &FormData::new(),
            &BulkRejection::TooFew { expected: 3, got: 2 },
        )
        .body()
        .to_string();
        assert!(body.starts_with("I need at least 3 values but got 2."));
    }

    #[test]
    fn ticket_created_summarises_columns() {
        let body = ticket_created(&ticket()).body().to_string();
        assert!(body.contains("TKT-123456-ABCD"));
        assert!(body.contains("Amount: 2500"));
        assert!(body.contains("UPI ID: me@upi"));
        assert!(!body.contains("Comment"));
    }

    #[test]
    fn ticket_selection_lists_tickets_then_create_new() {
        let Prompt::List { body, sections, .. } = ticket_selection(&[ticket()]) else {
            panic!("expected list");
        };
        assert!(body.contains("1 open ticket:"));
        let ids: Vec<_> = sections[0].rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["select_ticket_t-1", CREATE_NEW_TICKET]);
    }

    #[test]
    fn category_menu_uses_type_ids() {
        let Prompt::List { sections, .. } = category_menu() else {
            panic!("expected list");
        };
        let ids: Vec<_> = sections[0].rows.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|id| id.starts_with("type_")));
    }
}
