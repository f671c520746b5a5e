//! Maps template-form submissions onto canonical field names.
//!
//! Form builders emit keys such as `screen_0_Vehicle_Number_0`; only the
//! words in the middle carry meaning.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::types::{Category, FuelType};

/// Exact normalized labels, then the same labels as substrings.
const KNOWN_LABELS: [(&str, &str); 22] = [
    ("vehicle number", "vehicle_number"),
    ("vehicle no", "vehicle_number"),
    ("vehicle", "vehicle_number"),
    ("driver number", "driver_number"),
    ("driver no", "driver_number"),
    ("driver", "driver_number"),
    ("amount", "amount"),
    ("upi id", "upi_id"),
    ("upi", "upi_id"),
    ("quantity", "quantity"),
    ("litres", "quantity"),
    ("location", "location"),
    ("comment", "comment"),
    ("comments", "comment"),
    ("remarks", "comment"),
    ("description", "comment"),
    ("request date", "request_date"),
    ("date", "request_date"),
    ("request time", "request_time"),
    ("time", "request_time"),
    ("payment mode", "payment_mode"),
    ("fuel type", "fuel_type"),
];

const CATEGORY_LABELS: [&str; 4] = ["category", "issue type", "ticket type", "type"];

/// Keys that belong to the transport rather than the customer.
const IGNORED_KEYS: [&str; 2] = ["flow_token", "wa_flow_response_params"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSubmission {
    pub category: Option<Category>,
    pub fuel_type: Option<FuelType>,
    /// Canonical field name to raw (unvalidated) text.
    pub fields: BTreeMap<&'static str, String>,
    pub unrecognized: Vec<String>,
}

fn strip_screen_prefix(label: &str) -> &str {
    let Some(rest) = label.strip_prefix("screen_") else {
        return label;
    };
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return label;
    }
    rest[digits..].strip_prefix('_').unwrap_or(&rest[digits..])
}

fn strip_positional_suffix(label: &str) -> &str {
    let trimmed = label.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() == label.len() {
        return label;
    }
    trimmed.strip_suffix('_').unwrap_or(label)
}

/// `screen_1_Driver__Number_0` becomes `driver number`.
pub fn normalize_label(key: &str) -> String {
    let lowered = key.trim().to_lowercase();
    let core = strip_positional_suffix(strip_screen_prefix(&lowered));
    core.replace(&['_', '-'][..], " ")
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn canonical_field(label: &str) -> Option<&'static str> {
    if let Some((_, field)) = KNOWN_LABELS.iter().find(|(known, _)| *known == label) {
        return Some(*field);
    }
    KNOWN_LABELS
        .iter()
        .find(|(known, _)| label.contains(known))
        .map(|(_, field)| *field)
}

fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn category_from_text(text: &str) -> Option<Category> {
    let normalized = text.trim().to_lowercase().replace(' ', "_");
    Category::parse(normalized.strip_prefix("type_").unwrap_or(&normalized))
}

/// Later keys never overwrite an earlier value for the same field, so the
/// result does not depend on which noisy variant of a label came first in
/// key order.
pub fn normalize_submission(raw: &Map<String, Value>) -> NormalizedSubmission {
    let mut out = NormalizedSubmission::default();

    for (key, value) in raw {
        if IGNORED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let Some(text) = value_text(value) else {
            continue;
        };
        let label = normalize_label(key);

        if CATEGORY_LABELS.contains(&label.as_str()) {
            out.category = out.category.or_else(|| category_from_text(&text));
            continue;
        }
        match canonical_field(&label) {
            Some("fuel_type") => {
                out.fuel_type = out.fuel_type.or_else(|| FuelType::parse(&text.replace(' ', "_")));
            }
            Some(field) => {
                out.fields.entry(field).or_insert(text);
            }
            None => out.unrecognized.push(key.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_lose_positional_noise() {
        assert_eq!(normalize_label("screen_0_Vehicle_Number_0"), "vehicle number");
        assert_eq!(normalize_label("screen_1_driver__number"), "driver number");
        assert_eq!(normalize_label("UPI-ID"), "upi id");
        assert_eq!(normalize_label("Location?"), "location");
        assert_eq!(normalize_label("screen_12_Amount_(INR)_3"), "amount inr");
    }

    #[test]
    fn canonical_field_mapping() {
        assert_eq!(canonical_field("vehicle number"), Some("vehicle_number"));
        assert_eq!(canonical_field("driver number"), Some("driver_number"));
        assert_eq!(canonical_field("amount inr"), Some("amount"));
        assert_eq!(canonical_field("upi id"), Some("upi_id"));
        assert_eq!(canonical_field("enter quantity"), Some("quantity"));
        assert_eq!(canonical_field("comments"), Some("comment"));
        assert_eq!(canonical_field("favourite colour"), None);
    }

    #[test]
    fn key_noise_does_not_change_the_result() {
        let noisy = json!({
            "screen_0_Vehicle_Number_0": "ABC123",
            "screen_1_driver__number": "DRV001",
            "screen_0_Location_2": "Warsaw",
            "flow_token": "unused",
        });
        let clean = json!({
            "vehicle_number": "ABC123",
            "driver_number": "DRV001",
            "location": "Warsaw",
        });
        let a = normalize_submission(noisy.as_object().unwrap());
        let b = normalize_submission(clean.as_object().unwrap());
        assert_eq!(a.fields, b.fields);
        assert_eq!(a.fields.get("vehicle_number").map(String::as_str), Some("ABC123"));
        assert_eq!(a.fields.get("driver_number").map(String::as_str), Some("DRV001"));
        assert!(a.unrecognized.is_empty());
    }

    #[test]
    fn category_and_fuel_type_are_picked_up() {
        let raw = json!({
            "screen_0_Category_0": "Fuel Request",
            "screen_0_Fuel_Type_1": "by quantity",
            "screen_0_Quantity_2": 40,
            "screen_0_Shoe_Size_3": "42",
        });
        let out = normalize_submission(raw.as_object().unwrap());
        assert_eq!(out.category, Some(Category::FuelRequest));
        assert_eq!(out.fuel_type, Some(FuelType::ByQuantity));
        assert_eq!(out.fields.get("quantity").map(String::as_str), Some("40"));
        assert_eq!(out.unrecognized, vec!["screen_0_Shoe_Size_3".to_string()]);
    }

    #[test]
    fn blank_and_nested_values_are_skipped() {
        let raw = json!({ "comment": "  ", "location": { "lat": 1 }, "amount": null });
        assert!(normalize_submission(raw.as_object().unwrap()).fields.is_empty());
    }
}
