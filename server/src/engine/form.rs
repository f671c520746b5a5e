//! Answer collection for `FORM_FILLING`: one value at a time, or every value
//! at once separated by commas.

use crate::fields::{fields_for, next_missing_required_field, FieldSpec};
use crate::types::{Category, FormData};
use crate::validate::{validate, Rejection};

#[derive(Debug, Clone, PartialEq)]
pub enum SingleOutcome {
    /// Value stored; `next` is the following required field, if any.
    Accepted {
        answers: FormData,
        next: Option<&'static FieldSpec>,
    },
    Rejected(Rejection),
    /// Every required field already has a value.
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkRejection {
    TooFew { expected: usize, got: usize },
    Invalid(Vec<Rejection>),
}

/// Whether any category field has been answered yet. `fuel_type` is a flow
/// tag, not an answer.
pub fn has_answers(category: Category, answers: &FormData) -> bool {
    fields_for(category, answers.fuel_type())
        .iter()
        .any(|field| answers.contains(field.name))
}

/// A comma-separated message counts as bulk entry only before the first
/// single answer; afterwards commas are part of the value.
///
/// This holds for categories with a single required field as well: for
/// `other`, "Door stuck, please help" fills `comment` with "Door stuck" and
/// the optional `vehicle_number` with "please help".
pub fn is_bulk(category: Category, answers: &FormData, text: &str) -> bool {
    text.contains(',') && !has_answers(category, answers)
}

pub fn apply_single(category: Category, answers: &FormData, text: &str) -> SingleOutcome {
    let Some(field) = next_missing_required_field(category, answers) else {
        return SingleOutcome::Complete;
    };
    match validate(field, text) {
        Ok(value) => {
            let mut answers = answers.clone();
            answers.insert(field.name, value);
            let next = next_missing_required_field(category, &answers);
            SingleOutcome::Accepted { answers, next }
        }
        Err(rejection) => SingleOutcome::Rejected(rejection),
    }
}

/// Zips the values against the category's fields, required first. Blank
/// optional values are left out; surplus values are joined onto the last
/// field. Returns the merged answers, or every problem found.
pub fn apply_bulk(
    category: Category,
    answers: &FormData,
    text: &str,
) -> Result<FormData, BulkRejection> {
    let fields = fields_for(category, answers.fuel_type());
    let required = fields.iter().filter(|field| field.required).count();
    let mut values: Vec<String> = text.split(',').map(|v| v.trim().to_string()).collect();

    if values.len() < required {
        return Err(BulkRejection::TooFew {
            expected: required,
            got: values.len(),
        });
    }
    if values.len() > fields.len() && !fields.is_empty() {
        let surplus = values.split_off(fields.len() - 1);
        values.push(surplus.join(", "));
    }

    let mut merged = answers.clone();
    let mut problems = Vec::new();
    for (field, raw) in fields.iter().zip(values.iter()) {
        if raw.is_empty() && !field.required {
            continue;
        }
        match validate(field, raw) {
            Ok(value) => merged.insert(field.name, value),
            Err(rejection) => problems.push(rejection),
        }
    }

    if problems.is_empty() {
        Ok(merged)
    } else {
        Err(BulkRejection::Invalid(problems))
    }
}
