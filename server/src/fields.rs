//! Static declaration of the answers each ticket category needs.
//!
//! Every list is ordered required-first, which is also the positional order
//! used for comma-separated bulk entry.

use crate::types::{Category, FormData, FuelType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Time,
    Choice,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Required,
    MaxLength(usize),
    Min(f64),
    Max(f64),
    OneOf(&'static [&'static str]),
    /// `DD/MM/YYYY`, shape only.
    DateShape,
    /// `HH:MM`, shape only.
    TimeShape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub rules: &'static [Rule],
}

const VEHICLE_NUMBER: FieldSpec = FieldSpec {
    name: "vehicle_number",
    label: "Vehicle Number",
    kind: FieldKind::Text,
    required: true,
    rules: &[Rule::Required, Rule::MaxLength(20)],
};

const DRIVER_NUMBER: FieldSpec = FieldSpec {
    name: "driver_number",
    label: "Driver Number",
    kind: FieldKind::Text,
    required: true,
    rules: &[Rule::Required, Rule::MaxLength(20)],
};

const LOCATION: FieldSpec = FieldSpec {
    name: "location",
    label: "Location",
    kind: FieldKind::Text,
    required: true,
    rules: &[Rule::Required, Rule::MaxLength(100)],
};

const REQUEST_DATE: FieldSpec = FieldSpec {
    name: "request_date",
    label: "Date (DD/MM/YYYY)",
    kind: FieldKind::Date,
    required: false,
    rules: &[Rule::DateShape],
};

const REQUEST_TIME: FieldSpec = FieldSpec {
    name: "request_time",
    label: "Time (HH:MM)",
    kind: FieldKind::Time,
    required: false,
    rules: &[Rule::TimeShape],
};

const AMOUNT: FieldSpec = FieldSpec {
    name: "amount",
    label: "Amount",
    kind: FieldKind::Number,
    required: true,
    rules: &[Rule::Required, Rule::Min(1.0), Rule::Max(100_000.0)],
};

const QUANTITY: FieldSpec = FieldSpec {
    name: "quantity",
    label: "Quantity (litres)",
    kind: FieldKind::Number,
    required: true,
    rules: &[Rule::Required, Rule::Min(1.0), Rule::Max(1_000.0)],
};

const UPI_ID: FieldSpec = FieldSpec {
    name: "upi_id",
    label: "UPI ID",
    kind: FieldKind::Text,
    required: true,
    rules: &[Rule::Required, Rule::MaxLength(50)],
};

const PAYMENT_MODE: FieldSpec = FieldSpec {
    name: "payment_mode",
    label: "Payment Mode (upi/cash/card)",
    kind: FieldKind::Choice,
    required: false,
    rules: &[Rule::OneOf(&["upi", "cash", "card"])],
};

const COMMENT: FieldSpec = FieldSpec {
    name: "comment",
    label: "Comment",
    kind: FieldKind::Text,
    required: false,
    rules: &[Rule::MaxLength(500)],
};

const DESCRIPTION: FieldSpec = FieldSpec {
    name: "comment",
    label: "Description of the issue",
    kind: FieldKind::Text,
    required: true,
    rules: &[Rule::Required, Rule::MaxLength(1000)],
};

const LOCK_OPEN_FIELDS: &[FieldSpec] = &[VEHICLE_NUMBER, DRIVER_NUMBER, LOCATION, COMMENT];

const LOCK_REPAIR_FIELDS: &[FieldSpec] = &[
    VEHICLE_NUMBER,
    DRIVER_NUMBER,
    LOCATION,
    REQUEST_DATE,
    REQUEST_TIME,
    COMMENT,
];

const FUND_REQUEST_FIELDS: &[FieldSpec] =
    &[VEHICLE_NUMBER, DRIVER_NUMBER, AMOUNT, UPI_ID, COMMENT];

const FUEL_BY_AMOUNT_FIELDS: &[FieldSpec] = &[
    VEHICLE_NUMBER,
    DRIVER_NUMBER,
    AMOUNT,
    LOCATION,
    PAYMENT_MODE,
    COMMENT,
];

const FUEL_BY_QUANTITY_FIELDS: &[FieldSpec] = &[
    VEHICLE_NUMBER,
    DRIVER_NUMBER,
    QUANTITY,
    LOCATION,
    PAYMENT_MODE,
    COMMENT,
];

const OTHER_FIELDS: &[FieldSpec] = &[DESCRIPTION, VEHICLE_NUMBER_OPTIONAL];

const VEHICLE_NUMBER_OPTIONAL: FieldSpec = FieldSpec {
    required: false,
    rules: &[Rule::MaxLength(20)],
    ..VEHICLE_NUMBER
};

/// Ordered fields for a category. Fuel requests without a chosen subtype use
/// the by-amount flow.
pub fn fields_for(category: Category, fuel: Option<FuelType>) -> &'static [FieldSpec] {
    match category {
        Category::LockOpen => LOCK_OPEN_FIELDS,
        Category::LockRepair => LOCK_REPAIR_FIELDS,
        Category::FundRequest => FUND_REQUEST_FIELDS,
        Category::FuelRequest => match fuel {
            Some(FuelType::ByQuantity) => FUEL_BY_QUANTITY_FIELDS,
            _ => FUEL_BY_AMOUNT_FIELDS,
        },
        Category::Other => OTHER_FIELDS,
    }
}

pub fn required_fields(category: Category, fuel: Option<FuelType>) -> Vec<&'static FieldSpec> {
    fields_for(category, fuel)
        .iter()
        .filter(|field| field.required)
        .collect()
}

pub fn next_missing_required_field(
    category: Category,
    answers: &FormData,
) -> Option<&'static FieldSpec> {
    fields_for(category, answers.fuel_type())
        .iter()
        .find(|field| field.required && answers.text(field.name).is_none())
}

pub fn find_field(
    category: Category,
    fuel: Option<FuelType>,
    name: &str,
) -> Option<&'static FieldSpec> {
    fields_for(category, fuel)
        .iter()
        .find(|field| field.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormValue;

    #[test]
    fn required_fields_come_before_optional_ones() {
        for category in Category::ALL {
            for fuel in [None, Some(FuelType::ByAmount), Some(FuelType::ByQuantity)] {
                let fields = fields_for(category, fuel);
                let first_optional = fields.iter().position(|f| !f.required);
                if let Some(idx) = first_optional {
                    assert!(
                        fields[idx..].iter().all(|f| !f.required),
                        "{category} has a required field after an optional one"
                    );
                }
            }
        }
    }

    #[test]
    fn lock_open_asks_vehicle_driver_location() {
        let names = required_fields(Category::LockOpen, None)
            .iter()
            .map(|f| f.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["vehicle_number", "driver_number", "location"]);
    }

    #[test]
    fn fuel_subtype_switches_amount_for_quantity() {
        let by_quantity = required_fields(Category::FuelRequest, Some(FuelType::ByQuantity));
        assert!(by_quantity.iter().any(|f| f.name == "quantity"));
        assert!(!by_quantity.iter().any(|f| f.name == "amount"));
    }

    #[test]
    fn next_missing_walks_in_order() {
        let mut answers = FormData::new();
        assert_eq!(
            next_missing_required_field(Category::FundRequest, &answers).map(|f| f.name),
            Some("vehicle_number")
        );
        answers.insert("vehicle_number", FormValue::Text("KA01".into()));
        answers.insert("driver_number", FormValue::Text("D9".into()));
        assert_eq!(
            next_missing_required_field(Category::FundRequest, &answers).map(|f| f.name),
            Some("amount")
        );
        answers.insert("amount", FormValue::Number(300.0));
        answers.insert("upi_id", FormValue::Text("driver@upi".into()));
        assert!(next_missing_required_field(Category::FundRequest, &answers).is_none());
    }

    #[test]
    fn blank_answers_count_as_missing() {
        let mut answers = FormData::new();
        answers.insert("comment", FormValue::Text("   ".into()));
        assert_eq!(
            next_missing_required_field(Category::Other, &answers).map(|f| f.name),
            Some("comment")
        );
    }

    #[test]
    fn fuel_type_in_answers_selects_quantity_flow() {
        let mut answers = FormData::new();
        answers.insert("fuel_type", FormValue::Text("by_quantity".into()));
        answers.insert("vehicle_number", FormValue::Text("KA01".into()));
        answers.insert("driver_number", FormValue::Text("D9".into()));
        assert_eq!(
            next_missing_required_field(Category::FuelRequest, &answers).map(|f| f.name),
            Some("quantity")
        );
    }
}
