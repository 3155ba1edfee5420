use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::costing::ValidationLimits;
use crate::domain::shipment::{AddressBlock, ContactDetails, DimensionsEntry, DraftShipment};
use crate::errors::{FieldError, FieldErrorCode};
use crate::flows::steps::{dimensions_mode, BookingStep, DimensionsMode, FlowConfig, FlowKind};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

pub fn is_valid_email(value: &str) -> bool {
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value.trim()))
}

/// Field failures that block leaving `step`; an empty list means the gate is open.
pub fn validate_step(
    step: BookingStep,
    draft: &DraftShipment,
    flow: &FlowConfig,
    limits: &ValidationLimits,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    match step {
        BookingStep::SenderContact => match &draft.sender {
            Some(sender) => check_contact("sender", sender, &mut errors),
            None => {
                errors.push(FieldError::required("sender.name"));
                errors.push(FieldError::required("sender.phone"));
                errors.push(FieldError::required("sender.email"));
            }
        },
        BookingStep::PackageDetails => {
            if draft.package.package_type.is_none() {
                errors.push(FieldError::required("package.package_type"));
            }
            if draft.package.description.trim().is_empty() {
                errors.push(FieldError::required("package.description"));
            }
            check_positive("package", &draft.package.declared, &mut errors);
        }
        BookingStep::Addresses => {
            if draft.pickup.is_none() && draft.delivery.is_none() {
                errors.push(FieldError::new(
                    "addresses",
                    FieldErrorCode::Required,
                    "at least one of pickup or delivery address is required",
                ));
            }
            if flow.kind == FlowKind::Guest {
                for (field, block) in [("pickup", &draft.pickup), ("delivery", &draft.delivery)] {
                    if matches!(block, Some(AddressBlock::BookEntry { .. })) {
                        errors.push(FieldError::new(
                            field,
                            FieldErrorCode::NotPermitted,
                            "guest bookings must enter the address in full",
                        ));
                    }
                }
            }
        }
        BookingStep::Receiver => check_contact("receiver", &draft.receiver, &mut errors),
        BookingStep::ShippingMethod => {
            if draft.service_type.is_none() {
                errors.push(FieldError::required("service_type"));
            }
        }
        BookingStep::Dimensions => check_dimensions(draft, limits, &mut errors),
        BookingStep::Schedule => {
            match draft.schedule.as_ref().and_then(|schedule| schedule.pickup_date) {
                None => errors.push(FieldError::required("schedule.pickup_date")),
                Some(date) if date < draft.created_at.date_naive() => {
                    errors.push(FieldError::new(
                        "schedule.pickup_date",
                        FieldErrorCode::InPast,
                        "pickup date cannot be before the booking was started",
                    ));
                }
                Some(_) => {}
            }
        }
        BookingStep::Photos => {
            if draft.photos.is_empty() {
                errors.push(FieldError::new(
                    "photos",
                    FieldErrorCode::Required,
                    "at least one photo of the package is required",
                ));
            }
        }
        BookingStep::Payment => {
            if draft.payment_method.is_none() {
                errors.push(FieldError::required("payment_method"));
            }
        }
        BookingStep::Confirmed => {}
    }
    errors
}

fn check_contact(prefix: &str, contact: &ContactDetails, errors: &mut Vec<FieldError>) {
    if contact.name.trim().is_empty() {
        errors.push(FieldError::required(format!("{prefix}.name")));
    }
    if contact.phone.trim().is_empty() {
        errors.push(FieldError::required(format!("{prefix}.phone")));
    }
    if contact.email.trim().is_empty() {
        errors.push(FieldError::required(format!("{prefix}.email")));
    } else if !is_valid_email(&contact.email) {
        errors.push(FieldError::new(
            format!("{prefix}.email"),
            FieldErrorCode::InvalidEmail,
            "email address is not valid",
        ));
    }
}

fn check_positive(prefix: &str, entry: &DimensionsEntry, errors: &mut Vec<FieldError>) {
    for (name, value) in entry.fields() {
        let field = format!("{prefix}.{name}");
        match value {
            None => errors.push(FieldError::required(field)),
            Some(value) if value <= Decimal::ZERO => {
                errors.push(FieldError::new(
                    field.clone(),
                    FieldErrorCode::NotPositive,
                    format!("{field} must be greater than zero"),
                ));
            }
            Some(_) => {}
        }
    }
}

fn check_dimensions(
    draft: &DraftShipment,
    limits: &ValidationLimits,
    errors: &mut Vec<FieldError>,
) {
    let mode = dimensions_mode(draft);
    let has_selection = !draft.price_guides.is_empty();

    match mode {
        DimensionsMode::Catalog => {
            if !has_selection {
                errors.push(empty_selection());
            }
        }
        DimensionsMode::AddItem if has_selection => {}
        DimensionsMode::AddItem | DimensionsMode::RawDimensions => {
            let entry = draft.dimensions.clone().unwrap_or_default();
            if mode == DimensionsMode::AddItem && entry.is_blank() {
                errors.push(empty_selection());
                return;
            }
            check_raw_dimensions(draft, &entry, limits, errors);
        }
    }
}

/// Presence, positivity and the per-side ceiling of a measured entry, under `dimensions.*`.
pub fn check_measurements(entry: &DimensionsEntry, limits: &ValidationLimits) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_positive("dimensions", entry, &mut errors);

    for (name, value) in entry.fields().into_iter().skip(1) {
        if let Some(value) = value.filter(|value| *value > limits.max_dimension_cm) {
            errors.push(FieldError::new(
                format!("dimensions.{name}"),
                FieldErrorCode::ExceedsMaximum,
                format!("{value}cm exceeds the {}cm maximum", limits.max_dimension_cm),
            ));
        }
    }
    errors
}

fn check_raw_dimensions(
    draft: &DraftShipment,
    entry: &DimensionsEntry,
    limits: &ValidationLimits,
    errors: &mut Vec<FieldError>,
) {
    errors.extend(check_measurements(entry, limits));

    let ceiling = draft.service_type.and_then(|service| limits.weight_limit(service));
    if let (Some(weight), Some(limit)) = (entry.weight_kg, ceiling) {
        if weight > limit {
            errors.push(FieldError::new(
                "dimensions.weight_kg",
                FieldErrorCode::ExceedsMaximum,
                format!("item weight {weight}kg exceeds {limit}kg per item"),
            ));
        }
    }
}

fn empty_selection() -> FieldError {
    FieldError::new(
        "price_guides",
        FieldErrorCode::EmptySelection,
        "select at least one price guide item",
    )
}
