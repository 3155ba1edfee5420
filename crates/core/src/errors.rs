use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::shipment::ServiceType;
use crate::flows::{steps::BookingStep, FlowTransitionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    Required,
    NotPositive,
    ExceedsMaximum,
    InvalidEmail,
    EmptySelection,
    NotPermitted,
    InPast,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self { field: field.into(), code, message: message.into() }
    }

    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{field} is required");
        Self { field, code: FieldErrorCode::Required, message }
    }
}

/// Per-field failures of one step; the caller re-renders exactly these fields.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("validation failed at {step:?}: {}", field_names(.fields))]
pub struct ValidationErrors {
    pub step: BookingStep,
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|error| error.field == field)
    }
}

fn field_names(fields: &[FieldError]) -> String {
    fields.iter().map(|error| error.field.as_str()).collect::<Vec<_>>().join(", ")
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateResolutionError {
    #[error("unknown service type `{0}`")]
    UnknownServiceType(String),
    #[error("service type `{0}` has no rate on the active rate card")]
    UnsupportedServiceType(ServiceType),
    #[error("{service} item weight {weight_kg}kg exceeds {limit_kg}kg per item")]
    WeightLimitExceeded { service: ServiceType, weight_kg: Decimal, limit_kg: Decimal },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    RateResolution(#[from] RateResolutionError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    Transport,
    Status(u16),
    Decode,
    Rejected,
}

/// Failure talking to the catalog, payment or draft-persistence collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct ExternalCallError {
    pub operation: String,
    pub kind: ExternalErrorKind,
    pub message: String,
}

impl ExternalCallError {
    pub fn new(
        operation: impl Into<String>,
        kind: ExternalErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self { operation: operation.into(), kind, message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("draft store backend failure: {0}")]
    Backend(String),
    #[error("stored draft could not be decoded: {0}")]
    Decode(String),
    #[error("draft could not be encoded for storage: {0}")]
    Encode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Quote(#[from] QuoteError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    External(#[from] ExternalCallError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    RateResolution(#[from] RateResolutionError),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("draft store unavailable: {0}")]
    Persistence(String),
    #[error("shipment backend call failed: {0}")]
    Integration(String),
}

impl From<BookingError> for ApplicationError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::Validation(errors) => Self::Domain(DomainError::Validation(errors)),
            BookingError::Quote(QuoteError::Validation(errors)) => {
                Self::Domain(DomainError::Validation(errors))
            }
            BookingError::Quote(QuoteError::RateResolution(error)) => {
                Self::Domain(DomainError::RateResolution(error))
            }
            BookingError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
            BookingError::Store(error) => Self::Persistence(error.to_string()),
            BookingError::External(error) => Self::Integration(error.to_string()),
        }
    }
}

impl From<QuoteError> for ApplicationError {
    fn from(value: QuoteError) -> Self {
        Self::from(BookingError::Quote(value))
    }
}

/// Client-facing classification of a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceErrorKind {
    InvalidInput,
    StepConflict,
    Upstream,
    Internal,
}

impl InterfaceErrorKind {
    pub fn summary(self) -> &'static str {
        match self {
            Self::InvalidInput => "Some booking details are missing or invalid.",
            Self::StepConflict => "That action is not available at the current booking step.",
            Self::Upstream => "Shipment services are unavailable, try again in a moment.",
            Self::Internal => "Something went wrong on our side.",
        }
    }

    /// Input and step problems are the caller's to fix, so their detail is shown.
    fn exposes_detail(self) -> bool {
        matches!(self, Self::InvalidInput | Self::StepConflict)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?} ({correlation_id}): {detail}")]
pub struct InterfaceError {
    pub kind: InterfaceErrorKind,
    pub detail: String,
    pub fields: Vec<FieldError>,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn public_message(&self) -> &str {
        if self.kind.exposes_detail() {
            &self.detail
        } else {
            self.kind.summary()
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let detail = self.to_string();
        let (kind, fields) = match self {
            Self::Domain(DomainError::Validation(errors)) => {
                (InterfaceErrorKind::InvalidInput, errors.fields)
            }
            Self::Domain(DomainError::RateResolution(_)) => {
                (InterfaceErrorKind::InvalidInput, Vec::new())
            }
            Self::Domain(DomainError::FlowTransition(_)) => {
                (InterfaceErrorKind::StepConflict, Vec::new())
            }
            Self::Persistence(_) => (InterfaceErrorKind::Internal, Vec::new()),
            Self::Integration(_) => (InterfaceErrorKind::Upstream, Vec::new()),
        };
        InterfaceError { kind, detail, fields, correlation_id: correlation_id.into() }
    }
}
