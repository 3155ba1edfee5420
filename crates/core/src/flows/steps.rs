use serde::{Deserialize, Serialize};

use crate::domain::shipment::{DraftShipment, PackageType, ServiceType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    SenderContact,
    PackageDetails,
    Addresses,
    Receiver,
    ShippingMethod,
    Dimensions,
    Schedule,
    Photos,
    Payment,
    Confirmed,
}

impl BookingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SenderContact => "sender_contact",
            Self::PackageDetails => "package_details",
            Self::Addresses => "addresses",
            Self::Receiver => "receiver",
            Self::ShippingMethod => "shipping_method",
            Self::Dimensions => "dimensions",
            Self::Schedule => "schedule",
            Self::Photos => "photos",
            Self::Payment => "payment",
            Self::Confirmed => "confirmed",
        }
    }
}

impl std::str::FromStr for BookingStep {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let step = match value.trim() {
            "sender_contact" => Self::SenderContact,
            "package_details" => Self::PackageDetails,
            "addresses" => Self::Addresses,
            "receiver" => Self::Receiver,
            "shipping_method" => Self::ShippingMethod,
            "dimensions" => Self::Dimensions,
            "schedule" => Self::Schedule,
            "photos" => Self::Photos,
            "payment" => Self::Payment,
            "confirmed" => Self::Confirmed,
            other => return Err(format!("unknown booking step `{other}`")),
        };
        Ok(step)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Authenticated,
    Guest,
    Edit,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::Guest => "guest",
            Self::Edit => "edit",
        }
    }
}

impl std::str::FromStr for FlowKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "authenticated" => Ok(Self::Authenticated),
            "guest" => Ok(Self::Guest),
            "edit" => Ok(Self::Edit),
            other => Err(format!("unknown booking flow `{other}`")),
        }
    }
}

/// Backend paths a flow talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEndpoints {
    pub shipments_path: String,
}

impl FlowEndpoints {
    pub fn dimensions(&self, draft_id: &str) -> String {
        format!("{}/{draft_id}/dimensions", self.shipments_path)
    }

    pub fn payment(&self, draft_id: &str) -> String {
        format!("{}/{draft_id}/payment", self.shipments_path)
    }

    pub fn shipment(&self, id: &str) -> String {
        format!("{}/{id}", self.shipments_path)
    }
}

/// One booking flow: its ordered steps, the steps that may be skipped, and its endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub kind: FlowKind,
    pub steps: Vec<BookingStep>,
    pub skippable: Vec<BookingStep>,
    pub endpoints: FlowEndpoints,
}

const AUTHENTICATED_STEPS: &[BookingStep] = &[
    BookingStep::PackageDetails,
    BookingStep::Addresses,
    BookingStep::Receiver,
    BookingStep::ShippingMethod,
    BookingStep::Dimensions,
    BookingStep::Schedule,
    BookingStep::Photos,
    BookingStep::Payment,
];

const GUEST_STEPS: &[BookingStep] = &[
    BookingStep::SenderContact,
    BookingStep::PackageDetails,
    BookingStep::Addresses,
    BookingStep::Receiver,
    BookingStep::ShippingMethod,
    BookingStep::Dimensions,
    BookingStep::Schedule,
    BookingStep::Payment,
];

impl FlowConfig {
    pub fn authenticated() -> Self {
        Self {
            kind: FlowKind::Authenticated,
            steps: AUTHENTICATED_STEPS.to_vec(),
            skippable: Vec::new(),
            endpoints: FlowEndpoints { shipments_path: "/shipments".to_string() },
        }
    }

    pub fn guest() -> Self {
        Self {
            kind: FlowKind::Guest,
            steps: GUEST_STEPS.to_vec(),
            skippable: Vec::new(),
            endpoints: FlowEndpoints { shipments_path: "/guest-shipments".to_string() },
        }
    }

    /// Editing an existing shipment: the authenticated steps, with the ones that only restate
    /// already-stored data skippable.
    pub fn edit_existing() -> Self {
        Self {
            kind: FlowKind::Edit,
            steps: AUTHENTICATED_STEPS.to_vec(),
            skippable: vec![
                BookingStep::Addresses,
                BookingStep::Receiver,
                BookingStep::Schedule,
                BookingStep::Photos,
            ],
            endpoints: FlowEndpoints { shipments_path: "/shipments".to_string() },
        }
    }

    pub fn for_kind(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Authenticated => Self::authenticated(),
            FlowKind::Guest => Self::guest(),
            FlowKind::Edit => Self::edit_existing(),
        }
    }

    pub fn initial_step(&self) -> BookingStep {
        self.steps.first().copied().unwrap_or(BookingStep::Payment)
    }

    pub fn contains(&self, step: BookingStep) -> bool {
        step == BookingStep::Confirmed || self.steps.contains(&step)
    }

    pub fn next(&self, step: BookingStep) -> Option<BookingStep> {
        let position = self.steps.iter().position(|candidate| *candidate == step)?;
        self.steps.get(position + 1).copied()
    }

    pub fn previous(&self, step: BookingStep) -> Option<BookingStep> {
        let position = self.steps.iter().position(|candidate| *candidate == step)?;
        position.checked_sub(1).and_then(|index| self.steps.get(index).copied())
    }

    pub fn allows_skip(&self, step: BookingStep) -> bool {
        self.skippable.contains(&step)
    }
}

/// What the dimensions step collects for the draft's freight choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionsMode {
    RawDimensions,
    /// Fixed-price catalog only.
    Catalog,
    /// Catalog plus ad-hoc items; raw dimensions remain an alternative.
    AddItem,
}

pub fn dimensions_mode(draft: &DraftShipment) -> DimensionsMode {
    match (draft.service_type, draft.package.package_type) {
        (Some(ServiceType::SeaFreight), Some(PackageType::Items)) => DimensionsMode::Catalog,
        (Some(ServiceType::AirFreight), _) => DimensionsMode::AddItem,
        _ => DimensionsMode::RawDimensions,
    }
}
