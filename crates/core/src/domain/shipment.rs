use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price_guide::{GuideSelection, PriceGuideItem};
use crate::domain::quote::{CurrencyCode, Money};
use crate::errors::RateResolutionError;
use crate::flows::steps::{BookingStep, FlowKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(pub String);

/// Key of the browser/client session that owns a draft.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    AirFreight,
    SeaFreight,
    Jingsly,
    Frozen,
    Parcel,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AirFreight => "airfreight",
            Self::SeaFreight => "seafreight",
            Self::Jingsly => "jingsly",
            Self::Frozen => "frozen",
            Self::Parcel => "parcel",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = RateResolutionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "airfreight" => Ok(Self::AirFreight),
            "seafreight" => Ok(Self::SeaFreight),
            "jingsly" => Ok(Self::Jingsly),
            "frozen" => Ok(Self::Frozen),
            "parcel" => Ok(Self::Parcel),
            other => Err(RateResolutionError::UnknownServiceType(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Items,
    Documents,
    Parcel,
    Pallet,
}

/// Fully specified measurements, produced from a complete [`DimensionsEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDimensions {
    pub weight_kg: Decimal,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
}

/// Measurements as entered by the user; any field may still be blank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionsEntry {
    pub weight_kg: Option<Decimal>,
    pub length_cm: Option<Decimal>,
    pub width_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
}

impl DimensionsEntry {
    pub fn complete(&self) -> Option<PackageDimensions> {
        Some(PackageDimensions {
            weight_kg: self.weight_kg?,
            length_cm: self.length_cm?,
            width_cm: self.width_cm?,
            height_cm: self.height_cm?,
        })
    }

    pub fn is_blank(&self) -> bool {
        self.weight_kg.is_none()
            && self.length_cm.is_none()
            && self.width_cm.is_none()
            && self.height_cm.is_none()
    }

    /// `(field name, value)` pairs in form order.
    pub fn fields(&self) -> [(&'static str, Option<Decimal>); 4] {
        [
            ("weight_kg", self.weight_kg),
            ("length_cm", self.length_cm),
            ("width_cm", self.width_cm),
            ("height_cm", self.height_cm),
        ]
    }
}

impl From<PackageDimensions> for DimensionsEntry {
    fn from(value: PackageDimensions) -> Self {
        Self {
            weight_kg: Some(value.weight_kg),
            length_cm: Some(value.length_cm),
            width_cm: Some(value.width_cm),
            height_cm: Some(value.height_cm),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDetails {
    pub package_type: Option<PackageType>,
    pub description: String,
    pub declared: DimensionsEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: String,
    pub phone: String,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAddress {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressBlock {
    BookEntry { address_id: String },
    Raw(RawAddress),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupSchedule {
    pub pickup_date: Option<NaiveDate>,
    pub time_window: Option<String>,
}

/// Storage key of a photo held by the external upload service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Paypal,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Paypal => "paypal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub method: PaymentMethod,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub payment_status: String,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    InProgress,
    Confirmed,
    Abandoned,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Confirmed => "confirmed",
            Self::Abandoned => "abandoned",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftShipment {
    pub id: DraftId,
    pub flow: FlowKind,
    pub current_step: BookingStep,
    pub status: DraftStatus,
    #[serde(default)]
    pub sender: Option<ContactDetails>,
    #[serde(default)]
    pub package: PackageDetails,
    #[serde(default)]
    pub pickup: Option<AddressBlock>,
    #[serde(default)]
    pub delivery: Option<AddressBlock>,
    #[serde(default)]
    pub receiver: ContactDetails,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
    #[serde(default)]
    pub is_frozen: bool,
    #[serde(default)]
    pub dimensions: Option<DimensionsEntry>,
    #[serde(default)]
    pub price_guides: GuideSelection,
    #[serde(default)]
    pub custom_items: Vec<PriceGuideItem>,
    #[serde(default)]
    pub schedule: Option<PickupSchedule>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub payment: Option<PaymentRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftShipment {
    pub fn new(id: DraftId, flow: FlowKind, initial_step: BookingStep, now: DateTime<Utc>) -> Self {
        Self {
            id,
            flow,
            current_step: initial_step,
            status: DraftStatus::InProgress,
            sender: None,
            package: PackageDetails::default(),
            pickup: None,
            delivery: None,
            receiver: ContactDetails::default(),
            service_type: None,
            is_frozen: false,
            dimensions: None,
            price_guides: GuideSelection::default(),
            custom_items: Vec::new(),
            schedule: None,
            photos: Vec::new(),
            payment_method: None,
            payment: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == DraftStatus::Confirmed
    }

    /// Frozen goods are priced with the frozen surcharge whether flagged or booked as `frozen`.
    pub fn frozen(&self) -> bool {
        self.is_frozen || self.service_type == Some(ServiceType::Frozen)
    }
}
