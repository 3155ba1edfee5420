use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price_guide::PriceGuideId;
use crate::domain::shipment::ServiceType;

pub type Money = Decimal;

/// Currency marker as used by the rate cards (`D` for the logistics-internal unit, `£`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(pub String);

impl CurrencyCode {
    pub fn internal() -> Self {
        Self("D".to_string())
    }

    pub fn gbp() -> Self {
        Self("£".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLineItem {
    pub id: PriceGuideId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
}

/// What the base fee was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteBasis {
    Weight {
        service_type: ServiceType,
        volumetric_weight_kg: Decimal,
        chargeable_weight_kg: Decimal,
        unit_rate: Money,
        frozen: bool,
    },
    Volume {
        service_type: ServiceType,
        volume_m3: Decimal,
        unit_rate: Money,
    },
    PriceGuides {
        line_items: Vec<QuoteLineItem>,
        dropped_ids: Vec<PriceGuideId>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub base_fee: Money,
    pub service_fee: Money,
    pub tax: Money,
    pub total: Money,
    pub currency: CurrencyCode,
    pub basis: QuoteBasis,
    pub trace: Vec<PricingTraceStep>,
}
