use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::costing::ValidationLimits;
use crate::domain::quote::{CurrencyCode, Money};
use crate::domain::shipment::ServiceType;
use crate::errors::RateResolutionError;

/// Upper bound (inclusive, kg) and per-kg rate; weights above the last bound use the top rate.
const STANDARD_TIERS: &[(u32, u32)] = &[(50, 650), (100, 550)];
const STANDARD_TOP_RATE: u32 = 500;
const FROZEN_RATE_PER_KG: u32 = 1100;
const SEA_RATE_PER_CUBIC_METRE: u32 = 300;
const FLAT_AIR_RATE_PER_KG: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateBasis {
    PerKg,
    PerCubicMetre,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRate {
    pub rate: Money,
    pub currency: CurrencyCode,
    pub basis: RateBasis,
}

impl UnitRate {
    fn per_kg(rate: u32, currency: CurrencyCode) -> Self {
        Self { rate: Decimal::from(rate), currency, basis: RateBasis::PerKg }
    }

    fn per_cubic_metre(rate: u32, currency: CurrencyCode) -> Self {
        Self { rate: Decimal::from(rate), currency, basis: RateBasis::PerCubicMetre }
    }
}

/// The two rate-card variants found in the booking code base. Which one is canonical must be
/// designated in configuration; neither is assumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateCardKind {
    LegacyTiered,
    Flat,
}

impl RateCardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegacyTiered => "legacy_tiered",
            Self::Flat => "flat",
        }
    }

    pub fn build(self) -> Arc<dyn RateCard> {
        match self {
            Self::LegacyTiered => Arc::new(LegacyTieredRateCard),
            Self::Flat => Arc::new(FlatRateCard),
        }
    }
}

impl std::str::FromStr for RateCardKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy_tiered" => Ok(Self::LegacyTiered),
            "flat" => Ok(Self::Flat),
            other => {
                Err(format!("unsupported rate card `{other}` (expected legacy_tiered|flat)"))
            }
        }
    }
}

pub trait RateCard: Send + Sync {
    fn kind(&self) -> RateCardKind;

    /// `measure` is the chargeable weight (kg) for weight-priced services and the volume (m³)
    /// for sea freight.
    fn resolve(
        &self,
        service: ServiceType,
        measure: Decimal,
        is_frozen: bool,
    ) -> Result<UnitRate, RateResolutionError>;
}

/// Tiered internal-unit rates for air freight and jingsly.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyTieredRateCard;

impl RateCard for LegacyTieredRateCard {
    fn kind(&self) -> RateCardKind {
        RateCardKind::LegacyTiered
    }

    fn resolve(
        &self,
        service: ServiceType,
        measure: Decimal,
        is_frozen: bool,
    ) -> Result<UnitRate, RateResolutionError> {
        match service {
            ServiceType::SeaFreight => Ok(sea_rate()),
            ServiceType::Parcel => Err(RateResolutionError::UnsupportedServiceType(service)),
            ServiceType::Frozen => Ok(frozen_rate()),
            ServiceType::AirFreight | ServiceType::Jingsly if is_frozen => Ok(frozen_rate()),
            ServiceType::AirFreight | ServiceType::Jingsly => Ok(tiered_rate(measure)),
        }
    }
}

/// Flat sterling air rate; jingsly keeps the tiered internal-unit rates.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatRateCard;

impl RateCard for FlatRateCard {
    fn kind(&self) -> RateCardKind {
        RateCardKind::Flat
    }

    fn resolve(
        &self,
        service: ServiceType,
        measure: Decimal,
        is_frozen: bool,
    ) -> Result<UnitRate, RateResolutionError> {
        match service {
            ServiceType::SeaFreight => Ok(sea_rate()),
            ServiceType::Parcel => Err(RateResolutionError::UnsupportedServiceType(service)),
            ServiceType::Frozen => Ok(frozen_rate()),
            ServiceType::AirFreight | ServiceType::Jingsly if is_frozen => Ok(frozen_rate()),
            ServiceType::AirFreight => {
                Ok(UnitRate::per_kg(FLAT_AIR_RATE_PER_KG, CurrencyCode::gbp()))
            }
            ServiceType::Jingsly => Ok(tiered_rate(measure)),
        }
    }
}

/// Rejects items heavier than the service allows. Never clamps.
pub fn check_weight_limit(
    limits: &ValidationLimits,
    service: ServiceType,
    weight_kg: Decimal,
) -> Result<(), RateResolutionError> {
    match limits.weight_limit(service) {
        Some(limit_kg) if weight_kg > limit_kg => {
            Err(RateResolutionError::WeightLimitExceeded { service, weight_kg, limit_kg })
        }
        _ => Ok(()),
    }
}

fn tiered_rate(chargeable_weight_kg: Decimal) -> UnitRate {
    let rate = STANDARD_TIERS
        .iter()
        .find(|(upper_kg, _)| chargeable_weight_kg <= Decimal::from(*upper_kg))
        .map(|(_, rate)| *rate)
        .unwrap_or(STANDARD_TOP_RATE);
    UnitRate::per_kg(rate, CurrencyCode::internal())
}

fn frozen_rate() -> UnitRate {
    UnitRate::per_kg(FROZEN_RATE_PER_KG, CurrencyCode::internal())
}

fn sea_rate() -> UnitRate {
    UnitRate::per_cubic_metre(SEA_RATE_PER_CUBIC_METRE, CurrencyCode::gbp())
}
