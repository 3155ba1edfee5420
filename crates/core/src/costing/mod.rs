pub mod guides;
pub mod quote;
pub mod rates;
pub mod weight;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::shipment::ServiceType;

pub use guides::{to_line_items, to_line_items_from_ids, Aggregation, PriceCatalog};
pub use quote::{FeeSchedule, QuoteBuilder};
pub use rates::{
    check_weight_limit, FlatRateCard, LegacyTieredRateCard, RateBasis, RateCard, RateCardKind,
    UnitRate,
};
pub use weight::{chargeable_weight, volume_cubic_metres, volumetric_weight};

/// Input bounds for dimension-based pricing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
    pub max_dimension_cm: Decimal,
    pub sea_freight_max_weight_kg: Decimal,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self { max_dimension_cm: Decimal::from(1000), sea_freight_max_weight_kg: Decimal::from(40) }
    }
}

impl ValidationLimits {
    /// Per-item weight ceiling for a service; `None` means unbounded.
    pub fn weight_limit(&self, service: ServiceType) -> Option<Decimal> {
        match service {
            ServiceType::SeaFreight => Some(self.sea_freight_max_weight_kg),
            ServiceType::AirFreight
            | ServiceType::Jingsly
            | ServiceType::Frozen
            | ServiceType::Parcel => None,
        }
    }
}
