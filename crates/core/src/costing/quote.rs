use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::costing::guides::{to_line_items, PriceCatalog};
use crate::costing::rates::{check_weight_limit, RateBasis, RateCard};
use crate::costing::weight::{chargeable_weight, volume_cubic_metres, volumetric_weight};
use crate::costing::ValidationLimits;
use crate::domain::quote::{CurrencyCode, Money, PricingTraceStep, Quote, QuoteBasis};
use crate::domain::shipment::DraftShipment;
use crate::errors::{FieldError, FieldErrorCode, QuoteError, ValidationErrors};
use crate::flows::steps::BookingStep;
use crate::flows::validation::check_measurements;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub service_fee_rate: Decimal,
    pub tax_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { service_fee_rate: Decimal::new(20, 2), tax_rate: Decimal::new(20, 2) }
    }
}

/// Turns a draft shipment into a quote.
#[derive(Clone)]
pub struct QuoteBuilder {
    rate_card: Arc<dyn RateCard>,
    fees: FeeSchedule,
    limits: ValidationLimits,
    guide_currency: CurrencyCode,
}

impl QuoteBuilder {
    pub fn new(rate_card: Arc<dyn RateCard>) -> Self {
        Self {
            rate_card,
            fees: FeeSchedule::default(),
            limits: ValidationLimits::default(),
            guide_currency: CurrencyCode::gbp(),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_guide_currency(mut self, currency: CurrencyCode) -> Self {
        self.guide_currency = currency;
        self
    }

    pub fn rate_card(&self) -> &dyn RateCard {
        self.rate_card.as_ref()
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// A non-empty guide selection takes precedence over dimension-based pricing.
    pub fn build_quote(
        &self,
        draft: &DraftShipment,
        catalog: &PriceCatalog,
    ) -> Result<Quote, QuoteError> {
        if !draft.price_guides.is_empty() {
            return self.quote_from_guides(draft, catalog);
        }
        self.quote_from_dimensions(draft)
    }

    fn quote_from_guides(
        &self,
        draft: &DraftShipment,
        catalog: &PriceCatalog,
    ) -> Result<Quote, QuoteError> {
        let aggregation = to_line_items(&draft.price_guides, catalog, &draft.custom_items);
        let base_fee = round_money(aggregation.subtotal());
        let trace = vec![PricingTraceStep {
            stage: "base_fee".to_string(),
            detail: format!(
                "sum(unit_price * quantity) over {} guide line(s), {} unknown id(s) dropped",
                aggregation.lines.len(),
                aggregation.dropped_count()
            ),
            amount: base_fee,
        }];
        let basis = QuoteBasis::PriceGuides {
            line_items: aggregation.line_items(),
            dropped_ids: aggregation.dropped.iter().map(|(id, _)| id.clone()).collect(),
        };
        let currency = self.guide_currency.clone();
        self.apply_fees(base_fee, currency, basis, trace)
            .ok_or_else(|| too_large(draft.current_step, "price_guides"))
    }

    fn quote_from_dimensions(&self, draft: &DraftShipment) -> Result<Quote, QuoteError> {
        let entry = draft.dimensions.clone().unwrap_or_else(|| draft.package.declared.clone());
        let mut fields = check_measurements(&entry, &self.limits);
        if draft.service_type.is_none() {
            fields.insert(0, FieldError::required("service_type"));
        }
        let (Some(service), Some(dims), true) =
            (draft.service_type, entry.complete(), fields.is_empty())
        else {
            return Err(ValidationErrors { step: draft.current_step, fields }.into());
        };

        check_weight_limit(&self.limits, service, dims.weight_kg)?;

        let frozen = draft.frozen();
        let step = draft.current_step;
        let (Some(volumetric), Some(chargeable), Some(volume)) = (
            volumetric_weight(&dims),
            chargeable_weight(dims.weight_kg, &dims),
            volume_cubic_metres(&dims),
        ) else {
            return Err(too_large(step, "dimensions"));
        };

        let unit_rate = self.rate_card.resolve(service, chargeable, frozen)?;
        let quantity = match unit_rate.basis {
            RateBasis::PerCubicMetre => volume,
            RateBasis::PerKg => chargeable,
        };
        let base_fee = quantity
            .checked_mul(unit_rate.rate)
            .map(round_money)
            .ok_or_else(|| too_large(step, "dimensions.weight_kg"))?;

        let (basis, detail) = match unit_rate.basis {
            RateBasis::PerCubicMetre => (
                QuoteBasis::Volume {
                    service_type: service,
                    volume_m3: volume,
                    unit_rate: unit_rate.rate,
                },
                format!("{volume} m3 * {} {}/m3", unit_rate.rate, unit_rate.currency),
            ),
            RateBasis::PerKg => (
                QuoteBasis::Weight {
                    service_type: service,
                    volumetric_weight_kg: volumetric,
                    chargeable_weight_kg: chargeable,
                    unit_rate: unit_rate.rate,
                    frozen,
                },
                format!(
                    "max({} kg, {volumetric} kg volumetric) = {chargeable} kg * {} {}/kg",
                    dims.weight_kg, unit_rate.rate, unit_rate.currency
                ),
            ),
        };
        let trace =
            vec![PricingTraceStep { stage: "base_fee".to_string(), detail, amount: base_fee }];

        self.apply_fees(base_fee, unit_rate.currency, basis, trace)
            .ok_or_else(|| too_large(step, "dimensions.weight_kg"))
    }

    /// Service fee and tax are each rounded as they are derived, not only at the end.
    /// `None` when an amount no longer fits a `Decimal`.
    fn apply_fees(
        &self,
        base_fee: Money,
        currency: CurrencyCode,
        basis: QuoteBasis,
        mut trace: Vec<PricingTraceStep>,
    ) -> Option<Quote> {
        let service_fee = round_money(base_fee.checked_mul(self.fees.service_fee_rate)?);
        let subtotal = base_fee.checked_add(service_fee)?;
        let tax = round_money(subtotal.checked_mul(self.fees.tax_rate)?);
        let total = subtotal.checked_add(tax)?;

        trace.push(PricingTraceStep {
            stage: "service_fee".to_string(),
            detail: format!("round(base_fee * {})", self.fees.service_fee_rate),
            amount: service_fee,
        });
        trace.push(PricingTraceStep {
            stage: "tax".to_string(),
            detail: format!("round((base_fee + service_fee) * {})", self.fees.tax_rate),
            amount: tax,
        });
        trace.push(PricingTraceStep {
            stage: "total".to_string(),
            detail: "base_fee + service_fee + tax".to_string(),
            amount: total,
        });

        Some(Quote { base_fee, service_fee, tax, total, currency, basis, trace })
    }
}

/// Half-up to two decimal places.
pub fn round_money(amount: Decimal) -> Money {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn too_large(step: BookingStep, field: &str) -> QuoteError {
    ValidationErrors {
        step,
        fields: vec![FieldError::new(
            field,
            FieldErrorCode::ExceedsMaximum,
            format!("{field} is too large to price"),
        )],
    }
    .into()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{round_money, FeeSchedule, QuoteBuilder};
    use crate::costing::guides::PriceCatalog;
    use crate::costing::rates::{LegacyTieredRateCard, RateCardKind};
    use crate::domain::price_guide::{GuideSelection, PriceGuideId, PriceGuideItem};
    use crate::domain::quote::{CurrencyCode, QuoteBasis};
    use crate::domain::shipment::{DimensionsEntry, DraftId, DraftShipment, ServiceType};
    use crate::errors::{FieldErrorCode, QuoteError, RateResolutionError};
    use crate::flows::steps::{BookingStep, FlowKind};

    fn builder() -> QuoteBuilder {
        QuoteBuilder::new(RateCardKind::LegacyTiered.build())
    }

    fn draft(service: Option<ServiceType>, entry: DimensionsEntry) -> DraftShipment {
        let mut draft = DraftShipment::new(
            DraftId("D-1".to_string()),
            FlowKind::Authenticated,
            BookingStep::Dimensions,
            Utc::now(),
        );
        draft.service_type = service;
        draft.dimensions = Some(entry);
        draft
    }

    fn entry(weight: Decimal, length: i64, width: i64, height: i64) -> DimensionsEntry {
        DimensionsEntry {
            weight_kg: Some(weight),
            length_cm: Some(Decimal::from(length)),
            width_cm: Some(Decimal::from(width)),
            height_cm: Some(Decimal::from(height)),
        }
    }

    #[test]
    fn air_freight_scenario_matches_the_published_breakdown() {
        let quote = builder()
            .build_quote(
                &draft(Some(ServiceType::AirFreight), entry(Decimal::new(52, 1), 30, 20, 15)),
                &PriceCatalog::default(),
            )
            .expect("quote builds");

        assert_eq!(quote.base_fee, Decimal::new(338_000, 2));
        assert_eq!(quote.service_fee, Decimal::new(67_600, 2));
        assert_eq!(quote.tax, Decimal::new(81_120, 2));
        assert_eq!(quote.total, Decimal::new(486_720, 2));
        assert_eq!(quote.currency, CurrencyCode::internal());
        match quote.basis {
            QuoteBasis::Weight { volumetric_weight_kg, chargeable_weight_kg, unit_rate, .. } => {
                assert_eq!(volumetric_weight_kg, Decimal::new(15, 1));
                assert_eq!(chargeable_weight_kg, Decimal::new(52, 1));
                assert_eq!(unit_rate, Decimal::from(650));
            }
            other => panic!("expected weight basis, got {other:?}"),
        }
        assert_eq!(quote.trace.last().map(|step| step.amount), Some(quote.total));
    }

    #[test]
    fn fee_model_on_a_round_base_fee() {
        let catalog = PriceCatalog::new(vec![PriceGuideItem::catalog(
            "X",
            "Container slot",
            Decimal::from(1000),
            "PG-100",
        )]);
        let mut shipment = draft(None, DimensionsEntry::default());
        shipment.price_guides = GuideSelection::from_ids([PriceGuideId::from("X")]);

        let quote = builder().build_quote(&shipment, &catalog).expect("guide quote");

        assert_eq!(quote.base_fee, Decimal::from(1000));
        assert_eq!(quote.service_fee, Decimal::new(20_000, 2));
        assert_eq!(quote.tax, Decimal::new(24_000, 2));
        assert_eq!(quote.total, Decimal::new(144_000, 2));
    }

    #[test]
    fn guide_selection_skips_dimension_pricing() {
        let catalog = PriceCatalog::new(vec![
            PriceGuideItem::catalog("A", "Sofa", Decimal::from(20), "PG-1"),
            PriceGuideItem::catalog("B", "Fridge", Decimal::from(90), "PG-2"),
        ]);
        // Dimensions are incomplete and the service type is missing; neither matters here.
        let mut shipment = draft(None, DimensionsEntry::default());
        shipment.price_guides = GuideSelection::from_ids(
            ["A", "A", "B", "stale"].into_iter().map(PriceGuideId::from),
        );

        let quote = builder().build_quote(&shipment, &catalog).expect("guide quote");

        assert_eq!(quote.base_fee, Decimal::from(130));
        assert_eq!(quote.currency, CurrencyCode::gbp());
        match quote.basis {
            QuoteBasis::PriceGuides { line_items, dropped_ids } => {
                assert_eq!(line_items.len(), 2);
                assert_eq!(dropped_ids, vec![PriceGuideId::from("stale")]);
            }
            other => panic!("expected guide basis, got {other:?}"),
        }
    }

    #[test]
    fn staged_rounding_differs_from_rounding_once_at_the_end() {
        // 0.03 base: service round(0.006) = 0.01, tax round(0.04 * 0.2 = 0.008) = 0.01.
        let catalog = PriceCatalog::new(vec![PriceGuideItem::catalog(
            "S",
            "Envelope",
            Decimal::new(3, 2),
            "PG-5",
        )]);
        let mut shipment = draft(None, DimensionsEntry::default());
        shipment.price_guides = GuideSelection::from_ids([PriceGuideId::from("S")]);

        let quote = builder().build_quote(&shipment, &catalog).expect("guide quote");

        assert_eq!(quote.service_fee, Decimal::new(1, 2));
        assert_eq!(quote.tax, Decimal::new(1, 2));
        assert_eq!(quote.total, Decimal::new(5, 2));
        let unstaged = round_money(Decimal::new(3, 2) * Decimal::new(144, 2));
        assert_ne!(quote.total, unstaged);
    }

    #[test]
    fn half_up_rounding_at_the_midpoint() {
        assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2));
        assert_eq!(round_money(Decimal::new(1004, 3)), Decimal::new(100, 2));
    }

    #[test]
    fn frozen_flag_prices_heavy_air_freight_at_the_frozen_rate() {
        let mut shipment =
            draft(Some(ServiceType::AirFreight), entry(Decimal::from(200), 50, 50, 50));
        shipment.is_frozen = true;

        let quote = builder().build_quote(&shipment, &PriceCatalog::default()).expect("quote");

        assert_eq!(quote.base_fee, Decimal::from(220_000));
    }

    #[test]
    fn sea_freight_prices_volume_and_rejects_overweight_items() {
        let ok = builder()
            .build_quote(
                &draft(Some(ServiceType::SeaFreight), entry(Decimal::from(30), 100, 100, 50)),
                &PriceCatalog::default(),
            )
            .expect("sea quote");
        assert_eq!(ok.base_fee, Decimal::from(150));
        assert_eq!(ok.currency, CurrencyCode::gbp());

        let error = builder()
            .build_quote(
                &draft(Some(ServiceType::SeaFreight), entry(Decimal::from(41), 10, 10, 10)),
                &PriceCatalog::default(),
            )
            .expect_err("41kg sea item must be rejected");
        assert!(matches!(
            error,
            QuoteError::RateResolution(RateResolutionError::WeightLimitExceeded { .. })
        ));
        assert!(error.to_string().contains("exceeds 40kg per item"));
    }

    #[test]
    fn missing_inputs_are_reported_per_field() {
        let mut incomplete = entry(Decimal::ZERO, 30, 20, 15);
        incomplete.height_cm = None;

        let error = builder()
            .build_quote(&draft(None, incomplete), &PriceCatalog::default())
            .expect_err("incomplete draft");

        match error {
            QuoteError::Validation(errors) => {
                assert!(errors.has_field("service_type"));
                assert!(errors.has_field("dimensions.weight_kg"));
                assert!(errors.has_field("dimensions.height_cm"));
                assert!(!errors.has_field("dimensions.length_cm"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn sides_over_the_maximum_are_rejected_before_pricing() {
        let error = builder()
            .build_quote(
                &draft(Some(ServiceType::AirFreight), entry(Decimal::ONE, 5000, 5000, 5000)),
                &PriceCatalog::default(),
            )
            .expect_err("5000cm sides exceed the 1000cm maximum");

        match error {
            QuoteError::Validation(errors) => {
                assert_eq!(errors.fields.len(), 3);
                assert!(errors
                    .fields
                    .iter()
                    .all(|field| field.code == FieldErrorCode::ExceedsMaximum));
                assert!(errors.has_field("dimensions.length_cm"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn enormous_sides_are_a_field_error_not_a_panic() {
        let side = 10_000_000_000_i64;
        let error = builder()
            .build_quote(
                &draft(Some(ServiceType::AirFreight), entry(Decimal::ONE, side, side, side)),
                &PriceCatalog::default(),
            )
            .expect_err("1e10cm sides");

        assert!(matches!(
            error,
            QuoteError::Validation(errors) if errors.has_field("dimensions.height_cm")
        ));
    }

    #[test]
    fn weight_too_large_to_price_is_a_field_error() {
        let weight = Decimal::MAX / Decimal::from(100);
        let error = builder()
            .build_quote(
                &draft(Some(ServiceType::AirFreight), entry(weight, 10, 10, 10)),
                &PriceCatalog::default(),
            )
            .expect_err("base fee overflows");

        match error {
            QuoteError::Validation(errors) => {
                assert!(errors.has_field("dimensions.weight_kg"));
                assert_eq!(errors.fields[0].code, FieldErrorCode::ExceedsMaximum);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_service_blocks_the_quote() {
        let error = builder()
            .build_quote(
                &draft(Some(ServiceType::Parcel), entry(Decimal::ONE, 10, 10, 10)),
                &PriceCatalog::default(),
            )
            .expect_err("parcel has no dimension rate");
        assert_eq!(
            error,
            QuoteError::RateResolution(RateResolutionError::UnsupportedServiceType(
                ServiceType::Parcel
            ))
        );
    }

    #[test]
    fn custom_fee_schedule_is_honoured() {
        let builder = QuoteBuilder::new(std::sync::Arc::new(LegacyTieredRateCard)).with_fees(
            FeeSchedule { service_fee_rate: Decimal::new(10, 2), tax_rate: Decimal::ZERO },
        );
        let quote = builder
            .build_quote(
                &draft(Some(ServiceType::AirFreight), entry(Decimal::from(10), 10, 10, 10)),
                &PriceCatalog::default(),
            )
            .expect("quote");

        assert_eq!(quote.base_fee, Decimal::from(6500));
        assert_eq!(quote.service_fee, Decimal::from(650));
        assert_eq!(quote.tax, Decimal::ZERO);
        assert_eq!(quote.total, Decimal::from(7150));
    }
}
