//! Wire shapes exchanged with the shipment backend.
//!
//! Shipment records read back from the backend are not uniform: the address blocks and the price
//! guide list are sometimes structured JSON and sometimes a JSON document encoded into a string.
//! [`ShipmentRecord`] accepts both and always yields the typed model.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::price_guide::{GuideProvenance, PriceGuideId, PriceGuideItem};
use crate::domain::quote::{CurrencyCode, Money};
use crate::domain::shipment::{AddressBlock, PackageDimensions, PaymentMethod, RawAddress};
use crate::flows::steps::BookingStep;

const CUSTOM_ID_PREFIX: &str = "custom-";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("field `{field}` could not be decoded: {source}")]
    Field { field: &'static str, source: serde_json::Error },
}

/// One catalog entry as served by `GET priceGuides()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceGuideWire {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "guideName")]
    pub guide_name: String,
    pub price: Decimal,
    #[serde(rename = "guideNumber", default)]
    pub guide_number: String,
}

impl From<PriceGuideWire> for PriceGuideItem {
    fn from(value: PriceGuideWire) -> Self {
        let provenance = if value.id.starts_with(CUSTOM_ID_PREFIX) {
            GuideProvenance::Custom
        } else {
            GuideProvenance::Catalog
        };
        Self {
            id: PriceGuideId(value.id),
            name: value.guide_name,
            unit_price: value.price,
            catalog_number: value.guide_number,
            provenance,
        }
    }
}

impl From<&PriceGuideItem> for PriceGuideWire {
    fn from(value: &PriceGuideItem) -> Self {
        Self {
            id: value.id.0.clone(),
            guide_name: value.name.clone(),
            price: value.unit_price,
            guide_number: value.catalog_number.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MeasuredDimensions {
    pub length: Decimal,
    pub width: Decimal,
    pub height: Decimal,
}

/// Body of `PUT /{draftId}/dimensions`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DimensionsPayload {
    Measured {
        weight: Decimal,
        dimensions: MeasuredDimensions,
    },
    Guides {
        #[serde(rename = "priceGuides")]
        price_guides: Vec<PriceGuideWire>,
    },
}

impl DimensionsPayload {
    pub fn measured(dims: &PackageDimensions) -> Self {
        Self::Measured {
            weight: dims.weight_kg,
            dimensions: MeasuredDimensions {
                length: dims.length_cm,
                width: dims.width_cm,
                height: dims.height_cm,
            },
        }
    }

    /// Expands quantities back into repeated entries, the shape the backend stores.
    pub fn guides<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (&'a PriceGuideItem, u32)>,
    {
        let price_guides = items
            .into_iter()
            .flat_map(|(item, quantity)| {
                std::iter::repeat(PriceGuideWire::from(item)).take(quantity as usize)
            })
            .collect();
        Self::Guides { price_guides }
    }
}

/// Body of `PUT /{draftId}/payment`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub method: PaymentMethod,
    pub amount: Money,
    pub currency: CurrencyCode,
    #[serde(rename = "paymentStatus")]
    pub payment_status: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum AddressWire {
    Reference {
        #[serde(rename = "addressId", alias = "address_id")]
        address_id: String,
    },
    Raw(RawAddress),
}

impl From<AddressWire> for AddressBlock {
    fn from(value: AddressWire) -> Self {
        match value {
            AddressWire::Reference { address_id } => Self::BookEntry { address_id },
            AddressWire::Raw(raw) => Self::Raw(raw),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawShipmentRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(rename = "priceGuides", default)]
    price_guides: Value,
    #[serde(rename = "pickupAddress", default)]
    pickup_address: Value,
    #[serde(rename = "deliveryAddress", default)]
    delivery_address: Value,
    #[serde(rename = "paymentStatus", default)]
    payment_status: Option<String>,
    #[serde(rename = "currentStep", default)]
    current_step: Option<BookingStep>,
}

/// Shipment record as read back from the backend, normalized.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawShipmentRecord")]
pub struct ShipmentRecord {
    pub id: String,
    pub price: Option<Money>,
    pub price_guides: Vec<PriceGuideItem>,
    pub pickup_address: Option<AddressBlock>,
    pub delivery_address: Option<AddressBlock>,
    pub payment_status: Option<String>,
    pub current_step: Option<BookingStep>,
}

impl ShipmentRecord {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref().map(|status| status.eq_ignore_ascii_case("paid"))
            == Some(true)
    }
}

impl TryFrom<RawShipmentRecord> for ShipmentRecord {
    type Error = WireError;

    fn try_from(raw: RawShipmentRecord) -> Result<Self, Self::Error> {
        let price_guides: Vec<PriceGuideWire> =
            decode_embedded("priceGuides", raw.price_guides)?.unwrap_or_default();
        let pickup_address: Option<AddressWire> =
            decode_embedded("pickupAddress", raw.pickup_address)?;
        let delivery_address: Option<AddressWire> =
            decode_embedded("deliveryAddress", raw.delivery_address)?;

        Ok(Self {
            id: raw.id,
            price: raw.price,
            price_guides: price_guides.into_iter().map(PriceGuideItem::from).collect(),
            pickup_address: pickup_address.map(AddressBlock::from),
            delivery_address: delivery_address.map(AddressBlock::from),
            payment_status: raw.payment_status,
            current_step: raw.current_step,
        })
    }
}

/// Decodes a value that is either the JSON structure itself or a string holding it.
pub fn decode_embedded<T>(field: &'static str, value: Value) -> Result<Option<T>, WireError>
where
    T: DeserializeOwned,
{
    let decoded = match value {
        Value::Null => return Ok(None),
        Value::String(encoded) if encoded.trim().is_empty() => return Ok(None),
        Value::String(encoded) => serde_json::from_str(&encoded),
        structured => serde_json::from_value(structured),
    };
    decoded.map(Some).map_err(|source| WireError::Field { field, source })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => {
            Err(serde::de::Error::custom(format!("expected string or number id, got {other}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{DimensionsPayload, PriceGuideWire, ShipmentRecord};
    use crate::domain::price_guide::{GuideProvenance, PriceGuideItem};
    use crate::domain::shipment::{AddressBlock, PackageDimensions};

    #[test]
    fn shipment_record_accepts_string_encoded_nested_blocks() {
        let payload = json!({
            "id": 812,
            "price": "4867.20",
            "priceGuides":
                r#"[{"id":"A","guideName":"Sofa","price":20,"guideNumber":"PG-1"}]"#,
            "pickupAddress": "{\"addressId\":\"addr-9\"}",
            "deliveryAddress": {
                "line1": "1 Harbour Road",
                "city": "Banjul",
                "postcode": "GM1",
                "country": "GM"
            },
            "paymentStatus": "paid"
        });

        let record: ShipmentRecord = serde_json::from_value(payload).expect("record decodes");

        assert_eq!(record.id, "812");
        assert_eq!(record.price, Some(Decimal::new(486_720, 2)));
        assert_eq!(record.price_guides.len(), 1);
        assert_eq!(record.price_guides[0].unit_price, Decimal::from(20));
        assert_eq!(
            record.pickup_address,
            Some(AddressBlock::BookEntry { address_id: "addr-9".to_string() })
        );
        assert!(matches!(
            record.delivery_address,
            Some(AddressBlock::Raw(ref raw)) if raw.city == "Banjul"
        ));
        assert!(record.is_paid());
    }

    #[test]
    fn structured_and_encoded_forms_normalize_identically() {
        let guides =
            json!([{ "id": "B", "guideName": "Fridge", "price": "90", "guideNumber": "PG-2" }]);
        let structured: ShipmentRecord =
            serde_json::from_value(json!({ "id": "S-1", "priceGuides": guides.clone() }))
                .expect("structured");
        let encoded: ShipmentRecord =
            serde_json::from_value(json!({ "id": "S-1", "priceGuides": guides.to_string() }))
                .expect("encoded");

        assert_eq!(structured, encoded);
        assert_eq!(structured.pickup_address, None);
        assert!(!structured.is_paid());
    }

    #[test]
    fn malformed_encoded_block_is_reported_with_its_field() {
        let result = serde_json::from_value::<ShipmentRecord>(
            json!({ "id": "S-2", "pickupAddress": "{not json" }),
        );

        let message = result.expect_err("malformed block must fail").to_string();
        assert!(message.contains("pickupAddress"));
    }

    #[test]
    fn guides_payload_repeats_items_by_quantity() {
        let sofa = PriceGuideItem::catalog("A", "Sofa", Decimal::from(20), "PG-1");
        let payload = DimensionsPayload::guides([(&sofa, 2)]);

        let body = serde_json::to_value(&payload).expect("encode");
        let guides = body["priceGuides"].as_array().expect("array");
        assert_eq!(guides.len(), 2);
        assert_eq!(guides[0]["guideName"], "Sofa");
    }

    #[test]
    fn measured_payload_nests_linear_dimensions() {
        let payload = DimensionsPayload::measured(&PackageDimensions {
            weight_kg: Decimal::new(52, 1),
            length_cm: Decimal::from(30),
            width_cm: Decimal::from(20),
            height_cm: Decimal::from(15),
        });

        let body = serde_json::to_value(&payload).expect("encode");
        assert_eq!(body["weight"], "5.2");
        assert_eq!(body["dimensions"]["length"], "30");
    }

    #[test]
    fn custom_prefixed_ids_keep_custom_provenance() {
        let item = PriceGuideItem::from(PriceGuideWire {
            id: "custom-1f2e".to_string(),
            guide_name: "Bicycle".to_string(),
            price: Decimal::ZERO,
            guide_number: String::new(),
        });
        assert_eq!(item.provenance, GuideProvenance::Custom);
    }
}
