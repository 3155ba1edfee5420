use rust_decimal::Decimal;

use crate::domain::shipment::PackageDimensions;

/// Cubic centimetres per volumetric kilogram.
pub const VOLUMETRIC_DIVISOR: u32 = 6000;

const CUBIC_CM_PER_CUBIC_METRE: u32 = 1_000_000;

/// `length × width × height / 6000`, or `None` when the volume does not fit a `Decimal`.
pub fn volumetric_weight(dims: &PackageDimensions) -> Option<Decimal> {
    cubic_centimetres(dims).map(|volume| volume / Decimal::from(VOLUMETRIC_DIVISOR))
}

/// The greater of the declared weight and the volumetric weight.
pub fn chargeable_weight(weight_kg: Decimal, dims: &PackageDimensions) -> Option<Decimal> {
    volumetric_weight(dims).map(|volumetric| weight_kg.max(volumetric))
}

pub fn volume_cubic_metres(dims: &PackageDimensions) -> Option<Decimal> {
    cubic_centimetres(dims).map(|volume| volume / Decimal::from(CUBIC_CM_PER_CUBIC_METRE))
}

fn cubic_centimetres(dims: &PackageDimensions) -> Option<Decimal> {
    dims.length_cm.checked_mul(dims.width_cm)?.checked_mul(dims.height_cm)
}
