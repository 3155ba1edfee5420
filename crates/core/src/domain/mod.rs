pub mod price_guide;
pub mod quote;
pub mod shipment;
pub mod wire;

pub use price_guide::{GuideProvenance, GuideSelection, PriceGuideId, PriceGuideItem};
pub use quote::{CurrencyCode, Money, PricingTraceStep, Quote, QuoteBasis, QuoteLineItem};
pub use shipment::{
    AddressBlock, ContactDetails, DimensionsEntry, DraftId, DraftShipment, DraftStatus,
    PackageDetails, PackageDimensions, PackageType, PaymentMethod, PaymentRecord, PhotoRef,
    PickupSchedule, RawAddress, ServiceType, SessionKey,
};
