pub mod audit;
pub mod config;
pub mod costing;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod gateway;

pub use costing::{PriceCatalog, QuoteBuilder, RateCard, RateCardKind};
pub use domain::price_guide::{GuideSelection, PriceGuideId, PriceGuideItem};
pub use domain::quote::{Quote, QuoteBasis};
pub use domain::shipment::{DraftId, DraftShipment, PaymentMethod, ServiceType, SessionKey};
pub use errors::{
    ApplicationError, BookingError, DomainError, InterfaceError, InterfaceErrorKind, QuoteError,
};
pub use flows::{
    BookingStep, BookingStepMachine, DraftShipmentStore, FlowConfig, FlowKind, PaymentGuard,
};
pub use gateway::ShipmentBackend;
