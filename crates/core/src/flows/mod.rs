pub mod engine;
pub mod steps;
pub mod store;
pub mod validation;

pub use engine::{BookingStepMachine, FlowTransitionError, PaymentGuard, StepOutcome};
pub use steps::{dimensions_mode, BookingStep, DimensionsMode, FlowConfig, FlowEndpoints, FlowKind};
pub use store::{DraftShipmentStore, InMemoryDraftShipmentStore};
pub use validation::{check_measurements, is_valid_email, validate_step};
