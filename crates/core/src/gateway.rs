use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::price_guide::PriceGuideItem;
use crate::domain::shipment::DraftId;
use crate::domain::wire::{DimensionsPayload, PaymentConfirmation, ShipmentRecord};
use crate::errors::{ExternalCallError, ExternalErrorKind};
use crate::flows::steps::FlowEndpoints;

/// The remote shipment API: catalog, draft persistence and payment confirmation.
#[async_trait]
pub trait ShipmentBackend: Send + Sync {
    async fn price_guides(&self) -> Result<Vec<PriceGuideItem>, ExternalCallError>;

    async fn save_dimensions(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        payload: &DimensionsPayload,
    ) -> Result<ShipmentRecord, ExternalCallError>;

    async fn confirm_payment(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        confirmation: &PaymentConfirmation,
    ) -> Result<ShipmentRecord, ExternalCallError>;

    async fn fetch_shipment(
        &self,
        endpoints: &FlowEndpoints,
        id: &str,
    ) -> Result<ShipmentRecord, ExternalCallError>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    PriceGuides,
    SaveDimensions { path: String, payload: DimensionsPayload },
    ConfirmPayment { path: String, confirmation: PaymentConfirmation },
    FetchShipment { path: String },
}

#[derive(Default)]
struct InMemoryState {
    catalog: Vec<PriceGuideItem>,
    shipments: HashMap<String, ShipmentRecord>,
    calls: Vec<BackendCall>,
    payment_status: Option<String>,
    failure: Option<ExternalErrorKind>,
}

/// Backend double that records every call and echoes a configurable payment status.
#[derive(Clone, Default)]
pub struct InMemoryShipmentBackend {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryShipmentBackend {
    pub fn with_catalog(catalog: Vec<PriceGuideItem>) -> Self {
        let backend = Self::default();
        backend.update(|state| state.catalog = catalog);
        backend
    }

    /// Status echoed by `confirm_payment`; `paid` unless overridden.
    pub fn echo_payment_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.update(|state| state.payment_status = Some(status));
    }

    /// Record served by `fetch_shipment` for its id.
    pub fn store_shipment(&self, record: ShipmentRecord) {
        self.update(|state| {
            state.shipments.insert(record.id.clone(), record);
        });
    }

    pub fn fail_with(&self, kind: Option<ExternalErrorKind>) {
        self.update(|state| state.failure = kind);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        match self.state.lock() {
            Ok(state) => state.calls.clone(),
            Err(poisoned) => poisoned.into_inner().calls.clone(),
        }
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut InMemoryState),
    {
        match self.state.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    fn record(
        &self,
        operation: &str,
        call: BackendCall,
    ) -> Result<InMemorySnapshot, ExternalCallError> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.calls.push(call);
        if let Some(kind) = state.failure {
            return Err(ExternalCallError::new(operation, kind, "injected backend failure"));
        }
        Ok(InMemorySnapshot {
            catalog: state.catalog.clone(),
            shipments: state.shipments.clone(),
            payment_status: state.payment_status.clone(),
        })
    }
}

struct InMemorySnapshot {
    catalog: Vec<PriceGuideItem>,
    shipments: HashMap<String, ShipmentRecord>,
    payment_status: Option<String>,
}

fn record_for(draft_id: &str) -> ShipmentRecord {
    ShipmentRecord {
        id: draft_id.to_string(),
        price: None,
        price_guides: Vec::new(),
        pickup_address: None,
        delivery_address: None,
        payment_status: None,
        current_step: None,
    }
}

#[async_trait]
impl ShipmentBackend for InMemoryShipmentBackend {
    async fn price_guides(&self) -> Result<Vec<PriceGuideItem>, ExternalCallError> {
        Ok(self.record("price_guides", BackendCall::PriceGuides)?.catalog)
    }

    async fn save_dimensions(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        payload: &DimensionsPayload,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        let call = BackendCall::SaveDimensions {
            path: endpoints.dimensions(&draft_id.0),
            payload: payload.clone(),
        };
        self.record("save_dimensions", call)?;
        Ok(record_for(&draft_id.0))
    }

    async fn confirm_payment(
        &self,
        endpoints: &FlowEndpoints,
        draft_id: &DraftId,
        confirmation: &PaymentConfirmation,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        let call = BackendCall::ConfirmPayment {
            path: endpoints.payment(&draft_id.0),
            confirmation: confirmation.clone(),
        };
        let snapshot = self.record("confirm_payment", call)?;
        let mut record = record_for(&draft_id.0);
        record.price = Some(confirmation.amount);
        record.payment_status =
            Some(snapshot.payment_status.unwrap_or_else(|| confirmation.payment_status.clone()));
        Ok(record)
    }

    async fn fetch_shipment(
        &self,
        endpoints: &FlowEndpoints,
        id: &str,
    ) -> Result<ShipmentRecord, ExternalCallError> {
        let call = BackendCall::FetchShipment { path: endpoints.shipment(id) };
        let mut snapshot = self.record("fetch_shipment", call)?;
        Ok(snapshot.shipments.remove(id).unwrap_or_else(|| record_for(id)))
    }
}
