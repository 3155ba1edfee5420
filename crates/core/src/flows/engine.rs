use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use crate::costing::{to_line_items, PriceCatalog, QuoteBuilder};
use crate::domain::price_guide::GuideProvenance;
use crate::domain::quote::Quote;
use crate::domain::shipment::{
    DraftId, DraftShipment, DraftStatus, PaymentMethod, PaymentRecord, SessionKey,
};
use crate::domain::wire::{DimensionsPayload, PaymentConfirmation};
use crate::errors::{BookingError, FieldError, ValidationErrors};
use crate::flows::steps::{dimensions_mode, BookingStep, DimensionsMode, FlowConfig, FlowKind};
use crate::flows::store::DraftShipmentStore;
use crate::flows::validation::validate_step;
use crate::gateway::ShipmentBackend;

const PAID: &str = "paid";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("cannot go back from {step:?}: it is the first step of the flow")]
    AtInitialStep { step: BookingStep },
    #[error("step {step:?} cannot be skipped in this flow")]
    SkipNotPermitted { step: BookingStep },
    #[error("the payment step completes only through payment confirmation")]
    PaymentRequired,
    #[error("payment can only be confirmed at the payment step, draft is at {step:?}")]
    NotAtPaymentStep { step: BookingStep },
    #[error("a payment confirmation is already in flight for session `{session}`")]
    PaymentInFlight { session: String },
    #[error("draft `{draft_id}` is confirmed and can no longer change")]
    DraftImmutable { draft_id: String },
    #[error("step {step:?} is not part of the {flow:?} flow")]
    StepNotInFlow { step: BookingStep, flow: FlowKind },
    #[error("draft belongs to the {actual:?} flow, not {expected:?}")]
    FlowMismatch { expected: FlowKind, actual: FlowKind },
    #[error("no booking is in progress for session `{session}`")]
    NoDraftInProgress { session: String },
    #[error("draft `{submitted}` is not the draft `{stored}` in progress for this session")]
    DraftMismatch { stored: String, submitted: String },
    #[error("draft is at {stored:?}, not {submitted:?}; reload it before continuing")]
    StaleStep { stored: BookingStep, submitted: BookingStep },
    #[error("backend did not confirm payment (status: {status:?})")]
    PaymentNotConfirmed { status: Option<String> },
}

/// Result of a successful transition; `draft` is the persisted state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub from: BookingStep,
    pub to: BookingStep,
    pub draft: DraftShipment,
}

/// Drives one booking flow: per-step gates, navigation, persistence and payment hand-off.
pub struct BookingStepMachine {
    flow: FlowConfig,
    store: Arc<dyn DraftShipmentStore>,
    backend: Arc<dyn ShipmentBackend>,
    quotes: QuoteBuilder,
    audit: Arc<dyn AuditSink>,
    payments: PaymentGuard,
}

impl BookingStepMachine {
    pub fn new(
        flow: FlowConfig,
        store: Arc<dyn DraftShipmentStore>,
        backend: Arc<dyn ShipmentBackend>,
        quotes: QuoteBuilder,
    ) -> Self {
        Self {
            flow,
            store,
            backend,
            quotes,
            audit: Arc::new(TracingAuditSink),
            payments: PaymentGuard::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Machines serving the same sessions must share one guard.
    pub fn with_payment_guard(mut self, payments: PaymentGuard) -> Self {
        self.payments = payments;
        self
    }

    pub fn flow(&self) -> &FlowConfig {
        &self.flow
    }

    pub async fn start(
        &self,
        session: &SessionKey,
        draft_id: DraftId,
    ) -> Result<DraftShipment, BookingError> {
        let draft =
            DraftShipment::new(draft_id, self.flow.kind, self.flow.initial_step(), Utc::now());
        self.store.set(session, &draft).await?;

        info!(
            event_name = "booking.started",
            session = %session.0,
            draft_id = %draft.id.0,
            flow = self.flow.kind.as_str(),
            "booking draft started"
        );
        self.emit(
            session,
            &draft,
            "booking.started",
            AuditCategory::Flow,
            AuditOutcome::Success,
            |event| event.detail("step", draft.current_step.as_str()),
        );
        Ok(draft)
    }

    /// Seeds a draft from a shipment the backend already holds, for the edit flow.
    ///
    /// Repeated guide entries in the stored record come back as quantities; custom items are kept
    /// once each so their ids still resolve.
    pub async fn load_existing(
        &self,
        session: &SessionKey,
        shipment_id: &str,
    ) -> Result<DraftShipment, BookingError> {
        let record = self.backend.fetch_shipment(&self.flow.endpoints, shipment_id).await?;
        let mut draft = DraftShipment::new(
            DraftId(record.id),
            self.flow.kind,
            self.flow.initial_step(),
            Utc::now(),
        );
        draft.pickup = record.pickup_address;
        draft.delivery = record.delivery_address;
        for item in record.price_guides {
            draft.price_guides.add(item.id.clone());
            let known = draft.custom_items.iter().any(|custom| custom.id == item.id);
            if item.provenance == GuideProvenance::Custom && !known {
                draft.custom_items.push(item);
            }
        }
        self.store.set(session, &draft).await?;

        info!(
            event_name = "booking.loaded_existing",
            session = %session.0,
            draft_id = %draft.id.0,
            guides = draft.price_guides.len(),
            "existing shipment loaded for editing"
        );
        self.emit(
            session,
            &draft,
            "booking.loaded_existing",
            AuditCategory::Integration,
            AuditOutcome::Success,
            |event| event.detail("step", draft.current_step.as_str()),
        );
        Ok(draft)
    }

    pub async fn resume(
        &self,
        session: &SessionKey,
    ) -> Result<Option<DraftShipment>, BookingError> {
        Ok(self.store.get(session).await?)
    }

    /// Field failures that currently block the draft's step.
    pub fn validate(&self, draft: &DraftShipment) -> Vec<FieldError> {
        validate_step(draft.current_step, draft, &self.flow, self.quotes.limits())
    }

    pub async fn advance(
        &self,
        session: &SessionKey,
        mut draft: DraftShipment,
    ) -> Result<StepOutcome, BookingError> {
        self.ensure_transition_allowed(session, &draft).await?;
        let from = draft.current_step;
        if from == BookingStep::Payment {
            return Err(self.refuse(session, &draft, FlowTransitionError::PaymentRequired));
        }

        let fields = self.validate(&draft);
        if !fields.is_empty() {
            warn!(
                event_name = "booking.step_rejected",
                session = %session.0,
                step = from.as_str(),
                failing_fields = fields.len(),
                "step validation failed"
            );
            self.emit(
                session,
                &draft,
                "booking.step_rejected",
                AuditCategory::Flow,
                AuditOutcome::Rejected,
                |event| {
                    let names: Vec<&str> =
                        fields.iter().map(|error| error.field.as_str()).collect();
                    event
                        .detail("step", from.as_str())
                        .detail("fields", names.join(","))
                },
            );
            return Err(ValidationErrors { step: from, fields }.into());
        }

        let to = self.next_step(&draft)?;
        if from == BookingStep::Dimensions {
            self.persist_dimensions(session, &mut draft).await?;
        }
        self.move_to(session, draft, from, to, "booking.step_advanced").await
    }

    pub async fn retreat(
        &self,
        session: &SessionKey,
        draft: DraftShipment,
    ) -> Result<StepOutcome, BookingError> {
        self.ensure_transition_allowed(session, &draft).await?;
        let from = draft.current_step;
        let Some(to) = self.flow.previous(from) else {
            let error = FlowTransitionError::AtInitialStep { step: from };
            return Err(self.refuse(session, &draft, error));
        };
        self.move_to(session, draft, from, to, "booking.step_retreated").await
    }

    pub async fn skip(
        &self,
        session: &SessionKey,
        draft: DraftShipment,
    ) -> Result<StepOutcome, BookingError> {
        self.ensure_transition_allowed(session, &draft).await?;
        let from = draft.current_step;
        if !self.flow.allows_skip(from) {
            let error = FlowTransitionError::SkipNotPermitted { step: from };
            return Err(self.refuse(session, &draft, error));
        }
        let to = self.next_step(&draft)?;
        self.move_to(session, draft, from, to, "booking.step_skipped").await
    }

    /// Sends the quoted total to the backend and confirms the draft once the backend reports it
    /// paid. At most one confirmation per session runs at a time, across every machine sharing
    /// the payment guard.
    pub async fn confirm_payment(
        &self,
        session: &SessionKey,
        mut draft: DraftShipment,
        method: PaymentMethod,
    ) -> Result<StepOutcome, BookingError> {
        // The slot is taken before the stored draft is read so a second confirmation sees the
        // first one's result.
        let Some(_in_flight) = self.payments.acquire(session) else {
            let error = FlowTransitionError::PaymentInFlight { session: session.0.clone() };
            return Err(self.refuse(session, &draft, error));
        };
        self.ensure_transition_allowed(session, &draft).await?;
        let from = draft.current_step;
        if from != BookingStep::Payment {
            let error = FlowTransitionError::NotAtPaymentStep { step: from };
            return Err(self.refuse(session, &draft, error));
        }

        draft.payment_method = Some(method);
        let quote = self.quote(&draft).await?;
        let confirmation = PaymentConfirmation {
            method,
            amount: quote.total,
            currency: quote.currency.clone(),
            payment_status: PAID.to_string(),
        };
        let record =
            self.backend.confirm_payment(&self.flow.endpoints, &draft.id, &confirmation).await?;
        if !record.is_paid() {
            warn!(
                event_name = "booking.payment_not_confirmed",
                session = %session.0,
                draft_id = %draft.id.0,
                status = record.payment_status.as_deref().unwrap_or(""),
                "backend did not echo a paid status"
            );
            let error = FlowTransitionError::PaymentNotConfirmed { status: record.payment_status };
            return Err(self.refuse(session, &draft, error));
        }

        let now = Utc::now();
        draft.status = DraftStatus::Confirmed;
        draft.current_step = BookingStep::Confirmed;
        draft.payment = Some(PaymentRecord {
            method,
            amount: confirmation.amount,
            currency: confirmation.currency,
            payment_status: PAID.to_string(),
            confirmed_at: now,
        });
        draft.updated_at = now;
        self.store.set(session, &draft).await?;

        info!(
            event_name = "booking.payment_confirmed",
            session = %session.0,
            draft_id = %draft.id.0,
            total = %quote.total,
            currency = %quote.currency,
            "booking confirmed"
        );
        self.emit(
            session,
            &draft,
            "booking.payment_confirmed",
            AuditCategory::Payment,
            AuditOutcome::Success,
            |event| {
                event
                    .detail("method", method.as_str())
                    .detail("total", quote.total.to_string())
                    .detail("currency", quote.currency.as_str())
            },
        );
        Ok(StepOutcome { from, to: BookingStep::Confirmed, draft })
    }

    /// Clears the session's draft. A confirmed draft is kept.
    pub async fn abandon(&self, session: &SessionKey) -> Result<(), BookingError> {
        let existing = self.store.get(session).await?;
        if let Some(draft) = existing.as_ref().filter(|draft| draft.is_confirmed()) {
            let error = FlowTransitionError::DraftImmutable { draft_id: draft.id.0.clone() };
            return Err(self.refuse(session, draft, error));
        }
        self.store.clear(session).await?;

        info!(event_name = "booking.abandoned", session = %session.0, "booking draft abandoned");
        if let Some(mut draft) = existing {
            draft.status = DraftStatus::Abandoned;
            self.emit(
                session,
                &draft,
                "booking.abandoned",
                AuditCategory::Flow,
                AuditOutcome::Success,
                |event| event.detail("step", draft.current_step.as_str()),
            );
        }
        Ok(())
    }

    /// Fetches the catalog only when the draft has guide selections to resolve.
    pub async fn quote(&self, draft: &DraftShipment) -> Result<Quote, BookingError> {
        let catalog = self.catalog_for(draft).await?;
        Ok(self.quotes.build_quote(draft, &catalog)?)
    }

    async fn catalog_for(&self, draft: &DraftShipment) -> Result<PriceCatalog, BookingError> {
        if draft.price_guides.is_empty() {
            return Ok(PriceCatalog::default());
        }
        Ok(PriceCatalog::new(self.backend.price_guides().await?))
    }

    /// The stored draft is authoritative: the submitted copy must carry its id, flow and step.
    async fn ensure_transition_allowed(
        &self,
        session: &SessionKey,
        draft: &DraftShipment,
    ) -> Result<(), BookingError> {
        let Some(stored) = self.store.get(session).await? else {
            let error = FlowTransitionError::NoDraftInProgress { session: session.0.clone() };
            return Err(self.refuse(session, draft, error));
        };
        if draft.is_confirmed() || stored.is_confirmed() {
            let error = FlowTransitionError::DraftImmutable { draft_id: stored.id.0.clone() };
            return Err(self.refuse(session, draft, error));
        }
        for expected in [self.flow.kind, stored.flow] {
            if draft.flow != expected {
                let error = FlowTransitionError::FlowMismatch { expected, actual: draft.flow };
                return Err(self.refuse(session, draft, error));
            }
        }
        if stored.id != draft.id {
            let error = FlowTransitionError::DraftMismatch {
                stored: stored.id.0.clone(),
                submitted: draft.id.0.clone(),
            };
            return Err(self.refuse(session, draft, error));
        }
        if stored.current_step != draft.current_step {
            let error = FlowTransitionError::StaleStep {
                stored: stored.current_step,
                submitted: draft.current_step,
            };
            return Err(self.refuse(session, draft, error));
        }
        if !self.flow.contains(draft.current_step) {
            let error = FlowTransitionError::StepNotInFlow {
                step: draft.current_step,
                flow: self.flow.kind,
            };
            return Err(self.refuse(session, draft, error));
        }
        Ok(())
    }

    fn next_step(&self, draft: &DraftShipment) -> Result<BookingStep, BookingError> {
        self.flow.next(draft.current_step).ok_or_else(|| {
            FlowTransitionError::StepNotInFlow { step: draft.current_step, flow: self.flow.kind }
                .into()
        })
    }

    /// Normalizes the collected shape for the dimensions mode, checks that it can be priced and
    /// saves it to the backend. Nothing is saved when the quote fails.
    async fn persist_dimensions(
        &self,
        session: &SessionKey,
        draft: &mut DraftShipment,
    ) -> Result<(), BookingError> {
        let mode = dimensions_mode(draft);
        let use_guides = match mode {
            DimensionsMode::Catalog => true,
            DimensionsMode::AddItem => !draft.price_guides.is_empty(),
            DimensionsMode::RawDimensions => false,
        };

        let catalog = if use_guides {
            self.catalog_for(draft).await?
        } else {
            PriceCatalog::default()
        };
        let payload = if use_guides {
            let aggregation = to_line_items(&draft.price_guides, &catalog, &draft.custom_items);
            DimensionsPayload::guides(aggregation.resolved())
        } else {
            draft.price_guides.clear();
            draft.custom_items.clear();
            let entry = draft.dimensions.clone().unwrap_or_default();
            let Some(dims) = entry.complete() else {
                let fields = entry
                    .fields()
                    .into_iter()
                    .filter(|(_, value)| value.is_none())
                    .map(|(name, _)| FieldError::required(format!("dimensions.{name}")))
                    .collect();
                return Err(ValidationErrors { step: BookingStep::Dimensions, fields }.into());
            };
            DimensionsPayload::measured(&dims)
        };

        let quote = match self.quotes.build_quote(draft, &catalog) {
            Ok(quote) => quote,
            Err(error) => {
                warn!(
                    event_name = "booking.quote_rejected",
                    session = %session.0,
                    draft_id = %draft.id.0,
                    error = %error,
                    "dimensions cannot be priced"
                );
                self.emit(
                    session,
                    draft,
                    "booking.quote_rejected",
                    AuditCategory::Flow,
                    AuditOutcome::Rejected,
                    |event| event.detail("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        self.backend.save_dimensions(&self.flow.endpoints, &draft.id, &payload).await?;
        info!(
            event_name = "booking.dimensions_saved",
            draft_id = %draft.id.0,
            mode = ?mode,
            guides = use_guides,
            total = %quote.total,
            "dimensions saved to backend"
        );
        Ok(())
    }

    async fn move_to(
        &self,
        session: &SessionKey,
        mut draft: DraftShipment,
        from: BookingStep,
        to: BookingStep,
        event_type: &'static str,
    ) -> Result<StepOutcome, BookingError> {
        if to == BookingStep::Dimensions
            && draft.dimensions.as_ref().map_or(true, |entry| entry.is_blank())
        {
            draft.dimensions = Some(draft.package.declared.clone());
        }
        draft.current_step = to;
        draft.updated_at = Utc::now();
        self.store.set(session, &draft).await?;

        info!(
            event_name = event_type,
            session = %session.0,
            draft_id = %draft.id.0,
            from = from.as_str(),
            to = to.as_str(),
            "booking step changed"
        );
        self.emit(session, &draft, event_type, AuditCategory::Flow, AuditOutcome::Success, |event| {
            event.detail("from", from.as_str()).detail("to", to.as_str())
        });
        Ok(StepOutcome { from, to, draft })
    }

    fn refuse(
        &self,
        session: &SessionKey,
        draft: &DraftShipment,
        error: FlowTransitionError,
    ) -> BookingError {
        self.emit(
            session,
            draft,
            "booking.transition_refused",
            AuditCategory::Flow,
            AuditOutcome::Rejected,
            |event| {
                event
                    .detail("step", draft.current_step.as_str())
                    .detail("error", error.to_string())
            },
        );
        error.into()
    }

    fn emit<F>(
        &self,
        session: &SessionKey,
        draft: &DraftShipment,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        decorate: F,
    ) where
        F: FnOnce(AuditEvent) -> AuditEvent,
    {
        let context = AuditContext::new(Uuid::new_v4().to_string(), "booking-machine")
            .for_session(session)
            .for_draft(&draft.id);
        self.audit.emit(decorate(context.event(event_type, category, outcome)));
    }
}

/// Sessions with a payment confirmation in flight. Clones share the same set.
#[derive(Clone, Default)]
pub struct PaymentGuard {
    sessions: Arc<Mutex<HashSet<SessionKey>>>,
}

impl PaymentGuard {
    pub fn is_in_flight(&self, session: &SessionKey) -> bool {
        match self.sessions.lock() {
            Ok(active) => active.contains(session),
            Err(poisoned) => poisoned.into_inner().contains(session),
        }
    }

    fn acquire(&self, session: &SessionKey) -> Option<InFlightPayment> {
        let inserted = match self.sessions.lock() {
            Ok(mut active) => active.insert(session.clone()),
            Err(poisoned) => poisoned.into_inner().insert(session.clone()),
        };
        inserted.then(|| InFlightPayment { guard: self.clone(), session: session.clone() })
    }
}

/// Holds a session's slot in the guard until dropped.
struct InFlightPayment {
    guard: PaymentGuard,
    session: SessionKey,
}

impl Drop for InFlightPayment {
    fn drop(&mut self) {
        match self.guard.sessions.lock() {
            Ok(mut active) => active.remove(&self.session),
            Err(poisoned) => poisoned.into_inner().remove(&self.session),
        };
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{BookingStepMachine, FlowTransitionError, PaymentGuard};
    use crate::audit::InMemoryAuditSink;
    use crate::costing::{QuoteBuilder, RateCardKind};
    use crate::domain::price_guide::{PriceGuideId, PriceGuideItem};
    use crate::domain::shipment::{
        AddressBlock, ContactDetails, DimensionsEntry, DraftId, DraftShipment, DraftStatus,
        PackageType, PaymentMethod, PhotoRef, PickupSchedule, RawAddress, ServiceType, SessionKey,
    };
    use crate::domain::wire::{DimensionsPayload, ShipmentRecord};
    use crate::errors::{BookingError, ExternalErrorKind, QuoteError, RateResolutionError};
    use crate::flows::steps::{BookingStep, FlowConfig, FlowKind};
    use crate::flows::store::{DraftShipmentStore, InMemoryDraftShipmentStore};
    use crate::gateway::{BackendCall, InMemoryShipmentBackend};

    struct Harness {
        machine: BookingStepMachine,
        store: InMemoryDraftShipmentStore,
        backend: InMemoryShipmentBackend,
        audit: InMemoryAuditSink,
        payments: PaymentGuard,
        session: SessionKey,
    }

    impl Harness {
        /// Another flow's machine over the same store, backend and payment guard.
        fn sibling(&self, flow: FlowConfig) -> BookingStepMachine {
            BookingStepMachine::new(
                flow,
                Arc::new(self.store.clone()),
                Arc::new(self.backend.clone()),
                QuoteBuilder::new(RateCardKind::LegacyTiered.build()),
            )
            .with_audit_sink(Arc::new(self.audit.clone()))
            .with_payment_guard(self.payments.clone())
        }
    }

    fn harness(flow: FlowConfig) -> Harness {
        let store = InMemoryDraftShipmentStore::default();
        let backend = InMemoryShipmentBackend::with_catalog(vec![
            PriceGuideItem::catalog("A", "Washing machine", Decimal::from(20), "PG-001"),
            PriceGuideItem::catalog("B", "Fridge freezer", Decimal::from(90), "PG-002"),
        ]);
        let audit = InMemoryAuditSink::default();
        let payments = PaymentGuard::default();
        let machine = BookingStepMachine::new(
            flow,
            Arc::new(store.clone()),
            Arc::new(backend.clone()),
            QuoteBuilder::new(RateCardKind::LegacyTiered.build()),
        )
        .with_audit_sink(Arc::new(audit.clone()))
        .with_payment_guard(payments.clone());
        Harness {
            machine,
            store,
            backend,
            audit,
            payments,
            session: SessionKey("sess-1".to_owned()),
        }
    }

    fn declared() -> DimensionsEntry {
        DimensionsEntry {
            weight_kg: Some(Decimal::new(52, 1)),
            length_cm: Some(Decimal::from(30)),
            width_cm: Some(Decimal::from(20)),
            height_cm: Some(Decimal::from(15)),
        }
    }

    fn contact(name: &str) -> ContactDetails {
        ContactDetails {
            name: name.to_owned(),
            phone: "+44 7700 900123".to_owned(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }

    /// Fills every field any step checks, leaving the cursor where it is.
    fn fill(draft: &mut DraftShipment) {
        draft.sender = Some(contact("Grace"));
        draft.package.package_type = Some(PackageType::Parcel);
        draft.package.description = "Books".to_owned();
        draft.package.declared = declared();
        draft.pickup = Some(AddressBlock::Raw(RawAddress {
            line1: "1 Quay St".to_owned(),
            line2: None,
            city: "Bristol".to_owned(),
            postcode: "BS1 4DJ".to_owned(),
            country: "GB".to_owned(),
        }));
        draft.receiver = contact("Ada");
        draft.service_type = Some(ServiceType::AirFreight);
        draft.schedule = Some(PickupSchedule {
            pickup_date: Some(draft.created_at.date_naive()),
            time_window: None,
        });
        draft.photos = vec![PhotoRef("photos/box.jpg".to_owned())];
    }

    async fn walk_to(h: &Harness, target: BookingStep) -> DraftShipment {
        let mut draft =
            h.machine.start(&h.session, DraftId("SHP-1".to_owned())).await.expect("start");
        fill(&mut draft);
        while draft.current_step != target {
            draft = h.machine.advance(&h.session, draft).await.expect("advance").draft;
        }
        draft
    }

    #[tokio::test]
    async fn authenticated_flow_reaches_confirmed_and_records_payment() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::Payment).await;

        let outcome = h
            .machine
            .confirm_payment(&h.session, draft, PaymentMethod::Card)
            .await
            .expect("payment confirmed");

        assert_eq!(outcome.to, BookingStep::Confirmed);
        assert_eq!(outcome.draft.status, DraftStatus::Confirmed);
        let payment = outcome.draft.payment.clone().expect("payment recorded");
        assert_eq!(payment.amount, Decimal::new(486_720, 2));
        assert_eq!(payment.payment_status, "paid");

        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored, outcome.draft);

        let calls = h.backend.calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            BackendCall::SaveDimensions { path, payload: DimensionsPayload::Measured { .. } }
                if path == "/shipments/SHP-1/dimensions"
        )));
        assert!(matches!(calls.last(), Some(BackendCall::ConfirmPayment { .. })));

        let events = h.audit.event_types();
        assert_eq!(events.first().map(String::as_str), Some("booking.started"));
        assert_eq!(events.last().map(String::as_str), Some("booking.payment_confirmed"));
        assert_eq!(events.iter().filter(|event| *event == "booking.step_advanced").count(), 7);
    }

    #[tokio::test]
    async fn repeated_invalid_advance_never_moves_or_persists() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::Receiver).await;
        draft.receiver.email = "not-an-email".to_owned();

        for _ in 0..3 {
            let error =
                h.machine.advance(&h.session, draft.clone()).await.expect_err("gate holds");
            match error {
                BookingError::Validation(errors) => {
                    assert_eq!(errors.step, BookingStep::Receiver);
                    assert!(errors.has_field("receiver.email"));
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }

        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored.current_step, BookingStep::Receiver);
        assert_eq!(stored.receiver.email, "ada@example.com");
        assert_eq!(
            h.audit.event_types().iter().filter(|event| *event == "booking.step_rejected").count(),
            3
        );
    }

    #[tokio::test]
    async fn resume_returns_the_persisted_draft_unchanged() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::ShippingMethod).await;

        let resumed = h.machine.resume(&h.session).await.expect("resume").expect("draft stored");

        assert_eq!(resumed.current_step, BookingStep::ShippingMethod);
        assert_eq!(resumed, draft);
    }

    #[tokio::test]
    async fn entering_dimensions_seeds_the_entry_from_package_details() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::Dimensions).await;

        assert_eq!(draft.dimensions, Some(declared()));
    }

    #[tokio::test]
    async fn leaving_raw_dimensions_drops_stale_guide_selections() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::ShippingMethod).await;
        draft.service_type = Some(ServiceType::Jingsly);
        draft.price_guides.add(PriceGuideId::from("A"));
        draft.custom_items.push(PriceGuideItem::custom("Bicycle"));
        let draft = h.machine.advance(&h.session, draft).await.expect("to dimensions").draft;

        let outcome = h.machine.advance(&h.session, draft).await.expect("leave dimensions");

        assert_eq!(outcome.to, BookingStep::Schedule);
        assert!(outcome.draft.price_guides.is_empty());
        assert!(outcome.draft.custom_items.is_empty());
    }

    #[tokio::test]
    async fn catalog_mode_saves_guides_with_repeats_expanded() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::ShippingMethod).await;
        draft.service_type = Some(ServiceType::SeaFreight);
        draft.package.package_type = Some(PackageType::Items);
        let mut draft = h.machine.advance(&h.session, draft).await.expect("to dimensions").draft;
        for id in ["A", "A", "B"] {
            draft.price_guides.add(PriceGuideId::from(id));
        }

        h.machine.advance(&h.session, draft).await.expect("leave dimensions");

        let saved = h.backend.calls().into_iter().find_map(|call| match call {
            BackendCall::SaveDimensions {
                payload: DimensionsPayload::Guides { price_guides }, ..
            } => Some(price_guides),
            _ => None,
        });
        let ids: Vec<String> =
            saved.expect("guides payload").into_iter().map(|guide| guide.id).collect();
        assert_eq!(ids, vec!["A".to_owned(), "A".to_owned(), "B".to_owned()]);
    }

    #[tokio::test]
    async fn backend_failure_while_saving_dimensions_keeps_the_cursor() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::Dimensions).await;
        h.backend.fail_with(Some(ExternalErrorKind::Transport));

        let error = h.machine.advance(&h.session, draft).await.expect_err("backend down");

        assert!(matches!(error, BookingError::External(_)));
        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored.current_step, BookingStep::Dimensions);
    }

    #[tokio::test]
    async fn retreat_stops_at_the_initial_step() {
        let h = harness(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::PackageDetails).await;

        let back = h.machine.retreat(&h.session, draft).await.expect("retreat");
        assert_eq!(back.to, BookingStep::SenderContact);

        let error = h.machine.retreat(&h.session, back.draft).await.expect_err("first step");
        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::AtInitialStep {
                step: BookingStep::SenderContact
            })
        );
    }

    #[tokio::test]
    async fn skip_is_limited_to_the_edit_flow_skippable_steps() {
        let authenticated = harness(FlowConfig::authenticated());
        let draft = walk_to(&authenticated, BookingStep::Addresses).await;
        let error =
            authenticated.machine.skip(&authenticated.session, draft).await.expect_err("no skip");
        assert!(matches!(error, BookingError::Flow(FlowTransitionError::SkipNotPermitted { .. })));

        let edit = harness(FlowConfig::edit_existing());
        let mut draft = walk_to(&edit, BookingStep::Addresses).await;
        draft.pickup = None;
        let skipped = edit.machine.skip(&edit.session, draft).await.expect("skippable");
        assert_eq!(skipped.to, BookingStep::Receiver);
        assert!(edit.audit.event_types().contains(&"booking.step_skipped".to_owned()));
    }

    #[tokio::test]
    async fn advancing_from_payment_requires_confirmation() {
        let h = harness(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::Payment).await;

        let error = h.machine.advance(&h.session, draft).await.expect_err("payment gate");

        assert_eq!(error, BookingError::Flow(FlowTransitionError::PaymentRequired));
    }

    #[tokio::test]
    async fn unpaid_echo_leaves_the_draft_at_payment() {
        let h = harness(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::Payment).await;
        h.backend.echo_payment_status("pending");

        let error = h
            .machine
            .confirm_payment(&h.session, draft, PaymentMethod::Paypal)
            .await
            .expect_err("not paid");

        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::PaymentNotConfirmed {
                status: Some("pending".to_owned())
            })
        );
        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored.current_step, BookingStep::Payment);
        assert!(stored.payment.is_none());
        assert!(h.backend.calls().iter().any(|call| matches!(
            call,
            BackendCall::ConfirmPayment { path, .. } if path == "/guest-shipments/SHP-1/payment"
        )));
    }

    #[tokio::test]
    async fn concurrent_confirmation_for_the_same_session_is_refused() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::Payment).await;
        let held = h.payments.acquire(&h.session).expect("slot free");

        let error = h
            .machine
            .confirm_payment(&h.session, draft.clone(), PaymentMethod::Card)
            .await
            .expect_err("already in flight");
        assert!(matches!(error, BookingError::Flow(FlowTransitionError::PaymentInFlight { .. })));

        drop(held);
        h.machine
            .confirm_payment(&h.session, draft, PaymentMethod::Card)
            .await
            .expect("slot released");
        assert!(!h.payments.is_in_flight(&h.session));
    }

    #[tokio::test]
    async fn payment_slot_is_shared_by_every_flow() {
        let h = harness(FlowConfig::authenticated());
        let guest = h.sibling(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::Payment).await;
        let mut as_guest = draft.clone();
        as_guest.flow = FlowKind::Guest;
        let _held = h.payments.acquire(&h.session).expect("slot free");

        let error = guest
            .confirm_payment(&h.session, as_guest, PaymentMethod::Card)
            .await
            .expect_err("slot held by the authenticated flow");

        assert!(matches!(error, BookingError::Flow(FlowTransitionError::PaymentInFlight { .. })));
        assert!(!h
            .backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::ConfirmPayment { .. })));
    }

    #[tokio::test]
    async fn racing_confirmations_from_two_flows_pay_once() {
        let h = harness(FlowConfig::authenticated());
        let guest = h.sibling(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::Payment).await;
        let mut as_guest = draft.clone();
        as_guest.flow = FlowKind::Guest;

        let (first, second) = tokio::join!(
            h.machine.confirm_payment(&h.session, draft, PaymentMethod::Card),
            guest.confirm_payment(&h.session, as_guest, PaymentMethod::Card),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(BookingError::Flow(_))));
        let payments = h
            .backend
            .calls()
            .into_iter()
            .filter(|call| matches!(call, BackendCall::ConfirmPayment { .. }))
            .count();
        assert_eq!(payments, 1);
    }

    #[tokio::test]
    async fn transitions_without_a_stored_draft_are_refused() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = DraftShipment::new(
            DraftId("SHP-1".to_owned()),
            FlowKind::Authenticated,
            BookingStep::Payment,
            Utc::now(),
        );
        fill(&mut draft);

        let error = h
            .machine
            .confirm_payment(&h.session, draft, PaymentMethod::Card)
            .await
            .expect_err("nothing started");

        assert!(matches!(
            error,
            BookingError::Flow(FlowTransitionError::NoDraftInProgress { .. })
        ));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn a_different_draft_id_cannot_ride_the_session() {
        let h = harness(FlowConfig::authenticated());
        let mut forged = walk_to(&h, BookingStep::Payment).await;
        forged.id = DraftId("OTHER".to_owned());

        let error = h
            .machine
            .confirm_payment(&h.session, forged, PaymentMethod::Card)
            .await
            .expect_err("foreign draft id");

        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::DraftMismatch {
                stored: "SHP-1".to_owned(),
                submitted: "OTHER".to_owned(),
            })
        );
        assert!(!h
            .backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::ConfirmPayment { .. })));
    }

    #[tokio::test]
    async fn a_cursor_ahead_of_the_stored_step_is_refused() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::Receiver).await;
        draft.current_step = BookingStep::Payment;

        let error = h
            .machine
            .confirm_payment(&h.session, draft.clone(), PaymentMethod::Card)
            .await
            .expect_err("cursor jumped ahead");
        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::StaleStep {
                stored: BookingStep::Receiver,
                submitted: BookingStep::Payment,
            })
        );

        let error = h.machine.retreat(&h.session, draft).await.expect_err("same for retreat");
        assert!(matches!(error, BookingError::Flow(FlowTransitionError::StaleStep { .. })));
        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored.current_step, BookingStep::Receiver);
    }

    #[tokio::test]
    async fn switching_flow_mid_booking_is_refused() {
        let h = harness(FlowConfig::authenticated());
        let guest = h.sibling(FlowConfig::guest());
        let mut draft = walk_to(&h, BookingStep::Addresses).await;
        draft.flow = FlowKind::Guest;

        let error = guest.advance(&h.session, draft).await.expect_err("stored flow wins");

        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::FlowMismatch {
                expected: FlowKind::Authenticated,
                actual: FlowKind::Guest,
            })
        );
    }

    #[tokio::test]
    async fn confirmed_drafts_are_immutable() {
        let h = harness(FlowConfig::authenticated());
        let draft = walk_to(&h, BookingStep::Payment).await;
        let stale_copy = draft.clone();
        let confirmed = h
            .machine
            .confirm_payment(&h.session, draft, PaymentMethod::Card)
            .await
            .expect("confirmed")
            .draft;

        let error = h.machine.retreat(&h.session, confirmed).await.expect_err("immutable");
        assert!(matches!(error, BookingError::Flow(FlowTransitionError::DraftImmutable { .. })));

        let error = h.machine.retreat(&h.session, stale_copy).await.expect_err("stored copy wins");
        assert!(matches!(error, BookingError::Flow(FlowTransitionError::DraftImmutable { .. })));
    }

    #[tokio::test]
    async fn drafts_from_another_flow_are_refused() {
        let h = harness(FlowConfig::authenticated());
        let guest = h.sibling(FlowConfig::guest());
        let draft = guest.start(&h.session, DraftId("G-9".to_owned())).await.expect("start");

        let error = h.machine.advance(&h.session, draft).await.expect_err("wrong flow");

        assert_eq!(
            error,
            BookingError::Flow(FlowTransitionError::FlowMismatch {
                expected: FlowKind::Authenticated,
                actual: FlowKind::Guest,
            })
        );
    }

    #[tokio::test]
    async fn load_existing_seeds_an_edit_draft_from_the_backend_record() {
        let h = harness(FlowConfig::edit_existing());
        let bicycle = PriceGuideItem::custom("Bicycle");
        let washer = PriceGuideItem::catalog("A", "Washing machine", Decimal::from(20), "PG-001");
        h.backend.store_shipment(ShipmentRecord {
            id: "SHP-31".to_owned(),
            price: None,
            price_guides: vec![washer.clone(), washer, bicycle.clone(), bicycle.clone()],
            pickup_address: Some(AddressBlock::BookEntry { address_id: "addr-4".to_owned() }),
            delivery_address: None,
            payment_status: None,
            current_step: None,
        });

        let draft = h.machine.load_existing(&h.session, "SHP-31").await.expect("loaded");

        assert_eq!(draft.id, DraftId("SHP-31".to_owned()));
        assert_eq!(draft.flow, FlowKind::Edit);
        assert_eq!(draft.current_step, BookingStep::PackageDetails);
        assert_eq!(draft.price_guides.quantity(&PriceGuideId::from("A")), 2);
        assert_eq!(draft.price_guides.quantity(&bicycle.id), 2);
        assert_eq!(draft.custom_items, vec![bicycle]);
        assert!(matches!(draft.pickup, Some(AddressBlock::BookEntry { .. })));
        assert_eq!(h.store.get(&h.session).await.expect("get"), Some(draft));
        assert!(h.backend.calls().contains(&BackendCall::FetchShipment {
            path: "/shipments/SHP-31".to_owned()
        }));
    }

    #[tokio::test]
    async fn abandon_clears_the_session() {
        let h = harness(FlowConfig::authenticated());
        walk_to(&h, BookingStep::Receiver).await;

        h.machine.abandon(&h.session).await.expect("abandon");

        assert_eq!(h.machine.resume(&h.session).await.expect("resume"), None);
        assert!(h.audit.event_types().contains(&"booking.abandoned".to_owned()));
    }

    #[tokio::test]
    async fn abandoning_a_confirmed_booking_is_refused() {
        let h = harness(FlowConfig::guest());
        let draft = walk_to(&h, BookingStep::Payment).await;
        h.machine
            .confirm_payment(&h.session, draft, PaymentMethod::Card)
            .await
            .expect("confirmed");

        let error = h.machine.abandon(&h.session).await.expect_err("confirmed is kept");

        assert!(matches!(error, BookingError::Flow(FlowTransitionError::DraftImmutable { .. })));
        let stored = h.store.get(&h.session).await.expect("get").expect("still stored");
        assert_eq!(stored.status, DraftStatus::Confirmed);
        assert!(!h.audit.event_types().contains(&"booking.abandoned".to_owned()));
    }

    #[tokio::test]
    async fn unpriceable_service_cannot_leave_dimensions() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::ShippingMethod).await;
        draft.service_type = Some(ServiceType::Parcel);
        let draft = h.machine.advance(&h.session, draft).await.expect("to dimensions").draft;

        let error = h.machine.advance(&h.session, draft).await.expect_err("no parcel rate");

        assert_eq!(
            error,
            BookingError::Quote(QuoteError::RateResolution(
                RateResolutionError::UnsupportedServiceType(ServiceType::Parcel)
            ))
        );
        let stored = h.store.get(&h.session).await.expect("get").expect("stored");
        assert_eq!(stored.current_step, BookingStep::Dimensions);
        assert!(!h
            .backend
            .calls()
            .iter()
            .any(|call| matches!(call, BackendCall::SaveDimensions { .. })));
        assert!(h.audit.event_types().contains(&"booking.quote_rejected".to_owned()));
    }

    #[tokio::test]
    async fn quote_fetches_the_catalog_only_for_guide_selections() {
        let h = harness(FlowConfig::authenticated());
        let mut draft = walk_to(&h, BookingStep::Dimensions).await;

        let quote = h.machine.quote(&draft).await.expect("dimension quote");
        assert_eq!(quote.total, Decimal::new(486_720, 2));
        assert!(!h.backend.calls().contains(&BackendCall::PriceGuides));

        for id in ["A", "A", "B"] {
            draft.price_guides.add(PriceGuideId::from(id));
        }
        let quote = h.machine.quote(&draft).await.expect("guide quote");
        assert_eq!(quote.base_fee, Decimal::from(130));
        assert!(h.backend.calls().contains(&BackendCall::PriceGuides));
    }
}
