//! Booking API routes.
//!
//! - `GET    /api/v1/price-guides`                       catalog passthrough
//! - `POST   /api/v1/quotes`                             quote for a draft shipment
//! - `POST   /api/v1/bookings/{session}`                 start a draft in a flow
//! - `GET    /api/v1/bookings/{session}`                 resume the stored draft
//! - `DELETE /api/v1/bookings/{session}`                 abandon the draft
//! - `POST   /api/v1/bookings/{session}/existing/{id}`   load a stored shipment for editing
//! - `POST   /api/v1/bookings/{session}/advance`         validate and move forward
//! - `POST   /api/v1/bookings/{session}/retreat`         move back one step
//! - `POST   /api/v1/bookings/{session}/skip`            skip a skippable step
//! - `POST   /api/v1/bookings/{session}/confirm-payment` pay and confirm

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use freightdesk_core::domain::wire::PriceGuideWire;
use freightdesk_core::errors::{ApplicationError, FieldError};
use freightdesk_core::flows::StepOutcome;
use freightdesk_core::{
    BookingError, BookingStepMachine, DraftId, DraftShipment, DraftShipmentStore, FlowConfig,
    FlowKind, PaymentGuard, PaymentMethod, Quote, QuoteBuilder, SessionKey, ShipmentBackend,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// One step machine per flow, all sharing the draft store, backend and payment guard.
#[derive(Clone)]
pub struct BookingState {
    authenticated: Arc<BookingStepMachine>,
    guest: Arc<BookingStepMachine>,
    edit: Arc<BookingStepMachine>,
    backend: Arc<dyn ShipmentBackend>,
}

impl BookingState {
    pub fn new(
        store: Arc<dyn DraftShipmentStore>,
        backend: Arc<dyn ShipmentBackend>,
        quotes: QuoteBuilder,
    ) -> Self {
        let payments = PaymentGuard::default();
        let machine = |flow: FlowConfig| {
            Arc::new(
                BookingStepMachine::new(
                    flow,
                    Arc::clone(&store),
                    Arc::clone(&backend),
                    quotes.clone(),
                )
                .with_payment_guard(payments.clone()),
            )
        };
        Self {
            authenticated: machine(FlowConfig::authenticated()),
            guest: machine(FlowConfig::guest()),
            edit: machine(FlowConfig::edit_existing()),
            backend: Arc::clone(&backend),
        }
    }

    fn machine(&self, kind: FlowKind) -> &BookingStepMachine {
        match kind {
            FlowKind::Authenticated => &self.authenticated,
            FlowKind::Guest => &self.guest,
            FlowKind::Edit => &self.edit,
        }
    }
}

pub fn router(state: BookingState) -> Router {
    Router::new()
        .route("/api/v1/price-guides", get(list_price_guides))
        .route("/api/v1/quotes", post(create_quote))
        .route(
            "/api/v1/bookings/{session}",
            post(start_booking).get(resume_booking).delete(abandon_booking),
        )
        .route("/api/v1/bookings/{session}/existing/{shipment_id}", post(load_existing))
        .route("/api/v1/bookings/{session}/advance", post(advance_booking))
        .route("/api/v1/bookings/{session}/retreat", post(retreat_booking))
        .route("/api/v1/bookings/{session}/skip", post(skip_booking))
        .route("/api/v1/bookings/{session}/confirm-payment", post(confirm_payment))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartBookingRequest {
    pub flow: FlowKind,
    #[serde(rename = "draftId", default)]
    pub draft_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub draft: DraftShipment,
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn booking(error: BookingError, correlation_id: &str) -> Self {
        let status = match &error {
            BookingError::Validation(_) | BookingError::Quote(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BookingError::Flow(_) => StatusCode::CONFLICT,
            BookingError::External(_) => StatusCode::BAD_GATEWAY,
            BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "api.booking.request_failed",
            correlation_id,
            status = status.as_u16(),
            error = %error,
            "booking request failed"
        );

        let interface = ApplicationError::from(error).into_interface(correlation_id);
        Self {
            status,
            body: ErrorBody {
                error: interface.kind.summary().to_string(),
                message: interface.public_message().to_string(),
                fields: interface.fields,
                correlation_id: interface.correlation_id,
            },
        }
    }

    fn not_found(session: &SessionKey, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "No booking in progress for this session.".to_string(),
                message: format!("no draft stored for session `{}`", session.0),
                fields: Vec::new(),
                correlation_id: correlation_id.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn list_price_guides(
    State(state): State<BookingState>,
) -> Result<Json<Vec<PriceGuideWire>>, ApiError> {
    let correlation_id = correlation_id();
    let guides = state
        .backend
        .price_guides()
        .await
        .map_err(|error| ApiError::booking(error.into(), &correlation_id))?;
    Ok(Json(guides.iter().map(PriceGuideWire::from).collect()))
}

async fn create_quote(
    State(state): State<BookingState>,
    Json(draft): Json<DraftShipment>,
) -> Result<Json<Quote>, ApiError> {
    let correlation_id = correlation_id();
    let quote = state
        .machine(draft.flow)
        .quote(&draft)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;

    info!(
        event_name = "api.quote.created",
        correlation_id = %correlation_id,
        draft_id = %draft.id.0,
        total = %quote.total,
        "quote computed"
    );
    Ok(Json(quote))
}

async fn start_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
    Json(request): Json<StartBookingRequest>,
) -> Result<(StatusCode, Json<DraftShipment>), ApiError> {
    let correlation_id = correlation_id();
    let draft_id = request.draft_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let draft = state
        .machine(request.flow)
        .start(&SessionKey(session), DraftId(draft_id))
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(draft)))
}

async fn load_existing(
    Path((session, shipment_id)): Path<(String, String)>,
    State(state): State<BookingState>,
) -> Result<(StatusCode, Json<DraftShipment>), ApiError> {
    let correlation_id = correlation_id();
    let draft = state
        .machine(FlowKind::Edit)
        .load_existing(&SessionKey(session), &shipment_id)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(draft)))
}

async fn resume_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
) -> Result<Json<DraftShipment>, ApiError> {
    let correlation_id = correlation_id();
    let session = SessionKey(session);
    // The store is shared by every flow, so any machine can read it back.
    let draft = state
        .machine(FlowKind::Authenticated)
        .resume(&session)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    draft.map(Json).ok_or_else(|| ApiError::not_found(&session, &correlation_id))
}

async fn abandon_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id();
    state
        .machine(FlowKind::Authenticated)
        .abandon(&SessionKey(session))
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn advance_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
    Json(draft): Json<DraftShipment>,
) -> Result<Json<StepOutcome>, ApiError> {
    let correlation_id = correlation_id();
    let machine = state.machine(draft.flow);
    let outcome = machine
        .advance(&SessionKey(session), draft)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok(Json(outcome))
}

async fn retreat_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
    Json(draft): Json<DraftShipment>,
) -> Result<Json<StepOutcome>, ApiError> {
    let correlation_id = correlation_id();
    let machine = state.machine(draft.flow);
    let outcome = machine
        .retreat(&SessionKey(session), draft)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok(Json(outcome))
}

async fn skip_booking(
    Path(session): Path<String>,
    State(state): State<BookingState>,
    Json(draft): Json<DraftShipment>,
) -> Result<Json<StepOutcome>, ApiError> {
    let correlation_id = correlation_id();
    let machine = state.machine(draft.flow);
    let outcome = machine
        .skip(&SessionKey(session), draft)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok(Json(outcome))
}

async fn confirm_payment(
    Path(session): Path<String>,
    State(state): State<BookingState>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<StepOutcome>, ApiError> {
    let correlation_id = correlation_id();
    let machine = state.machine(request.draft.flow);
    let outcome = machine
        .confirm_payment(&SessionKey(session), request.draft, request.method)
        .await
        .map_err(|error| ApiError::booking(error, &correlation_id))?;
    Ok(Json(outcome))
}
