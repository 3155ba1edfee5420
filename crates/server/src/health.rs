use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use freightdesk_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

/// Liveness plus a draft store check that counts drafts per status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub version: &'static str,
    pub draft_store: DraftStoreCheck,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DraftStoreCheck {
    pub status: Readiness,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub drafts_by_status: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        let code = match self.status {
            Readiness::Ready => StatusCode::OK,
            Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
        };
        (code, Json(self)).into_response()
    }
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(db_pool)
}

pub async fn health(State(pool): State<DbPool>) -> HealthReport {
    let draft_store = check_draft_store(&pool).await;
    HealthReport {
        status: draft_store.status,
        version: env!("CARGO_PKG_VERSION"),
        draft_store,
        checked_at: Utc::now(),
    }
}

async fn check_draft_store(pool: &DbPool) -> DraftStoreCheck {
    let counts = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM draft_shipment GROUP BY status",
    )
    .fetch_all(pool)
    .await;

    match counts {
        Ok(rows) => DraftStoreCheck {
            status: Readiness::Ready,
            drafts_by_status: rows.into_iter().collect(),
            error: None,
        },
        Err(error) => {
            warn!(event_name = "health.draft_store.degraded", error = %error);
            DraftStoreCheck {
                status: Readiness::Degraded,
                drafts_by_status: BTreeMap::new(),
                error: Some(error.to_string()),
            }
        }
    }
}
