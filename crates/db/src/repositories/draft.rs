use async_trait::async_trait;
use chrono::Utc;
use freightdesk_core::domain::shipment::{DraftShipment, SessionKey};
use freightdesk_core::errors::StoreError;
use freightdesk_core::flows::DraftShipmentStore;
use sqlx::Row;
use tracing::debug;

use super::RepositoryError;
use crate::DbPool;

/// Draft store backed by the `draft_shipment` table, one row per session.
///
/// The full draft is kept as JSON in `payload_json`; the flow, step and status
/// columns mirror it so rows can be inspected and indexed without decoding.
pub struct SqlDraftShipmentStore {
    pool: DbPool,
}

impl SqlDraftShipmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(
        &self,
        session: &SessionKey,
    ) -> Result<Option<DraftShipment>, RepositoryError> {
        let row = sqlx::query("SELECT payload_json FROM draft_shipment WHERE session_key = ?")
            .bind(&session.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload_json")?;
        serde_json::from_str(&payload).map(Some).map_err(|error| {
            RepositoryError::Decode(format!("draft for session `{}`: {error}", session.0))
        })
    }

    async fn save(
        &self,
        session: &SessionKey,
        draft: &DraftShipment,
    ) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(draft).map_err(|error| {
            RepositoryError::Encode(format!("draft `{}`: {error}", draft.id.0))
        })?;

        sqlx::query(
            "INSERT INTO draft_shipment (
                session_key, draft_id, flow, current_step, status,
                payload_json, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_key) DO UPDATE SET
                draft_id = excluded.draft_id,
                flow = excluded.flow,
                current_step = excluded.current_step,
                status = excluded.status,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at",
        )
        .bind(&session.0)
        .bind(&draft.id.0)
        .bind(draft.flow.as_str())
        .bind(draft.current_step.as_str())
        .bind(draft.status.as_str())
        .bind(payload)
        .bind(draft.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            event_name = "db.draft_shipment.saved",
            draft_id = %draft.id.0,
            step = draft.current_step.as_str(),
            "draft persisted"
        );
        Ok(())
    }

    async fn delete(&self, session: &SessionKey) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM draft_shipment WHERE session_key = ?")
            .bind(&session.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DraftShipmentStore for SqlDraftShipmentStore {
    async fn get(&self, session: &SessionKey) -> Result<Option<DraftShipment>, StoreError> {
        Ok(self.load(session).await?)
    }

    async fn set(&self, session: &SessionKey, draft: &DraftShipment) -> Result<(), StoreError> {
        Ok(self.save(session, draft).await?)
    }

    async fn clear(&self, session: &SessionKey) -> Result<(), StoreError> {
        Ok(self.delete(session).await?)
    }
}
