use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::shipment::{DraftId, SessionKey};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Ingress,
    Flow,
    Pricing,
    Payment,
    Persistence,
    Integration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Who acted, on which session and draft, under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub correlation_id: String,
    pub actor: String,
    pub session: Option<SessionKey>,
    pub draft_id: Option<DraftId>,
}

impl AuditContext {
    pub fn new(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor: actor.into(),
            session: None,
            draft_id: None,
        }
    }

    pub fn for_session(mut self, session: &SessionKey) -> Self {
        self.session = Some(session.clone());
        self
    }

    pub fn for_draft(mut self, draft_id: &DraftId) -> Self {
        self.draft_id = Some(draft_id.clone());
        self
    }

    pub fn event(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            category,
            outcome,
            context: self.clone(),
            details: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    #[serde(flatten)]
    pub context: AuditContext,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes each event as one structured `tracing` record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let AuditEvent { event_type, category, outcome, context, details, .. } = event;
        tracing::info!(
            event_name = %event_type,
            correlation_id = %context.correlation_id,
            actor = %context.actor,
            session = context.session.as_ref().map_or("", |key| key.0.as_str()),
            draft_id = context.draft_id.as_ref().map_or("", |id| id.0.as_str()),
            category = ?category,
            outcome = ?outcome,
            details = ?details,
            "audit event"
        );
    }
}

/// Keeps emitted events in memory so tests can inspect them.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    fn guard(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.guard().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.guard().iter().map(|event| event.event_type.clone()).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.guard().push(event);
    }
}
