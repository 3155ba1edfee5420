use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::shipment::{DraftShipment, SessionKey};
use crate::errors::StoreError;

/// Session-scoped persistence of the in-progress draft and its step cursor.
#[async_trait]
pub trait DraftShipmentStore: Send + Sync {
    async fn get(&self, session: &SessionKey) -> Result<Option<DraftShipment>, StoreError>;
    async fn set(&self, session: &SessionKey, draft: &DraftShipment) -> Result<(), StoreError>;
    async fn clear(&self, session: &SessionKey) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryDraftShipmentStore {
    drafts: Arc<Mutex<HashMap<SessionKey, DraftShipment>>>,
}

impl InMemoryDraftShipmentStore {
    pub fn len(&self) -> usize {
        self.drafts.lock().map(|drafts| drafts.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory draft store lock poisoned".to_string())
}

#[async_trait]
impl DraftShipmentStore for InMemoryDraftShipmentStore {
    async fn get(&self, session: &SessionKey) -> Result<Option<DraftShipment>, StoreError> {
        let drafts = self.drafts.lock().map_err(|_| poisoned())?;
        Ok(drafts.get(session).cloned())
    }

    async fn set(&self, session: &SessionKey, draft: &DraftShipment) -> Result<(), StoreError> {
        let mut drafts = self.drafts.lock().map_err(|_| poisoned())?;
        drafts.insert(session.clone(), draft.clone());
        Ok(())
    }

    async fn clear(&self, session: &SessionKey) -> Result<(), StoreError> {
        let mut drafts = self.drafts.lock().map_err(|_| poisoned())?;
        drafts.remove(session);
        Ok(())
    }
}
