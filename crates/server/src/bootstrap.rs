use std::sync::Arc;

use freightdesk_core::config::{AppConfig, ConfigError};
use freightdesk_db::{connect_from_config, migrations, DbPool, SqlDraftShipmentStore};
use thiserror::Error;
use tracing::info;

use crate::backend::HttpShipmentBackend;
use crate::booking::BookingState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub booking: BookingState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not open the draft store: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("draft store schema could not be migrated: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("shipment backend client could not be built: {0}")]
    BackendClient(#[source] reqwest::Error),
}

/// Wires the booking flows: quote builder from the designated rate card, SQLite
/// draft store with its schema applied, and the HTTP shipment backend.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let quotes = config.quote_builder()?;

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.draft_store_ready",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "draft store connected and migrated"
    );

    let backend =
        HttpShipmentBackend::from_config(&config.backend).map_err(BootstrapError::BackendClient)?;
    let store = SqlDraftShipmentStore::new(db_pool.clone());
    let booking = BookingState::new(Arc::new(store), Arc::new(backend), quotes);
    info!(
        event_name = "system.bootstrap.booking_ready",
        correlation_id = "bootstrap",
        backend_base_url = %config.backend.base_url,
        rate_card = config.pricing.rate_card.map_or("unset", |card| card.as_str()),
        "booking flows initialized"
    );

    Ok(Application { config, db_pool, booking })
}
