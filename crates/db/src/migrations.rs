use sqlx::migrate::{MigrateError, Migrator};
use tracing::info;

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies every migration the database has not seen yet.
pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!(
        event_name = "db.migrations.applied",
        known = MIGRATOR.iter().count(),
        "draft store schema is current"
    );
    Ok(())
}
