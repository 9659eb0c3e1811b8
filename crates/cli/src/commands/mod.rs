//! CLI command implementations.

pub mod migrate;
pub mod orders;
pub mod stock;

use orchard_storefront::config::{CommerceConfig, ConfigError, SupportContact, database_url_from_env};
use orchard_storefront::db::{self, Repositories};
use orchard_storefront::services::Services;
use thiserror::Error;

/// Errors shared by the commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Commerce(#[from] orchard_storefront::services::CommerceError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connect to the storefront database and wire the services over it.
async fn connect_services() -> Result<Services, CommandError> {
    let database_url = database_url_from_env()?;
    let commerce = CommerceConfig::from_env()?;

    tracing::info!("Connecting to storefront database...");
    let pool = db::create_pool(&database_url).await?;
    let repos = Repositories::postgres(&pool);
    Ok(Services::new(&repos, &commerce, SupportContact::from_env()))
}
