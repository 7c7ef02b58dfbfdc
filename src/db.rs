use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use tracing::info;

use crate::config::AppConfig;
use crate::entities;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database from application config.
pub async fn establish_connection(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    let mut opt = ConnectOptions::new(cfg.database_url.clone());

    opt.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    info!(
        max_connections = cfg.db_max_connections,
        "connecting to database"
    );

    Database::connect(opt).await
}

async fn ensure_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let stmt = schema
        .create_table_from_entity(entity)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Creates any missing tables from the entity definitions. Idempotent; runs
/// on startup when `auto_migrate` is set and unconditionally in tests.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    ensure_table(db, entities::production_line::Entity).await?;
    ensure_table(db, entities::daily_production::Entity).await?;
    ensure_table(db, entities::production_log::Entity).await?;
    ensure_table(db, entities::packing_bundle::Entity).await?;
    ensure_table(db, entities::dispatch_record::Entity).await?;
    ensure_table(db, entities::dispatch_line_item::Entity).await?;
    ensure_table(db, entities::qc_check::Entity).await?;

    info!("schema migrations complete");
    Ok(())
}
