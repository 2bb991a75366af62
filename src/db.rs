use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("database connection established");
    Ok(db)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection(&cfg.database_url).await
}

/// Creates any missing tables from the entity definitions.
///
/// This is the schema bootstrap used by development mode and the test
/// harness; production deployments manage schema through migrations.
pub async fn ensure_schema(db: &DbPool) -> Result<(), ServiceError> {
    use crate::entities::*;

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create_table {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create_table!(category::Entity);
    create_table!(product::Entity);
    create_table!(product_variant::Entity);
    create_table!(offer::Entity);
    create_table!(offer_item::Entity);
    create_table!(discount_code::Entity);
    create_table!(discount_code_usage::Entity);
    create_table!(order::Entity);
    create_table!(order_item::Entity);
    create_table!(wallet::Entity);
    create_table!(wallet_transaction::Entity);

    info!("schema ensured for {:?} backend", backend);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The sqlite DDL builder rejects decimal columns wider than 16 digits,
    // so every money column in the entities must stay within that bound.
    #[tokio::test]
    async fn schema_bootstrap_succeeds_on_sqlite() {
        let db = establish_connection("sqlite::memory:").await.unwrap();
        ensure_schema(&db).await.unwrap();
        // Running it again must be a no-op, not an error.
        ensure_schema(&db).await.unwrap();
    }
}
