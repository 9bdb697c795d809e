//! Schema bootstrap
//!
//! Creates the three tables from their entity definitions, then the indexes
//! that carry lifecycle invariants and cannot be expressed as entity
//! attributes. Every statement is idempotent.

use crate::db::models::{DonationEntity, QueueEntryEntity, UserEntity};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, QuerySelect, Schema, Statement};
use tracing::info;

/// At most one donation may be active
const SINGLE_ACTIVE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS donations_single_active \
     ON donations (is_active) WHERE is_active = TRUE";

/// A participant appears at most once per donation queue
const QUEUE_MEMBERSHIP_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS donation_queue_entries_membership \
     ON donation_queue_entries (donation_id, user_id)";

const QUEUE_ORDER_INDEX: &str = "CREATE INDEX IF NOT EXISTS donation_queue_entries_order \
     ON donation_queue_entries (donation_id, joined_at)";

/// Create missing tables and indexes
pub async fn bootstrap<C: ConnectionTrait>(conn: &C) -> Result<()> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    create_table(conn, &schema, UserEntity).await?;
    create_table(conn, &schema, DonationEntity).await?;
    create_table(conn, &schema, QueueEntryEntity).await?;

    for statement in [SINGLE_ACTIVE_INDEX, QUEUE_MEMBERSHIP_INDEX, QUEUE_ORDER_INDEX] {
        conn.execute_unprepared(statement).await?;
    }

    info!(backend = ?backend, "Donation schema ready");
    Ok(())
}

/// Confirm the tables are queryable and the single-active index exists.
/// Needed when the service runs with `bootstrap_schema` disabled.
pub async fn verify<C: ConnectionTrait>(conn: &C) -> Result<()> {
    UserEntity::find().limit(1).all(conn).await?;
    DonationEntity::find().limit(1).all(conn).await?;
    QueueEntryEntity::find().limit(1).all(conn).await?;

    let backend = conn.get_database_backend();
    let lookup = match backend {
        DbBackend::Postgres => {
            "SELECT 1 FROM pg_indexes WHERE indexname = 'donations_single_active'"
        }
        DbBackend::Sqlite => {
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = 'donations_single_active'"
        }
        _ => {
            return Err(AppError::Configuration {
                message: format!("unsupported database backend {:?}", backend),
            })
        }
    };

    if conn.query_one(Statement::from_string(backend, lookup)).await?.is_none() {
        return Err(AppError::Internal {
            message: "index donations_single_active is missing".to_string(),
        });
    }

    Ok(())
}

async fn create_table<C, E>(conn: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    conn.execute(conn.get_database_backend().build(&statement)).await?;
    Ok(())
}
