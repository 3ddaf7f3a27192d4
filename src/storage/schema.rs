//! Central store schema.
//!
//! The DDL sticks to the subset shared by MySQL and SQLite so the same
//! statements bootstrap a production store and an in-memory test store.

use sqlx::AnyPool;

use crate::storage::StorageError;

/// Instance configuration table (one row per monitored endpoint).
pub const CONFIG_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS db_snapshot_config (
    inst_id  BIGINT       NOT NULL PRIMARY KEY,
    db_type  VARCHAR(32)  NOT NULL,
    host     VARCHAR(255) NOT NULL,
    port     INTEGER      NOT NULL,
    db_name  VARCHAR(128) NOT NULL DEFAULT ''
)
"#;

/// Summary table (one row per capture).
pub const SUMMARY_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS db_snapshot (
    inst_id            BIGINT   NOT NULL,
    create_time        DATETIME NOT NULL,
    txn_count          INTEGER  NOT NULL DEFAULT 0,
    act_sess_count     INTEGER  NOT NULL DEFAULT 0,
    sess_count         INTEGER  NOT NULL DEFAULT 0,
    big_query_count    INTEGER  NOT NULL DEFAULT 0,
    wait_sess_count    INTEGER  NOT NULL DEFAULT 0,
    lock_count         INTEGER  NOT NULL DEFAULT 0,
    max_query_seconds  INTEGER  NOT NULL DEFAULT 0,
    max_txn_seconds    INTEGER  NOT NULL DEFAULT 0,
    duration_seconds   INTEGER  NOT NULL DEFAULT 0,
    msg                TEXT
)
"#;

/// Initialize the database schema.
///
/// Creates both tables if they don't exist.
pub async fn init_schema(pool: &AnyPool) -> Result<(), StorageError> {
    sqlx::query(CONFIG_TABLE_DDL).execute(pool).await?;
    sqlx::query(SUMMARY_TABLE_DDL).execute(pool).await?;

    tracing::info!("Central store schema initialized");
    Ok(())
}
