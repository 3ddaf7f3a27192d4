//! Central store: instance configuration and capture summaries.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::any::AnyRow;

use crate::storage::db::StorePool;
use crate::storage::schema::init_schema;
use crate::storage::{
    Instance, InstanceSource, SnapshotMetrics, SnapshotSummary, StorageError, SummarySink,
};

const SELECT_INSTANCES: &str =
    "SELECT inst_id, db_type, host, port, db_name FROM db_snapshot_config ORDER BY inst_id";

const INSERT_SUMMARY: &str = r#"
INSERT INTO db_snapshot (
    inst_id, create_time, txn_count, act_sess_count, sess_count, big_query_count,
    wait_sess_count, lock_count, max_query_seconds, max_txn_seconds, duration_seconds, msg
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

// DATETIME and TEXT are read back as CHAR so every backend hands the Any
// driver a plain string.
const SELECT_SUMMARIES: &str = r#"
SELECT inst_id, CAST(create_time AS CHAR) AS create_time, txn_count, act_sess_count,
       sess_count, big_query_count, wait_sess_count, lock_count, max_query_seconds,
       max_txn_seconds, duration_seconds, CAST(msg AS CHAR) AS msg
FROM db_snapshot
WHERE inst_id = ? AND create_time >= ? AND create_time <= ?
ORDER BY create_time
"#;

/// Central store facade over the shared pool.
#[derive(Debug, Clone)]
pub struct CentralStore {
    pool: StorePool,
}

impl CentralStore {
    /// Connect and make sure both tables exist.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = StorePool::connect(url, max_connections).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap an already connected pool.
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    /// Create both tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        init_schema(self.pool.inner()).await
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let _: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Insert an instance definition unless its id is already present.
    ///
    /// Returns `true` when a row was inserted. Existing rows are left as they
    /// are so edits made directly in the table survive restarts.
    pub async fn insert_instance_if_absent(&self, instance: &Instance) -> Result<bool, StorageError> {
        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM db_snapshot_config WHERE inst_id = ?")
                .bind(instance.inst_id)
                .fetch_one(self.pool.inner())
                .await?;
        if existing > 0 {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO db_snapshot_config (inst_id, db_type, host, port, db_name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(instance.inst_id)
        .bind(instance.db_type.as_str())
        .bind(instance.host.as_str())
        .bind(i64::from(instance.port))
        .bind(instance.db_name.as_str())
        .execute(self.pool.inner())
        .await?;

        Ok(true)
    }

    /// Summaries of one instance whose `create_time` lies in `[start, end]`.
    ///
    /// Bounds use the `create_time` layout (`YYYY-MM-DD HH:MM:SS`).
    pub async fn list_summaries(
        &self,
        inst_id: i64,
        start: &str,
        end: &str,
    ) -> Result<Vec<SnapshotSummary>, StorageError> {
        let rows = sqlx::query(SELECT_SUMMARIES)
            .bind(inst_id)
            .bind(start)
            .bind(end)
            .fetch_all(self.pool.inner())
            .await?;

        rows.iter().map(summary_from_row).collect()
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl InstanceSource for CentralStore {
    async fn list_instances(&self) -> Result<Vec<Instance>, StorageError> {
        let rows = sqlx::query(SELECT_INSTANCES)
            .fetch_all(self.pool.inner())
            .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let instance = instance_from_row(row)?;
            // Ids name the artifact directory, which only takes positive ids.
            if instance.inst_id <= 0 {
                tracing::warn!(
                    inst_id = instance.inst_id,
                    instance = %instance.address(),
                    "Skipping instance with non-positive id"
                );
                continue;
            }
            instances.push(instance);
        }
        Ok(instances)
    }
}

#[async_trait]
impl SummarySink for CentralStore {
    async fn insert_summary(&self, summary: &SnapshotSummary) -> Result<(), StorageError> {
        let m = &summary.metrics;
        sqlx::query(INSERT_SUMMARY)
            .bind(summary.inst_id)
            .bind(summary.create_time.as_str())
            .bind(m.txn_count)
            .bind(m.act_sess_count)
            .bind(m.sess_count)
            .bind(m.big_query_count)
            .bind(m.wait_sess_count)
            .bind(m.lock_count)
            .bind(m.max_query_seconds)
            .bind(m.max_txn_seconds)
            .bind(summary.duration_seconds)
            .bind(summary.msg.as_str())
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }
}

fn instance_from_row(row: &AnyRow) -> Result<Instance, StorageError> {
    let inst_id: i64 = row.try_get("inst_id")?;
    let port: i64 = row.try_get("port")?;
    let port = u16::try_from(port).map_err(|_| {
        StorageError::InvalidData(format!("instance {inst_id}: port {port} out of range"))
    })?;
    let db_name: Option<String> = row.try_get("db_name")?;

    Ok(Instance {
        inst_id,
        db_type: row.try_get("db_type")?,
        host: row.try_get("host")?,
        port,
        db_name: db_name.unwrap_or_default(),
    })
}

fn summary_from_row(row: &AnyRow) -> Result<SnapshotSummary, StorageError> {
    let msg: Option<String> = row.try_get("msg")?;
    Ok(SnapshotSummary {
        inst_id: row.try_get("inst_id")?,
        create_time: row.try_get("create_time")?,
        metrics: SnapshotMetrics {
            act_sess_count: row.try_get("act_sess_count")?,
            txn_count: row.try_get("txn_count")?,
            sess_count: row.try_get("sess_count")?,
            big_query_count: row.try_get("big_query_count")?,
            wait_sess_count: row.try_get("wait_sess_count")?,
            lock_count: row.try_get("lock_count")?,
            max_query_seconds: row.try_get("max_query_seconds")?,
            max_txn_seconds: row.try_get("max_txn_seconds")?,
        },
        duration_seconds: row.try_get("duration_seconds")?,
        msg: msg.unwrap_or_default(),
    })
}
