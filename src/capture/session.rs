//! Live monitoring sessions against capture targets.
//!
//! MySQL-protocol engines (MySQL family, OceanBase) and PostgreSQL go through
//! small sqlx pools using the text protocol, so every cell arrives as text
//! regardless of its column type. Oracle uses the blocking `oracle` driver on
//! the blocking thread pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Connection, Decode, Row, ValueRef};
use tokio::time::timeout;

use crate::capture::{CaptureError, NULL_CELL, QueryError, QueryRunner, RawTable};
use crate::storage::Instance;

/// Connections per capture pool: one for the battery plus a spare when a
/// timed-out query leaves its connection behind.
const POOL_MAX_CONNECTIONS: u32 = 2;

/// Reported as `application_name` on PostgreSQL.
const APPLICATION_NAME: &str = "dbsnap";

/// Shared monitoring account used for every instance.
#[derive(Clone, Default)]
pub struct MonitorCredential {
    pub user: String,
    pub password: String,
}

impl MonitorCredential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for MonitorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorCredential")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// An established monitoring session.
pub enum Session {
    MySql(MySqlPool),
    Postgres(PgPool),
    Oracle(OracleSession),
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::MySql(_) => "mysql",
            Self::Postgres(_) => "postgres",
            Self::Oracle(_) => "oracle",
        };
        f.debug_tuple("Session").field(&kind).finish()
    }
}

impl Session {
    /// Connect over the MySQL protocol and ping.
    pub async fn connect_mysql(
        instance: &Instance,
        database: &str,
        credential: &MonitorCredential,
        connect_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let options = MySqlConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .username(&credential.user)
            .password(&credential.password)
            .database(database);

        let pool = MySqlPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(connect_timeout)
            .connect_lazy_with(options);

        ping_pool(&pool, connect_timeout).await?;
        Ok(Self::MySql(pool))
    }

    /// Connect to PostgreSQL and ping.
    pub async fn connect_postgres(
        instance: &Instance,
        database: &str,
        credential: &MonitorCredential,
        connect_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let options = PgConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .username(&credential.user)
            .password(&credential.password)
            .database(database)
            .application_name(APPLICATION_NAME);

        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(connect_timeout)
            .connect_lazy_with(options);

        ping_pool(&pool, connect_timeout).await?;
        Ok(Self::Postgres(pool))
    }

    /// Connect to an Oracle service and ping.
    pub async fn connect_oracle(
        instance: &Instance,
        service: &str,
        credential: &MonitorCredential,
        connect_timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        OracleSession::connect(instance, service, credential, connect_timeout, query_timeout)
            .await
            .map(Self::Oracle)
    }

    /// Release the session.
    pub async fn close(self) {
        match self {
            Self::MySql(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
            Self::Oracle(session) => session.close().await,
        }
    }
}

#[async_trait]
impl QueryRunner for Session {
    async fn query(&self, sql: &str, limit: Duration) -> Result<RawTable, QueryError> {
        match self {
            Self::MySql(pool) => {
                let rows = timeout(limit, sqlx::raw_sql(sql).fetch_all(pool))
                    .await
                    .map_err(|_| QueryError::Timeout(limit))?
                    .map_err(|e| QueryError::Database(e.to_string()))?;
                rows.iter().map(mysql_row).collect::<Result<Vec<_>, _>>().map(RawTable::new)
            }
            Self::Postgres(pool) => {
                let rows = timeout(limit, sqlx::raw_sql(sql).fetch_all(pool))
                    .await
                    .map_err(|_| QueryError::Timeout(limit))?
                    .map_err(|e| QueryError::Database(e.to_string()))?;
                rows.iter().map(pg_row).collect::<Result<Vec<_>, _>>().map(RawTable::new)
            }
            Self::Oracle(session) => session.query(sql, limit).await,
        }
    }
}

async fn ping_pool<DB>(pool: &sqlx::Pool<DB>, limit: Duration) -> Result<(), CaptureError>
where
    DB: sqlx::Database,
{
    let attempt = async {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    };

    match timeout(limit, attempt).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            pool.close().await;
            Err(CaptureError::Connection(e.to_string()))
        }
        Err(_) => {
            pool.close().await;
            Err(CaptureError::Connection(format!(
                "connect/ping timed out after {limit:?}"
            )))
        }
    }
}

fn mysql_row(row: &MySqlRow) -> Result<Vec<String>, QueryError> {
    (0..row.len())
        .map(|i| {
            let value = row
                .try_get_raw(i)
                .map_err(|e| QueryError::Database(e.to_string()))?;
            if value.is_null() {
                return Ok(NULL_CELL.to_string());
            }
            <&[u8] as Decode<sqlx::MySql>>::decode(value)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .map_err(|e| QueryError::Database(format!("column {i}: {e}")))
        })
        .collect()
}

fn pg_row(row: &PgRow) -> Result<Vec<String>, QueryError> {
    (0..row.len())
        .map(|i| {
            let value = row
                .try_get_raw(i)
                .map_err(|e| QueryError::Database(e.to_string()))?;
            if value.is_null() {
                return Ok(NULL_CELL.to_string());
            }
            <&str as Decode<sqlx::Postgres>>::decode(value)
                .map(str::to_string)
                .map_err(|e| QueryError::Database(format!("column {i}: {e}")))
        })
        .collect()
}

/// Oracle session on the blocking driver.
pub struct OracleSession {
    conn: Arc<oracle::Connection>,
}

impl OracleSession {
    async fn connect(
        instance: &Instance,
        service: &str,
        credential: &MonitorCredential,
        connect_timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self, CaptureError> {
        let connect_string = format!("//{}:{}/{}", instance.host, instance.port, service);
        let credential = credential.clone();

        let task = tokio::task::spawn_blocking(move || {
            let conn = oracle::Connection::connect(
                &credential.user,
                &credential.password,
                &connect_string,
            )?;
            // Server round trips give up on their own once the query timeout passes.
            conn.set_call_timeout(Some(query_timeout))?;
            conn.ping()?;
            Ok::<_, oracle::Error>(conn)
        });

        match timeout(connect_timeout, task).await {
            Ok(Ok(Ok(conn))) => Ok(Self {
                conn: Arc::new(conn),
            }),
            Ok(Ok(Err(e))) => Err(CaptureError::Connection(e.to_string())),
            Ok(Err(e)) => Err(CaptureError::Connection(e.to_string())),
            Err(_) => Err(CaptureError::Connection(format!(
                "connect/ping timed out after {connect_timeout:?}"
            ))),
        }
    }

    async fn query(&self, sql: &str, limit: Duration) -> Result<RawTable, QueryError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let task = tokio::task::spawn_blocking(move || oracle_query(&conn, &sql));

        match timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(QueryError::Database(e.to_string())),
            Err(_) => Err(QueryError::Timeout(limit)),
        }
    }

    async fn close(self) {
        let conn = self.conn;
        let closed = tokio::task::spawn_blocking(move || conn.close()).await;
        if let Ok(Err(e)) = closed {
            tracing::debug!(error = %e, "Oracle session close failed");
        }
    }
}

fn oracle_query(conn: &oracle::Connection, sql: &str) -> Result<RawTable, QueryError> {
    let db_err = |e: oracle::Error| QueryError::Database(e.to_string());
    let mut rows = Vec::new();

    for row in conn.query(sql, &[]).map_err(db_err)? {
        let row = row.map_err(db_err)?;
        let cells = row
            .sql_values()
            .iter()
            .map(|value| match value.is_null() {
                Ok(true) => NULL_CELL.to_string(),
                _ => value.get::<String>().unwrap_or_else(|_| value.to_string()),
            })
            .collect();
        rows.push(cells);
    }

    Ok(RawTable::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = MonitorCredential::new("monitor", "hunter2");
        let debug = format!("{credential:?}");
        assert!(debug.contains("monitor"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unreachable_mysql_is_connection_error() {
        // Port 1 on localhost refuses immediately.
        let inst = Instance::new(1, "mysql", "127.0.0.1", 1, "");
        let credential = MonitorCredential::new("monitor", "secret");
        let err = Session::connect_mysql(&inst, "information_schema", &credential, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Connection(_)));
    }
}
