//! Capturer factory and the shared capture driver.

use std::sync::Arc;

use chrono::Local;
use tokio::time::{Instant, timeout};

use crate::capture::{
    CaptureContext, CaptureError, CaptureSettings, Dialect, MySql, OceanBase, Oracle, Postgres,
    QueryError, QueryResults, QueryRunner, RawTable, Session,
};
use crate::report::{ArtifactKey, render_report};
use crate::storage::{EngineKind, Instance, SnapshotSummary};

/// What one capture job ended with.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The capture ran; the summary was handed to the sink.
    Completed(SnapshotSummary),
    /// The instance was skipped for this tick: no summary, no artifact.
    Skipped(CaptureError),
}

/// Instance plus its session once [`Capturer::init`] succeeded.
#[derive(Debug)]
pub struct CaptureTarget {
    instance: Arc<Instance>,
    kind: EngineKind,
    session: Option<Session>,
}

impl CaptureTarget {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

/// Closed set of capturers, one variant per dialect.
#[derive(Debug)]
pub enum Capturer {
    /// MySQL, PolarDB and TDSQL-C.
    MySql(CaptureTarget),
    Oracle(CaptureTarget),
    Postgres(CaptureTarget),
    OceanBase(CaptureTarget),
}

impl Capturer {
    /// Pick the capturer for an instance's declared engine kind.
    ///
    /// # Errors
    /// `CaptureError::Configuration` for an unsupported engine kind.
    pub fn create(instance: Arc<Instance>) -> Result<Self, CaptureError> {
        let kind = instance.engine_kind().map_err(|_| {
            CaptureError::Configuration(format!(
                "unsupported database type: '{}'",
                instance.db_type
            ))
        })?;

        let target = CaptureTarget {
            instance,
            kind,
            session: None,
        };

        Ok(match kind {
            EngineKind::Mysql | EngineKind::Polar | EngineKind::Tdsqlc => Self::MySql(target),
            EngineKind::Oracle => Self::Oracle(target),
            EngineKind::Pgsql => Self::Postgres(target),
            EngineKind::Oceanbase => Self::OceanBase(target),
        })
    }

    pub fn target(&self) -> &CaptureTarget {
        match self {
            Self::MySql(t) | Self::Oracle(t) | Self::Postgres(t) | Self::OceanBase(t) => t,
        }
    }

    fn target_mut(&mut self) -> &mut CaptureTarget {
        match self {
            Self::MySql(t) | Self::Oracle(t) | Self::Postgres(t) | Self::OceanBase(t) => t,
        }
    }

    /// Dialect name for log fields.
    pub fn dialect(&self) -> &'static str {
        match self {
            Self::MySql(_) => MySql::NAME,
            Self::Oracle(_) => Oracle::NAME,
            Self::Postgres(_) => Postgres::NAME,
            Self::OceanBase(_) => OceanBase::NAME,
        }
    }

    /// Open the monitoring session, bounded by the connect timeout.
    ///
    /// # Errors
    /// `CaptureError::Connection` for unreachable hosts, rejected credentials
    /// or a ping that doesn't answer in time.
    pub async fn init(&mut self, settings: &CaptureSettings) -> Result<(), CaptureError> {
        let target = self.target_mut();
        let instance = &target.instance;
        let database = target.kind.working_database(&instance.db_name);
        let credential = &settings.credential;

        let session = match target.kind {
            EngineKind::Mysql | EngineKind::Polar | EngineKind::Tdsqlc | EngineKind::Oceanbase => {
                Session::connect_mysql(instance, database, credential, settings.connect_timeout)
                    .await?
            }
            EngineKind::Pgsql => {
                Session::connect_postgres(instance, database, credential, settings.connect_timeout)
                    .await?
            }
            EngineKind::Oracle => {
                Session::connect_oracle(
                    instance,
                    database,
                    credential,
                    settings.connect_timeout,
                    settings.query_timeout,
                )
                .await?
            }
        };

        target.session = Some(session);
        Ok(())
    }

    /// Run the dialect battery and hand off the report and summary.
    ///
    /// Never fails: query errors end up in the summary's error log.
    pub async fn capture(&self, ctx: &CaptureContext) -> SnapshotSummary {
        let target = self.target();
        let runner: &dyn QueryRunner = match &target.session {
            Some(session) => session,
            None => &NotConnected,
        };

        match self {
            Self::MySql(_) => run_capture::<MySql, _>(runner, &target.instance, ctx).await,
            Self::Oracle(_) => run_capture::<Oracle, _>(runner, &target.instance, ctx).await,
            Self::Postgres(_) => run_capture::<Postgres, _>(runner, &target.instance, ctx).await,
            Self::OceanBase(_) => run_capture::<OceanBase, _>(runner, &target.instance, ctx).await,
        }
    }

    /// Release the session, if any.
    pub async fn close(&mut self) {
        if let Some(session) = self.target_mut().session.take() {
            session.close().await;
        }
    }
}

/// Runner used when `capture` is called without a session.
struct NotConnected;

#[async_trait::async_trait]
impl QueryRunner for NotConnected {
    async fn query(&self, _sql: &str, _timeout: std::time::Duration) -> Result<RawTable, QueryError> {
        Err(QueryError::Database("not connected".to_string()))
    }
}

/// One error-log line: `<query>: <error>` with line breaks folded.
fn error_line(query: &str, error: &QueryError) -> String {
    let text = error.to_string();
    let folded: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    format!("{query}: {}", folded.join(" "))
}

/// Shared capture algorithm, monomorphized per dialect.
///
/// 1. Run the battery (then the optional follow-up) sequentially, each query
///    bounded by the query timeout; a failure logs one line and yields an
///    empty table.
/// 2. Reduce the tables to metrics.
/// 3. Build, validate, render and store the report.
/// 4. Persist the summary, bounded by the persist timeout.
pub async fn run_capture<D, R>(runner: &R, instance: &Instance, ctx: &CaptureContext) -> SnapshotSummary
where
    D: Dialect,
    R: QueryRunner + ?Sized,
{
    let started = Instant::now();
    let captured_at = Local::now();
    let limit = ctx.settings.query_timeout;
    let address = instance.address();

    let mut summary = SnapshotSummary::new(instance.inst_id, captured_at);
    let mut results = QueryResults::new();
    let mut errors = Vec::new();

    for query in D::queries() {
        match runner.query(query.sql, limit).await {
            Ok(table) => results.insert(query.name, table),
            Err(e) => errors.push(error_line(query.name, &e)),
        }
    }

    if let Some(follow_up) = D::follow_up(&results) {
        match runner.query(&follow_up.sql, limit).await {
            Ok(table) => results.insert(follow_up.name, table),
            Err(e) => errors.push(error_line(follow_up.name, &e)),
        }
    }

    if !errors.is_empty() {
        tracing::warn!(
            instance = %address,
            dialect = D::NAME,
            failed = errors.len(),
            errors = %errors.join("; "),
            "Diagnostic queries failed"
        );
    }

    summary.metrics = D::reduce(&results);
    summary.msg = errors.join("\n");

    let report = D::report(instance, captured_at, &results, &summary.metrics);
    for issue in report.validate() {
        tracing::warn!(instance = %address, issue = %issue, "Report structure issue");
    }

    let key = ArtifactKey::new(instance.inst_id, captured_at);
    match render_report(&report) {
        Ok(html) => {
            if let Err(e) = ctx.artifacts.write(&key, html).await {
                tracing::error!(instance = %address, error = %e, "Failed to store report");
            }
        }
        Err(e) => tracing::error!(instance = %address, error = %e, "Failed to render report"),
    }

    summary.duration_seconds = started.elapsed().as_secs_f64().round() as i64;

    match timeout(ctx.settings.persist_timeout, ctx.summaries.insert_summary(&summary)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(instance = %address, error = %e, "Failed to persist summary");
        }
        Err(_) => {
            tracing::error!(instance = %address, "Persisting summary timed out");
        }
    }

    let m = &summary.metrics;
    tracing::info!(
        instance = %address,
        inst_id = instance.inst_id,
        dialect = D::NAME,
        act_sess = m.act_sess_count,
        txn = m.txn_count,
        sess = m.sess_count,
        big_query = m.big_query_count,
        wait_sess = m.wait_sess_count,
        locks = m.lock_count,
        max_query_secs = m.max_query_seconds,
        max_txn_secs = m.max_txn_seconds,
        duration_secs = summary.duration_seconds,
        failed_queries = errors.len(),
        "Capture completed"
    );

    summary
}

/// Full lifecycle for one instance: create, init, capture, close.
pub async fn capture_instance(instance: Arc<Instance>, ctx: &CaptureContext) -> CaptureOutcome {
    let address = instance.address();
    tracing::debug!(instance = %address, inst_id = instance.inst_id, "Capture started");

    let mut capturer = match Capturer::create(instance) {
        Ok(capturer) => capturer,
        Err(e) => {
            tracing::error!(instance = %address, error = %e, "Instance skipped");
            return CaptureOutcome::Skipped(e);
        }
    };

    if let Err(e) = capturer.init(&ctx.settings).await {
        tracing::error!(
            instance = %address,
            dialect = capturer.dialect(),
            error = %e,
            "Instance skipped"
        );
        return CaptureOutcome::Skipped(e);
    }

    let summary = capturer.capture(ctx).await;
    capturer.close().await;
    CaptureOutcome::Completed(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mysql;
    use crate::capture::testing::{MemoryArtifacts, MemorySink, Script, ScriptedRunner, fixture_row};

    fn context(sink: &Arc<MemorySink>, artifacts: &Arc<MemoryArtifacts>) -> CaptureContext {
        CaptureContext::new(sink.clone(), artifacts.clone(), CaptureSettings::default())
    }

    fn mysql_session(exec_time: &str) -> Vec<String> {
        fixture_row(9, &[(5, exec_time), (7, "executing")])
    }

    #[tokio::test]
    async fn test_mysql_capture_end_to_end() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let runner = ScriptedRunner::new()
            .on(
                mysql::ACT_SESS_SQL,
                Script::Rows(vec![mysql_session("15"), mysql_session("4"), mysql_session("2")]),
            )
            .on(mysql::TXN_SQL, Script::Rows(vec![]))
            .on(
                mysql::SESS_COUNT_SQL,
                Script::Rows(vec![fixture_row(4, &[(3, "25")])]),
            );
        let inst = Instance::new(11, "mysql", "db1", 3306, "");

        let summary = run_capture::<MySql, _>(&runner, &inst, &context(&sink, &artifacts)).await;

        assert_eq!(summary.metrics.act_sess_count, 3);
        assert_eq!(summary.metrics.big_query_count, 1);
        assert_eq!(summary.metrics.max_query_seconds, 15);
        assert_eq!(summary.metrics.sess_count, 25);
        assert!(summary.msg.is_empty());

        assert_eq!(sink.rows(), vec![summary.clone()]);
        let written = artifacts.written();
        assert_eq!(written.len(), 1);
        assert!(written[0].0.starts_with("11/"));
        assert!(written[0].1.contains("Active sessions"));
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_single_query_timeout_is_isolated() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let runner = ScriptedRunner::new()
            .on(mysql::ACT_SESS_SQL, Script::Rows(vec![mysql_session("12")]))
            .on(mysql::TXN_SQL, Script::Timeout)
            .on(
                mysql::SESS_COUNT_SQL,
                Script::Rows(vec![fixture_row(4, &[(3, "9")])]),
            );
        let inst = Instance::new(12, "polar", "db2", 3306, "");

        let summary = run_capture::<MySql, _>(&runner, &inst, &context(&sink, &artifacts)).await;

        assert_eq!(summary.msg, "txn: query timed out after 10s");
        assert_eq!(summary.msg.lines().count(), 1);
        assert_eq!(summary.metrics.txn_count, 0);
        assert_eq!(summary.metrics.max_txn_seconds, 0);
        assert_eq!(summary.metrics.act_sess_count, 1);
        assert_eq!(summary.metrics.big_query_count, 1);
        assert_eq!(summary.metrics.sess_count, 9);
        assert_eq!(sink.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_multiline_errors_fold_to_one_line() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let runner = ScriptedRunner::new().on(
            mysql::SESS_COUNT_SQL,
            Script::Fail("Access denied\n  for user 'monitor'\n".to_string()),
        );
        let inst = Instance::new(13, "mysql", "db3", 3306, "");

        let summary = run_capture::<MySql, _>(&runner, &inst, &context(&sink, &artifacts)).await;
        assert_eq!(summary.msg, "sess_count: Access denied for user 'monitor'");
    }

    #[tokio::test]
    async fn test_oracle_follow_up_skipped_without_ids() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let runner = ScriptedRunner::new();
        let inst = Instance::new(14, "oracle", "ora", 1521, "ORCL");

        let summary = run_capture::<Oracle, _>(&runner, &inst, &context(&sink, &artifacts)).await;
        assert!(summary.msg.is_empty());
        assert_eq!(runner.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_sink_failure_still_returns_summary() {
        let sink = Arc::new(MemorySink::failing());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let runner = ScriptedRunner::new();
        let inst = Instance::new(15, "pgsql", "pg", 5432, "");

        let summary = run_capture::<Postgres, _>(&runner, &inst, &context(&sink, &artifacts)).await;
        assert_eq!(summary.inst_id, 15);
        assert!(sink.rows().is_empty());
        assert_eq!(artifacts.written().len(), 1);
    }

    #[test]
    fn test_factory_selects_variant() {
        let cases = [
            ("mysql", "mysql"),
            ("polar", "mysql"),
            ("tdsqlc", "mysql"),
            ("oracle", "oracle"),
            ("pgsql", "pgsql"),
            ("oceanbase", "oceanbase"),
        ];
        for (db_type, dialect) in cases {
            let inst = Arc::new(Instance::new(1, db_type, "h", 1, ""));
            let capturer = Capturer::create(inst).unwrap();
            assert_eq!(capturer.dialect(), dialect, "{db_type}");
            assert!(!capturer.target().is_connected());
        }
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let inst = Arc::new(Instance::new(1, "sqlserver", "h", 1433, ""));
        match Capturer::create(inst) {
            Err(CaptureError::Configuration(msg)) => assert!(msg.contains("sqlserver")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_instance_is_skipped() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let inst = Arc::new(Instance::new(16, "db2", "h", 50000, ""));

        let outcome = capture_instance(inst, &context(&sink, &artifacts)).await;
        assert!(matches!(
            outcome,
            CaptureOutcome::Skipped(CaptureError::Configuration(_))
        ));
        assert!(sink.rows().is_empty());
        assert!(artifacts.written().is_empty());
    }

    #[tokio::test]
    async fn test_capture_without_session_logs_every_query() {
        let sink = Arc::new(MemorySink::default());
        let artifacts = Arc::new(MemoryArtifacts::default());
        let inst = Arc::new(Instance::new(17, "oceanbase", "ob", 2881, ""));
        let capturer = Capturer::create(inst).unwrap();

        let summary = capturer.capture(&context(&sink, &artifacts)).await;
        assert_eq!(summary.msg.lines().count(), 5);
        assert!(summary.msg.lines().all(|l| l.ends_with(": not connected")));
    }
}
