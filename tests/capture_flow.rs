//! End-to-end capture flow against the real store, artifact writer and pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, TimeDelta};
use dbsnap::capture::{
    CaptureContext, CaptureOutcome, CaptureSettings, Dialect, MySql, QueryError, QueryRunner,
    RawTable, capture_instance, run_capture,
};
use dbsnap::orchestrator::{InstanceRegistry, Job, JobFactory, Scheduler, WorkerPool};
use dbsnap::report::{ArtifactKey, FsArtifactWriter};
use dbsnap::storage::{CREATE_TIME_FORMAT, CentralStore, Instance};
use tempfile::TempDir;

/// Answers each battery query by name; names not listed time out.
struct FakeMySql {
    by_sql: HashMap<&'static str, Vec<Vec<String>>>,
}

impl FakeMySql {
    fn new(tables: &[(&str, Vec<Vec<String>>)]) -> Self {
        let by_sql = MySql::queries()
            .iter()
            .filter_map(|q| {
                tables
                    .iter()
                    .find(|(name, _)| *name == q.name)
                    .map(|(_, rows)| (q.sql, rows.clone()))
            })
            .collect();
        Self { by_sql }
    }
}

#[async_trait]
impl QueryRunner for FakeMySql {
    async fn query(&self, sql: &str, timeout: Duration) -> Result<RawTable, QueryError> {
        self.by_sql
            .get(sql)
            .map(|rows| RawTable::new(rows.clone()))
            .ok_or(QueryError::Timeout(timeout))
    }
}

fn row(width: usize, values: &[(usize, &str)]) -> Vec<String> {
    let mut row = vec!["x".to_string(); width];
    for (i, v) in values {
        row[*i] = (*v).to_string();
    }
    row
}

async fn setup() -> (CentralStore, FsArtifactWriter, CaptureContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = CentralStore::connect("sqlite::memory:", 1).await.unwrap();
    let artifacts = FsArtifactWriter::new(dir.path());
    let ctx = CaptureContext::new(
        Arc::new(store.clone()),
        Arc::new(artifacts.clone()),
        CaptureSettings::default(),
    );
    (store, artifacts, ctx, dir)
}

fn window() -> (String, String) {
    let now = Local::now();
    (
        (now - TimeDelta::hours(1)).format(CREATE_TIME_FORMAT).to_string(),
        (now + TimeDelta::hours(1)).format(CREATE_TIME_FORMAT).to_string(),
    )
}

#[tokio::test]
async fn test_capture_persists_summary_and_report() {
    let (store, artifacts, ctx, _dir) = setup().await;
    let inst = Instance::new(21, "mysql", "10.1.0.21", 3306, "");
    let runner = FakeMySql::new(&[
        (
            "act_sess",
            vec![
                row(9, &[(5, "15"), (7, "executing"), (8, "select sleep(15)")]),
                row(9, &[(5, "4"), (7, "Waiting for table metadata lock")]),
                row(9, &[(5, "2"), (7, "Sending data")]),
            ],
        ),
        ("sess_count", vec![row(4, &[(3, "40")]), row(4, &[(3, "2")])]),
    ]);

    let summary = run_capture::<MySql, _>(&runner, &inst, &ctx).await;

    assert_eq!(summary.metrics.act_sess_count, 3);
    assert_eq!(summary.metrics.big_query_count, 1);
    assert_eq!(summary.metrics.max_query_seconds, 15);
    assert_eq!(summary.metrics.wait_sess_count, 1);
    assert_eq!(summary.metrics.sess_count, 42);
    assert_eq!(summary.metrics.txn_count, 0);
    assert_eq!(summary.msg, "txn: query timed out after 10s");

    let (start, end) = window();
    let rows = store.list_summaries(21, &start, &end).await.unwrap();
    assert_eq!(rows, vec![summary.clone()]);

    let at = chrono::NaiveDateTime::parse_from_str(&summary.create_time, CREATE_TIME_FORMAT)
        .unwrap()
        .and_local_timezone(Local)
        .unwrap();
    let key = ArtifactKey::new(21, at).partition_key();
    let html = artifacts.read_html(&key).await.unwrap();
    assert!(html.contains("10.1.0.21:3306"));
    assert!(html.contains("select sleep(15)"));
}

#[tokio::test]
async fn test_unreachable_instance_leaves_no_trace() {
    let (store, _artifacts, ctx, dir) = setup().await;
    let inst = Arc::new(Instance::new(22, "mysql", "127.0.0.1", 1, ""));

    let outcome = capture_instance(inst, &ctx).await;
    assert!(matches!(outcome, CaptureOutcome::Skipped(_)));

    let (start, end) = window();
    assert!(store.list_summaries(22, &start, &end).await.unwrap().is_empty());
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

/// Counts jobs and runs a scripted capture for each instance.
struct ScriptedJobs {
    ctx: CaptureContext,
    submitted: AtomicUsize,
}

impl JobFactory for ScriptedJobs {
    fn job(&self, instance: Arc<Instance>) -> Job {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        Job::new(instance.address(), async move {
            let runner = FakeMySql::new(&[("act_sess", vec![row(9, &[(5, "1")])])]);
            run_capture::<MySql, _>(&runner, &instance, &ctx).await;
        })
    }
}

#[tokio::test]
async fn test_tick_captures_every_registered_instance() {
    let (store, _artifacts, ctx, _dir) = setup().await;
    for id in 1..=4 {
        let inst = Instance::new(id, "mysql", format!("10.2.0.{id}"), 3306, "");
        assert!(store.insert_instance_if_absent(&inst).await.unwrap());
    }

    let registry = Arc::new(InstanceRegistry::new(Arc::new(store.clone())));
    registry.load().await.unwrap();

    let mut pool = WorkerPool::new(2, 2);
    pool.start();
    let jobs = Arc::new(ScriptedJobs {
        ctx,
        submitted: AtomicUsize::new(0),
    });
    let scheduler = Scheduler::new(
        Duration::from_secs(30),
        registry,
        pool.submitter().unwrap(),
        jobs.clone(),
    )
    .unwrap();

    assert_eq!(scheduler.tick().await, 4);
    drop(scheduler);
    pool.join().await;

    assert_eq!(jobs.submitted.load(Ordering::SeqCst), 4);
    let (start, end) = window();
    for id in 1..=4 {
        let rows = store.list_summaries(id, &start, &end).await.unwrap();
        assert_eq!(rows.len(), 1, "instance {id}");
        assert_eq!(rows[0].metrics.act_sess_count, 1);
    }
}
