//! PostgreSQL capturer.

use chrono::{DateTime, Local};

use crate::capture::reduce::{count_big, count_where, max_seconds, max_seconds_where, number, rows, sum};
use crate::capture::{Dialect, DiagnosticQuery, QueryResults};
use crate::report::{MetricLabels, Report, ReportHeader, Section};
use crate::storage::{Instance, SnapshotMetrics};

pub(crate) const ACT_SESS: &str = "act_sess";
pub(crate) const TXN: &str = "txn";
pub(crate) const LOCKS: &str = "locks";
pub(crate) const USER_SESS_COUNT: &str = "user_sess_count";
pub(crate) const APP_SESS_COUNT: &str = "app_sess_count";
pub(crate) const CLIENT_SESS_COUNT: &str = "client_sess_count";

pub(crate) const ACT_SESS_SQL: &str = r#"select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time, pid, datname as db, usename as user, application_name, backend_type,
       client_addr client, state, wait_event_type, wait_event,
       round(extract(epoch from (now() - query_start))::numeric, 1) as duration_ses,
       to_char(query_start, 'yyyy-mm-dd hh24:mi:ss') query_start, query sql_text
from pg_stat_activity where state <> 'idle' order by duration_ses desc"#;

pub(crate) const TXN_SQL: &str = r#"select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time, pid, datname as db, usename as user, application_name, backend_type,
       client_addr client, state, wait_event_type, wait_event,
       round(extract(epoch from (now() - xact_start))::numeric, 1) txn_exec_time,
       round(extract(epoch from (now() - query_start))::numeric, 1) exec_time,
       to_char(xact_start, 'yyyy-mm-dd hh24:mi:ss') txn_start, to_char(query_start, 'yyyy-mm-dd hh24:mi:ss') query_start,
       query sql_text
from pg_stat_activity
where state in ('active', 'idle in transaction') and xact_start is not null order by xact_start"#;

pub(crate) const LOCKS_SQL: &str = r#"with lck as (
    select pid, count(*) as lock_count, sum(case when granted = 'f' then 1 else 0 end) as wait_lock_count,
           array_agg(distinct locktype) as lock_types
    from pg_locks group by pid
)
select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time,
       lck.pid,
       pg_blocking_pids(lck.pid) blocker_pid,
       psa.datname db,
       psa.application_name,
       to_char(least(query_start, xact_start), 'yyyy-mm-dd hh24:mi:ss') start_time,
       psa.state,
       round(extract(epoch from (current_timestamp - least(query_start, xact_start)))::numeric, 2) as txn_runtime,
       coalesce(lck.lock_count, 0) as lock_count,
       coalesce(lck.wait_lock_count, 0) as wait_lock_count,
       coalesce(lck.lock_types, '{}') as lock_types,
       psa.query sqltext
from pg_stat_activity psa
join lck on psa.pid = lck.pid
where psa.state <> 'idle'
order by xact_start"#;

pub(crate) const USER_SESS_COUNT_SQL: &str = r#"select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time, datname as db, usename as user, count(*) cnt
from pg_stat_activity group by datname, usename order by cnt desc"#;

pub(crate) const APP_SESS_COUNT_SQL: &str = r#"select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time, datname as db, application_name, count(*) cnt
from pg_stat_activity group by datname, application_name order by cnt desc"#;

pub(crate) const CLIENT_SESS_COUNT_SQL: &str = r#"select to_char(now(), 'yyyy-mm-dd hh24:mi:ss') create_time, datname as db, client_addr client, count(*) cnt
from pg_stat_activity group by datname, client_addr order by cnt desc"#;

const QUERIES: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: ACT_SESS,
        sql: ACT_SESS_SQL,
    },
    DiagnosticQuery {
        name: TXN,
        sql: TXN_SQL,
    },
    DiagnosticQuery {
        name: LOCKS,
        sql: LOCKS_SQL,
    },
    DiagnosticQuery {
        name: USER_SESS_COUNT,
        sql: USER_SESS_COUNT_SQL,
    },
    DiagnosticQuery {
        name: APP_SESS_COUNT,
        sql: APP_SESS_COUNT_SQL,
    },
    DiagnosticQuery {
        name: CLIENT_SESS_COUNT,
        sql: CLIENT_SESS_COUNT_SQL,
    },
];

const ACT_SESS_BACKEND_TYPE: usize = 5;
const ACT_SESS_WAIT_EVENT_TYPE: usize = 8;
const ACT_SESS_DURATION: usize = 10;
const TXN_EXEC_TIME: usize = 10;
const LOCKS_WAITING: usize = 9;
const USER_SESS_COUNT_CNT: usize = 3;

/// Backend type of ordinary client connections (excludes walsenders and workers).
const CLIENT_BACKEND: &str = "client backend";

const ACT_SESS_COLUMNS: &[&str] = &[
    "Time",
    "PID",
    "DB",
    "User",
    "Application",
    "Backend type",
    "Client",
    "State",
    "Wait event type",
    "Wait event",
    "Exec time (s)",
    "Query start",
    "SQL text",
];
const TXN_COLUMNS: &[&str] = &[
    "Time",
    "PID",
    "DB",
    "User",
    "Application",
    "Backend type",
    "Client",
    "State",
    "Wait event type",
    "Wait event",
    "Txn time (s)",
    "Exec time (s)",
    "Txn start",
    "Query start",
    "SQL text",
];
const LOCKS_COLUMNS: &[&str] = &[
    "Time",
    "PID",
    "Blocked by",
    "DB",
    "Application",
    "Started",
    "State",
    "Txn time (s)",
    "Locks",
    "Waiting locks",
    "Lock types",
    "SQL text",
];
const USER_SESS_COUNT_COLUMNS: &[&str] = &["Time", "DB", "User", "Connections"];
const APP_SESS_COUNT_COLUMNS: &[&str] = &["Time", "DB", "Application", "Connections"];
const CLIENT_SESS_COUNT_COLUMNS: &[&str] = &["Time", "DB", "Client", "Connections"];

/// PostgreSQL dialect marker.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl Dialect for Postgres {
    const NAME: &'static str = "pgsql";

    fn queries() -> &'static [DiagnosticQuery] {
        QUERIES
    }

    fn reduce(results: &QueryResults) -> SnapshotMetrics {
        let act_sess = results.get(ACT_SESS);
        let txn = results.get(TXN);

        SnapshotMetrics {
            act_sess_count: rows(act_sess),
            txn_count: rows(txn),
            sess_count: sum(results.get(USER_SESS_COUNT), USER_SESS_COUNT_CNT),
            big_query_count: count_big(act_sess, ACT_SESS_DURATION),
            wait_sess_count: count_where(act_sess, ACT_SESS_WAIT_EVENT_TYPE, |t| t == "Lock"),
            lock_count: count_where(results.get(LOCKS), LOCKS_WAITING, |n| number(n) > 0.0),
            max_query_seconds: max_seconds_where(
                act_sess,
                ACT_SESS_DURATION,
                ACT_SESS_BACKEND_TYPE,
                |t| t == CLIENT_BACKEND,
            ),
            max_txn_seconds: max_seconds(txn, TXN_EXEC_TIME),
        }
    }

    fn report(
        instance: &Instance,
        captured_at: DateTime<Local>,
        results: &QueryResults,
        metrics: &SnapshotMetrics,
    ) -> Report {
        let labels = MetricLabels {
            lock: "Sessions waiting on locks",
            ..Default::default()
        };
        let header = ReportHeader::new(
            captured_at,
            instance.inst_id,
            instance.address(),
            &labels,
            metrics,
        )
        .with_links(&[
            Some("actSess"),
            Some("txn"),
            Some("sessCount"),
            Some("actSess"),
            Some("actSess"),
            Some("locks"),
            Some("actSess"),
            Some("txn"),
        ]);

        Report {
            header,
            sections: vec![
                Section::new("Active sessions", ACT_SESS_COLUMNS, results.get(ACT_SESS))
                    .with_anchor("actSess"),
                Section::new("Transactions", TXN_COLUMNS, results.get(TXN)).with_anchor("txn"),
                Section::new("Locks by session", LOCKS_COLUMNS, results.get(LOCKS))
                    .with_anchor("locks"),
                Section::new(
                    "Connection summary (user)",
                    USER_SESS_COUNT_COLUMNS,
                    results.get(USER_SESS_COUNT),
                )
                .with_anchor("sessCount"),
                Section::new(
                    "Connection summary (application)",
                    APP_SESS_COUNT_COLUMNS,
                    results.get(APP_SESS_COUNT),
                ),
                Section::new(
                    "Connection summary (client)",
                    CLIENT_SESS_COUNT_COLUMNS,
                    results.get(CLIENT_SESS_COUNT),
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::fixture_row;

    fn session(backend: &str, wait_type: &str, duration: &str) -> Vec<String> {
        fixture_row(
            ACT_SESS_COLUMNS.len(),
            &[
                (ACT_SESS_BACKEND_TYPE, backend),
                (ACT_SESS_WAIT_EVENT_TYPE, wait_type),
                (ACT_SESS_DURATION, duration),
            ],
        )
    }

    #[test]
    fn test_reduce() {
        let results = QueryResults::new()
            .with(
                ACT_SESS,
                vec![
                    session("walsender", "Activity", "86400.0"),
                    session(CLIENT_BACKEND, "Lock", "12.4"),
                    session(CLIENT_BACKEND, "NULL", "0.3"),
                    session(CLIENT_BACKEND, "IO", "10.0"),
                ],
            )
            .with(
                TXN,
                vec![
                    fixture_row(15, &[(TXN_EXEC_TIME, "61.5")]),
                    fixture_row(15, &[(TXN_EXEC_TIME, "2.0")]),
                ],
            )
            .with(
                LOCKS,
                vec![
                    fixture_row(12, &[(LOCKS_WAITING, "0")]),
                    fixture_row(12, &[(LOCKS_WAITING, "1")]),
                    fixture_row(12, &[(LOCKS_WAITING, "3")]),
                ],
            )
            .with(
                USER_SESS_COUNT,
                vec![fixture_row(4, &[(3, "7")]), fixture_row(4, &[(3, "1")])],
            );

        let m = Postgres::reduce(&results);
        assert_eq!(m.act_sess_count, 4);
        // Replication sessions count as big but never set the maximum
        assert_eq!(m.big_query_count, 2);
        assert_eq!(m.max_query_seconds, 12);
        assert_eq!(m.wait_sess_count, 1);
        assert_eq!(m.lock_count, 2);
        assert_eq!(m.txn_count, 2);
        assert_eq!(m.max_txn_seconds, 62);
        assert_eq!(m.sess_count, 8);
    }

    #[test]
    fn test_reduce_is_pure() {
        let results = QueryResults::new().with(ACT_SESS, vec![session(CLIENT_BACKEND, "Lock", "11")]);
        assert_eq!(Postgres::reduce(&results), Postgres::reduce(&results));
    }

    #[test]
    fn test_report_sections() {
        let results = QueryResults::new();
        let metrics = Postgres::reduce(&results);
        let inst = Instance::new(5, "pgsql", "pg1", 5432, "");
        let report = Postgres::report(&inst, Local::now(), &results, &metrics);
        assert_eq!(report.sections.len(), 6);
        assert!(report.validate().is_empty());
    }
}
