//! MySQL-family capturer (MySQL, PolarDB, TDSQL-C).

use chrono::{DateTime, Local};

use crate::capture::reduce::{count_big, count_where, max_seconds, rows, sum};
use crate::capture::{Dialect, DiagnosticQuery, QueryResults};
use crate::report::{MetricLabels, Report, ReportHeader, Section};
use crate::storage::{Instance, SnapshotMetrics};

pub(crate) const ACT_SESS: &str = "act_sess";
pub(crate) const TXN: &str = "txn";
pub(crate) const SESS_COUNT: &str = "sess_count";

pub(crate) const ACT_SESS_SQL: &str = r#"select now() create_time, id, user, db, substring_index(host, ':', 1) client, time exec_time, command, state, info sql_text
from information_schema.processlist
where id <> connection_id() and user not in ('system user', 'event_scheduler', 'replicator', 'aurora')
  and command not in ('sleep', 'Binlog Dump', 'Binlog Dump GTID')
order by exec_time desc"#;

pub(crate) const TXN_SQL: &str = r#"select
    now() create_time,
    trx_mysql_thread_id p_id,
    b.user,
    b.db,
    substring_index(b.host, ':', 1) client,
    b.command p_command,
    b.state p_state,
    b.time p_exec_time,
    trx_id,
    trx_started,
    trx_state,
    trx_operation_state,
    timestampdiff(second, trx_started, now()) txn_exec_time,
    ifnull(timestampdiff(second, trx_wait_started, now()), 0) txn_wait_time,
    trx_tables_locked,
    trx_rows_locked,
    trx_rows_modified,
    trx_isolation_level,
    trx_query
from information_schema.innodb_trx a
left join information_schema.processlist b on b.id = a.trx_mysql_thread_id
order by txn_exec_time desc"#;

pub(crate) const SESS_COUNT_SQL: &str = r#"select now() create_time, user, db, count(*) cnt
from information_schema.processlist
group by user, db order by count(*) desc limit 100"#;

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
        name: SESS_COUNT,
        sql: SESS_COUNT_SQL,
    },
];

// Column positions in the result sets above.
const ACT_SESS_EXEC_TIME: usize = 5;
const ACT_SESS_STATE: usize = 7;
const TXN_STATE: usize = 10;
const TXN_EXEC_TIME: usize = 12;
const SESS_COUNT_CNT: usize = 3;

const ACT_SESS_COLUMNS: &[&str] = &[
    "Time", "PID", "User", "DB", "Client", "Exec time (s)", "Command", "State", "SQL text",
];
const TXN_COLUMNS: &[&str] = &[
    "Time",
    "PID",
    "User",
    "DB",
    "Client",
    "Thread command",
    "Thread state",
    "Thread time (s)",
    "Txn ID",
    "Txn started",
    "Txn state",
    "Txn operation state",
    "Txn time (s)",
    "Lock wait (s)",
    "Tables locked",
    "Rows locked",
    "Rows modified",
    "Isolation level",
    "SQL text",
];
const SESS_COUNT_COLUMNS: &[&str] = &["Time", "User", "DB", "Connections"];

/// MySQL-family dialect marker.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl Dialect for MySql {
    const NAME: &'static str = "mysql";

    fn queries() -> &'static [DiagnosticQuery] {
        QUERIES
    }

    fn reduce(results: &QueryResults) -> SnapshotMetrics {
        let act_sess = results.get(ACT_SESS);
        let txn = results.get(TXN);

        SnapshotMetrics {
            act_sess_count: rows(act_sess),
            txn_count: rows(txn),
            sess_count: sum(results.get(SESS_COUNT), SESS_COUNT_CNT),
            big_query_count: count_big(act_sess, ACT_SESS_EXEC_TIME),
            wait_sess_count: count_where(act_sess, ACT_SESS_STATE, |s| s.contains("Waiting for ")),
            lock_count: count_where(txn, TXN_STATE, |s| s == "LOCK WAIT"),
            max_query_seconds: max_seconds(act_sess, ACT_SESS_EXEC_TIME),
            max_txn_seconds: max_seconds(txn, TXN_EXEC_TIME),
        }
    }

    fn report(
        instance: &Instance,
        captured_at: DateTime<Local>,
        results: &QueryResults,
        metrics: &SnapshotMetrics,
    ) -> Report {
        let header = ReportHeader::new(
            captured_at,
            instance.inst_id,
            instance.address(),
            &MetricLabels::default(),
            metrics,
        )
        .with_links(&[
            Some("actSess"),
            Some("txn"),
            Some("sessCount"),
            Some("actSess"),
            Some("actSess"),
            Some("txn"),
            Some("actSess"),
            Some("txn"),
        ]);

        Report {
            header,
            sections: vec![
                Section::new("Active sessions", ACT_SESS_COLUMNS, results.get(ACT_SESS))
                    .with_anchor("actSess"),
                Section::new("Transactions", TXN_COLUMNS, results.get(TXN)).with_anchor("txn"),
                Section::new("Connection summary", SESS_COUNT_COLUMNS, results.get(SESS_COUNT))
                    .with_anchor("sessCount"),
            ],
        }
    }
}
