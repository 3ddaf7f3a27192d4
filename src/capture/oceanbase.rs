//! OceanBase capturer (MySQL mode).
//!
//! Speaks the MySQL wire protocol but reads OceanBase's own cluster-wide
//! views, so waiting sessions and locks come from dedicated lock queries.

use chrono::{DateTime, Local};

use crate::capture::reduce::{count_big, max_seconds, rows, sum};
use crate::capture::{Dialect, DiagnosticQuery, QueryResults};
use crate::report::{MetricLabels, Report, ReportHeader, Section};
use crate::storage::{Instance, SnapshotMetrics};

pub(crate) const ACT_SESS: &str = "act_sess";
pub(crate) const TXN: &str = "txn";
pub(crate) const LOCK_WAITS: &str = "lock_waits";
pub(crate) const LOCKED_OBJECTS: &str = "locked_objects";
pub(crate) const SESS_COUNT: &str = "sess_count";

pub(crate) const ACT_SESS_SQL: &str = r#"select curtime() create_time, svr_ip, id, user, db, user_client_ip client, tenant, round(time, 3) exec_time,
       command, state, trans_id, info sqltext
from oceanbase.gv$ob_processlist where state <> 'SLEEP' order by exec_time desc"#;

pub(crate) const TXN_SQL: &str = r#"with b as (
    select trans_id, min(ctx_create_time) ctx_create_time from oceanbase.__all_virtual_trans_stat group by trans_id
)
select curtime() create_time, svr_ip, id, user, db, user_client_ip client, tenant, round(time, 3) exec_time,
       date_format(ctx_create_time, '%Y-%m-%d %H:%i:%s') txn_start,
       ifnull(timestampdiff(second, b.ctx_create_time, now()), 0) txn_exec_sec,
       command, a.state, a.trans_id, info sqltext
from oceanbase.gv$ob_processlist a join b on a.trans_id = b.trans_id
order by txn_exec_sec desc"#;

pub(crate) const LOCK_WAITS_SQL: &str = r#"with t as (
    select a.id1 blocker_txn, a.trans_id waiter_txn, b.id1
    from oceanbase.gv$ob_locks a
    join oceanbase.gv$ob_locks b on a.trans_id = b.trans_id and a.block = 1 and a.type = 'TX' and b.block = 1 and b.type = 'TR'
)
select bt.session_id, bt.tx_id, bt.ctx_create_time, timestampdiff(second, bt.ctx_create_time, now()) txn_exec_sec, bt.last_request_time,
       wt.session_id, wt.tx_id, wt.ctx_create_time, timestampdiff(second, wt.ctx_create_time, now()) txn_exec_sec, wt.last_request_time
from t
left join oceanbase.gv$ob_transaction_participants bt on bt.tx_id = t.blocker_txn
left join oceanbase.gv$ob_transaction_participants wt on wt.tx_id = t.waiter_txn"#;

pub(crate) const LOCKED_OBJECTS_SQL: &str = r#"select distinct a.trans_id, a.id1 tablet_id, a.id2 "blockingTxn-key", database_name, table_name, table_id, table_type
from oceanbase.gv$ob_locks a
left join oceanbase.dba_ob_table_locations b on a.id1 = b.tablet_id
where a.block = 1 and a.type = 'TR' order by ctime"#;

pub(crate) const SESS_COUNT_SQL: &str = r#"select curtime() create_time, user, db, count(*) cnt
from oceanbase.gv$ob_processlist group by user, db order by count(*) desc limit 100"#;

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
        name: LOCK_WAITS,
        sql: LOCK_WAITS_SQL,
    },
    DiagnosticQuery {
        name: LOCKED_OBJECTS,
        sql: LOCKED_OBJECTS_SQL,
    },
    DiagnosticQuery {
        name: SESS_COUNT,
        sql: SESS_COUNT_SQL,
    },
];

const ACT_SESS_EXEC_TIME: usize = 7;
const TXN_EXEC_SEC: usize = 9;
const SESS_COUNT_CNT: usize = 3;

const ACT_SESS_COLUMNS: &[&str] = &[
    "Time", "Server", "PID", "User", "DB", "Client", "Tenant", "Exec time (s)", "Command",
    "State", "Txn ID", "SQL text",
];
const TXN_COLUMNS: &[&str] = &[
    "Time",
    "Server",
    "PID",
    "User",
    "DB",
    "Client",
    "Tenant",
    "Exec time (s)",
    "Txn start",
    "Txn time (s)",
    "Command",
    "State",
    "Txn ID",
    "SQL text",
];
const LOCK_WAITS_COLUMNS: &[&str] = &[
    "Blocker PID",
    "Blocker txn ID",
    "Blocker txn start",
    "Blocker txn time (s)",
    "Blocker last request",
    "Waiter PID",
    "Waiter txn ID",
    "Waiter txn start",
    "Waiter txn time (s)",
    "Waiter last request",
];
const LOCKED_OBJECTS_COLUMNS: &[&str] = &[
    "Txn ID",
    "Tablet ID",
    "Blocking txn / key",
    "DB",
    "Table",
    "Table ID",
    "Table type",
];
const SESS_COUNT_COLUMNS: &[&str] = &["Time", "User", "DB", "Connections"];

/// OceanBase dialect marker.
#[derive(Debug, Clone, Copy)]
pub struct OceanBase;

impl Dialect for OceanBase {
    const NAME: &'static str = "oceanbase";

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
            wait_sess_count: rows(results.get(LOCK_WAITS)),
            lock_count: rows(results.get(LOCKED_OBJECTS)),
            max_query_seconds: max_seconds(act_sess, ACT_SESS_EXEC_TIME),
            max_txn_seconds: max_seconds(txn, TXN_EXEC_SEC),
        }
    }

    fn report(
        instance: &Instance,
        captured_at: DateTime<Local>,
        results: &QueryResults,
        metrics: &SnapshotMetrics,
    ) -> Report {
        let labels = MetricLabels {
            lock: "Locked objects",
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
            Some("lockWaits"),
            Some("lockedObjects"),
            Some("actSess"),
            Some("txn"),
        ]);

        Report {
            header,
            sections: vec![
                Section::new("Active sessions", ACT_SESS_COLUMNS, results.get(ACT_SESS))
                    .with_anchor("actSess"),
                Section::new("Transactions", TXN_COLUMNS, results.get(TXN)).with_anchor("txn"),
                Section::new("Blocked sessions", LOCK_WAITS_COLUMNS, results.get(LOCK_WAITS))
                    .with_anchor("lockWaits"),
                Section::new(
                    "Locked objects",
                    LOCKED_OBJECTS_COLUMNS,
                    results.get(LOCKED_OBJECTS),
                )
                .with_anchor("lockedObjects"),
                Section::new("Connection summary", SESS_COUNT_COLUMNS, results.get(SESS_COUNT))
                    .with_anchor("sessCount"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::fixture_row;

    #[test]
    fn test_reduce() {
        let results = QueryResults::new()
            .with(
                ACT_SESS,
                vec![
                    fixture_row(12, &[(ACT_SESS_EXEC_TIME, "0.512")]),
                    fixture_row(12, &[(ACT_SESS_EXEC_TIME, "33.100")]),
                ],
            )
            .with(TXN, vec![fixture_row(14, &[(TXN_EXEC_SEC, "18")])])
            .with(LOCK_WAITS, vec![fixture_row(10, &[]); 3])
            .with(LOCKED_OBJECTS, vec![fixture_row(7, &[])])
            .with(SESS_COUNT, vec![fixture_row(4, &[(3, "20")])]);

        let m = OceanBase::reduce(&results);
        assert_eq!(m.act_sess_count, 2);
        assert_eq!(m.big_query_count, 1);
        assert_eq!(m.max_query_seconds, 33);
        assert_eq!(m.txn_count, 1);
        assert_eq!(m.max_txn_seconds, 18);
        assert_eq!(m.wait_sess_count, 3);
        assert_eq!(m.lock_count, 1);
        assert_eq!(m.sess_count, 20);
    }
}
