//! Oracle capturer (battery and reduction).
//!
//! Besides the fixed battery, Oracle issues one follow-up query that looks up
//! cursor statistics and SQL text for every SQL id referenced by the session,
//! transaction, blocker and long-operation tables. The report cross-links
//! those ids to the lookup rows.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Local};

use crate::capture::reduce::{count_where, max_seconds, rows, sum};
use crate::capture::{Dialect, DiagnosticQuery, FollowUpQuery, NULL_CELL, QueryResults};
use crate::report::{MetricLabels, Report, ReportHeader, Section};
use crate::storage::{Instance, SnapshotMetrics};

pub(crate) const LONG_OPS: &str = "long_ops";
pub(crate) const ACT_SESS: &str = "act_sess";
pub(crate) const TXN: &str = "txn";
pub(crate) const BLOCKER: &str = "blocker";
pub(crate) const USER_SESS_COUNT: &str = "user_sess_count";
pub(crate) const CLIENT_SESS_COUNT: &str = "client_sess_count";
pub(crate) const SQL_INFO: &str = "sql_info";

pub(crate) const LONG_OPS_SQL: &str = r#"select to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') create_time, sid, serial# serial, username, sql_id, time_remaining, elapsed_seconds,
       round(sofar / totalwork * 100) completed_pct, opname, target, target_desc, sofar, totalwork, units,
       to_char(start_time, 'yyyy-mm-dd hh24:mi:ss') start_time, to_char(last_update_time, 'yyyy-mm-dd hh24:mi:ss') last_update_time
from v$session_longops where time_remaining > 0 order by time_remaining desc"#;

pub(crate) const ACT_SESS_SQL: &str = r#"select /*+ OPT_PARAM('_optimizer_adaptive_plans', 'false') NO_MONITOR */
    to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') as current_time,
    s.sid,
    s.serial#,
    s.username,
    s.program,
    s.machine,
    s.sql_id,
    s.prev_sql_id,
    s.last_call_et as exec_sec,
    s.blocking_session,
    s.final_blocking_session,
    s.event,
    s.wait_class,
    s.state,
    case when s.state = 'WAITING' then s.seconds_in_wait else 0 end as wait_sec,
    p1, p2, p3
from v$session s
where s.status = 'ACTIVE'
  and s.type = 'USER'
  and s.username is not null
  and s.sql_id is not null
  and s.program not like '%(MS0%)'
order by s.last_call_et desc"#;

pub(crate) const TXN_SQL: &str = r#"select to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') create_time,
       s.sid,
       s.username,
       s.machine,
       s.program,
       s.status,
       decode(s.command, 3, 'select', 2, 'insert', 6, 'update', 7, 'delete', 'other') command_type,
       s.sql_id,
       s.prev_sql_id,
       s.wait_class,
       s.event,
       s.blocking_session,
       s.last_call_et elapsed_sec,
       xidusn || '.' || xidslot || '.' || xidsqn xid,
       t.status txn_status,
       to_char(t.start_date, 'yyyy-mm-dd hh24:mi:ss') txn_start_time,
       round((sysdate - t.start_date) * 3600 * 24) txn_elapsed_sec,
       t.cr_get,
       t.phy_io,
       t.used_ublk used_blocks,
       t.used_urec undo_rows
  from v$session s, v$transaction t
 where s.taddr = t.addr
 order by start_date"#;

pub(crate) const BLOCKER_SQL: &str = r#"with blocker as (select /*+ materialize */ distinct final_blocking_session as sid from v$session)
select /*+ LEADING(b s) USE_NL(s) NO_MERGE(b) */
    to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') create_time,
    s.sid,
    serial# serial,
    username,
    machine,
    program,
    decode(command, 3, 'select', 2, 'insert', 6, 'update', 7, 'delete', 'other') command_type,
    sql_id,
    prev_sql_id,
    status,
    state,
    wait_class,
    event,
    to_char(logon_time, 'yyyy-mm-dd hh24:mi:ss') logon_time,
    case
        when state = 'WAITING' then seconds_in_wait
        when state in ('WAITED SHORT TIME', 'WAIT UNKNOW TIME') then null
        when state = 'WAITING KNOWN TIME' then wait_time
        else seconds_in_wait
    end wait_sec,
    last_call_et exec_sec,
    s.blocking_session,
    s.final_blocking_session,
    s.p1, s.p2, s.p3
from blocker b, v$session s
where s.sid = b.sid
order by last_call_et desc"#;

pub(crate) const USER_SESS_COUNT_SQL: &str = r#"select to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') create_time, username db, count(*) cnt
from v$session where type <> 'BACKGROUND' group by username order by 3 desc"#;

pub(crate) const CLIENT_SESS_COUNT_SQL: &str = r#"select * from (
    select to_char(sysdate, 'yyyy-mm-dd hh24:mi:ss') create_time, machine client, count(*) cnt
    from v$session where type <> 'BACKGROUND' group by machine order by 3 desc
) where rownum <= 100"#;

// `sql_id in (...)` skips the fixed index on v$sqlstats; join a collection instead.
const SQL_INFO_TEMPLATE: &str = r#"select /*+ LEADING(t) USE_NL(s) NO_MERGE(t) PUSH_PRED(s) */ s.sql_id,
       to_char(last_active_time, 'yyyy-mm-dd hh24:mi:ss') last_active_time, executions,
       round(elapsed_time / 1000000, 2) elapsed_time_sec,
       case when executions <> 0 then round(elapsed_time / executions / 1000000, 2) end avg_elapsed_time_sec,
       substr(sql_text, 1, 2000)
from ({id_source}) t
join v$sqlstats s on s.sql_id = t.sql_id"#;

// Oracle caps a single argument list at 1000 expressions (ORA-01795 / ORA-00939).
const SQL_IDS_PER_LIST: usize = 1000;

const QUERIES: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: LONG_OPS,
        sql: LONG_OPS_SQL,
    },
    DiagnosticQuery {
        name: ACT_SESS,
        sql: ACT_SESS_SQL,
    },
    DiagnosticQuery {
        name: TXN,
        sql: TXN_SQL,
    },
    DiagnosticQuery {
        name: BLOCKER,
        sql: BLOCKER_SQL,
    },
    DiagnosticQuery {
        name: USER_SESS_COUNT,
        sql: USER_SESS_COUNT_SQL,
    },
    DiagnosticQuery {
        name: CLIENT_SESS_COUNT,
        sql: CLIENT_SESS_COUNT_SQL,
    },
];

const LONG_OPS_SQL_ID: usize = 4;
const ACT_SESS_SQL_IDS: [usize; 2] = [6, 7];
const ACT_SESS_EXEC_SEC: usize = 8;
const ACT_SESS_BLOCKER: usize = 9;
const ACT_SESS_EVENT: usize = 11;
const TXN_SQL_IDS: [usize; 2] = [7, 8];
const TXN_ELAPSED_SEC: usize = 16;
const BLOCKER_SQL_IDS: [usize; 2] = [7, 8];
const USER_SESS_COUNT_CNT: usize = 2;
const SQL_INFO_SQL_ID: usize = 0;

const LONG_OPS_COLUMNS: &[&str] = &[
    "Time",
    "SID",
    "Serial",
    "User",
    "SQL ID",
    "Remaining (s)",
    "Elapsed (s)",
    "Done %",
    "Operation",
    "Target",
    "Target description",
    "So far",
    "Total work",
    "Units",
    "Started",
    "Last update",
];
const ACT_SESS_COLUMNS: &[&str] = &[
    "Time",
    "SID",
    "Serial",
    "User",
    "Program",
    "Client",
    "SQL ID",
    "Previous SQL ID",
    "Exec time (s)",
    "Blocker",
    "Final blocker",
    "Wait event",
    "Wait class",
    "Wait state",
    "Wait time (s)",
    "P1",
    "P2",
    "P3",
];
const TXN_COLUMNS: &[&str] = &[
    "Time",
    "SID",
    "User",
    "Client",
    "Program",
    "Session status",
    "Command",
    "SQL ID",
    "Previous SQL ID",
    "Wait class",
    "Wait event",
    "Blocker",
    "Exec time (s)",
    "XID",
    "Txn status",
    "Txn started",
    "Txn time (s)",
    "Consistent gets",
    "Physical IO",
    "Undo blocks",
    "Undo rows",
];
const BLOCKER_COLUMNS: &[&str] = &[
    "Time",
    "SID",
    "Serial",
    "User",
    "Client",
    "Program",
    "Command",
    "SQL ID",
    "Previous SQL ID",
    "Session status",
    "Wait state",
    "Wait class",
    "Wait event",
    "Logon time",
    "Wait time (s)",
    "Exec time (s)",
    "Blocker",
    "Final blocker",
    "P1",
    "P2",
    "P3",
];
const SQL_INFO_COLUMNS: &[&str] = &[
    "SQL ID",
    "Last active",
    "Executions",
    "Elapsed (s)",
    "Avg elapsed (s)",
    "SQL text",
];
const USER_SESS_COUNT_COLUMNS: &[&str] = &["Time", "User", "Connections"];
const CLIENT_SESS_COUNT_COLUMNS: &[&str] = &["Time", "Client", "Connections"];

/// Oracle dialect marker.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

impl Oracle {
    /// Distinct SQL ids referenced by the battery, in sorted order.
    ///
    /// Only alphanumeric ids are kept since they are quoted into the lookup
    /// statement.
    pub(crate) fn referenced_sql_ids(results: &QueryResults) -> BTreeSet<String> {
        let sources: [(&str, &[usize]); 4] = [
            (LONG_OPS, &[LONG_OPS_SQL_ID]),
            (ACT_SESS, &ACT_SESS_SQL_IDS),
            (TXN, &TXN_SQL_IDS),
            (BLOCKER, &BLOCKER_SQL_IDS),
        ];

        sources
            .iter()
            .flat_map(|(name, columns)| {
                let table = results.get(name);
                columns.iter().flat_map(move |&c| table.column(c))
            })
            .filter(|id| {
                !id.is_empty() && *id != NULL_CELL && id.chars().all(|c| c.is_ascii_alphanumeric())
            })
            .map(str::to_string)
            .collect()
    }
}

impl Dialect for Oracle {
    const NAME: &'static str = "oracle";

    fn queries() -> &'static [DiagnosticQuery] {
        QUERIES
    }

    fn follow_up(results: &QueryResults) -> Option<FollowUpQuery> {
        let ids = Self::referenced_sql_ids(results);
        if ids.is_empty() {
            return None;
        }

        let ids: Vec<String> = ids.iter().map(|id| format!("'{id}'")).collect();
        let id_source = ids
            .chunks(SQL_IDS_PER_LIST)
            .map(|chunk| {
                format!(
                    "select column_value as sql_id from table(sys.odcivarchar2list({}))",
                    chunk.join(",")
                )
            })
            .collect::<Vec<_>>()
            .join(" union all ");
        Some(FollowUpQuery {
            name: SQL_INFO,
            sql: SQL_INFO_TEMPLATE.replace("{id_source}", &id_source),
        })
    }

    fn reduce(results: &QueryResults) -> SnapshotMetrics {
        let act_sess = results.get(ACT_SESS);
        let txn = results.get(TXN);

        SnapshotMetrics {
            act_sess_count: rows(act_sess),
            txn_count: rows(txn),
            sess_count: sum(results.get(USER_SESS_COUNT), USER_SESS_COUNT_CNT),
            big_query_count: rows(results.get(LONG_OPS)),
            wait_sess_count: count_where(act_sess, ACT_SESS_BLOCKER, |b| b != NULL_CELL),
            lock_count: count_where(act_sess, ACT_SESS_EVENT, |e| e.starts_with("enq: TX")),
            max_query_seconds: max_seconds(act_sess, ACT_SESS_EXEC_SEC),
            max_txn_seconds: max_seconds(txn, TXN_ELAPSED_SEC),
        }
    }

    fn report(
        instance: &Instance,
        captured_at: DateTime<Local>,
        results: &QueryResults,
        metrics: &SnapshotMetrics,
    ) -> Report {
        let labels = MetricLabels {
            lock: "Row locks",
            ..Default::default()
        };
        let header = ReportHeader::new(
            captured_at,
            instance.inst_id,
            format!("{}/{}", instance.address(), instance.db_name),
            &labels,
            metrics,
        )
        .with_links(&[
            Some("actSess"),
            Some("txn"),
            Some("sessCount"),
            Some("longOps"),
            Some("actSess"),
            Some("actSess"),
            Some("actSess"),
            Some("txn"),
        ]);

        let sql_info = results.get(SQL_INFO);
        let known: HashSet<&str> = sql_info.column(SQL_INFO_SQL_ID).collect();
        let resolves = |id: &str| known.contains(id);

        Report {
            header,
            sections: vec![
                Section::new("Long operations", LONG_OPS_COLUMNS, results.get(LONG_OPS))
                    .with_anchor("longOps")
                    .link_columns(&[LONG_OPS_SQL_ID], resolves),
                Section::new("Active sessions", ACT_SESS_COLUMNS, results.get(ACT_SESS))
                    .with_anchor("actSess")
                    .link_columns(&ACT_SESS_SQL_IDS, resolves),
                Section::new("Transactions", TXN_COLUMNS, results.get(TXN))
                    .with_anchor("txn")
                    .link_columns(&TXN_SQL_IDS, resolves),
                Section::new("Blockers", BLOCKER_COLUMNS, results.get(BLOCKER))
                    .with_anchor("blocker")
                    .link_columns(&BLOCKER_SQL_IDS, resolves),
                // Row anchors for the SQL id links above.
                Section::new("SQL statistics", SQL_INFO_COLUMNS, sql_info)
                    .anchor_column(SQL_INFO_SQL_ID),
                Section::new(
                    "Connection summary (user)",
                    USER_SESS_COUNT_COLUMNS,
                    results.get(USER_SESS_COUNT),
                )
                .with_anchor("sessCount"),
                Section::new(
                    "Connection summary (client)",
                    CLIENT_SESS_COUNT_COLUMNS,
                    results.get(CLIENT_SESS_COUNT),
                ),
            ],
        }
    }
}
