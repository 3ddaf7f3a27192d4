//! Report document model and structural checks.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Local};

use crate::capture::{NULL_CELL, RawTable};
use crate::storage::{CREATE_TIME_FORMAT, SnapshotMetrics};

/// One table cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    /// In-document target this cell links to.
    pub link: Option<String>,
    /// Id this cell defines as a link target.
    pub anchor: Option<String>,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// NULL and empty cells never take part in linking.
    pub fn is_linkable(&self) -> bool {
        !self.text.is_empty() && self.text != NULL_CELL
    }
}

/// A titled table of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    /// Id of the section heading, target of header metric links.
    pub anchor: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Section {
    /// Section showing `table` under the given column headings.
    pub fn new(title: impl Into<String>, columns: &[&str], table: &RawTable) -> Self {
        Self {
            title: title.into(),
            anchor: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: table
                .rows
                .iter()
                .map(|row| row.iter().map(|v| Cell::text(v.as_str())).collect())
                .collect(),
        }
    }

    /// Give the section heading an id.
    pub fn with_anchor(mut self, id: impl Into<String>) -> Self {
        self.anchor = Some(id.into());
        self
    }

    /// Link every cell of `columns` to the row anchor named by its text.
    ///
    /// Cells for which `resolves` returns false stay plain text.
    pub fn link_columns(mut self, columns: &[usize], resolves: impl Fn(&str) -> bool) -> Self {
        for row in &mut self.rows {
            for &index in columns {
                if let Some(cell) = row.get_mut(index)
                    && cell.is_linkable()
                    && resolves(&cell.text)
                {
                    cell.link = Some(cell.text.clone());
                }
            }
        }
        self
    }

    /// Make `column` define a row anchor named by the cell text.
    pub fn anchor_column(mut self, column: usize) -> Self {
        for row in &mut self.rows {
            if let Some(cell) = row.get_mut(column)
                && cell.is_linkable()
            {
                cell.anchor = Some(cell.text.clone());
            }
        }
        self
    }
}

/// One headline metric of the report header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCell {
    pub label: String,
    pub value: i64,
    pub link: Option<String>,
}

/// Report header: who was captured, when, and the reduced metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    pub captured_at: String,
    pub inst_id: i64,
    pub address: String,
    pub metrics: Vec<MetricCell>,
}

/// Labels for the eight headline metrics, in summary order.
pub struct MetricLabels {
    pub act_sess: &'static str,
    pub txn: &'static str,
    pub sess: &'static str,
    pub big_query: &'static str,
    pub wait_sess: &'static str,
    pub lock: &'static str,
    pub max_query: &'static str,
    pub max_txn: &'static str,
}

impl Default for MetricLabels {
    fn default() -> Self {
        Self {
            act_sess: "Active sessions",
            txn: "Transactions",
            sess: "Connections",
            big_query: "Big queries",
            wait_sess: "Waiting sessions",
            lock: "Locked transactions",
            max_query: "Longest query (s)",
            max_txn: "Longest transaction (s)",
        }
    }
}

impl ReportHeader {
    pub fn new(
        captured_at: DateTime<Local>,
        inst_id: i64,
        address: impl Into<String>,
        labels: &MetricLabels,
        metrics: &SnapshotMetrics,
    ) -> Self {
        let m = metrics;
        let cells = [
            (labels.act_sess, m.act_sess_count),
            (labels.txn, m.txn_count),
            (labels.sess, m.sess_count),
            (labels.big_query, m.big_query_count),
            (labels.wait_sess, m.wait_sess_count),
            (labels.lock, m.lock_count),
            (labels.max_query, m.max_query_seconds),
            (labels.max_txn, m.max_txn_seconds),
        ];

        Self {
            captured_at: captured_at.format(CREATE_TIME_FORMAT).to_string(),
            inst_id,
            address: address.into(),
            metrics: cells
                .into_iter()
                .map(|(label, value)| MetricCell {
                    label: label.to_string(),
                    value,
                    link: None,
                })
                .collect(),
        }
    }

    /// Link the metric cells, in order, to section anchors.
    ///
    /// `None` entries and missing trailing entries stay unlinked.
    pub fn with_links(mut self, targets: &[Option<&str>]) -> Self {
        for (cell, target) in self.metrics.iter_mut().zip(targets) {
            cell.link = target.map(str::to_string);
        }
        self
    }
}

/// A complete report document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub header: ReportHeader,
    pub sections: Vec<Section>,
}

/// A structural defect found by [`Report::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportIssue {
    /// A row doesn't have one cell per column.
    RowWidth {
        section: String,
        row: usize,
        expected: usize,
        actual: usize,
    },
    /// A link targets an id nothing defines.
    DanglingLink { section: Option<String>, target: String },
    /// Two elements define the same id.
    DuplicateAnchor { id: String },
}

impl fmt::Display for ReportIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowWidth {
                section,
                row,
                expected,
                actual,
            } => write!(
                f,
                "section '{section}' row {row}: {actual} cells for {expected} columns"
            ),
            Self::DanglingLink {
                section: Some(section),
                target,
            } => write!(f, "section '{section}': link to undefined id '{target}'"),
            Self::DanglingLink {
                section: None,
                target,
            } => write!(f, "header: link to undefined id '{target}'"),
            Self::DuplicateAnchor { id } => write!(f, "id '{id}' defined more than once"),
        }
    }
}

impl Report {
    /// Check row widths and that every link resolves inside the document.
    pub fn validate(&self) -> Vec<ReportIssue> {
        let mut issues = Vec::new();
        let mut anchors = HashSet::new();

        let mut define = |id: &str, issues: &mut Vec<ReportIssue>| {
            if !anchors.insert(id.to_string()) {
                issues.push(ReportIssue::DuplicateAnchor { id: id.to_string() });
            }
        };

        for section in &self.sections {
            if let Some(id) = &section.anchor {
                define(id, &mut issues);
            }
            for (index, row) in section.rows.iter().enumerate() {
                if row.len() != section.columns.len() {
                    issues.push(ReportIssue::RowWidth {
                        section: section.title.clone(),
                        row: index,
                        expected: section.columns.len(),
                        actual: row.len(),
                    });
                }
                for id in row.iter().filter_map(|c| c.anchor.as_deref()) {
                    define(id, &mut issues);
                }
            }
        }

        for target in self.header.metrics.iter().filter_map(|m| m.link.as_deref()) {
            if !anchors.contains(target) {
                issues.push(ReportIssue::DanglingLink {
                    section: None,
                    target: target.to_string(),
                });
            }
        }

        for section in &self.sections {
            for target in section
                .rows
                .iter()
                .flatten()
                .filter_map(|c| c.link.as_deref())
            {
                if !anchors.contains(target) {
                    issues.push(ReportIssue::DanglingLink {
                        section: Some(section.title.clone()),
                        target: target.to_string(),
                    });
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    fn header() -> ReportHeader {
        ReportHeader::new(
            Local::now(),
            1,
            "db1:3306",
            &MetricLabels::default(),
            &SnapshotMetrics::default(),
        )
    }

    #[test]
    fn test_valid_report_has_no_issues() {
        let sessions = Section::new("Sessions", &["id", "sql_id"], &table(&[&["1", "abc"]]))
            .with_anchor("actSess")
            .link_columns(&[1], |_| true);
        let info = Section::new("SQL", &["sql_id"], &table(&[&["abc"]])).anchor_column(0);
        let report = Report {
            header: header().with_links(&[Some("actSess")]),
            sections: vec![sessions, info],
        };
        assert!(report.validate().is_empty());
    }

    #[test]
    fn test_row_width_mismatch() {
        let report = Report {
            header: header(),
            sections: vec![Section::new("Sessions", &["a", "b"], &table(&[&["1"]]))],
        };
        let issues = report.validate();
        assert_eq!(
            issues,
            vec![ReportIssue::RowWidth {
                section: "Sessions".into(),
                row: 0,
                expected: 2,
                actual: 1
            }]
        );
    }

    #[test]
    fn test_dangling_links_reported() {
        let sessions = Section::new("Sessions", &["sql_id"], &table(&[&["zzz"]]))
            .link_columns(&[0], |_| true);
        let report = Report {
            header: header().with_links(&[Some("missing")]),
            sections: vec![sessions],
        };
        let issues = report.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].to_string().starts_with("header:"));
        assert!(issues[1].to_string().contains("'zzz'"));
    }

    #[test]
    fn test_null_and_empty_cells_never_linked() {
        let section = Section::new("T", &["a"], &table(&[&["NULL"], &[""], &["x"]]))
            .link_columns(&[0], |_| true)
            .anchor_column(0);
        assert_eq!(section.rows[0][0].link, None);
        assert_eq!(section.rows[1][0].anchor, None);
        assert_eq!(section.rows[2][0].link.as_deref(), Some("x"));
        assert_eq!(section.rows[2][0].anchor.as_deref(), Some("x"));
    }

    #[test]
    fn test_duplicate_anchor() {
        let report = Report {
            header: header(),
            sections: vec![
                Section::new("A", &[], &RawTable::default()).with_anchor("txn"),
                Section::new("B", &[], &RawTable::default()).with_anchor("txn"),
            ],
        };
        assert_eq!(
            report.validate(),
            vec![ReportIssue::DuplicateAnchor { id: "txn".into() }]
        );
    }
}
