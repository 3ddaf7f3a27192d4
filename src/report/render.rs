//! HTML rendering.

use askama::Template;

use crate::report::{Report, ReportError};

/// Self-contained report page: inline CSS, no external references.
#[derive(Template)]
#[template(path = "report.html")]
struct ReportPage<'a> {
    report: &'a Report,
}

/// Render a report to a standalone HTML document.
///
/// Cell text is HTML-escaped.
pub fn render_report(report: &Report) -> Result<String, ReportError> {
    Ok(ReportPage { report }.render()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawTable;
    use crate::report::{MetricLabels, ReportHeader, Section};
    use crate::storage::SnapshotMetrics;
    use chrono::Local;

    fn sample() -> Report {
        let metrics = SnapshotMetrics {
            act_sess_count: 2,
            ..Default::default()
        };
        let table = RawTable::new(vec![
            vec!["1".into(), "select * from t where a < 3 & b > 1".into()],
            vec!["2".into(), "NULL".into()],
        ]);
        Report {
            header: ReportHeader::new(Local::now(), 42, "db1:3306", &MetricLabels::default(), &metrics)
                .with_links(&[Some("actSess")]),
            sections: vec![Section::new("Active sessions", &["PID", "SQL text"], &table).with_anchor("actSess")],
        }
    }

    #[test]
    fn test_render_escapes_cell_text() {
        let html = render_report(&sample()).unwrap();
        assert!(html.contains("a &lt; 3 &amp; b &gt; 1"));
        assert!(!html.contains("a < 3"));
    }

    #[test]
    fn test_render_links_and_anchors() {
        let html = render_report(&sample()).unwrap();
        assert!(html.contains(r##"<h2 id="actSess">Active sessions</h2>"##));
        assert!(html.contains(r##"<a href="#actSess">2</a>"##));
        assert!(html.contains("Instance: 42"));
        assert!(html.contains("<td>NULL</td>"));
    }

    #[test]
    fn test_render_is_self_contained() {
        let html = render_report(&sample()).unwrap();
        assert!(html.contains("<style"));
        assert!(!html.contains("<link"));
        assert!(!html.contains("<script"));
    }
}
