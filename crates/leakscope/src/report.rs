//! Leak reporting: a snapshot view of everything still allocated, plus
//! the reporters that render it.

use serde::Serialize;

use crate::hooks::OutputSink;
use crate::site::SiteRegistry;
use crate::table::ActiveRecord;

const BANNER: &str = "========================================";

/// Output format for leak reports.
///
/// * `Table` - human-readable dump (default)
/// * `Json` - compact JSON, single line
/// * `JsonPretty` - indented JSON
#[derive(Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Table,
    Json,
    JsonPretty,
}

/// One outstanding allocation in a report.
#[derive(Clone, Debug, Serialize)]
pub struct LeakRow {
    /// Running row index, in table order.
    pub index: u64,
    /// Originating file, `None` when the registry unexpectedly has no
    /// counter for this allocation's site key.
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Allocation address.
    pub address: usize,
    /// Per-site sequence number assigned when the allocation was made.
    pub sequence: u64,
}

/// Point-in-time view of every allocation not yet freed.
///
/// Built under the tracker lock so rows and counters are mutually
/// consistent; holding one afterwards does not block the tracker.
#[derive(Clone, Debug, Serialize)]
pub struct LeakReport {
    /// Name of the tracker that produced this report.
    pub name: String,
    /// Number of outstanding allocations.
    pub outstanding: usize,
    pub rows: Vec<LeakRow>,
}

impl LeakReport {
    pub(crate) fn build(name: &str, records: &[ActiveRecord], sites: &SiteRegistry) -> Self {
        let rows: Vec<LeakRow> = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                // A missing counter violates the registry invariant;
                // report the row anyway rather than skip or crash.
                let counter = sites.get(record.site);
                LeakRow {
                    index: index as u64,
                    file: counter.map(|c| c.file().to_owned()),
                    line: counter.map(|c| c.line()),
                    address: record.addr,
                    sequence: record.sequence,
                }
            })
            .collect();
        Self {
            name: name.to_owned(),
            outstanding: rows.len(),
            rows,
        }
    }
}

/// Renders leak reports. Implement to route leak data to a custom
/// destination or format.
pub trait Reporter: Send + Sync {
    fn report(
        &self,
        report: &LeakReport,
        sink: &dyn OutputSink,
    ) -> Result<(), Box<dyn std::error::Error>>;
}

/// Human-readable report: one three-line block per outstanding
/// allocation between fixed banner lines.
pub struct TableReporter;

impl Reporter for TableReporter {
    fn report(
        &self,
        report: &LeakReport,
        sink: &dyn OutputSink,
    ) -> Result<(), Box<dyn std::error::Error>> {
        sink.emit_line(BANNER);
        sink.emit_line(&format!("Remaining Allocations: {}", report.name));
        for row in &report.rows {
            match (&row.file, row.line) {
                (Some(file), Some(line)) => {
                    sink.emit_line(&format!("{}> {}({})", row.index, file, line));
                }
                _ => {
                    sink.emit_line(&format!("{}> <no site record>", row.index));
                }
            }
            sink.emit_line(&format!("    => [0x{:x}] ID: {}", row.address, row.sequence));
        }
        sink.emit_line(BANNER);
        Ok(())
    }
}

/// Compact JSON report, one line.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn report(
        &self,
        report: &LeakReport,
        sink: &dyn OutputSink,
    ) -> Result<(), Box<dyn std::error::Error>> {
        sink.emit_line(&serde_json::to_string(report)?);
        Ok(())
    }
}

/// Indented JSON report.
pub struct JsonPrettyReporter;

impl Reporter for JsonPrettyReporter {
    fn report(
        &self,
        report: &LeakReport,
        sink: &dyn OutputSink,
    ) -> Result<(), Box<dyn std::error::Error>> {
        sink.emit_line(&serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

pub(crate) fn reporter_for(format: Format) -> Box<dyn Reporter> {
    match format {
        Format::Table => Box::new(TableReporter),
        Format::Json => Box::new(JsonReporter),
        Format::JsonPretty => Box::new(JsonPrettyReporter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::CallSite;
    use crate::table::ActiveRecord;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<String>>);

    impl RecordingSink {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }

        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl OutputSink for RecordingSink {
        fn emit_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_owned());
        }
    }

    const SITE: CallSite = CallSite::new("src/widget.rs", 42);

    fn sample_report() -> LeakReport {
        let mut sites = SiteRegistry::new();
        let key = SITE.key();
        sites.increment(key, SITE);
        sites.increment(key, SITE);
        sites.increment(key, SITE);

        let records = [
            ActiveRecord {
                addr: 0x1000,
                site: key,
                sequence: 3,
            },
            // Site key the registry has never seen.
            ActiveRecord {
                addr: 0x2000,
                site: CallSite::new("src/ghost.rs", 1).key(),
                sequence: 1,
            },
        ];
        LeakReport::build("main", &records, &sites)
    }

    #[test]
    fn build_pairs_rows_with_site_metadata() {
        let report = sample_report();
        assert_eq!(report.outstanding, 2);
        assert_eq!(report.rows[0].file.as_deref(), Some("src/widget.rs"));
        assert_eq!(report.rows[0].line, Some(42));
        assert_eq!(report.rows[0].sequence, 3);
        assert!(report.rows[1].file.is_none());
    }

    #[test]
    fn table_reporter_renders_the_classic_shape() {
        let sink = RecordingSink::new();
        TableReporter.report(&sample_report(), &sink).unwrap();

        let lines = sink.lines();
        assert_eq!(
            lines,
            vec![
                BANNER.to_owned(),
                "Remaining Allocations: main".to_owned(),
                "0> src/widget.rs(42)".to_owned(),
                "    => [0x1000] ID: 3".to_owned(),
                "1> <no site record>".to_owned(),
                "    => [0x2000] ID: 1".to_owned(),
                BANNER.to_owned(),
            ]
        );
    }

    #[test]
    fn empty_report_is_just_the_banners() {
        let sink = RecordingSink::new();
        let report = LeakReport::build("main", &[], &SiteRegistry::new());
        TableReporter.report(&report, &sink).unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], BANNER);
        assert_eq!(lines[2], BANNER);
    }

    #[test]
    fn json_reporter_emits_one_parseable_line() {
        let sink = RecordingSink::new();
        JsonReporter.report(&sample_report(), &sink).unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["name"], "main");
        assert_eq!(value["outstanding"], 2);
        assert_eq!(value["rows"][0]["sequence"], 3);
        assert!(value["rows"][1]["file"].is_null());
    }
}
