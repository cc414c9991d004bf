//! Append-only XML report of flushed test measurements, plus the parser
//! used to read a persisted report back.
//!
//! The backing file is reopened for every append rather than held open:
//! each flushed record is independently durable, at the cost of throughput.

use crate::measure::{TestMeasurement, TraceDirection, TraceEvent};
use crate::result::{SondarError, SondarResult};
use regex::Regex;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// XML declaration written once at the top of the report
const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;

/// Default report file name
pub const DEFAULT_REPORT_FILE: &str = "sondarReport.xml";

/// Default root element name
pub const DEFAULT_REPORT_TITLE: &str = "TestAnalysis";

/// Escape XML special characters in attribute values (constructor markers
/// like `<init>` are the common case).
#[must_use]
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Reverse of [`escape_xml`]
#[must_use]
pub fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Render one `<Test>` record. Pure; shared by the writer and the
/// round-trip tests. Tallies iterate in key order, so output is
/// deterministic for a given measurement.
#[must_use]
pub fn render_record(m: &TestMeasurement) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  <Test class=\"{}\" name=\"{}\">",
        escape_xml(&m.class_name),
        escape_xml(&m.test_name)
    );
    let _ = writeln!(out, "    <MaxStackDepth depth=\"{}\"/>", m.max_depth);
    let _ = writeln!(
        out,
        "    <MethodsCalled distinct=\"{}\" total=\"{}\">",
        m.distinct_method_count(),
        m.total_method_calls()
    );
    for (method, calls) in &m.method_call_tally {
        let _ = writeln!(
            out,
            "      <Method calls=\"{calls}\" name=\"{}\"/>",
            escape_xml(method)
        );
    }
    out.push_str("    </MethodsCalled>\n");
    let _ = writeln!(
        out,
        "    <ClassesInitialised distinct=\"{}\" total=\"{}\">",
        m.distinct_class_count(),
        m.total_class_inits()
    );
    for (class, count) in &m.class_init_tally {
        let _ = writeln!(
            out,
            "      <Class count=\"{count}\" name=\"{}\"/>",
            escape_xml(class)
        );
    }
    out.push_str("    </ClassesInitialised>\n");
    let _ = writeln!(out, "    <Trace length=\"{}\">", m.trace.len());
    for event in &m.trace {
        let _ = writeln!(
            out,
            "      <TraceElement depth=\"{}\" direction=\"{}\" method=\"{}\"/>",
            event.depth_after,
            event.direction,
            escape_xml(&event.qualified_method)
        );
    }
    out.push_str("    </Trace>\n");
    out.push_str("  </Test>\n");
    out
}

/// Append-only writer for the capture report.
///
/// Lifecycle: `open(title)` once, `append` per flushed measurement,
/// `close` once. The root markers are written exactly once regardless of
/// how many records flow through.
#[derive(Debug)]
pub struct ReportWriter {
    path: PathBuf,
    title: String,
    opened: bool,
    closed: bool,
}

impl ReportWriter {
    /// Writer for the given path; nothing is touched until `open`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: String::new(),
            opened: false,
            closed: false,
        }
    }

    /// Writer for the default report file in the current directory
    #[must_use]
    pub fn default_path() -> Self {
        Self::new(DEFAULT_REPORT_FILE)
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the backing file and write the XML declaration and the
    /// root start marker. The title is used verbatim as the root element
    /// name, so it must be a valid XML name.
    ///
    /// # Errors
    ///
    /// [`SondarError::InvalidState`] if the report was already opened.
    pub fn open(&mut self, title: &str) -> SondarResult<()> {
        if self.opened {
            return Err(SondarError::InvalidState {
                message: "report already opened".to_string(),
            });
        }
        let mut file = File::create(&self.path)?;
        writeln!(file, "{XML_HEADER}")?;
        writeln!(file, "<{title}>")?;
        self.title = title.to_string();
        self.opened = true;
        Ok(())
    }

    /// Serialize one frozen measurement. The file is opened for append,
    /// written, and closed again so the record is durable on its own.
    ///
    /// # Errors
    ///
    /// [`SondarError::InvalidState`] outside the open/close bracket, or an
    /// I/O error from the append itself.
    pub fn append(&mut self, measurement: &TestMeasurement) -> SondarResult<()> {
        if !self.opened || self.closed {
            return Err(SondarError::InvalidState {
                message: "append outside the report bracket".to_string(),
            });
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(render_record(measurement).as_bytes())?;
        Ok(())
    }

    /// Write the root end marker. Idempotent: a second close (or a close
    /// before open) is a no-op, so abnormal shutdown paths may call it
    /// unconditionally.
    pub fn close(&mut self) -> SondarResult<()> {
        if !self.opened || self.closed {
            return Ok(());
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "</{}>", self.title)?;
        self.closed = true;
        Ok(())
    }
}

/// A parsed report: root title plus the records in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    /// Root element name
    pub title: String,
    /// Measurements in the order they were flushed
    pub measurements: Vec<TestMeasurement>,
}

/// Parser for reports produced by [`ReportWriter`].
#[derive(Debug)]
pub struct ReportParser {
    re_root: Regex,
    re_test: Regex,
    re_depth: Regex,
    re_method: Regex,
    re_class: Regex,
    re_trace_event: Regex,
}

impl Default for ReportParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser {
    /// Build the parser (compiles the attribute patterns)
    #[must_use]
    pub fn new() -> Self {
        Self {
            re_root: Regex::new(r"^<([A-Za-z_][^\s/>]*)>$").expect("static pattern"),
            re_test: Regex::new(r#"^<Test class="([^"]*)" name="([^"]*)">$"#)
                .expect("static pattern"),
            re_depth: Regex::new(r#"^<MaxStackDepth depth="(\d+)"/>$"#).expect("static pattern"),
            re_method: Regex::new(r#"^<Method calls="(\d+)" name="([^"]*)"/>$"#)
                .expect("static pattern"),
            re_class: Regex::new(r#"^<Class count="(\d+)" name="([^"]*)"/>$"#)
                .expect("static pattern"),
            re_trace_event: Regex::new(
                r#"^<TraceElement depth="(\d+)" direction="(Entry|Exit)" method="([^"]*)"/>$"#,
            )
            .expect("static pattern"),
        }
    }

    /// Parse a report file.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> SondarResult<ParsedReport> {
        let text = std::fs::read_to_string(path)?;
        self.parse_str(&text)
    }

    /// Parse report text.
    ///
    /// # Errors
    ///
    /// [`SondarError::Report`] on a malformed document.
    pub fn parse_str(&self, text: &str) -> SondarResult<ParsedReport> {
        let mut title: Option<String> = None;
        let mut measurements = Vec::new();
        let mut current: Option<TestMeasurement> = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("<?xml") {
                continue;
            }
            if let Some(caps) = self.re_test.captures(line) {
                if current.is_some() {
                    return Err(malformed("nested <Test> record"));
                }
                current = Some(TestMeasurement::new(
                    unescape_xml(&caps[2]),
                    unescape_xml(&caps[1]),
                ));
            } else if line == "</Test>" {
                let m = current.take().ok_or_else(|| malformed("stray </Test>"))?;
                measurements.push(m);
            } else if let Some(caps) = self.re_depth.captures(line) {
                let m = current.as_mut().ok_or_else(|| malformed("depth outside record"))?;
                m.max_depth = parse_num(&caps[1])?;
            } else if let Some(caps) = self.re_method.captures(line) {
                let m = current.as_mut().ok_or_else(|| malformed("method outside record"))?;
                m.method_call_tally
                    .insert(unescape_xml(&caps[2]), parse_count(&caps[1])?);
            } else if let Some(caps) = self.re_class.captures(line) {
                let m = current.as_mut().ok_or_else(|| malformed("class outside record"))?;
                m.class_init_tally
                    .insert(unescape_xml(&caps[2]), parse_count(&caps[1])?);
            } else if let Some(caps) = self.re_trace_event.captures(line) {
                let m = current.as_mut().ok_or_else(|| malformed("trace outside record"))?;
                let depth = parse_num(&caps[1])?;
                let direction = TraceDirection::parse(&caps[2])
                    .ok_or_else(|| malformed("bad trace direction"))?;
                m.trace.push(TraceEvent {
                    direction,
                    qualified_method: unescape_xml(&caps[3]),
                    depth_after: depth,
                });
                m.depth_series.push(depth);
            } else if current.is_none() {
                if let Some(caps) = self.re_root.captures(line) {
                    if title.is_some() {
                        return Err(malformed("second root marker"));
                    }
                    title = Some(caps[1].to_string());
                } else if title
                    .as_deref()
                    .is_some_and(|t| line == format!("</{t}>"))
                {
                    // Root end marker; nothing to collect.
                } else {
                    return Err(malformed(&format!("unrecognised line: {line}")));
                }
            } else if !is_container_line(line) {
                return Err(malformed(&format!("unrecognised line: {line}")));
            }
        }

        if current.is_some() {
            return Err(malformed("unterminated <Test> record"));
        }
        Ok(ParsedReport {
            title: title.ok_or_else(|| malformed("missing root marker"))?,
            measurements,
        })
    }
}

/// Container lines whose attributes are recomputed from the tallies on
/// render, so the parser can skip them.
fn is_container_line(line: &str) -> bool {
    line.starts_with("<MethodsCalled ")
        || line.starts_with("<ClassesInitialised ")
        || line.starts_with("<Trace ")
        || line == "</MethodsCalled>"
        || line == "</ClassesInitialised>"
        || line == "</Trace>"
}

fn malformed(message: &str) -> SondarError {
    SondarError::Report {
        message: message.to_string(),
    }
}

fn parse_num(s: &str) -> SondarResult<usize> {
    s.parse()
        .map_err(|_| malformed(&format!("bad number: {s}")))
}

fn parse_count(s: &str) -> SondarResult<u64> {
    s.parse()
        .map_err(|_| malformed(&format!("bad count: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::TraceDirection;

    fn sample_measurement() -> TestMeasurement {
        let mut m = TestMeasurement::new("addsOk", "pkg.Calc");
        m.push_trace(TraceDirection::Entry, "pkg.Calc.addsOk", 0);
        m.push_trace(TraceDirection::Entry, "pkg.Calc.helper", 1);
        m.push_trace(TraceDirection::Entry, "pkg.Widget.<init>", 2);
        m.push_trace(TraceDirection::Exit, "pkg.Widget.<init>", 1);
        m.push_trace(TraceDirection::Exit, "pkg.Calc.helper", 0);
        m.push_trace(TraceDirection::Exit, "pkg.Calc.addsOk", 0);
        m.tally_method_call("pkg.Calc.helper");
        m.tally_class_init("pkg.Widget");
        m
    }

    mod escape_tests {
        use super::*;

        #[test]
        fn constructor_marker_escapes() {
            assert_eq!(escape_xml("pkg.Widget.<init>"), "pkg.Widget.&lt;init&gt;");
        }

        #[test]
        fn unescape_inverts_escape() {
            for s in ["<init>", "<clinit>", "a & b", "q\"uote'", "plain"] {
                assert_eq!(unescape_xml(&escape_xml(s)), s);
            }
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn record_has_all_sections() {
            let text = render_record(&sample_measurement());
            assert!(text.contains(r#"<Test class="pkg.Calc" name="addsOk">"#));
            assert!(text.contains(r#"<MaxStackDepth depth="2"/>"#));
            assert!(text.contains(r#"<MethodsCalled distinct="1" total="1">"#));
            assert!(text.contains(r#"<Method calls="1" name="pkg.Calc.helper"/>"#));
            assert!(text.contains(r#"<ClassesInitialised distinct="1" total="1">"#));
            assert!(text.contains(r#"<Class count="1" name="pkg.Widget"/>"#));
            assert!(text.contains(r#"<Trace length="6">"#));
            assert!(text.contains(
                r#"<TraceElement depth="2" direction="Entry" method="pkg.Widget.&lt;init&gt;"/>"#
            ));
            assert!(text.ends_with("  </Test>\n"));
        }

        #[test]
        fn empty_measurement_renders_empty_sections() {
            let m = TestMeasurement::new("noCalls", "pkg.Calc");
            let text = render_record(&m);
            assert!(text.contains(r#"<MethodsCalled distinct="0" total="0">"#));
            assert!(text.contains(r#"<Trace length="0">"#));
        }
    }

    mod writer_tests {
        use super::*;
        use tempfile::tempdir;

        #[test]
        fn bracket_written_exactly_once() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("report.xml");
            let mut writer = ReportWriter::new(&path);
            writer.open("calc").unwrap();
            writer.append(&sample_measurement()).unwrap();
            writer.append(&sample_measurement()).unwrap();
            writer.close().unwrap();
            // Late second close must not duplicate the end marker.
            writer.close().unwrap();

            let text = std::fs::read_to_string(&path).unwrap();
            assert_eq!(text.matches("<calc>").count(), 1);
            assert_eq!(text.matches("</calc>").count(), 1);
            assert!(text.starts_with(XML_HEADER));
            assert_eq!(text.matches("<Test ").count(), 2);
        }

        #[test]
        fn double_open_is_invalid_state() {
            let dir = tempdir().unwrap();
            let mut writer = ReportWriter::new(dir.path().join("report.xml"));
            writer.open("calc").unwrap();
            let err = writer.open("calc").unwrap_err();
            assert!(matches!(err, SondarError::InvalidState { .. }));
        }

        #[test]
        fn append_before_open_is_invalid_state() {
            let dir = tempdir().unwrap();
            let mut writer = ReportWriter::new(dir.path().join("report.xml"));
            let err = writer.append(&sample_measurement()).unwrap_err();
            assert!(matches!(err, SondarError::InvalidState { .. }));
        }

        #[test]
        fn close_before_open_is_noop() {
            let dir = tempdir().unwrap();
            let mut writer = ReportWriter::new(dir.path().join("report.xml"));
            writer.close().unwrap();
            assert!(!dir.path().join("report.xml").exists());
        }

        #[test]
        fn records_survive_without_close() {
            // Crash-style shutdown: the bracket is unbalanced but every
            // appended record is already on disk.
            let dir = tempdir().unwrap();
            let path = dir.path().join("report.xml");
            let mut writer = ReportWriter::new(&path);
            writer.open("calc").unwrap();
            writer.append(&sample_measurement()).unwrap();
            drop(writer);
            let text = std::fs::read_to_string(&path).unwrap();
            assert!(text.contains("<Test "));
            assert!(!text.contains("</calc>"));
        }
    }

    mod parser_tests {
        use super::*;
        use tempfile::tempdir;

        #[test]
        fn round_trip_is_byte_identical() {
            let original = sample_measurement();
            let rendered = render_record(&original);
            let doc = format!("{XML_HEADER}\n<calc>\n{rendered}</calc>\n");

            let parsed = ReportParser::new().parse_str(&doc).unwrap();
            assert_eq!(parsed.title, "calc");
            assert_eq!(parsed.measurements.len(), 1);
            assert_eq!(parsed.measurements[0], original);
            assert_eq!(render_record(&parsed.measurements[0]), rendered);
        }

        #[test]
        fn parses_file_written_by_writer() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("report.xml");
            let mut writer = ReportWriter::new(&path);
            writer.open("calc").unwrap();
            writer.append(&sample_measurement()).unwrap();
            let mut second = TestMeasurement::new("divByZero", "pkg.Calc");
            second.push_trace(TraceDirection::Entry, "pkg.Calc.divByZero", 0);
            second.push_trace(TraceDirection::Exit, "pkg.Calc.divByZero", 0);
            writer.append(&second).unwrap();
            writer.close().unwrap();

            let parsed = ReportParser::new().parse_file(&path).unwrap();
            assert_eq!(parsed.measurements.len(), 2);
            assert_eq!(parsed.measurements[0].test_name, "addsOk");
            assert_eq!(parsed.measurements[1].test_name, "divByZero");
            assert_eq!(parsed.measurements[1].depth_series, vec![0, 0]);
        }

        #[test]
        fn missing_root_is_report_error() {
            let err = ReportParser::new().parse_str("  <Test class=\"a\" name=\"b\">\n</Test>\n");
            assert!(matches!(
                err.unwrap_err(),
                SondarError::Report { .. }
            ));
        }

        #[test]
        fn unterminated_record_is_report_error() {
            let doc = format!("{XML_HEADER}\n<calc>\n  <Test class=\"a\" name=\"b\">\n");
            let err = ReportParser::new().parse_str(&doc).unwrap_err();
            assert!(matches!(err, SondarError::Report { .. }));
        }

        #[test]
        fn garbage_between_records_is_report_error() {
            let doc = format!(
                "{XML_HEADER}\n<calc>\n  <Bogus/>\n  <Test class=\"a\" name=\"b\">\n  </Test>\n</calc>\n"
            );
            let err = ReportParser::new().parse_str(&doc).unwrap_err();
            assert!(matches!(err, SondarError::Report { .. }));
        }

        #[test]
        fn mismatched_root_close_is_report_error() {
            let doc = format!("{XML_HEADER}\n<calc>\n</other>\n");
            let err = ReportParser::new().parse_str(&doc).unwrap_err();
            assert!(matches!(err, SondarError::Report { .. }));
        }

        #[test]
        fn garbage_inside_record_is_report_error() {
            let doc = format!(
                "{XML_HEADER}\n<calc>\n  <Test class=\"a\" name=\"b\">\n    <Bogus/>\n  </Test>\n</calc>\n"
            );
            let err = ReportParser::new().parse_str(&doc).unwrap_err();
            assert!(matches!(err, SondarError::Report { .. }));
        }
    }
}
