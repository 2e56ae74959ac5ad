//! Console and CSV frame sinks.

use crate::component_error;
use ingest_decode::DecodedFrame;
use ingest_session::{FrameSink, Report};
use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Prints frames (or raw bytes) to stdout and reports to stderr
#[derive(Debug)]
pub struct ConsoleSink {
    raw: bool,
}

impl ConsoleSink {
    /// Print decoded frames, or raw transport bytes when `raw` is set
    pub fn new(raw: bool) -> Self {
        Self { raw }
    }
}

/// `seq: title=value unit, ...`
fn format_frame(frame: &DecodedFrame) -> String {
    let fields: Vec<String> = frame
        .datasets
        .iter()
        .map(|d| {
            let mut field = format!("{}={}", d.title, d.value);
            if !d.units.is_empty() {
                field.push(' ');
                field.push_str(&d.units);
            }
            if d.alarm {
                field.push_str(" [ALARM]");
            }
            field
        })
        .collect();
    format!("{}: {}", frame.seq, fields.join(", "))
}

impl FrameSink for ConsoleSink {
    fn on_frame(&self, frame: &DecodedFrame) {
        if !self.raw {
            println!("{}", format_frame(frame));
        }
    }

    fn on_raw(&self, data: &[u8]) {
        if self.raw {
            let mut stdout = io::stdout().lock();
            stdout.write_all(data).ok();
            stdout.flush().ok();
        }
    }

    fn on_report(&self, report: &Report) {
        if report.is_error() {
            eprintln!("warning: {}", report);
        } else {
            eprintln!("note: {}", report);
        }
    }
}

/// Quote a CSV field when it contains a separator, quote or line break
fn csv_field(text: &str) -> Cow<'_, str> {
    if text.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}

struct CsvState {
    writer: Box<dyn Write + Send>,
    header_written: bool,
    failed: bool,
}

/// Appends decoded frames to a CSV file with a timestamp column
pub struct CsvSink {
    state: Mutex<CsvState>,
}

impl fmt::Debug for CsvSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSink").finish_non_exhaustive()
    }
}

impl CsvSink {
    /// Open `path` for appending
    pub fn create(path: &Path) -> io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        let header_written = file.metadata()?.len() > 0;
        let mut sink = Self::new(Box::new(BufWriter::new(file)));
        if let Ok(state) = sink.state.get_mut() {
            state.header_written = header_written;
        }
        Ok(sink)
    }

    /// Write to an arbitrary writer; the header comes from the first frame
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(CsvState {
                writer,
                header_written: false,
                failed: false,
            }),
        }
    }

    fn write_frame(state: &mut CsvState, frame: &DecodedFrame) -> io::Result<()> {
        if !state.header_written {
            let mut header = vec![Cow::Borrowed("timestamp")];
            header.extend(frame.datasets.iter().map(|d| csv_field(&d.title)));
            writeln!(state.writer, "{}", header.join(","))?;
            state.header_written = true;
        }

        let timestamp = chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string();
        let mut row = vec![timestamp];
        row.extend(
            frame
                .datasets
                .iter()
                .map(|d| csv_field(&d.value.to_string()).into_owned()),
        );
        writeln!(state.writer, "{}", row.join(","))?;
        state.writer.flush()
    }
}

impl FrameSink for CsvSink {
    fn on_frame(&self, frame: &DecodedFrame) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.failed {
            return;
        }
        if let Err(e) = Self::write_frame(&mut state, frame) {
            component_error!("csv", "CSV export stopped: {}", e);
            state.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_decode::{Dataset, Value};

    fn frame(seq: u64, values: &[Value]) -> DecodedFrame {
        let datasets = values
            .iter()
            .enumerate()
            .map(|(i, v)| Dataset::field(i + 1, v.clone()))
            .collect();
        let mut frame = DecodedFrame::new("Test", datasets);
        frame.seq = seq;
        frame
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_format_frame() {
        let mut f = frame(7, &[Value::Number(1.5), Value::Text("ok".to_string())]);
        f.datasets[0].units = "V".to_string();
        f.datasets[0].alarm = true;
        assert_eq!(format_frame(&f), "7: Field 1=1.5 V [ALARM], Field 2=ok");
    }

    #[test]
    fn test_csv_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");

        let sink = CsvSink::create(&path).unwrap();
        sink.on_frame(&frame(1, &[Value::Number(1.0), Value::Text("a,b".to_string())]));
        sink.on_frame(&frame(2, &[Value::Number(2.0), Value::Empty]));
        drop(sink);

        let sink = CsvSink::create(&path).unwrap();
        sink.on_frame(&frame(3, &[Value::Number(3.0), Value::Number(4.0)]));
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "timestamp,Field 1,Field 2");
        assert!(lines[1].ends_with(",1,\"a,b\""));
        assert!(lines[2].ends_with(",2,"));
        assert!(lines[3].ends_with(",3,4"));
    }
}
