//! Log line formatting for the ingest binary.
//!
//! Lines read `timestamp LEVEL [component] message key=value ...`. The
//! component is the explicit `component` field when present, otherwise the
//! pipeline stage of the crate that emitted the event.

use std::fmt;
use std::io::IsTerminal;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_DIM: &str = "\x1b[2m";
const COLOR_RED: &str = "\x1b[91m";
const COLOR_YELLOW: &str = "\x1b[93m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_GRAY: &str = "\x1b[90m";

/// Width of the `[component]` column, brackets included
const COMPONENT_COLUMN: usize = 10;

/// Log with an explicit component label
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Warn with an explicit component label
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Error with an explicit component label
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Pipeline stage of the crate named by an event target
fn stage_of(target: &str) -> &str {
    match target.split("::").next().unwrap_or(target) {
        "ingest_wire" => "wire",
        "ingest_decode" => "decode",
        "ingest_session" => "session",
        "ingest" => "main",
        other => other,
    }
}

fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => COLOR_RED,
        Level::WARN => COLOR_YELLOW,
        Level::INFO => COLOR_GREEN,
        Level::DEBUG | Level::TRACE => COLOR_GRAY,
    }
}

/// Message, component and remaining fields of one event
#[derive(Debug, Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            // Format arguments print without quotes under Debug
            "message" => self.message = format!("{:?}", value),
            "component" => {
                self.component = Some(format!("{:?}", value).trim_matches('"').to_string())
            }
            name => self.extra.push((name, format!("{:?}", value))),
        }
    }
}

/// Event formatter for the `ingest` binary
#[derive(Debug, Clone)]
pub struct IngestLogFormatter {
    color: bool,
}

impl IngestLogFormatter {
    /// Colored output only when stderr is a terminal and `NO_COLOR` is unset
    pub fn new() -> Self {
        let color = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self { color }
    }

    fn render(&self, timestamp: &str, level: &Level, target: &str, fields: &EventFields) -> String {
        let (dim, reset, tint) = if self.color {
            (COLOR_DIM, COLOR_RESET, level_color(level))
        } else {
            ("", "", "")
        };

        let component = fields.component.as_deref().unwrap_or_else(|| stage_of(target));
        let mut line = format!(
            "{dim}{timestamp}{reset} {tint}{:<5}{reset} {:<width$} {}",
            level_label(level),
            format!("[{}]", component),
            fields.message,
            width = COMPONENT_COLUMN,
        );

        for (name, value) in &fields.extra {
            if value.contains(char::is_whitespace) {
                line.push_str(&format!(" {dim}{name}={value:?}{reset}"));
            } else {
                line.push_str(&format!(" {dim}{name}={value}{reset}"));
            }
        }
        line
    }
}

impl Default for IngestLogFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for IngestLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let metadata = event.metadata();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        writeln!(
            writer,
            "{}",
            self.render(&timestamp, metadata.level(), metadata.target(), &fields)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    const PLAIN: IngestLogFormatter = IngestLogFormatter { color: false };

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_stage_from_target() {
        assert_eq!(stage_of("ingest_session::session"), "session");
        assert_eq!(stage_of("ingest_wire::detector"), "wire");
        assert_eq!(stage_of("ingest_decode"), "decode");
        assert_eq!(stage_of("ingest::config"), "main");
        assert_eq!(stage_of("mlua::lua"), "mlua");
    }

    #[test]
    fn test_render_plain() {
        let fields = EventFields {
            message: "Frame skipped".to_string(),
            component: None,
            extra: vec![("frames", "3".to_string()), ("reason", "bad return".to_string())],
        };
        assert_eq!(
            PLAIN.render("T", &Level::WARN, "ingest_session::pipeline", &fields),
            "T WARN  [session]  Frame skipped frames=3 reason=\"bad return\""
        );

        let fields = EventFields {
            message: "CSV export stopped".to_string(),
            component: Some("csv".to_string()),
            extra: Vec::new(),
        };
        assert_eq!(
            PLAIN.render("T", &Level::ERROR, "ingest", &fields),
            "T ERROR [csv]      CSV export stopped"
        );
    }

    #[test]
    fn test_color_wraps_level() {
        let colored = IngestLogFormatter { color: true };
        let line = colored.render("T", &Level::ERROR, "ingest", &EventFields::default());
        assert!(line.contains(&format!("{}ERROR{}", COLOR_RED, COLOR_RESET)));
    }

    #[test]
    fn test_format_event_through_subscriber() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .event_format(PLAIN)
            .with_writer(captured.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            component_warn!("csv", rows = 3, "export stopped: {}", "disk full");
            tracing::info!("Pipeline ready");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARN  [csv]      export stopped: disk full rows=3"));
        assert!(lines[1].ends_with("INFO  [main]     Pipeline ready"));
    }
}
