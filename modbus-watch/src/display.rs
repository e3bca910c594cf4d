//! Display sinks for decoded readings.

use std::io::{self, Write};

use serde::Serialize;
use tracing::warn;

use crate::config::{DisplayConfig, DisplayFormat};
use crate::decoder::DecodedReading;

/// Terminal reset sequence (ESC c).
const CLEAR_SCREEN: &[u8] = b"\x1bc";

/// Receives every decoded reading.
pub trait DisplaySink: Send {
    fn present(&mut self, reading: &DecodedReading);
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn present(&mut self, reading: &DecodedReading) {
        (**self).present(reading);
    }
}

/// Build the sink selected by configuration, writing to stdout.
pub fn build_display(config: &DisplayConfig) -> Box<dyn DisplaySink> {
    match config.format {
        DisplayFormat::Text => Box::new(TerminalDisplay::new(io::stdout(), config.clear_screen)),
        DisplayFormat::Json => Box::new(JsonLinesDisplay::new(io::stdout())),
    }
}

/// Redraws the latest reading in place.
pub struct TerminalDisplay<W> {
    out: W,
    clear_screen: bool,
}

impl<W: Write + Send> TerminalDisplay<W> {
    pub fn new(out: W, clear_screen: bool) -> Self {
        Self { out, clear_screen }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, reading: &DecodedReading) -> io::Result<()> {
        if self.clear_screen {
            self.out.write_all(CLEAR_SCREEN)?;
        }
        // NUL padding in the identifier is not printable.
        writeln!(self.out, "ID:       {}", reading.id.replace('\0', ""))?;
        writeln!(self.out, "Position: {}", reading.position)?;
        writeln!(self.out, "Force:    {} kg", reading.force)?;
        self.out.flush()
    }
}

impl<W: Write + Send> DisplaySink for TerminalDisplay<W> {
    fn present(&mut self, reading: &DecodedReading) {
        if let Err(e) = self.render(reading) {
            warn!(error = %e, "Failed to render reading");
        }
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: i64,
    #[serde(flatten)]
    reading: &'a DecodedReading,
}

/// Writes one JSON object per reading.
pub struct JsonLinesDisplay<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, reading: &DecodedReading) -> io::Result<()> {
        let line = JsonLine {
            timestamp: chrono::Utc::now().timestamp_millis(),
            reading,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write + Send> DisplaySink for JsonLinesDisplay<W> {
    fn present(&mut self, reading: &DecodedReading) {
        if let Err(e) = self.render(reading) {
            warn!(error = %e, "Failed to write reading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> DecodedReading {
        DecodedReading {
            id: "\0A0210".to_string(),
            position: 90.0,
            force: 10.0,
        }
    }

    #[test]
    fn test_terminal_display() {
        let mut display = TerminalDisplay::new(Vec::new(), true);
        display.present(&reading());

        let output = String::from_utf8(display.into_inner()).unwrap();
        assert_eq!(
            output,
            "\x1bcID:       A0210\nPosition: 90\nForce:    10 kg\n"
        );
    }

    #[test]
    fn test_terminal_display_without_clear() {
        let mut display = TerminalDisplay::new(Vec::new(), false);
        display.present(&reading());
        display.present(&reading());

        let output = String::from_utf8(display.into_inner()).unwrap();
        assert!(!output.contains('\x1b'));
        assert_eq!(output.lines().count(), 6);
    }

    #[test]
    fn test_json_lines_display() {
        let mut display = JsonLinesDisplay::new(Vec::new());
        display.present(&reading());

        let output = String::from_utf8(display.into_inner()).unwrap();
        assert!(output.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(output.trim_end()).unwrap();
        assert_eq!(value["id"], "\u{0}A0210");
        assert_eq!(value["position"], 90.0);
        assert_eq!(value["force"], 10.0);
        assert!(value["timestamp"].is_i64());
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let mut display = TerminalDisplay::new(FailingWriter, true);
        display.present(&reading());

        let mut display = JsonLinesDisplay::new(FailingWriter);
        display.present(&reading());
    }
}
