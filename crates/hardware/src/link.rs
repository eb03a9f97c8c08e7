//! The serial command sink.
//!
//! Commands to the actuator microcontroller are ASCII lines over a serial
//! link. The sink trait is the seam between the controller and the wire so
//! tests can record what would have been sent.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ha_domain::error::{Error, Result};

/// A destination for actuator command lines.
pub trait CommandSink: Send {
    /// Send one command line (terminator included by the caller).
    fn send_line(&mut self, line: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serial link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A [`CommandSink`] over a real serial port.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink {
    /// Open the serial port. The microcontroller resets on open, so callers
    /// should allow a settle delay before the first command.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|e| Error::Hardware(format!("opening {path}: {e}")))?;
        tracing::info!(port = %path, baud, "serial link open");
        Ok(Self { port })
    }
}

impl CommandSink for SerialLink {
    fn send_line(&mut self, line: &str) -> Result<()> {
        self.port
            .write_all(line.as_bytes())
            .map_err(|e| Error::Hardware(format!("serial write: {e}")))?;
        self.port
            .flush()
            .map_err(|e| Error::Hardware(format!("serial flush: {e}")))?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Disconnected sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stand-in when no serial port is available. Every send fails, so motion
/// steps are logged and skipped while the rest of the system runs.
pub struct NullSink;

impl CommandSink for NullSink {
    fn send_line(&mut self, _line: &str) -> Result<()> {
        Err(Error::Hardware("serial not connected".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recording sink (test double)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A sink that records every line instead of writing to hardware.
#[derive(Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl CommandSink for RecordingSink {
    fn send_line(&mut self, line: &str) -> Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}
