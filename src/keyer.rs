//! Keying drivers.
//!
//! Two ways of getting Morse code on the air:
//!
//! - [`SerialKeyer`] writes one byte per Morse unit (`.`, `-`, ` `) to a
//!   serial keyer device and waits a fixed delay after each one. The device
//!   turns the units into properly timed key-down periods.
//! - [`RigctlKeyer`] hands the whole message to hamlib's `rigctl`, which
//!   asks the radio's built-in keyer to send it.
//!
//! [`Backend`] picks one of the two at startup.

use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

use crate::echo::Diagnostics;
use crate::morse::{MorseCode, RESET_CHAR, encode};
use crate::stats::KeyerStats;

/// Delay after each unit written to a serial keyer.
pub const DEFAULT_UNIT_DELAY: Duration = Duration::from_millis(100);

/// Program used by the rig-control keyer.
pub const DEFAULT_RIGCTL_PROGRAM: &str = "rigctl";

/// Arguments placed before the message text: hamlib model 2 (rigctld over
/// the network), command `b` (send morse).
pub const DEFAULT_RIGCTL_ARGS: [&str; 3] = ["-m", "2", "b"];

/// Errors from the keying device. These are fatal to the daemon.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("could not open keyer device {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write to keyer device failed: {0}")]
    Write(#[source] std::io::Error),
}

/// How a message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Every character was processed.
    Completed,
    /// A reset character stopped the message early.
    Reset,
    /// Nothing was sent.
    Skipped,
}

/// Keys Morse units onto a serial keyer device.
pub struct SerialKeyer {
    device: Box<dyn Write + Send>,
    unit_delay: Duration,
}

impl SerialKeyer {
    /// Open the device write-only.
    pub fn open(path: &Path, unit_delay: Duration) -> Result<Self, KeyError> {
        let device = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| KeyError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Keying on {}", path.display());
        Ok(Self::new(device, unit_delay))
    }

    pub fn new(device: impl Write + Send + 'static, unit_delay: Duration) -> Self {
        Self {
            device: Box::new(device),
            unit_delay,
        }
    }

    pub fn unit_delay(&self) -> Duration {
        self.unit_delay
    }

    fn write_unit(&mut self, unit: u8) -> Result<(), KeyError> {
        self.device.write_all(&[unit]).map_err(KeyError::Write)?;
        self.device.flush().map_err(KeyError::Write)
    }

    /// Ask the device to drop anything it has queued.
    ///
    /// The reset byte is paced like any other unit.
    pub async fn flush_queue(&mut self) -> Result<(), KeyError> {
        trace!("Sending reset to keyer");
        self.write_unit(RESET_CHAR)?;
        sleep(self.unit_delay).await;
        Ok(())
    }

    /// Key one text message.
    ///
    /// Each character is echoed before its units are written. A reset
    /// character is forwarded to the device and ends the message.
    pub async fn send_text(
        &mut self,
        text: &[u8],
        echo: &mut Diagnostics,
        stats: &KeyerStats,
    ) -> Result<KeyOutcome, KeyError> {
        let mut outcome = KeyOutcome::Completed;

        for encoded in encode(text) {
            echo.echo(&[encoded.ch]);

            match encoded.code {
                Some(MorseCode::Reset) => {
                    debug!("Reset in message, dropping the rest");
                    self.flush_queue().await?;
                    stats.record_reset();
                    outcome = KeyOutcome::Reset;
                    break;
                }
                Some(code) => {
                    trace!("{:?} -> {}", encoded.ch as char, code);
                    stats.record_character();
                    for symbol in code.symbols() {
                        self.write_unit(symbol.as_byte())?;
                        stats.record_unit();
                        sleep(self.unit_delay).await;
                    }
                }
                None => {
                    trace!("No Morse code for {:#04x}", encoded.ch);
                    echo.unencodable();
                    stats.record_unencodable();
                }
            }
        }

        echo.end_line();
        Ok(outcome)
    }
}

impl std::fmt::Debug for SerialKeyer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialKeyer")
            .field("unit_delay", &self.unit_delay)
            .finish_non_exhaustive()
    }
}

/// Sends whole messages through an external rig-control program.
#[derive(Debug, Clone)]
pub struct RigctlKeyer {
    program: String,
    args: Vec<String>,
}

impl Default for RigctlKeyer {
    fn default() -> Self {
        Self::new(
            DEFAULT_RIGCTL_PROGRAM,
            DEFAULT_RIGCTL_ARGS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl RigctlKeyer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Build the command for one message.
    ///
    /// The text is passed byte for byte as a single argument; no shell is
    /// involved. The child is killed if the daemon stops while it runs.
    pub fn command(&self, text: &[u8]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(OsStr::from_bytes(text))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Send one message and wait for the program to finish.
    ///
    /// Failures are logged and counted but never returned.
    pub async fn send_text(
        &mut self,
        text: &[u8],
        echo: &mut Diagnostics,
        stats: &KeyerStats,
    ) -> Result<KeyOutcome, KeyError> {
        if text.is_empty() {
            debug!("Empty message, nothing to send");
            return Ok(KeyOutcome::Skipped);
        }

        let mut line = Vec::with_capacity(text.len() + 12);
        line.extend_from_slice(b"Sending '");
        line.extend_from_slice(text);
        line.extend_from_slice(b"'\n");
        echo.echo(&line);

        match self.command(text).status().await {
            Ok(status) if status.success() => {
                debug!("{} finished", self.program);
                stats.record_rig_command(true);
            }
            Ok(status) => {
                warn!("{} exited with {}", self.program, status);
                stats.record_rig_command(false);
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.program, e);
                stats.record_rig_command(false);
            }
        }

        Ok(KeyOutcome::Completed)
    }
}

/// The keying driver selected at startup.
#[derive(Debug)]
pub enum Backend {
    Serial(SerialKeyer),
    Rigctl(RigctlKeyer),
}

impl Backend {
    /// Key one text message. Returns once it has been sent completely.
    pub async fn send_text(
        &mut self,
        text: &[u8],
        echo: &mut Diagnostics,
        stats: &KeyerStats,
    ) -> Result<KeyOutcome, KeyError> {
        let started = Instant::now();
        let outcome = match self {
            Backend::Serial(keyer) => keyer.send_text(text, echo, stats).await?,
            Backend::Rigctl(keyer) => keyer.send_text(text, echo, stats).await?,
        };
        if outcome != KeyOutcome::Skipped {
            stats.record_keying_time(started.elapsed());
        }
        Ok(outcome)
    }

    /// Handle an abort request between messages.
    pub async fn abort(&mut self) -> Result<(), KeyError> {
        match self {
            Backend::Serial(keyer) => keyer.flush_queue().await,
            Backend::Rigctl(_) => {
                info!("Abort");
                Ok(())
            }
        }
    }

    /// Short description for startup logging.
    pub fn describe(&self) -> String {
        match self {
            Backend::Serial(keyer) => format!(
                "serial keyer, {} ms per unit",
                keyer.unit_delay().as_millis()
            ),
            Backend::Rigctl(keyer) => format!("rig control via {}", keyer.program()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::SharedBuffer;
    use std::io;
    use std::sync::atomic::Ordering;

    struct FailingDevice;

    impl Write for FailingDevice {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("device unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn serial(delay_ms: u64) -> (SerialKeyer, SharedBuffer) {
        let device = SharedBuffer::new();
        let keyer = SerialKeyer::new(device.clone(), Duration::from_millis(delay_ms));
        (keyer, device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sos_units_and_echo() {
        let (mut keyer, device) = serial(100);
        let out = SharedBuffer::new();
        let mut echo = Diagnostics::new(out.clone());
        let stats = KeyerStats::new();

        let outcome = keyer.send_text(b"SOS", &mut echo, &stats).await.unwrap();

        assert_eq!(outcome, KeyOutcome::Completed);
        assert_eq!(device.text(), "... --- ... ");
        assert_eq!(out.text(), "SOS\n");
        assert_eq!(stats.units_written.load(Ordering::Relaxed), 12);
        assert_eq!(stats.characters_keyed.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_delay_paces_message() {
        let (mut keyer, _device) = serial(100);
        let mut echo = Diagnostics::new(SharedBuffer::new());
        let stats = KeyerStats::new();

        let started = Instant::now();
        keyer.send_text(b"ET", &mut echo, &stats).await.unwrap();

        // ". " and "- " are four units
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_is_echoed_and_skipped() {
        let (mut keyer, device) = serial(5);
        let out = SharedBuffer::new();
        let mut echo = Diagnostics::new(out.clone());
        let stats = KeyerStats::new();

        keyer.send_text(b"e?t", &mut echo, &stats).await.unwrap();

        assert_eq!(device.text(), ". - ");
        assert_eq!(out.text(), "e??t\n");
        assert_eq!(stats.unencodable.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stops_message() {
        let (mut keyer, device) = serial(100);
        let out = SharedBuffer::new();
        let mut echo = Diagnostics::new(out.clone());
        let stats = KeyerStats::new();

        let outcome = keyer.send_text(b"E*TTT", &mut echo, &stats).await.unwrap();

        assert_eq!(outcome, KeyOutcome::Reset);
        assert_eq!(device.text(), ". *");
        assert_eq!(out.text(), "E*\n");
        assert_eq!(stats.resets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_paced_like_a_unit() {
        let (mut keyer, device) = serial(100);
        let mut echo = Diagnostics::new(SharedBuffer::new());
        let stats = KeyerStats::new();

        let started = Instant::now();
        keyer.send_text(b"E*", &mut echo, &stats).await.unwrap();

        // ". " then "*", each followed by one unit delay
        assert_eq!(device.text(), ". *");
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_an_error() {
        let mut keyer = SerialKeyer::new(FailingDevice, DEFAULT_UNIT_DELAY);
        let mut echo = Diagnostics::new(SharedBuffer::new());
        let stats = KeyerStats::new();

        let result = keyer.send_text(b"K", &mut echo, &stats).await;
        assert!(matches!(result, Err(KeyError::Write(_))));
    }

    #[test]
    fn test_open_missing_device() {
        let result = SerialKeyer::open(Path::new("/nonexistent/ttyACM9"), DEFAULT_UNIT_DELAY);
        assert!(matches!(result, Err(KeyError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_abort_sends_reset() {
        let (keyer, device) = serial(100);
        let mut backend = Backend::Serial(keyer);

        let started = Instant::now();
        backend.abort().await.unwrap();

        assert_eq!(device.contents(), vec![RESET_CHAR]);
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn test_rigctl_command_passes_text_as_one_argument() {
        let keyer = RigctlKeyer::default();
        let text = b"CQ'; rm -rf / #";
        let cmd = keyer.command(text);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "rigctl");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-m", "2", "b", "CQ'; rm -rf / #"]);
    }

    #[test]
    fn test_rigctl_command_keeps_raw_bytes() {
        let keyer = RigctlKeyer::new("rigctl", Vec::new());
        let text = b"CQ \xe9\xff";
        let cmd = keyer.command(text);

        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec![OsStr::from_bytes(text)]);
        assert_eq!(args[0].as_bytes(), text);
    }

    #[tokio::test]
    async fn test_rigctl_failure_is_not_fatal() {
        let mut keyer = RigctlKeyer::new("/nonexistent/rigctl", Vec::new());
        let out = SharedBuffer::new();
        let mut echo = Diagnostics::new(out.clone());
        let stats = KeyerStats::new();

        let outcome = keyer.send_text(b"TEST", &mut echo, &stats).await.unwrap();

        assert_eq!(outcome, KeyOutcome::Completed);
        assert_eq!(out.text(), "Sending 'TEST'\n");
        assert_eq!(stats.rig_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_rigctl_nonzero_exit_is_counted() {
        let mut keyer = RigctlKeyer::new("false", Vec::new());
        let mut echo = Diagnostics::new(SharedBuffer::new());
        let stats = KeyerStats::new();

        keyer.send_text(b"TEST", &mut echo, &stats).await.unwrap();

        assert_eq!(stats.rig_commands.load(Ordering::Relaxed), 1);
        assert_eq!(stats.rig_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_rigctl_skips_empty_text() {
        let mut keyer = RigctlKeyer::default();
        let out = SharedBuffer::new();
        let mut echo = Diagnostics::new(out.clone());
        let stats = KeyerStats::new();

        let outcome = keyer.send_text(b"", &mut echo, &stats).await.unwrap();

        assert_eq!(outcome, KeyOutcome::Skipped);
        assert!(out.contents().is_empty());
        assert_eq!(stats.rig_commands.load(Ordering::Relaxed), 0);
    }
}
