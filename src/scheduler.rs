//! Process lifetime: repeat fetch cycles on an interval and decide which
//! failures end the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::MailboxConfig;
use crate::cycle::{CycleReport, FetchCycle};
use crate::error::{ErrorKind, Result};
use crate::imap::connection::TlsTransport;
use crate::imap::{self, ImapSession, MailSession, SessionOptions};

/// Granularity of the interruptible sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Time allowed for LOGOUT at the end of a cycle.
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cooperative shutdown flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Opens a fresh mailbox session for each cycle.
pub trait Connect {
    type Session: MailSession;

    fn connect(&mut self) -> Result<Self::Session>;
}

impl<F, S> Connect for F
where
    F: FnMut() -> Result<S>,
    S: MailSession,
{
    type Session = S;

    fn connect(&mut self) -> Result<S> {
        self()
    }
}

/// Connects to the configured server over TLS.
pub struct ImapConnector {
    config: MailboxConfig,
    options: SessionOptions,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig, options: SessionOptions) -> Self {
        Self { config, options }
    }
}

impl Connect for ImapConnector {
    type Session = ImapSession<TlsTransport>;

    fn connect(&mut self) -> Result<Self::Session> {
        imap::connect(&self.config, self.options)
    }
}

/// How often cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A single cycle; any error is returned.
    Once,
    /// Forever, sleeping this long between cycles.
    Every(Duration),
}

pub struct Scheduler {
    cycle: FetchCycle,
    mode: Mode,
    shutdown: Shutdown,
}

impl Scheduler {
    pub fn new(cycle: FetchCycle, mode: Mode, shutdown: Shutdown) -> Self {
        Self {
            cycle,
            mode,
            shutdown,
        }
    }

    /// Run until a fatal error, a shutdown request, or (in [`Mode::Once`])
    /// the end of the first cycle.
    pub fn run(&self, connector: &mut impl Connect) -> Result<()> {
        loop {
            if self.shutdown.is_requested() {
                info!("Shutdown requested");
                return Ok(());
            }

            match self.run_cycle(connector) {
                Ok(report) => {
                    info!(
                        unread = report.unread,
                        skipped = report.skipped,
                        attachments = report.attachments,
                        failed = report.failed_attachments,
                        "Cycle complete"
                    );
                }
                Err(e) => match e.kind() {
                    ErrorKind::Fatal => {
                        error!(error = %e, "Fatal error, stopping");
                        return Err(e);
                    }
                    ErrorKind::Cancelled => {
                        info!("Cycle cancelled by shutdown request");
                        return Ok(());
                    }
                    ErrorKind::Cycle if self.mode == Mode::Once => return Err(e),
                    ErrorKind::Cycle => {
                        error!(error = %e, "Cycle failed, will retry on next interval");
                    }
                },
            }

            match self.mode {
                Mode::Once => return Ok(()),
                Mode::Every(interval) => {
                    info!(interval = ?interval, "Sleeping until next cycle");
                    if !self.sleep(interval) {
                        info!("Shutdown requested");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn run_cycle(&self, connector: &mut impl Connect) -> Result<CycleReport> {
        let mut session = connector.connect()?;
        let result = self.cycle.run_once(&mut session);
        session.disconnect(LOGOUT_TIMEOUT);
        result
    }

    /// Sleep for `duration` in short slices. Returns `false` if shutdown was
    /// requested meanwhile.
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shutdown.is_requested() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}

/// Parse an interval such as `30s`, `5m`, `2h` or `1h30m`.
pub fn parse_interval(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty interval".to_string());
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: u64 = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return Err(format!("invalid unit '{c}' in interval '{s}' (use s, m or h)")),
        };
        if digits.is_empty() {
            return Err(format!("missing number before '{c}' in interval '{s}'"));
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("number too large in interval '{s}'"))?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("interval '{s}' is too large"))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("missing unit after '{digits}' in interval '{s}' (use s, m or h)"));
    }
    if total == 0 {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(total))
}
