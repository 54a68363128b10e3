//! CLI entry point for `goatee`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use goatee::config::{self, MailboxConfig};
use goatee::cycle::FetchCycle;
use goatee::error::Error;
use goatee::export::attachment::AttachmentWriter;
use goatee::imap::SessionOptions;
use goatee::parser::mime::MultipartWalker;
use goatee::scheduler::{self, ImapConnector, Mode, Scheduler, Shutdown};

/// Poll an IMAP mailbox and save the PDF attachments of unread messages.
#[derive(Parser)]
#[command(name = "goatee", version, about)]
struct Cli {
    /// Configuration file [default: ./goatee.cfg]
    #[arg(long = "conf", value_name = "PATH")]
    conf: Option<PathBuf>,

    /// Log file, appended to [default: ./goatee.log]
    #[arg(long = "log", value_name = "PATH")]
    log: Option<PathBuf>,

    /// Time between mailbox checks, e.g. 30s, 5m, 1h30m
    #[arg(long, value_name = "DURATION", default_value = "5m", value_parser = scheduler::parse_interval)]
    interval: Duration,

    /// Trace every IMAP command and response
    #[arg(long)]
    debug: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    let log_path = cli.log.clone().unwrap_or_else(|| cwd.join("goatee.log"));
    let level = if cli.debug { "trace" } else { "info" };
    let _guard = setup_logging(level, &log_path)?;

    let conf_path = cli.conf.clone().unwrap_or_else(|| cwd.join("goatee.cfg"));
    let config = config::load_config(&conf_path)?;

    run(&cli, config, &cwd)?;
    Ok(())
}

fn run(cli: &Cli, config: MailboxConfig, cwd: &Path) -> goatee::error::Result<()> {
    let destination = config.destination_dir(cwd);
    tracing::info!(destination = %destination.display(), "Saving PDF attachments");

    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Signal received, stopping after the current step");
        on_signal.request();
    }) {
        tracing::warn!(error = %e, "Could not install signal handler");
    }

    let writer = AttachmentWriter::new(destination, config.on_collision);
    let cycle = FetchCycle::new(MultipartWalker::new(writer), shutdown.clone());

    let mode = if cli.once {
        Mode::Once
    } else {
        Mode::Every(cli.interval)
    };
    let scheduler = Scheduler::new(cycle, mode, shutdown);

    let mut connector = ImapConnector::new(config, SessionOptions::default());
    scheduler.run(&mut connector)
}

/// Log to stderr and append to `log_path`. `RUST_LOG` overrides `level`.
///
/// The returned guard flushes the file writer on drop and must live until
/// the process exits.
fn setup_logging(level: &str, log_path: &Path) -> Result<WorkerGuard, Error> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|source| Error::LogFile {
            path: log_path.to_path_buf(),
            source,
        })?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
