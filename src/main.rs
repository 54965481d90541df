use clap::{Parser, Subcommand};
use serial_session::config::{Config, ConfigLoader, LogFormat, LoggingConfig};
use serial_session::port::{MockDriver, SerialDriver, SystemDriver};
use serial_session::{
    list_ports, AppError, AppResult, PollSummary, Poller, Session, TransferMode,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Name of the in-memory loopback device used by `--mock`.
const MOCK_PORT: &str = "MOCK0";

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "List serial ports and exercise a port session.",
    long_about = "Enumerates serial ports and runs an open/configure/poll/write/close round trip against a port, restoring its original line settings afterwards."
)]
struct Args {
    /// Configuration file (overrides the standard lookup).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial ports visible on this host.
    List,

    /// Write "Hello " and "World " while a background poller echoes what comes back.
    Loopback {
        /// Port name or alias; falls back to serial.default_port.
        port: Option<String>,

        /// Baud rate; falls back to serial.default_baud.
        #[arg(short, long)]
        baud: Option<u32>,

        /// Use an in-memory loopback device instead of real hardware.
        #[arg(long)]
        mock: bool,

        /// Settling time before the first write, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        settle_ms: u64,

        /// Pause after each write, in milliseconds.
        #[arg(long, default_value_t = 200)]
        gap_ms: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    init_tracing(&config.logging);

    match args.command {
        Command::List => run_list()?,
        Command::Loopback {
            port,
            baud,
            mock,
            settle_ms,
            gap_ms,
        } => {
            let options = LoopbackOptions {
                port,
                baud,
                mock,
                settle: Duration::from_millis(settle_ms),
                gap: Duration::from_millis(gap_ms),
            };
            run_loopback(&config, options)?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

fn run_list() -> AppResult<()> {
    let ports = list_ports(&SystemDriver::new())?;
    if ports.is_empty() {
        println!("No serial ports detected on this system");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

struct LoopbackOptions {
    port: Option<String>,
    baud: Option<u32>,
    mock: bool,
    settle: Duration,
    gap: Duration,
}

fn run_loopback(config: &Config, options: LoopbackOptions) -> AppResult<()> {
    let driver: Box<dyn SerialDriver> = if options.mock {
        let driver = MockDriver::new();
        driver.add_loopback_device(MOCK_PORT);
        Box::new(driver)
    } else {
        Box::new(SystemDriver::new())
    };

    let name = match (&options.port, options.mock) {
        (Some(port), _) => config.serial.resolve_port(port),
        (None, true) => MOCK_PORT.to_string(),
        (None, false) => config
            .serial
            .default_port
            .as_deref()
            .map(|port| config.serial.resolve_port(port))
            .ok_or(AppError::NoPortSpecified)?,
    };

    let summary = exchange(driver.as_ref(), &name, config, &options)?;
    println!();
    tracing::info!(
        bytes_read = summary.bytes_read,
        polls = summary.polls,
        "poller finished"
    );

    println!("\nList ports:");
    run_list()
}

/// Open `name`, write the greeting while polling for replies, then stop the
/// poller and close the session whatever happened in between.
fn exchange(
    driver: &dyn SerialDriver,
    name: &str,
    config: &Config,
    options: &LoopbackOptions,
) -> AppResult<PollSummary> {
    let session = Arc::new(Session::open(driver, name)?);
    let mut line = config.serial.port_config();
    if let Some(baud) = options.baud {
        line.baud_rate = baud;
    }
    if let Err(e) = session.apply_config(line) {
        close_quietly(&session);
        return Err(e.into());
    }
    tracing::info!(port = %name, settings = %line, "port configured");

    let poller = match Poller::spawn(Arc::clone(&session), config.poll.options(), |chunk| {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout must not stop the reader
        let _ = write!(stdout, "{}", String::from_utf8_lossy(chunk));
        let _ = stdout.flush();
    }) {
        Ok(poller) => poller,
        Err(e) => {
            close_quietly(&session);
            return Err(e.into());
        }
    };

    let patience = Duration::from_millis(u64::from(config.serial.default_timeout_ms));
    let sent = send_greeting(&session, options, patience);

    let stopped = poller.stop();
    let closed = session.close();
    sent?;
    let summary = stopped?;
    closed?;
    Ok(summary)
}

fn send_greeting(
    session: &Session,
    options: &LoopbackOptions,
    patience: Duration,
) -> AppResult<()> {
    thread::sleep(options.settle);
    for message in ["Hello ", "World "] {
        write_all(session, message.as_bytes(), patience)?;
        thread::sleep(options.gap);
    }
    Ok(())
}

fn close_quietly(session: &Session) {
    if let Err(e) = session.close() {
        tracing::warn!(port = session.name(), error = %e, "close after failure did not complete");
    }
}

/// Send all of `data` with non-blocking writes, resending the unsent remainder.
fn write_all(session: &Session, data: &[u8], patience: Duration) -> AppResult<()> {
    let mut sent = 0;
    let mut idle_rounds = 0u32;
    while sent < data.len() {
        let n = session.write(&data[sent..], TransferMode::NonBlocking, 0)?;
        sent += n;
        if n == 0 {
            idle_rounds += 1;
            if Duration::from_millis(10) * idle_rounds > patience {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("only {sent} of {} bytes accepted", data.len()),
                )));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_session::port::MockOp;
    use serial_session::{ErrorKind, FlowControl, Parity, PortConfig, StopReason};

    fn quick_options() -> LoopbackOptions {
        LoopbackOptions {
            port: None,
            baud: None,
            mock: true,
            settle: Duration::ZERO,
            gap: Duration::ZERO,
        }
    }

    fn preset() -> PortConfig {
        PortConfig::from_raw(4800, 7, 2, Parity::Even, FlowControl::RtsCts).unwrap()
    }

    #[test]
    fn test_exchange_round_trip_restores_device() {
        let driver = MockDriver::new();
        let device = driver.add_loopback_device(MOCK_PORT);
        device.set_config(preset());

        let summary = exchange(&driver, MOCK_PORT, &Config::default(), &quick_options()).unwrap();

        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(device.transmitted(), b"Hello World ".to_vec());
        assert_eq!(device.config(), preset());
        assert!(!device.is_open());
    }

    #[test]
    fn test_failed_write_still_closes_and_restores() {
        let driver = MockDriver::new();
        let device = driver.add_loopback_device(MOCK_PORT);
        device.set_config(preset());
        device.fail_next(MockOp::Write, ErrorKind::System);

        let err = exchange(&driver, MOCK_PORT, &Config::default(), &quick_options()).unwrap_err();

        assert!(matches!(err, AppError::Port(_)), "got {err:?}");
        assert!(!device.is_open());
        assert_eq!(device.config(), preset());
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_rejected_baud_closes_session() {
        let driver = MockDriver::new();
        let device = driver.add_loopback_device(MOCK_PORT);
        device.set_config(preset());
        let options = LoopbackOptions {
            baud: Some(0),
            ..quick_options()
        };

        assert!(exchange(&driver, MOCK_PORT, &Config::default(), &options).is_err());
        assert!(!device.is_open());
        assert_eq!(device.config(), preset());
    }
}
