//! Background polling reader.
//!
//! A [`Poller`] runs on a dedicated thread and performs non-blocking reads on
//! a shared [`Session`] at a fixed interval, handing every chunk to a
//! callback. It stops when asked to, when its overall timeout expires, or when
//! the session is closed underneath it.

use crate::port::{PortError, TransferMode};
use crate::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Polling cadence and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Pause between polls.
    pub interval: Duration,
    /// Size of the read buffer handed to the session.
    pub buffer_size: usize,
    /// Stop on our own after this long (`None` = run until stopped).
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            buffer_size: 256,
            timeout: None,
        }
    }
}

/// Why a poller finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`Poller::stop`] was called.
    Cancelled,
    /// The overall timeout expired.
    TimedOut,
    /// The session was closed.
    SessionClosed,
}

/// What a finished poller did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub polls: u64,
    pub bytes_read: u64,
    pub reason: StopReason,
}

/// Handle to a running polling thread.
#[derive(Debug)]
pub struct Poller {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<PollSummary, PortError>>,
}

impl Poller {
    /// Start polling `session`, calling `on_data` with every chunk read.
    ///
    /// # Errors
    ///
    /// `PortError::InvalidArgument` for a zero interval or buffer size, or
    /// `PortError::System` if the thread cannot be spawned.
    pub fn spawn<F>(
        session: Arc<Session>,
        options: PollOptions,
        on_data: F,
    ) -> Result<Self, PortError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        if options.interval.is_zero() {
            return Err(PortError::invalid_argument("poll interval must be positive"));
        }
        if options.buffer_size == 0 {
            return Err(PortError::invalid_argument("poll buffer size must be positive"));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(format!("poll {}", session.name()))
            .spawn(move || poll_loop(&session, options, &flag, on_data))?;

        Ok(Self { stop, thread })
    }

    /// Whether the polling thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Signal the thread to stop and wait for it.
    pub fn stop(self) -> Result<PollSummary, PortError> {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        self.join()
    }

    /// Wait for the thread to finish on its own.
    pub fn join(self) -> Result<PollSummary, PortError> {
        self.thread
            .join()
            .map_err(|_| PortError::System(std::io::Error::other("polling thread panicked")))?
    }
}

fn poll_loop<F>(
    session: &Session,
    options: PollOptions,
    stop: &AtomicBool,
    mut on_data: F,
) -> Result<PollSummary, PortError>
where
    F: FnMut(&[u8]),
{
    let started = Instant::now();
    let mut buffer = vec![0u8; options.buffer_size];
    let mut polls = 0;
    let mut bytes_read = 0;
    tracing::debug!(port = session.name(), interval = ?options.interval, "poller started");

    let reason = 'outer: loop {
        if stop.load(Ordering::Acquire) {
            break StopReason::Cancelled;
        }
        let remaining = match options.timeout {
            Some(limit) => match limit.checked_sub(started.elapsed()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => break StopReason::TimedOut,
            },
            None => None,
        };

        polls += 1;
        loop {
            match session.read(&mut buffer, TransferMode::NonBlocking, 0) {
                Ok(0) => break,
                Ok(n) => {
                    bytes_read += n as u64;
                    on_data(&buffer[..n]);
                    if n < buffer.len() {
                        break;
                    }
                }
                Err(PortError::NotOpen) => break 'outer StopReason::SessionClosed,
                Err(e) => return Err(e),
            }
        }

        let wait = remaining.map_or(options.interval, |left| left.min(options.interval));
        std::thread::park_timeout(wait);
    };

    tracing::debug!(port = session.name(), ?reason, polls, bytes_read, "poller stopped");
    Ok(PollSummary {
        polls,
        bytes_read,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockDriver;
    use parking_lot::Mutex;

    fn loopback_session() -> (MockDriver, Arc<Session>) {
        let driver = MockDriver::new();
        driver.add_loopback_device("LOOP0");
        let session = Session::open(&driver, "LOOP0").unwrap();
        (driver, Arc::new(session))
    }

    #[test]
    fn test_rejects_zero_interval() {
        let (_driver, session) = loopback_session();
        let options = PollOptions {
            interval: Duration::ZERO,
            ..PollOptions::default()
        };
        assert!(Poller::spawn(session, options, |_| {}).is_err());
    }

    #[test]
    fn test_collects_written_bytes_until_stopped() {
        let (_driver, session) = loopback_session();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let options = PollOptions {
            interval: Duration::from_millis(5),
            buffer_size: 4,
            timeout: None,
        };

        let poller = Poller::spawn(Arc::clone(&session), options, move |chunk| {
            sink.lock().extend_from_slice(chunk)
        })
        .unwrap();

        session
            .write(b"polled data", TransferMode::Blocking, 100)
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while received.lock().len() < 11 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let summary = poller.stop().unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.bytes_read, 11);
        assert_eq!(received.lock().as_slice(), b"polled data");
    }

    #[test]
    fn test_overall_timeout_ends_polling() {
        let (_driver, session) = loopback_session();
        let options = PollOptions {
            interval: Duration::from_millis(5),
            buffer_size: 16,
            timeout: Some(Duration::from_millis(40)),
        };

        let poller = Poller::spawn(session, options, |_| {}).unwrap();
        let summary = poller.join().unwrap();
        assert_eq!(summary.reason, StopReason::TimedOut);
        assert!(summary.polls >= 1);
    }

    #[test]
    fn test_session_close_ends_polling() {
        let (_driver, session) = loopback_session();
        let options = PollOptions {
            interval: Duration::from_millis(5),
            ..PollOptions::default()
        };

        let poller = Poller::spawn(Arc::clone(&session), options, |_| {}).unwrap();
        session.close().unwrap();
        let summary = poller.join().unwrap();
        assert_eq!(summary.reason, StopReason::SessionClosed);
    }
}
