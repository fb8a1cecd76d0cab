use crate::types::ZoneError;
use serde::de::DeserializeOwned;
use std::io::{Read, Seek, SeekFrom};
use std::panic::AssertUnwindSafe;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Why a bounded worker produced no result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerFailure {
    #[error("Worker exceeded {0:?}")]
    TimedOut(Duration),

    #[error("Worker panicked")]
    Panicked,

    #[error("Worker exited with code {0:?}")]
    Exited(Option<i32>),

    #[error("Worker result is unreadable: {0}")]
    InvalidOutput(String),

    #[error("Worker could not be started: {0}")]
    Spawn(String),
}

impl WorkerFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkerFailure::TimedOut(_))
    }
}

impl From<WorkerFailure> for ZoneError {
    fn from(failure: WorkerFailure) -> Self {
        match failure {
            WorkerFailure::TimedOut(limit) => ZoneError::Timeout(limit),
            other => ZoneError::Processing(other.to_string()),
        }
    }
}

/// Runs work in an isolated worker under a wall-clock limit.
///
/// Both entry points are all-or-nothing: a value is returned only if the
/// worker finished in time and without failing.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl BoundedExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` on a worker thread.
    ///
    /// A panic inside `f` yields `Panicked`. On timeout the thread is detached
    /// and keeps running until `f` returns; its result is discarded. Use
    /// [`run_process`](Self::run_process) when the work must be stopped.
    pub fn run<T, F>(&self, f: F) -> Result<T, WorkerFailure>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let slot: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let worker_slot = Arc::clone(&slot);

        let handle = thread::Builder::new()
            .name("bounded-worker".to_string())
            .spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
                match outcome {
                    Ok(value) => {
                        if let Ok(mut guard) = worker_slot.lock() {
                            *guard = Some(value);
                        }
                    }
                    Err(_) => log::error!("Bounded worker panicked"),
                }
            })
            .map_err(|e| WorkerFailure::Spawn(e.to_string()))?;

        let start = Instant::now();
        while !handle.is_finished() {
            if start.elapsed() >= self.timeout {
                log::warn!("Bounded worker exceeded {:?}, abandoning it", self.timeout);
                return Err(WorkerFailure::TimedOut(self.timeout));
            }
            thread::sleep(self.poll_interval.min(self.timeout.saturating_sub(start.elapsed())));
        }

        if handle.join().is_err() {
            return Err(WorkerFailure::Panicked);
        }
        let value = slot.lock().ok().and_then(|mut guard| guard.take());
        value.ok_or(WorkerFailure::Panicked)
    }

    /// Run `command` as a child process and parse its stdout as JSON.
    ///
    /// Stdout goes to a temporary file that the parent reads once the child
    /// exits. The child is killed on timeout. A non-zero exit status yields
    /// `Exited` with the child's code, output that does not parse yields
    /// `InvalidOutput`.
    pub fn run_process<T: DeserializeOwned>(&self, mut command: Command) -> Result<T, WorkerFailure> {
        let result_file = tempfile::NamedTempFile::new()
            .map_err(|e| WorkerFailure::Spawn(format!("result file: {}", e)))?;
        let stdout = result_file
            .reopen()
            .map_err(|e| WorkerFailure::Spawn(format!("result file: {}", e)))?;

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .spawn()
            .map_err(|e| WorkerFailure::Spawn(e.to_string()))?;
        log::debug!("Worker process {} started", child.id());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    log::error!("Failed to poll worker process: {}", e);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WorkerFailure::Spawn(e.to_string()));
                }
            }
            if start.elapsed() >= self.timeout {
                log::warn!("Worker process exceeded {:?}, killing it", self.timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(WorkerFailure::TimedOut(self.timeout));
            }
            thread::sleep(self.poll_interval.min(self.timeout.saturating_sub(start.elapsed())));
        };

        if !status.success() {
            log::warn!("Worker process failed with {}", status);
            return Err(WorkerFailure::Exited(status.code()));
        }

        let mut output = String::new();
        let mut file = result_file.as_file();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut output))
            .map_err(|e| WorkerFailure::InvalidOutput(e.to_string()))?;
        serde_json::from_str(&output).map_err(|e| {
            log::warn!("Worker result is not valid JSON: {}", e);
            WorkerFailure::InvalidOutput(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_value() {
        let executor = BoundedExecutor::new(Duration::from_secs(5)).with_poll_interval(Duration::from_millis(10));
        assert_eq!(executor.run(|| 6 * 7), Ok(42));
    }

    #[test]
    fn test_run_panicking_worker_is_not_a_timeout() {
        let executor = BoundedExecutor::new(Duration::from_secs(5)).with_poll_interval(Duration::from_millis(10));
        let result: Result<u32, _> = executor.run(|| panic!("worker failure"));
        assert_eq!(result, Err(WorkerFailure::Panicked));
        assert!(matches!(ZoneError::from(WorkerFailure::Panicked), ZoneError::Processing(_)));
    }

    #[test]
    fn test_timeout_maps_to_zone_timeout() {
        let limit = Duration::from_millis(250);
        let failure = WorkerFailure::TimedOut(limit);
        assert!(failure.is_timeout());
        assert!(matches!(ZoneError::from(failure), ZoneError::Timeout(d) if d == limit));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_process_parses_stdout() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo '[1, 2, 3]'"]);
        let result: Result<Vec<u32>, _> = BoundedExecutor::new(Duration::from_secs(5)).run_process(command);
        assert_eq!(result, Ok(vec![1, 2, 3]));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_process_reports_exit_code() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo '[1]'; exit 3"]);
        let result: Result<Vec<u32>, _> = BoundedExecutor::new(Duration::from_secs(5)).run_process(command);
        assert_eq!(result, Err(WorkerFailure::Exited(Some(3))));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_process_garbage_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo not-json"]);
        let result: Result<Vec<u32>, _> = BoundedExecutor::new(Duration::from_secs(5)).run_process(command);
        assert!(matches!(result, Err(WorkerFailure::InvalidOutput(_))));
    }
}
