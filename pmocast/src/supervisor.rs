//! Liveness supervision of the background tasks.
//!
//! Every long-running task is started through [`Supervisor::spawn_task`] on
//! its own named thread. A task is never expected to return: any exit, clean
//! or not, is reported on a channel and turned into a fatal error by
//! [`Supervisor::watch`]. The synchronization engine additionally beats a
//! [`Heartbeat`] after every completed tick; a heartbeat older than the
//! stall timeout is reported as a deadlock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, error, info};

use crate::errors::CastError;

/// Timestamp of the last completed engine tick, in milliseconds since the
/// Unix epoch.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    last: Arc<AtomicI64>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    /// A heartbeat that has just beaten.
    pub fn new() -> Self {
        Self {
            last: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    pub fn beat(&self) {
        self.last
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_beat_millis(&self) -> i64 {
        self.last.load(Ordering::Relaxed)
    }

    /// Time elapsed since the last beat.
    pub fn age(&self) -> Duration {
        let elapsed = Utc::now().timestamp_millis() - self.last_beat_millis();
        Duration::from_millis(u64::try_from(elapsed).unwrap_or(0))
    }
}

#[derive(Debug)]
struct TaskExit {
    name: String,
    reason: String,
}

pub struct Supervisor {
    heartbeat: Heartbeat,
    stall_timeout: Duration,
    check_interval: Duration,
    exits_tx: Sender<TaskExit>,
    exits_rx: Receiver<TaskExit>,
    tasks: Vec<String>,
}

impl Supervisor {
    pub fn new(heartbeat: Heartbeat, stall_timeout: Duration, check_interval: Duration) -> Self {
        let (exits_tx, exits_rx) = unbounded();
        Self {
            heartbeat,
            stall_timeout,
            check_interval,
            exits_tx,
            exits_rx,
            tasks: Vec::new(),
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Names of the tasks started so far.
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Starts `task` on a thread called `name`.
    ///
    /// The thread reports its exit (return value or panic) to the
    /// supervisor.
    pub fn spawn_task<F>(&mut self, name: &str, task: F) -> Result<(), CastError>
    where
        F: FnOnce() -> Result<(), CastError> + Send + 'static,
    {
        let exits = self.exits_tx.clone();
        let task_name = name.to_string();

        thread::Builder::new().name(name.to_string()).spawn(move || {
            let reason = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => "returned".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            let _ = exits.send(TaskExit {
                name: task_name,
                reason,
            });
        })?;

        info!(task = name, "Started task");
        self.tasks.push(name.to_string());
        Ok(())
    }

    /// One supervision step: waits up to the check interval for a task exit,
    /// then checks the heartbeat.
    pub fn check(&self) -> Result<(), CastError> {
        match self.exits_rx.recv_timeout(self.check_interval) {
            Ok(exit) => {
                error!(task = %exit.name, "Task exited: {}", exit.reason);
                return Err(CastError::TaskFailed(exit.name, exit.reason));
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }

        let age = self.heartbeat.age();
        if age > self.stall_timeout {
            error!(
                age = age.as_secs(),
                "No sync tick completed within {} seconds",
                self.stall_timeout.as_secs()
            );
            return Err(CastError::DeadlockDetected(age.as_secs()));
        }
        debug!(age_ms = age.as_millis() as u64, "Supervisor check passed");
        Ok(())
    }

    /// Blocks until a task exits or the engine stalls, and returns the
    /// corresponding fatal error.
    pub fn watch(&self) -> CastError {
        loop {
            if let Err(e) = self.check() {
                return e;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
