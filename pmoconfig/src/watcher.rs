//! Configuration file watcher.
//!
//! Polls the modification time of `config.yaml` and, when it changes,
//! reloads the document and publishes the new [`CastTarget`] on a
//! crossbeam channel. The watcher is the only writer of that channel; the
//! synchronization engine drains it at the start of each tick.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::{CastTarget, Config};

pub struct ConfigWatcher {
    config: Arc<Config>,
    poll_interval: Duration,
    sender: Sender<CastTarget>,
    last_modified: Option<SystemTime>,
    last_target: CastTarget,
}

impl ConfigWatcher {
    /// Creates a watcher primed with the current file state.
    ///
    /// The returned receiver only sees targets that differ from
    /// `config.cast_target()` at construction time.
    pub fn new(config: Arc<Config>, poll_interval: Duration) -> (Self, Receiver<CastTarget>) {
        let (sender, receiver) = unbounded();
        let last_modified = config.modified();
        let last_target = config.cast_target();
        (
            Self {
                config,
                poll_interval,
                sender,
                last_modified,
                last_target,
            },
            receiver,
        )
    }

    /// Runs one check cycle.
    ///
    /// Returns the target that was published, if any. A malformed file keeps
    /// the previous target and is not an error.
    pub fn check(&mut self) -> Result<Option<CastTarget>> {
        let modified = self.config.modified();
        if modified.is_none() || modified == self.last_modified {
            return Ok(None);
        }
        self.last_modified = modified;

        info!(file = %self.config.file_path().display(), "Detected configuration update");
        if let Err(err) = self.config.reload() {
            warn!("Keeping previous configuration: {:#}", err);
            return Ok(None);
        }

        let target = self.config.cast_target();
        if target == self.last_target {
            debug!("Configuration changed but cast target is unchanged");
            return Ok(None);
        }

        info!(
            renderer = %target.renderer,
            mode = %target.mode,
            "Cast target set to [{}]",
            target.renderer
        );
        self.sender
            .send(target.clone())
            .map_err(|_| anyhow!("Cast target receiver dropped"))?;
        self.last_target = target.clone();
        Ok(Some(target))
    }

    /// Blocking watch loop. Only returns when the engine side of the channel
    /// is gone.
    pub fn run(mut self) -> Result<()> {
        loop {
            self.check()?;
            thread::sleep(self.poll_interval);
        }
    }
}
