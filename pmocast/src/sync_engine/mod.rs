//! Playback synchronization between the local player and one renderer.

mod engine;
mod session;

use std::time::Duration;

use pmoconfig::Config;

pub use engine::SyncEngine;
pub use session::{ActiveRenderer, CastStatus, SyncSession};

/// Tunable thresholds of the synchronization loop.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSettings {
    pub tick_interval: Duration,
    /// Consecutive renderer poll failures before the handle is dropped.
    pub max_failures: u32,
    pub drift_threshold_secs: u32,
    /// Renderer elapsed period at which local playback is pulled back.
    pub resync_period_secs: u32,
    /// How long the local player may stay unreachable before it is fatal.
    pub local_unavailable_timeout: Duration,
    pub idle_wait_attempts: u32,
    pub idle_wait_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            max_failures: 20,
            drift_threshold_secs: 10,
            resync_period_secs: 10,
            local_unavailable_timeout: Duration::from_secs(60),
            idle_wait_attempts: 10,
            idle_wait_interval: Duration::from_secs(1),
        }
    }
}

fn to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.get_tick_ms().max(1)),
            max_failures: to_u32(config.get_max_failures()).max(1),
            drift_threshold_secs: to_u32(config.get_drift_threshold_secs()),
            resync_period_secs: to_u32(config.get_resync_period_secs()),
            local_unavailable_timeout: Duration::from_secs(config.get_local_unavailable_secs()),
            idle_wait_attempts: to_u32(config.get_idle_wait_attempts()),
            ..Self::default()
        }
    }
}

/// Branch taken by one engine tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickAction {
    /// Local poll failed; nothing else was evaluated.
    LocalUnavailable,
    /// Too many renderer poll failures; the handle was dropped.
    RendererReset,
    /// The configured renderer changed; the old handle was released.
    TargetChanged,
    /// A renderer handle was opened and drained.
    Acquired,
    /// The target renderer could not be resolved or connected.
    AcquireFailed,
    NoRenderer,
    /// Waiting for the renderer to report progress after a cast.
    AwaitingRenderer,
    /// Local playback resumed behind the renderer.
    Confirmed,
    Volume,
    Paused,
    Resumed,
    Stopped,
    Cast,
    /// The new local track maps to the live URL already playing.
    TrackFollowed,
    /// Renderer seeked to the local position.
    RendererSeek,
    /// Local player pulled back behind the renderer.
    LocalResync,
    InSync,
    /// A command failed; the next tick re-evaluates from fresh polls.
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_failures, 20);
        assert_eq!(settings.drift_threshold_secs, 10);
        assert_eq!(settings.resync_period_secs, 10);
        assert_eq!(settings.local_unavailable_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_from_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "sync:\n  tick_ms: 500\n  max_failures: 5\n  drift_threshold_secs: 3\n",
        )
        .unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();

        let settings = SyncSettings::from_config(&config);
        assert_eq!(settings.tick_interval, Duration::from_millis(500));
        assert_eq!(settings.max_failures, 5);
        assert_eq!(settings.drift_threshold_secs, 3);
        assert_eq!(settings.resync_period_secs, 10);
    }
}
