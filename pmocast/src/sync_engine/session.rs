use chrono::{DateTime, Utc};
use pmoconfig::CastTarget;

use crate::model::{PlayerStatus, RenderStatus};

/// What the engine last told the renderer to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastStatus {
    /// Nothing commanded since the handle was acquired.
    None,
    Stopped,
    Paused,
    Playing,
}

impl From<PlayerStatus> for CastStatus {
    fn from(status: PlayerStatus) -> Self {
        match status {
            PlayerStatus::Stopped => CastStatus::Stopped,
            PlayerStatus::Paused => CastStatus::Paused,
            PlayerStatus::Playing => CastStatus::Playing,
        }
    }
}

/// A renderer handle together with the target it was opened for.
pub struct ActiveRenderer<H> {
    pub target: CastTarget,
    pub handle: H,
}

/// Working memory of the engine across ticks.
pub struct SyncSession<H> {
    pub target: CastTarget,
    pub active: Option<ActiveRenderer<H>>,
    pub cast_status: CastStatus,
    pub cast_track_id: Option<u32>,
    pub cast_track_ref: Option<String>,
    /// URL given to the renderer by the last load.
    pub cast_url: Option<String>,
    /// The cast media is a live stream: no elapsed time to chase.
    pub cast_live: bool,
    pub cast_volume: Option<u8>,
    pub cast_confirmed: bool,
    pub failure_count: u32,
    pub last_render: Option<RenderStatus>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl<H> SyncSession<H> {
    pub fn new(target: CastTarget) -> Self {
        Self {
            target,
            active: None,
            cast_status: CastStatus::None,
            cast_track_id: None,
            cast_track_ref: None,
            cast_url: None,
            cast_live: false,
            cast_volume: None,
            cast_confirmed: false,
            failure_count: 0,
            last_render: None,
            last_activity: None,
        }
    }

    pub fn has_renderer(&self) -> bool {
        self.active.is_some()
    }

    /// Name the current handle was opened for.
    pub fn bound_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.target.renderer.as_str())
    }

    /// True when the handle was opened for another target than the
    /// configured one.
    pub fn target_changed(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.target != self.target)
    }

    /// Forgets everything known about what the renderer is playing.
    pub fn reset_cast_state(&mut self) {
        self.cast_status = CastStatus::None;
        self.cast_track_id = None;
        self.cast_track_ref = None;
        self.cast_url = None;
        self.cast_live = false;
        self.cast_volume = None;
        self.cast_confirmed = false;
        self.failure_count = 0;
        self.last_render = None;
    }

    /// Installs a freshly opened handle, replacing any previous one.
    pub fn bind(&mut self, handle: H) {
        self.active = Some(ActiveRenderer {
            target: self.target.clone(),
            handle,
        });
        self.reset_cast_state();
    }

    /// Takes the handle out of the session.
    pub fn release(&mut self) -> Option<ActiveRenderer<H>> {
        self.failure_count = 0;
        self.last_render = None;
        self.active.take()
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}
