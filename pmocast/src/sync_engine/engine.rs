//! The synchronization state machine.
//!
//! Each tick polls both sides once and issues at most one corrective action.
//! Structural transitions (pause, resume, stop, cast) always win over elapsed
//! time fine-tuning within the same tick.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::Receiver;
use pmoconfig::CastTarget;
use tracing::{debug, error, info, warn};

use super::session::{CastStatus, SyncSession};
use super::{SyncSettings, TickAction};
use crate::capabilities::{PlayerControl, RendererConnector, RendererControl};
use crate::errors::CastError;
use crate::media_locator::MediaLocator;
use crate::model::{
    CastMedia, PlaybackState, PlayerStatus, RenderStatus, RendererPlayerState, format_progress,
};
use crate::registry::DeviceRegistry;
use crate::supervisor::Heartbeat;

pub struct SyncEngine<P, C>
where
    P: PlayerControl,
    C: RendererConnector,
{
    player: P,
    connector: C,
    registry: Arc<DeviceRegistry>,
    locator: MediaLocator,
    settings: SyncSettings,
    heartbeat: Heartbeat,
    targets: Option<Receiver<CastTarget>>,
    session: SyncSession<C::Handle>,
    local_unavailable_since: Option<Instant>,
}

fn renderer<H>(session: &mut SyncSession<H>) -> Result<&mut H, CastError> {
    session
        .active
        .as_mut()
        .map(|active| &mut active.handle)
        .ok_or_else(|| CastError::renderer("no active renderer"))
}

impl<P, C> SyncEngine<P, C>
where
    P: PlayerControl,
    C: RendererConnector,
{
    /// Creates an engine whose target renderer is disabled.
    pub fn new(
        player: P,
        connector: C,
        registry: Arc<DeviceRegistry>,
        locator: MediaLocator,
        settings: SyncSettings,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            player,
            connector,
            registry,
            locator,
            settings,
            heartbeat,
            targets: None,
            session: SyncSession::new(CastTarget::disabled()),
            local_unavailable_since: None,
        }
    }

    /// Sets the initial target.
    pub fn with_target(mut self, target: CastTarget) -> Self {
        self.set_target(target);
        self
    }

    /// Channel on which the configuration watcher publishes new targets.
    pub fn with_target_updates(mut self, targets: Receiver<CastTarget>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn session(&self) -> &SyncSession<C::Handle> {
        &self.session
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    fn set_target(&mut self, target: CastTarget) {
        if target != self.session.target {
            info!(
                renderer = %target.renderer,
                mode = %target.mode,
                "Cast target set to [{}]",
                target.renderer
            );
        }
        self.locator.set_mode(target.mode, &target.stream_url);
        self.session.target = target;
    }

    /// Keeps only the newest published target.
    fn apply_target_updates(&mut self) {
        let Some(targets) = &self.targets else {
            return;
        };
        let newest = targets.try_iter().last();
        if let Some(target) = newest {
            self.set_target(target);
        }
    }

    fn complete_tick(&mut self) {
        self.session.touch();
        self.heartbeat.beat();
    }

    /// Runs one synchronization step.
    ///
    /// Only fatal conditions are returned as errors; command failures abort
    /// the tick and are reported as [`TickAction::Aborted`].
    pub fn tick(&mut self) -> Result<TickAction, CastError> {
        self.apply_target_updates();

        let local = match self.player.poll() {
            Ok(state) => {
                self.local_unavailable_since = None;
                state
            }
            Err(e) => {
                let since = *self.local_unavailable_since.get_or_insert_with(Instant::now);
                let down = since.elapsed();
                if down >= self.settings.local_unavailable_timeout {
                    error!(seconds = down.as_secs(), "Local player unreachable: {}", e);
                    return Err(CastError::LocalUnavailable(down.as_secs()));
                }
                warn!("Problem getting local player status: {}", e);
                self.complete_tick();
                return Ok(TickAction::LocalUnavailable);
            }
        };

        let action = match self.reconcile(&local) {
            Ok(action) => action,
            Err(e) => {
                warn!("Command failed, tick aborted: {}", e);
                TickAction::Aborted
            }
        };
        self.complete_tick();
        Ok(action)
    }

    /// Fixed cadence loop. Returns only on a fatal error.
    pub fn run(mut self) -> Result<(), CastError> {
        info!(
            tick_ms = self.settings.tick_interval.as_millis() as u64,
            "Starting synchronization engine"
        );
        loop {
            let started = Instant::now();
            self.tick()?;
            if let Some(rest) = self.settings.tick_interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    fn poll_renderer(&mut self) -> Option<Result<RenderStatus, CastError>> {
        self.session
            .active
            .as_mut()
            .map(|active| active.handle.poll_status())
    }

    fn reconcile(&mut self, local: &PlaybackState) -> Result<TickAction, CastError> {
        debug!(
            status = %local.status,
            volume = ?local.volume_percent,
            track = ?local.track_ref,
            "Local {}",
            format_progress(local.elapsed_secs, local.duration_secs)
        );

        // Renderer status
        let mut render_fresh = false;
        let render = match self.poll_renderer() {
            None => None,
            Some(Ok(status)) => {
                render_fresh = true;
                self.session.failure_count = 0;
                debug!(
                    renderer = self.session.bound_name().unwrap_or_default(),
                    state = ?status.player_state,
                    cast = ?self.session.cast_status,
                    volume = status.volume_percent,
                    "Renderer {}",
                    format_progress(status.elapsed_secs, status.duration_secs.unwrap_or(0))
                );
                self.session.last_render = Some(status.clone());
                Some(status)
            }
            Some(Err(e)) => {
                self.session.failure_count += 1;
                warn!(
                    "Failed to get renderer status.. {}/{}: {}",
                    self.session.failure_count, self.settings.max_failures, e
                );
                if self.session.failure_count >= self.settings.max_failures {
                    info!(
                        "Detected broken renderer after {} failures to get status",
                        self.settings.max_failures
                    );
                    self.session.release();
                    self.session.reset_cast_state();
                    return Ok(TickAction::RendererReset);
                }
                self.session.last_render.clone()
            }
        };

        // Configured renderer change
        if self.session.target_changed() {
            if let Some(mut old) = self.session.release() {
                info!(
                    "Detected renderer change from {} -> {}",
                    old.target.renderer, self.session.target.renderer
                );
                if let Err(e) = old.handle.stop() {
                    debug!("Stop on released renderer failed: {}", e);
                }
                if let Err(e) = old.handle.kill_current_application() {
                    debug!("Quit on released renderer failed: {}", e);
                }
            }
            self.session.cast_status = CastStatus::from(local.status);
            return Ok(TickAction::TargetChanged);
        }

        // Acquisition, never casting in the same tick
        if local.status == PlayerStatus::Playing && !self.session.has_renderer() {
            return Ok(self.acquire());
        }

        if !self.session.has_renderer() {
            return Ok(TickAction::NoRenderer);
        }

        let renderer_elapsed = render.as_ref().map_or(0, |r| r.elapsed_secs);
        let renderer_idle = render
            .as_ref()
            .is_some_and(|r| r.player_state == RendererPlayerState::Idle);

        // Initial cast protection: local stays paused until the renderer
        // reports progress, then resumes one second behind it.
        if !self.session.cast_confirmed
            && local.status == PlayerStatus::Paused
            && self.session.cast_status == CastStatus::Playing
            && !self.session.cast_live
        {
            if renderer_elapsed == 0 {
                info!("Initial cast.. Waiting for renderer elapsed time");
                return Ok(TickAction::AwaitingRenderer);
            }
            info!(
                elapsed = renderer_elapsed,
                "Initial cast.. Resuming local player"
            );
            self.player.seek(renderer_elapsed - 1)?;
            self.player.resume()?;
            self.session.cast_confirmed = true;
            return Ok(TickAction::Confirmed);
        }

        // Volume change only while playing
        if self.session.cast_status == CastStatus::Playing {
            if let Some(volume) = local.volume_percent {
                if self.session.cast_volume != Some(volume) {
                    info!(volume = volume, "Setting renderer volume");
                    renderer(&mut self.session)?.set_volume(f32::from(volume) / 100.0)?;
                    self.session.cast_volume = Some(volume);
                    return Ok(TickAction::Volume);
                }
            }
        }

        if self.session.cast_status != CastStatus::Paused && local.status == PlayerStatus::Paused
        {
            info!("Pausing renderer");
            renderer(&mut self.session)?.pause()?;
            self.session.cast_status = CastStatus::Paused;
            return Ok(TickAction::Paused);
        }

        // A track change while paused must recast, not resume
        if self.session.cast_status == CastStatus::Paused
            && local.status == PlayerStatus::Playing
            && local.track_id == self.session.cast_track_id
        {
            info!("Resuming renderer");
            renderer(&mut self.session)?.play()?;
            self.session.cast_status = CastStatus::Playing;
            return Ok(TickAction::Resumed);
        }

        if self.session.cast_status != CastStatus::Stopped && local.status == PlayerStatus::Stopped
        {
            info!("Stopping renderer");
            // Released only once both commands went through, so a failure
            // is retried on the next tick.
            let handle = renderer(&mut self.session)?;
            handle.stop()?;
            handle.kill_current_application()?;
            self.session.release();
            self.session.cast_status = CastStatus::Stopped;
            self.session.cast_volume = None;
            return Ok(TickAction::Stopped);
        }

        if local.status == PlayerStatus::Playing
            && self.session.cast_status == CastStatus::Playing
            && self.session.cast_live
            && local.track_id != self.session.cast_track_id
            && self.follows_live_cast(local)
        {
            info!(track = ?local.track_id, "Track changed on the live stream already cast");
            self.session.cast_track_id = local.track_id;
            self.session.cast_track_ref = local.track_ref.clone();
            return Ok(TickAction::TrackFollowed);
        }

        if local.status == PlayerStatus::Playing
            && (self.session.cast_status != CastStatus::Playing
                || local.track_id != self.session.cast_track_id
                || (local.elapsed_secs == 0 && renderer_idle))
        {
            self.cast(local)?;
            return Ok(TickAction::Cast);
        }

        let both_playing = local.status == PlayerStatus::Playing
            && self.session.cast_status == CastStatus::Playing;

        // Elapsed-time corrections need a renderer position from this tick
        if !render_fresh {
            return Ok(TickAction::InSync);
        }

        if both_playing
            && !self.session.cast_live
            && self.session.cast_confirmed
            && renderer_elapsed > 0
            && local.elapsed_secs.abs_diff(renderer_elapsed) >= self.settings.drift_threshold_secs
        {
            info!(
                local = local.elapsed_secs,
                renderer = renderer_elapsed,
                "Seeking renderer to local elapsed time"
            );
            renderer(&mut self.session)?.seek(local.elapsed_secs)?;
            return Ok(TickAction::RendererSeek);
        }

        // Keep local one second behind so the renderer drives track ends
        if local.status == PlayerStatus::Playing
            && !self.session.cast_live
            && renderer_elapsed > 0
            && renderer_elapsed.checked_rem(self.settings.resync_period_secs) == Some(0)
            && local.elapsed_secs >= renderer_elapsed
        {
            info!(
                renderer = renderer_elapsed,
                "Syncing local elapsed time to renderer"
            );
            self.player.seek(renderer_elapsed - 1)?;
            return Ok(TickAction::LocalResync);
        }

        Ok(TickAction::InSync)
    }

    fn acquire(&mut self) -> TickAction {
        if self.session.target.is_disabled() {
            return TickAction::NoRenderer;
        }
        let name = self.session.target.renderer.clone();

        let endpoint = match self.registry.resolve(&name) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(renderer = %name, "Cannot acquire renderer: {}", e);
                return TickAction::AcquireFailed;
            }
        };
        let mut handle = match self.connector.connect(&endpoint) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(renderer = %name, "Cannot connect to renderer: {}", e);
                return TickAction::AcquireFailed;
            }
        };

        info!(renderer = %name, "Waiting for renderer to get ready..");
        self.drain(&mut handle);
        self.session.bind(handle);
        TickAction::Acquired
    }

    /// Stops any running application and waits, bounded, for idle.
    fn drain(&self, handle: &mut C::Handle) {
        match handle.is_idle() {
            Ok(true) => return,
            Ok(false) => info!("Killing current running app"),
            Err(e) => warn!("Cannot read renderer status: {}", e),
        }
        if let Err(e) = handle.kill_current_application() {
            warn!("Failed to stop current application: {}", e);
        }

        for _ in 0..self.settings.idle_wait_attempts {
            if let Ok(true) = handle.is_idle() {
                return;
            }
            thread::sleep(self.settings.idle_wait_interval);
        }
        warn!(
            "Renderer still busy after {} checks, proceeding",
            self.settings.idle_wait_attempts
        );
    }

    /// True when `local` resolves to the URL the renderer already streams.
    fn follows_live_cast(&self, local: &PlaybackState) -> bool {
        let track_ref = local.track_ref.as_deref().unwrap_or_default();
        match self.locator.locate_media(track_ref) {
            Ok((url, _)) => self.session.cast_url.as_deref() == Some(url.as_str()),
            Err(_) => false,
        }
    }

    fn cast(&mut self, local: &PlaybackState) -> Result<(), CastError> {
        let mut hinted = local.clone();
        if hinted.artwork_hint.is_none() {
            hinted.artwork_hint = self.player.artwork_hint();
        }
        let (url, content_type, artwork_url) = self.locator.locate_state(&hinted)?;
        let live = self.locator.is_live(local.track_ref.as_deref());

        info!(url = %url, content_type = %content_type, "Casting URL");
        if let Some(artwork) = &artwork_url {
            info!(artwork = %artwork, "Artwork URL");
        }
        let media = CastMedia {
            url: url.clone(),
            content_type,
            title: local.title.clone(),
            artist: local.artist.clone(),
            album: local.album.clone(),
            artwork_url,
            live,
        };

        // Volume first to avoid an audible jump
        if let Some(volume) = local.volume_percent {
            if self.session.cast_volume != Some(volume) {
                renderer(&mut self.session)?.set_volume(f32::from(volume) / 100.0)?;
                self.session.cast_volume = Some(volume);
            }
        }
        renderer(&mut self.session)?.load(&media, true)?;

        // The renderer now plays the new media: record it before touching
        // the local player, whose commands may still fail.
        self.session.cast_status = CastStatus::Playing;
        self.session.cast_track_id = local.track_id;
        self.session.cast_track_ref = local.track_ref.clone();
        self.session.cast_url = Some(url);
        self.session.cast_live = live;
        self.session.cast_confirmed = false;

        if !live {
            info!("Pausing local player");
            self.player.pause()?;
            self.player.seek(0)?;
        }
        Ok(())
    }
}
