use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use pmocast::{
    CastError, CastMedia, CastStatus, ConnectionState, DeviceRegistry, Heartbeat, MediaLocator,
    PlaybackState, PlayerControl, PlayerStatus, RenderStatus, RendererConnector, RendererControl,
    RendererEndpoint, RendererPlayerState, SyncEngine, SyncSettings, TickAction,
};
use pmoconfig::{CastMode, CastTarget};

// ------------------------------------------------------------------ fakes

#[derive(Default)]
struct PlayerSide {
    state: Option<PlaybackState>,
    unreachable: bool,
    /// Commands answering with an error, by first word.
    failing: HashSet<&'static str>,
    commands: Vec<String>,
}

#[derive(Clone, Default)]
struct FakePlayer(Rc<RefCell<PlayerSide>>);

impl FakePlayer {
    fn set(&self, update: impl FnOnce(&mut PlaybackState)) {
        let mut side = self.0.borrow_mut();
        let state = side.state.get_or_insert_with(PlaybackState::stopped);
        update(state);
    }

    fn commands(&self) -> Vec<String> {
        self.0.borrow().commands.clone()
    }

    fn status(&self) -> PlayerStatus {
        self.0
            .borrow()
            .state
            .as_ref()
            .map_or(PlayerStatus::Stopped, |s| s.status)
    }

    fn fail(&self, command: &'static str, failing: bool) {
        let failures = &mut self.0.borrow_mut().failing;
        if failing {
            failures.insert(command);
        } else {
            failures.remove(command);
        }
    }

    fn record(
        &mut self,
        command: String,
        update: impl FnOnce(&mut PlaybackState),
    ) -> Result<(), CastError> {
        let mut side = self.0.borrow_mut();
        let name = command.split_whitespace().next().unwrap_or_default();
        if side.failing.contains(name) {
            return Err(CastError::player(format!("{} refused", name)));
        }
        side.commands.push(command);
        if let Some(state) = side.state.as_mut() {
            update(state);
        }
        Ok(())
    }
}

impl PlayerControl for FakePlayer {
    fn poll(&mut self) -> Result<PlaybackState, CastError> {
        let side = self.0.borrow();
        if side.unreachable {
            return Err(CastError::player("connection refused"));
        }
        Ok(side.state.clone().unwrap_or_else(PlaybackState::stopped))
    }

    fn pause(&mut self) -> Result<(), CastError> {
        self.record("pause".into(), |s| s.status = PlayerStatus::Paused)
    }

    fn resume(&mut self) -> Result<(), CastError> {
        self.record("resume".into(), |s| s.status = PlayerStatus::Playing)
    }

    fn stop(&mut self) -> Result<(), CastError> {
        self.record("stop".into(), |s| s.status = PlayerStatus::Stopped)
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        self.record(format!("seek {}", seconds), |s| s.elapsed_secs = seconds)
    }

    fn next(&mut self) -> Result<(), CastError> {
        self.record("next".into(), |_| {})
    }

    fn previous(&mut self) -> Result<(), CastError> {
        self.record("previous".into(), |_| {})
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), CastError> {
        self.record(format!("setvol {}", percent), |s| {
            s.volume_percent = Some(percent)
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Command {
    Kill,
    Load(String),
    Play,
    Pause,
    Stop,
    Seek(u32),
    Volume(u8),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Kill => "kill",
            Command::Load(_) => "load",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Seek(_) => "seek",
            Command::Volume(_) => "volume",
        }
    }
}

struct RendererSide {
    status: RenderStatus,
    busy: bool,
    failing_polls: bool,
    failing: HashSet<&'static str>,
    commands: Vec<(String, Command)>,
    open: u32,
    max_open: u32,
    connects: u32,
}

impl Default for RendererSide {
    fn default() -> Self {
        Self {
            status: RenderStatus::idle(50),
            busy: false,
            failing_polls: false,
            failing: HashSet::new(),
            commands: Vec::new(),
            open: 0,
            max_open: 0,
            connects: 0,
        }
    }
}

#[derive(Clone, Default)]
struct FakeConnector(Rc<RefCell<RendererSide>>);

struct FakeRenderer {
    name: String,
    side: Rc<RefCell<RendererSide>>,
}

impl FakeConnector {
    fn set(&self, update: impl FnOnce(&mut RenderStatus)) {
        update(&mut self.0.borrow_mut().status);
    }

    fn fail(&self, command: &'static str, failing: bool) {
        let failures = &mut self.0.borrow_mut().failing;
        if failing {
            failures.insert(command);
        } else {
            failures.remove(command);
        }
    }

    fn commands(&self) -> Vec<Command> {
        self.0.borrow().commands.iter().map(|(_, c)| c.clone()).collect()
    }

    fn commands_for(&self, name: &str) -> Vec<Command> {
        self.0
            .borrow()
            .commands
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn loads(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Load(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

impl RendererConnector for FakeConnector {
    type Handle = FakeRenderer;

    fn connect(&self, endpoint: &RendererEndpoint) -> Result<FakeRenderer, CastError> {
        let mut side = self.0.borrow_mut();
        side.connects += 1;
        side.open += 1;
        side.max_open = side.max_open.max(side.open);
        side.status.connection = ConnectionState::Ready;
        Ok(FakeRenderer {
            name: endpoint.friendly_name.clone(),
            side: Rc::clone(&self.0),
        })
    }
}

impl Drop for FakeRenderer {
    fn drop(&mut self) {
        self.side.borrow_mut().open -= 1;
    }
}

impl FakeRenderer {
    fn record(&mut self, command: Command) -> Result<(), CastError> {
        let mut side = self.side.borrow_mut();
        if side.failing.contains(command.name()) {
            return Err(CastError::renderer(format!("{} timed out", command.name())));
        }
        side.commands.push((self.name.clone(), command));
        Ok(())
    }
}

impl RendererControl for FakeRenderer {
    fn is_idle(&mut self) -> Result<bool, CastError> {
        Ok(!self.side.borrow().busy)
    }

    fn kill_current_application(&mut self) -> Result<(), CastError> {
        self.record(Command::Kill)?;
        self.side.borrow_mut().busy = false;
        Ok(())
    }

    fn load(&mut self, media: &CastMedia, _autoplay: bool) -> Result<(), CastError> {
        self.record(Command::Load(media.url.clone()))?;
        let mut side = self.side.borrow_mut();
        side.status.player_state = RendererPlayerState::Buffering;
        side.status.elapsed_secs = 0;
        side.status.cast_track_id = Some(media.url.clone());
        Ok(())
    }

    fn play(&mut self) -> Result<(), CastError> {
        self.record(Command::Play)
    }

    fn pause(&mut self) -> Result<(), CastError> {
        self.record(Command::Pause)
    }

    fn stop(&mut self) -> Result<(), CastError> {
        self.record(Command::Stop)
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        self.record(Command::Seek(seconds))
    }

    fn set_volume(&mut self, level: f32) -> Result<(), CastError> {
        self.record(Command::Volume((level * 100.0).round() as u8))
    }

    fn poll_status(&mut self) -> Result<RenderStatus, CastError> {
        let side = self.side.borrow();
        if side.failing_polls {
            return Err(CastError::renderer("timed out"));
        }
        Ok(side.status.clone())
    }
}

// ---------------------------------------------------------------- harness

const BASE_URL: &str = "http://10.0.0.2:8090";

struct Harness {
    engine: SyncEngine<FakePlayer, FakeConnector>,
    player: FakePlayer,
    renderer: FakeConnector,
    registry: Arc<DeviceRegistry>,
    targets: Sender<CastTarget>,
}

fn endpoint(name: &str, host: &str) -> RendererEndpoint {
    RendererEndpoint {
        friendly_name: name.to_string(),
        host: host.to_string(),
        port: 8009,
        uuid: format!("uuid-{}", name),
        model: Some("Chromecast Audio".to_string()),
    }
}

fn harness_with(settings: SyncSettings, target: &str) -> Harness {
    let player = FakePlayer::default();
    let renderer = FakeConnector::default();
    let registry = Arc::new(DeviceRegistry::new());
    registry.refresh(vec![
        endpoint("Den", "10.0.0.5"),
        endpoint("Kitchen", "10.0.0.6"),
    ]);
    let (targets, updates) = unbounded();

    let engine = SyncEngine::new(
        player.clone(),
        renderer.clone(),
        Arc::clone(&registry),
        MediaLocator::new(BASE_URL, "/music", "/nonexistent-music-root"),
        settings,
        Heartbeat::new(),
    )
    .with_target(CastTarget::named(target))
    .with_target_updates(updates);

    Harness {
        engine,
        player,
        renderer,
        registry,
        targets,
    }
}

fn test_settings() -> SyncSettings {
    SyncSettings {
        idle_wait_interval: Duration::ZERO,
        ..SyncSettings::default()
    }
}

fn harness() -> Harness {
    harness_with(test_settings(), "Den")
}

fn play_track(player: &FakePlayer, track: &str, id: u32, elapsed: u32) {
    player.set(|s| {
        s.status = PlayerStatus::Playing;
        s.track_ref = Some(track.to_string());
        s.track_id = Some(id);
        s.elapsed_secs = elapsed;
        s.duration_secs = 300;
        s.title = Some(format!("Track {}", id));
    });
}

impl Harness {
    fn tick(&mut self) -> TickAction {
        self.engine.tick().unwrap()
    }

    /// Acquires, casts and confirms `album/track1.flac`.
    fn confirmed_playback(&mut self) {
        play_track(&self.player, "album/track1.flac", 5, 0);
        assert_eq!(self.tick(), TickAction::Acquired);
        assert_eq!(self.tick(), TickAction::Cast);
        self.renderer.set(|r| {
            r.player_state = RendererPlayerState::Playing;
            r.elapsed_secs = 2;
        });
        assert_eq!(self.tick(), TickAction::Confirmed);
    }
}

// -------------------------------------------------------------- scenarios

#[test]
fn test_acquire_then_cast_pauses_local() {
    let mut h = harness();
    play_track(&h.player, "album/track1.flac", 5, 0);

    assert_eq!(h.tick(), TickAction::Acquired);
    assert!(h.renderer.commands().is_empty(), "no cast in the acquisition tick");
    assert_eq!(h.engine.session().cast_status, CastStatus::None);

    assert_eq!(h.tick(), TickAction::Cast);
    assert_eq!(
        h.renderer.loads(),
        vec![format!("{}/music/album/track1.flac", BASE_URL)]
    );
    assert_eq!(h.player.commands(), vec!["pause", "seek 0"]);
    assert_eq!(h.player.status(), PlayerStatus::Paused);
    assert_eq!(h.engine.session().cast_track_id, Some(5));
    assert!(!h.engine.session().cast_confirmed);
}

#[test]
fn test_busy_renderer_is_drained_before_use() {
    let mut h = harness();
    h.renderer.0.borrow_mut().busy = true;
    play_track(&h.player, "album/track1.flac", 5, 0);

    assert_eq!(h.tick(), TickAction::Acquired);
    assert_eq!(h.renderer.commands(), vec![Command::Kill]);
}

#[test]
fn test_settle_resumes_local_behind_renderer() {
    let mut h = harness();
    play_track(&h.player, "album/track1.flac", 5, 0);
    h.tick();
    h.tick();

    h.renderer.set(|r| r.player_state = RendererPlayerState::Playing);
    assert_eq!(h.tick(), TickAction::AwaitingRenderer);

    h.renderer.set(|r| r.elapsed_secs = 12);
    h.player.set(|s| s.elapsed_secs = 1);
    assert_eq!(h.tick(), TickAction::Confirmed);

    let commands = h.player.commands();
    assert_eq!(&commands[commands.len() - 2..], ["seek 11", "resume"]);
    assert!(h.engine.session().cast_confirmed);
    assert_eq!(h.player.status(), PlayerStatus::Playing);
}

#[test]
fn test_drift_seeks_renderer() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.elapsed_secs = 50);
    h.renderer.set(|r| r.elapsed_secs = 38);
    assert_eq!(h.tick(), TickAction::RendererSeek);
    assert_eq!(h.renderer.commands().last(), Some(&Command::Seek(50)));
    assert!(h.engine.session().cast_confirmed);
}

#[test]
fn test_periodic_resync_keeps_local_behind() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.elapsed_secs = 45);
    h.renderer.set(|r| r.elapsed_secs = 40);
    assert_eq!(h.tick(), TickAction::LocalResync);
    assert_eq!(h.player.commands().last().map(String::as_str), Some("seek 39"));

    h.renderer.set(|r| r.elapsed_secs = 41);
    assert_eq!(h.tick(), TickAction::InSync);
}

#[test]
fn test_no_drift_correction_before_confirmation() {
    let mut h = harness();
    play_track(&h.player, "album/track1.flac", 5, 0);
    h.tick();
    h.tick();

    // Local resumed by hand before the renderer reported progress
    play_track(&h.player, "album/track1.flac", 5, 50);
    h.renderer.set(|r| {
        r.player_state = RendererPlayerState::Playing;
        r.elapsed_secs = 23;
    });
    for _ in 0..3 {
        assert_ne!(h.tick(), TickAction::RendererSeek);
    }
    assert!(!h.renderer.commands().iter().any(|c| matches!(c, Command::Seek(_))));
}

#[test]
fn test_repeated_poll_failures_reset_renderer() {
    let mut h = harness();
    play_track(&h.player, "album/track1.flac", 5, 0);
    assert_eq!(h.tick(), TickAction::Acquired);
    h.renderer.0.borrow_mut().failing_polls = true;

    for _ in 1..20 {
        assert_ne!(h.tick(), TickAction::RendererReset);
        assert!(h.engine.session().has_renderer());
    }
    assert_eq!(h.tick(), TickAction::RendererReset);
    assert!(!h.engine.session().has_renderer());
    assert_eq!(h.engine.session().cast_status, CastStatus::None);
    assert_eq!(h.engine.session().cast_volume, None);
    assert_eq!(h.renderer.0.borrow().open, 0);
}

#[test]
fn test_successful_poll_resets_failure_count() {
    let mut h = harness();
    h.confirmed_playback();

    h.renderer.0.borrow_mut().failing_polls = true;
    for _ in 0..10 {
        h.tick();
    }
    assert_eq!(h.engine.session().failure_count, 10);
    h.renderer.0.borrow_mut().failing_polls = false;
    h.tick();
    assert_eq!(h.engine.session().failure_count, 0);
}

#[test]
fn test_stop_is_idempotent() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.status = PlayerStatus::Stopped);
    assert_eq!(h.tick(), TickAction::Stopped);
    let after_stop = h.renderer.commands();
    assert_eq!(&after_stop[after_stop.len() - 2..], [Command::Stop, Command::Kill]);
    assert!(!h.engine.session().has_renderer());

    for _ in 0..5 {
        assert_eq!(h.tick(), TickAction::NoRenderer);
    }
    assert_eq!(h.renderer.commands(), after_stop);
}

#[test]
fn test_target_changes_keep_a_single_handle() {
    let mut h = harness();
    h.confirmed_playback();

    h.targets.send(CastTarget::named("Kitchen")).unwrap();
    assert_eq!(h.tick(), TickAction::TargetChanged);
    let released = h.renderer.commands_for("Den");
    assert_eq!(&released[released.len() - 2..], [Command::Stop, Command::Kill]);
    assert!(h.renderer.commands_for("Kitchen").is_empty());
    assert_eq!(h.tick(), TickAction::Acquired);
    assert_eq!(h.engine.session().bound_name(), Some("Kitchen"));

    // Several updates between two ticks: only the newest counts
    h.targets.send(CastTarget::named("Den")).unwrap();
    h.targets.send(CastTarget::named("Kitchen")).unwrap();
    h.targets.send(CastTarget::named("Den")).unwrap();
    assert_eq!(h.tick(), TickAction::TargetChanged);
    assert_eq!(h.tick(), TickAction::Acquired);
    assert_eq!(h.engine.session().bound_name(), Some("Den"));

    let side = h.renderer.0.borrow();
    assert_eq!(side.connects, 3);
    assert_eq!(side.max_open, 1);
    assert_eq!(side.open, 1);
}

#[test]
fn test_disabling_target_releases_and_never_acquires() {
    let mut h = harness();
    h.confirmed_playback();

    h.targets.send(CastTarget::disabled()).unwrap();
    assert_eq!(h.tick(), TickAction::TargetChanged);
    for _ in 0..3 {
        assert_eq!(h.tick(), TickAction::NoRenderer);
    }
    assert_eq!(h.renderer.0.borrow().connects, 1);
    assert_eq!(h.renderer.0.borrow().open, 0);
}

#[test]
fn test_disabled_target_never_acquires() {
    let mut h = harness_with(test_settings(), "off");
    play_track(&h.player, "album/track1.flac", 5, 0);
    for _ in 0..3 {
        assert_eq!(h.tick(), TickAction::NoRenderer);
    }
    assert_eq!(h.renderer.0.borrow().connects, 0);
}

#[test]
fn test_unknown_renderer_retries_until_discovered() {
    let mut h = harness_with(test_settings(), "Office");
    play_track(&h.player, "album/track1.flac", 5, 0);
    assert_eq!(h.tick(), TickAction::AcquireFailed);
    assert_eq!(h.tick(), TickAction::AcquireFailed);

    h.registry.refresh(vec![endpoint("Office", "10.0.0.7")]);
    assert_eq!(h.tick(), TickAction::Acquired);
}

#[test]
fn test_volume_converges_once() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| {
        s.volume_percent = Some(40);
        s.elapsed_secs = 2;
    });
    h.renderer.set(|r| r.elapsed_secs = 3);
    assert_eq!(h.tick(), TickAction::Volume);
    assert_eq!(h.engine.session().cast_volume, Some(40));

    let volume_commands = |h: &Harness| {
        h.renderer
            .commands()
            .into_iter()
            .filter(|c| matches!(c, Command::Volume(_)))
            .count()
    };
    assert_eq!(volume_commands(&h), 1);
    assert_eq!(h.renderer.commands().last(), Some(&Command::Volume(40)));

    for _ in 0..3 {
        h.tick();
    }
    assert_eq!(volume_commands(&h), 1);
}

#[test]
fn test_unknown_volume_is_left_alone() {
    let mut h = harness();
    h.confirmed_playback();
    h.player.set(|s| s.volume_percent = None);
    h.renderer.set(|r| r.elapsed_secs = 3);
    h.tick();
    assert!(!h.renderer.commands().iter().any(|c| matches!(c, Command::Volume(_))));
}

#[test]
fn test_track_change_recasts_once() {
    let mut h = harness();
    h.confirmed_playback();
    let loads_before = h.renderer.loads().len();

    play_track(&h.player, "album/track2.flac", 6, 0);
    h.renderer.set(|r| r.elapsed_secs = 240);
    assert_eq!(h.tick(), TickAction::Cast);

    let loads = h.renderer.loads();
    assert_eq!(loads.len(), loads_before + 1);
    assert_eq!(
        loads.last().map(String::as_str),
        Some("http://10.0.0.2:8090/music/album/track2.flac")
    );
    let commands = h.player.commands();
    assert_eq!(&commands[commands.len() - 2..], ["pause", "seek 0"]);
    assert!(!h.engine.session().cast_confirmed);
    assert_eq!(h.engine.session().cast_track_id, Some(6));
}

#[test]
fn test_track_change_while_paused_recasts() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.status = PlayerStatus::Paused);
    assert_eq!(h.tick(), TickAction::Paused);
    assert_eq!(h.renderer.commands().last(), Some(&Command::Pause));

    play_track(&h.player, "album/track2.flac", 6, 0);
    assert_eq!(h.tick(), TickAction::Cast);
    assert!(!h.renderer.commands().contains(&Command::Play));
}

#[test]
fn test_pause_then_resume_same_track() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.status = PlayerStatus::Paused);
    assert_eq!(h.tick(), TickAction::Paused);
    h.player.set(|s| s.status = PlayerStatus::Playing);
    assert_eq!(h.tick(), TickAction::Resumed);
    assert_eq!(h.renderer.commands().last(), Some(&Command::Play));
}

#[test]
fn test_repeat_same_track_recasts_when_renderer_idle() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.elapsed_secs = 0);
    h.renderer.set(|r| {
        r.player_state = RendererPlayerState::Idle;
        r.elapsed_secs = 0;
    });
    assert_eq!(h.tick(), TickAction::Cast);
}

#[test]
fn test_radio_is_exempt_from_clock_chasing() {
    let mut h = harness();
    play_track(&h.player, "http://radio.example/jazz", 9, 0);
    assert_eq!(h.tick(), TickAction::Acquired);
    assert_eq!(h.tick(), TickAction::Cast);
    assert_eq!(h.renderer.loads(), vec!["http://radio.example/jazz".to_string()]);
    assert!(h.player.commands().is_empty(), "local keeps playing a stream");
    assert!(h.engine.session().cast_live);

    h.renderer.set(|r| {
        r.player_state = RendererPlayerState::Playing;
        r.elapsed_secs = 40;
    });
    h.player.set(|s| s.elapsed_secs = 75);
    assert_eq!(h.tick(), TickAction::InSync);
    assert!(h.player.commands().is_empty());
    assert!(!h.renderer.commands().iter().any(|c| matches!(c, Command::Seek(_))));
}

#[test]
fn test_stream_mode_follows_track_changes_without_recasting() {
    let mut h = harness();
    h.targets
        .send(CastTarget {
            renderer: "Den".to_string(),
            mode: CastMode::Stream,
            stream_url: "http://10.0.0.2:8000/mpd.mp3".to_string(),
        })
        .unwrap();
    play_track(&h.player, "album/track1.flac", 5, 0);
    assert_eq!(h.tick(), TickAction::Acquired);
    assert_eq!(h.tick(), TickAction::Cast);
    assert!(h.engine.session().cast_live);

    play_track(&h.player, "album/track2.flac", 6, 0);
    h.renderer.set(|r| {
        r.player_state = RendererPlayerState::Playing;
        r.elapsed_secs = 180;
    });
    assert_eq!(h.tick(), TickAction::TrackFollowed);
    assert_eq!(h.engine.session().cast_track_id, Some(6));
    assert_eq!(
        h.engine.session().cast_track_ref.as_deref(),
        Some("album/track2.flac")
    );
    assert_eq!(h.tick(), TickAction::InSync);

    assert_eq!(h.renderer.loads(), vec!["http://10.0.0.2:8000/mpd.mp3".to_string()]);
    assert!(h.player.commands().is_empty());
}

#[test]
fn test_new_radio_station_is_recast() {
    let mut h = harness();
    play_track(&h.player, "http://radio.example/jazz", 9, 0);
    h.tick();
    h.tick();

    play_track(&h.player, "http://radio.example/blues", 10, 0);
    assert_eq!(h.tick(), TickAction::Cast);
    assert_eq!(h.renderer.loads().len(), 2);
}

// ------------------------------------------------------- failing commands

#[test]
fn test_failed_load_keeps_cast_state_and_retries() {
    let mut h = harness();
    play_track(&h.player, "album/track1.flac", 5, 0);
    assert_eq!(h.tick(), TickAction::Acquired);

    h.renderer.fail("load", true);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert_eq!(h.engine.session().cast_status, CastStatus::None);
    assert_eq!(h.engine.session().cast_track_id, None);
    assert!(h.player.commands().is_empty(), "local untouched when nothing was cast");
    assert_eq!(h.player.status(), PlayerStatus::Playing);

    h.renderer.fail("load", false);
    assert_eq!(h.tick(), TickAction::Cast);
    assert_eq!(h.renderer.loads().len(), 1);
    assert_eq!(h.engine.session().cast_track_id, Some(5));
}

#[test]
fn test_failed_local_pause_leaves_cast_unconfirmed() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.fail("pause", true);
    play_track(&h.player, "album/track2.flac", 6, 0);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert_eq!(
        h.renderer.loads().last().map(String::as_str),
        Some("http://10.0.0.2:8090/music/album/track2.flac")
    );
    assert_eq!(h.engine.session().cast_track_id, Some(6));
    assert!(!h.engine.session().cast_confirmed);

    // The old track's confirmation must not license a seek on the new one
    h.player.fail("pause", false);
    h.player.set(|s| s.elapsed_secs = 15);
    h.renderer.set(|r| {
        r.player_state = RendererPlayerState::Playing;
        r.elapsed_secs = 2;
    });
    assert_ne!(h.tick(), TickAction::RendererSeek);
    assert!(!h.renderer.commands().iter().any(|c| matches!(c, Command::Seek(_))));
    assert_eq!(h.renderer.loads().len(), 2);
}

#[test]
fn test_failed_stop_keeps_handle_for_retry() {
    let mut h = harness();
    h.confirmed_playback();

    h.renderer.fail("stop", true);
    h.player.set(|s| s.status = PlayerStatus::Stopped);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert!(h.engine.session().has_renderer());
    assert_eq!(h.engine.session().cast_status, CastStatus::Playing);
    assert_eq!(h.renderer.0.borrow().open, 1);

    h.renderer.fail("stop", false);
    assert_eq!(h.tick(), TickAction::Stopped);
    let commands = h.renderer.commands();
    assert_eq!(&commands[commands.len() - 2..], [Command::Stop, Command::Kill]);
    assert!(!h.engine.session().has_renderer());
    assert_eq!(h.renderer.0.borrow().open, 0);
}

#[test]
fn test_failed_kill_keeps_handle_for_retry() {
    let mut h = harness();
    h.confirmed_playback();

    h.renderer.fail("kill", true);
    h.player.set(|s| s.status = PlayerStatus::Stopped);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert!(h.engine.session().has_renderer());

    h.renderer.fail("kill", false);
    assert_eq!(h.tick(), TickAction::Stopped);
    assert!(!h.engine.session().has_renderer());
}

#[test]
fn test_failed_renderer_pause_is_retried() {
    let mut h = harness();
    h.confirmed_playback();

    h.renderer.fail("pause", true);
    h.player.set(|s| s.status = PlayerStatus::Paused);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert_eq!(h.engine.session().cast_status, CastStatus::Playing);

    h.renderer.fail("pause", false);
    assert_eq!(h.tick(), TickAction::Paused);
    assert_eq!(h.engine.session().cast_status, CastStatus::Paused);
    assert_eq!(h.renderer.commands().last(), Some(&Command::Pause));
}

#[test]
fn test_failed_volume_is_retried() {
    let mut h = harness();
    h.confirmed_playback();

    h.renderer.fail("volume", true);
    h.player.set(|s| s.volume_percent = Some(40));
    h.renderer.set(|r| r.elapsed_secs = 3);
    assert_eq!(h.tick(), TickAction::Aborted);
    assert_eq!(h.engine.session().cast_volume, None);

    h.renderer.fail("volume", false);
    assert_eq!(h.tick(), TickAction::Volume);
    assert_eq!(h.engine.session().cast_volume, Some(40));
    assert_eq!(h.renderer.commands().last(), Some(&Command::Volume(40)));
}

#[test]
fn test_no_correction_from_a_stale_renderer_position() {
    let mut h = harness();
    h.confirmed_playback();

    h.player.set(|s| s.elapsed_secs = 41);
    h.renderer.set(|r| r.elapsed_secs = 41);
    assert_eq!(h.tick(), TickAction::InSync);
    let player_commands = h.player.commands();

    // Renderer stops answering while local moves on
    h.renderer.0.borrow_mut().failing_polls = true;
    h.player.set(|s| s.elapsed_secs = 60);
    for _ in 0..3 {
        assert_eq!(h.tick(), TickAction::InSync);
    }
    assert!(!h.renderer.commands().iter().any(|c| matches!(c, Command::Seek(_))));
    assert_eq!(h.player.commands(), player_commands);

    h.renderer.0.borrow_mut().failing_polls = false;
    h.renderer.set(|r| r.elapsed_secs = 43);
    assert_eq!(h.tick(), TickAction::RendererSeek);
}

#[test]
fn test_local_unavailable_is_skipped_then_fatal() {
    let mut h = harness();
    h.confirmed_playback();
    let commands = h.renderer.commands();

    h.player.0.borrow_mut().unreachable = true;
    assert_eq!(h.tick(), TickAction::LocalUnavailable);
    assert!(h.engine.session().has_renderer());
    assert_eq!(h.renderer.commands(), commands);

    let mut strict = harness_with(
        SyncSettings {
            local_unavailable_timeout: Duration::ZERO,
            ..test_settings()
        },
        "Den",
    );
    strict.player.0.borrow_mut().unreachable = true;
    let err = strict.engine.tick().unwrap_err();
    assert!(matches!(err, CastError::LocalUnavailable(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_heartbeat_beats_every_tick() {
    let player = FakePlayer::default();
    let heartbeat = Heartbeat::new();
    let mut engine = SyncEngine::new(
        player,
        FakeConnector::default(),
        Arc::new(DeviceRegistry::new()),
        MediaLocator::new(BASE_URL, "/music", "/nonexistent-music-root"),
        test_settings(),
        heartbeat.clone(),
    );
    let before = heartbeat.last_beat_millis();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(engine.tick().unwrap(), TickAction::NoRenderer);
    assert!(heartbeat.last_beat_millis() > before);
    assert!(engine.session().last_activity.is_some());
}
