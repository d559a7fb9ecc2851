use std::fmt;

/// Transport state of the local player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerStatus {
    Stopped,
    Paused,
    Playing,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayerStatus::Stopped => "stop",
            PlayerStatus::Paused => "pause",
            PlayerStatus::Playing => "play",
        })
    }
}

/// Snapshot of the local player, replaced wholesale on every poll.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub status: PlayerStatus,
    /// Player-side reference of the current track: a path relative to the
    /// music root, or an absolute URL for radio/streams.
    pub track_ref: Option<String>,
    pub track_id: Option<u32>,
    pub elapsed_secs: u32,
    pub duration_secs: u32,
    /// 0-100, `None` when the player reports no mixer.
    pub volume_percent: Option<u8>,
    pub audio_format: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Artwork path or URL suggested by the player itself.
    pub artwork_hint: Option<String>,
}

impl PlaybackState {
    pub fn stopped() -> Self {
        Self {
            status: PlayerStatus::Stopped,
            track_ref: None,
            track_id: None,
            elapsed_secs: 0,
            duration_secs: 0,
            volume_percent: None,
            audio_format: None,
            title: None,
            artist: None,
            album: None,
            artwork_hint: None,
        }
    }

    /// True when the current track is a radio or remote stream.
    pub fn is_stream(&self) -> bool {
        self.track_ref.as_deref().is_some_and(is_remote_uri)
    }
}

/// True for absolute `http(s)` URIs.
pub fn is_remote_uri(uri: &str) -> bool {
    let lower = uri.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendererPlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// Status reported by the remote renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderStatus {
    pub connection: ConnectionState,
    pub player_state: RendererPlayerState,
    pub elapsed_secs: u32,
    pub duration_secs: Option<u32>,
    pub volume_percent: u8,
    /// Content id of what the renderer was last told to play.
    pub cast_track_id: Option<String>,
}

impl RenderStatus {
    /// Status of a connected renderer that has nothing loaded.
    pub fn idle(volume_percent: u8) -> Self {
        Self {
            connection: ConnectionState::Ready,
            player_state: RendererPlayerState::Idle,
            elapsed_secs: 0,
            duration_secs: None,
            volume_percent,
            cast_track_id: None,
        }
    }
}

/// A reachable renderer as seen by discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererEndpoint {
    pub friendly_name: String,
    pub host: String,
    pub port: u16,
    pub uuid: String,
    pub model: Option<String>,
}

/// Everything the renderer needs to start playing a track.
#[derive(Clone, Debug, PartialEq)]
pub struct CastMedia {
    pub url: String,
    pub content_type: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    pub live: bool,
}

/// Formats `elapsed/duration [pct%]` the way the status lines are logged.
pub fn format_progress(elapsed: u32, duration: u32) -> String {
    let progress = if duration > 0 {
        (u64::from(elapsed) * 100 / u64::from(duration)).min(100)
    } else {
        0
    };
    format!(
        "{}:{:02}/{}:{:02} [{:02}%]",
        elapsed / 60,
        elapsed % 60,
        duration / 60,
        duration % 60,
        progress
    )
}
