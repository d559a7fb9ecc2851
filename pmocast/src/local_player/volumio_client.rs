use std::time::Duration;

use serde::Deserialize;
use ureq::Agent;

use tracing::debug;

use crate::capabilities::PlayerControl;
use crate::errors::CastError;
use crate::model::{PlaybackState, PlayerStatus};

const STATE_PATH: &str = "/api/v1/getState";
const COMMANDS_PATH: &str = "/api/v1/commands/";

/// Volumio prefix of tracks stored under the music root.
const LIBRARY_PREFIX: &str = "music-library/";

/// Raw response from Volumio getState API
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumioStateRaw {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    position: Option<i64>,
    #[serde(default)]
    uri: Option<String>,
    /// Elapsed time in milliseconds.
    #[serde(default)]
    seek: Option<f64>,
    /// Track length in seconds.
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    volume: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    albumart: Option<String>,
    #[serde(default)]
    track_type: Option<String>,
    #[serde(default)]
    samplerate: Option<String>,
    #[serde(default)]
    bitdepth: Option<String>,
}

pub fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Client for the Volumio REST API.
pub struct VolumioClient {
    base_url: String,
    agent: Agent,
}

impl VolumioClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: build_agent(timeout),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path_and_query: &str) -> Result<String, CastError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| CastError::player(format!("HTTP request to {} failed: {}", url, e)))?;

        response
            .body_mut()
            .read_to_string()
            .map_err(|e| CastError::player(format!("Failed to read Volumio response: {}", e)))
    }

    fn command(&self, query: &str) -> Result<(), CastError> {
        debug!(command = query, "Volumio command");
        self.get(&format!("{}?cmd={}", COMMANDS_PATH, query))
            .map(|_| ())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Volumio paths are relative to its own library root.
fn library_relative(uri: &str) -> String {
    let trimmed = uri.trim().trim_start_matches('/');
    trimmed
        .strip_prefix(LIBRARY_PREFIX)
        .unwrap_or(trimmed)
        .to_string()
}

pub fn parse_volumio_state(body: &str) -> Result<PlaybackState, CastError> {
    let raw: VolumioStateRaw = serde_json::from_str(body)
        .map_err(|e| CastError::player(format!("Failed to parse Volumio state JSON: {}", e)))?;

    let status = match raw.status.as_deref() {
        Some("play") => PlayerStatus::Playing,
        Some("pause") => PlayerStatus::Paused,
        Some("stop") => PlayerStatus::Stopped,
        other => {
            return Err(CastError::player(format!(
                "Missing or unknown Volumio status: {:?}",
                other
            )));
        }
    };

    let track_ref = non_empty(raw.uri).map(|uri| {
        if crate::model::is_remote_uri(&uri) {
            uri
        } else {
            library_relative(&uri)
        }
    });

    let audio_format = match (non_empty(raw.samplerate), non_empty(raw.bitdepth)) {
        (Some(rate), Some(depth)) => Some(format!("{} {}", rate, depth)),
        (Some(rate), None) => Some(rate),
        (None, Some(depth)) => Some(depth),
        (None, None) => non_empty(raw.track_type),
    };

    Ok(PlaybackState {
        status,
        track_ref,
        track_id: raw.position.and_then(|p| u32::try_from(p).ok()),
        elapsed_secs: raw
            .seek
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| (ms / 1000.0) as u32)
            .unwrap_or(0),
        duration_secs: raw
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d as u32)
            .unwrap_or(0),
        volume_percent: raw
            .volume
            .filter(|v| *v >= 0)
            .map(|v| v.min(100) as u8),
        audio_format,
        title: non_empty(raw.title),
        artist: non_empty(raw.artist),
        album: non_empty(raw.album),
        artwork_hint: non_empty(raw.albumart),
    })
}

impl PlayerControl for VolumioClient {
    fn poll(&mut self) -> Result<PlaybackState, CastError> {
        let body = self.get(STATE_PATH)?;
        parse_volumio_state(&body)
    }

    fn pause(&mut self) -> Result<(), CastError> {
        self.command("pause")
    }

    fn resume(&mut self) -> Result<(), CastError> {
        self.command("play")
    }

    fn stop(&mut self) -> Result<(), CastError> {
        self.command("stop")
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        self.command(&format!("seek&position={}", seconds))
    }

    fn next(&mut self) -> Result<(), CastError> {
        self.command("next")
    }

    fn previous(&mut self) -> Result<(), CastError> {
        self.command("prev")
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), CastError> {
        self.command(&format!("volume&volume={}", percent.min(100)))
    }
}
