//! Maps player track references to URLs the renderer can fetch.
//!
//! Local tracks are served by the built-in static file server under
//! `{base_url}{route}/`; radio and remote streams are passed through.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use pmoconfig::{CastMode, Config};
use tracing::{debug, warn};

use crate::artwork::ArtworkExtractor;
use crate::errors::CastError;
use crate::model::{PlaybackState, is_remote_uri};

/// Characters escaped in a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Cover files looked up next to a track, in order.
pub const COVER_FILES: [&str; 5] = [
    "cover.png",
    "cover.jpg",
    "cover.tiff",
    "cover.bmp",
    "cover.gif",
];

const FALLBACK_STREAM_MIME: &str = "audio/mpeg";

#[derive(Clone, Debug)]
pub struct MediaLocator {
    base_url: String,
    route: String,
    music_root: PathBuf,
    mode: CastMode,
    stream_url: String,
    player_web_base: Option<String>,
    extracted: Option<(ArtworkExtractor, String)>,
}

fn normalize_route(route: &str) -> String {
    let route = format!("/{}", route.trim_matches('/'));
    if route == "/" {
        String::new()
    } else {
        route
    }
}

impl MediaLocator {
    pub fn new(base_url: &str, route: &str, music_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            route: normalize_route(route),
            music_root: music_root.into(),
            mode: CastMode::Direct,
            stream_url: String::new(),
            player_web_base: None,
            extracted: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let extractor = ArtworkExtractor::new(config.get_media_root(), config.get_artwork_root());
        Self::new(
            &config.get_base_url(),
            &config.get_media_route(),
            config.get_media_root(),
        )
        .with_mode(config.get_cast_mode(), &config.get_stream_url())
        .with_extracted_artwork(extractor, &config.get_artwork_route())
    }

    /// Covers embedded in audio tags, served under `route`.
    pub fn with_extracted_artwork(mut self, extractor: ArtworkExtractor, route: &str) -> Self {
        self.extracted = Some((extractor, normalize_route(route)));
        self
    }

    /// In stream mode every track is cast as `stream_url`.
    pub fn with_mode(mut self, mode: CastMode, stream_url: &str) -> Self {
        self.mode = mode;
        self.stream_url = stream_url.to_string();
        self
    }

    /// Web root used to resolve absolute artwork paths reported by the player.
    pub fn with_player_web_base(mut self, base: &str) -> Self {
        self.player_web_base = Some(base.trim_end_matches('/').to_string());
        self
    }

    pub fn set_mode(&mut self, mode: CastMode, stream_url: &str) {
        self.mode = mode;
        self.stream_url = stream_url.to_string();
    }

    /// True when the renderer plays a live stream rather than the file the
    /// player is reading, so elapsed times cannot be compared.
    pub fn is_live(&self, track_ref: Option<&str>) -> bool {
        self.mode == CastMode::Stream || track_ref.is_some_and(is_remote_uri)
    }

    /// Returns the URL and MIME type to cast for `track_ref`.
    pub fn locate_media(&self, track_ref: &str) -> Result<(String, String), CastError> {
        if self.mode == CastMode::Stream {
            if self.stream_url.is_empty() {
                return Err(CastError::Media(
                    "stream mode selected but no stream url configured".to_string(),
                ));
            }
            let mime = mime_for(&self.stream_url).unwrap_or(FALLBACK_STREAM_MIME);
            return Ok((self.stream_url.clone(), mime.to_string()));
        }

        if is_remote_uri(track_ref) {
            let mime = mime_for(track_ref).unwrap_or(FALLBACK_STREAM_MIME);
            return Ok((track_ref.trim().to_string(), mime.to_string()));
        }

        let relative = track_ref.trim_start_matches('/');
        if relative.is_empty() {
            return Err(CastError::Media("empty track reference".to_string()));
        }
        let mime = mime_for(relative)
            .map(str::to_string)
            .unwrap_or_else(|| format!("audio/{}", extension(relative).unwrap_or_default()));

        Ok((self.file_url(&self.route, relative), mime))
    }

    /// First cover file found in the track's directory, else a cover
    /// extracted from its tags, else the player's own artwork hint.
    pub fn locate_artwork(&self, track_ref: &str, hint: Option<&str>) -> Option<String> {
        if !is_remote_uri(track_ref) {
            let relative = track_ref.trim_start_matches('/');
            let directory = Path::new(relative).parent().unwrap_or(Path::new(""));
            for cover in COVER_FILES {
                let candidate = directory.join(cover);
                if self.music_root.join(&candidate).is_file() {
                    debug!(cover = %candidate.display(), "Found artwork");
                    return Some(self.file_url(&self.route, &candidate.to_string_lossy()));
                }
            }

            if let Some((extractor, route)) = &self.extracted {
                match extractor.extract_directory(directory) {
                    Ok(Some(cover)) => {
                        return Some(self.file_url(route, &cover.to_string_lossy()));
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Artwork extraction failed: {}", e),
                }
            }
        }

        let hint = hint.map(str::trim).filter(|h| !h.is_empty())?;
        if is_remote_uri(hint) {
            Some(hint.to_string())
        } else if hint.starts_with('/') {
            self.player_web_base
                .as_ref()
                .map(|base| format!("{}{}", base, hint))
        } else {
            None
        }
    }

    /// Locates media and artwork for a polled player state.
    pub fn locate_state(
        &self,
        state: &PlaybackState,
    ) -> Result<(String, String, Option<String>), CastError> {
        let track_ref = state.track_ref.as_deref().unwrap_or_default();
        let (url, mime) = self.locate_media(track_ref)?;
        let artwork = self.locate_artwork(track_ref, state.artwork_hint.as_deref());
        Ok((url, mime, artwork))
    }

    fn file_url(&self, route: &str, relative: &str) -> String {
        let encoded: Vec<String> = relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}{}/{}", self.base_url, route, encoded.join("/"))
    }
}

fn extension(path: &str) -> Option<String> {
    let name = path.split(['?', '#']).next().unwrap_or(path);
    let name = name.rsplit('/').next().unwrap_or(name);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// MIME type for a file name or URL, from its extension.
pub fn mime_for(path: &str) -> Option<&'static str> {
    let mime = match extension(path)?.as_str() {
        "flac" => "audio/flac",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "wav" => "audio/wav",
        "aif" | "aiff" => "audio/aiff",
        "dsf" => "audio/x-dsf",
        _ => return None,
    };
    Some(mime)
}
