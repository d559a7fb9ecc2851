//! Chromecast backend implementation using the rust_cast library.
//!
//! A [`ChromecastRenderer`] keeps one TLS connection open for the lifetime
//! of the handle, together with the receiver session, transport and media
//! session ids obtained when media is loaded. Dropping the handle closes the
//! connection.

use std::sync::Once;

use rust_cast::CastDevice;
use rust_cast::channels::media::{
    Image, Media, Metadata, MusicTrackMediaMetadata, PlayerState, ResumeState, StatusEntry,
    StreamType,
};
use rust_cast::channels::receiver::CastDeviceApp;
use tracing::{debug, info};

use crate::capabilities::{RendererConnector, RendererControl};
use crate::errors::CastError;
use crate::model::{
    CastMedia, ConnectionState, RenderStatus, RendererEndpoint, RendererPlayerState,
};

const DEFAULT_DESTINATION_ID: &str = "receiver-0";

/// Application id of the idle screen ("Backdrop"). A device running only
/// this app is considered idle.
const BACKDROP_APP_ID: &str = "E8C28D3C";

/// Ensures the Rustls CryptoProvider is initialized exactly once.
fn ensure_crypto_provider_initialized() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
    });
}

/// Opens Cast protocol connections to discovered devices.
#[derive(Clone, Debug, Default)]
pub struct ChromecastConnector;

impl ChromecastConnector {
    pub fn new() -> Self {
        Self
    }
}

impl RendererConnector for ChromecastConnector {
    type Handle = ChromecastRenderer;

    fn connect(&self, endpoint: &RendererEndpoint) -> Result<ChromecastRenderer, CastError> {
        ensure_crypto_provider_initialized();

        debug!(
            "Connecting to Chromecast {} at {}:{}",
            endpoint.friendly_name, endpoint.host, endpoint.port
        );

        // Les Chromecast présentent un certificat auto-signé
        let device =
            CastDevice::connect_without_host_verification(endpoint.host.clone(), endpoint.port)
                .map_err(|e| CastError::renderer(format!("Failed to connect: {}", e)))?;

        device
            .connection
            .connect(DEFAULT_DESTINATION_ID.to_string())
            .map_err(|e| CastError::renderer(format!("Failed to open receiver channel: {}", e)))?;
        device
            .heartbeat
            .ping()
            .map_err(|e| CastError::renderer(format!("Initial ping failed: {}", e)))?;

        info!(
            renderer = %endpoint.friendly_name,
            host = %endpoint.host,
            "Connected to Chromecast"
        );

        Ok(ChromecastRenderer {
            name: endpoint.friendly_name.clone(),
            device,
            session: ChromecastSession::default(),
        })
    }
}

/// Ids of the Default Media Receiver session we launched.
#[derive(Debug, Default)]
struct ChromecastSession {
    receiver_session_id: Option<String>,
    transport_id: Option<String>,
    media_session_id: Option<i32>,
}

impl ChromecastSession {
    fn clear(&mut self) {
        self.receiver_session_id = None;
        self.transport_id = None;
        self.media_session_id = None;
    }

    /// Transport and media session ids, when media has been loaded.
    fn media_target(&self) -> Option<(String, i32)> {
        match (&self.transport_id, self.media_session_id) {
            (Some(transport), Some(media_session)) => Some((transport.clone(), media_session)),
            _ => None,
        }
    }
}

/// One connected Chromecast.
pub struct ChromecastRenderer {
    name: String,
    device: CastDevice<'static>,
    session: ChromecastSession,
}

impl ChromecastRenderer {
    pub fn friendly_name(&self) -> &str {
        &self.name
    }

    /// Launches the Default Media Receiver unless we already own a session.
    fn ensure_session(&mut self) -> Result<(String, String), CastError> {
        if let (Some(session), Some(transport)) =
            (&self.session.receiver_session_id, &self.session.transport_id)
        {
            return Ok((session.clone(), transport.clone()));
        }

        debug!("Launching Default Media Receiver app");
        let app = self
            .device
            .receiver
            .launch_app(&CastDeviceApp::DefaultMediaReceiver)
            .map_err(|e| CastError::renderer(format!("Failed to launch app: {}", e)))?;

        self.device
            .connection
            .connect(app.transport_id.clone())
            .map_err(|e| CastError::renderer(format!("Failed to connect to app: {}", e)))?;

        debug!(
            "Launched app with session_id: {}, transport_id: {}",
            app.session_id, app.transport_id
        );
        self.session.receiver_session_id = Some(app.session_id.clone());
        self.session.transport_id = Some(app.transport_id.clone());
        self.session.media_session_id = None;
        Ok((app.session_id, app.transport_id))
    }

    fn remember_entry(&mut self, entry: Option<&StatusEntry>) {
        if let Some(entry) = entry {
            self.session.media_session_id = Some(entry.media_session_id);
        }
    }
}

/// Converts a cast request to the rust_cast media description.
pub fn build_media(media: &CastMedia) -> Media {
    let images = media
        .artwork_url
        .as_ref()
        .map(|url| {
            vec![Image {
                url: url.clone(),
                dimensions: None,
            }]
        })
        .unwrap_or_default();

    let metadata = MusicTrackMediaMetadata {
        title: media.title.clone(),
        artist: media.artist.clone(),
        album_name: media.album.clone(),
        images,
        ..Default::default()
    };

    Media {
        content_id: media.url.clone(),
        content_type: media.content_type.clone(),
        stream_type: if media.live {
            StreamType::Live
        } else {
            StreamType::Buffered
        },
        metadata: Some(Metadata::MusicTrack(metadata)),
        duration: None,
    }
}

fn player_state(state: &PlayerState) -> RendererPlayerState {
    match state {
        PlayerState::Idle => RendererPlayerState::Idle,
        PlayerState::Buffering => RendererPlayerState::Buffering,
        PlayerState::Playing => RendererPlayerState::Playing,
        PlayerState::Paused => RendererPlayerState::Paused,
    }
}

/// Converts the 0.0-1.0 receiver level to a percentage.
fn level_to_percent(level: Option<f32>) -> u8 {
    (level.unwrap_or(0.0).clamp(0.0, 1.0) * 100.0).round() as u8
}

impl RendererControl for ChromecastRenderer {
    fn is_idle(&mut self) -> Result<bool, CastError> {
        let status = self
            .device
            .receiver
            .get_status()
            .map_err(|e| CastError::renderer(format!("Failed to get receiver status: {}", e)))?;
        Ok(status
            .applications
            .iter()
            .all(|app| app.app_id == BACKDROP_APP_ID))
    }

    fn kill_current_application(&mut self) -> Result<(), CastError> {
        let status = self
            .device
            .receiver
            .get_status()
            .map_err(|e| CastError::renderer(format!("Failed to get receiver status: {}", e)))?;

        for app in status
            .applications
            .iter()
            .filter(|app| app.app_id != BACKDROP_APP_ID)
        {
            info!(renderer = %self.name, app = %app.display_name, "Stopping running application");
            self.device
                .receiver
                .stop_app(app.session_id.clone())
                .map_err(|e| CastError::renderer(format!("Failed to stop app: {}", e)))?;
        }
        self.session.clear();
        Ok(())
    }

    fn load(&mut self, media: &CastMedia, autoplay: bool) -> Result<(), CastError> {
        let (session_id, transport_id) = self.ensure_session()?;
        let request = build_media(media);

        debug!(renderer = %self.name, url = %media.url, "Loading media");
        let status = self
            .device
            .media
            .load(transport_id, session_id, &request)
            .map_err(|e| CastError::renderer(format!("Failed to load media: {}", e)))?;
        self.remember_entry(status.entries.first());

        if !autoplay {
            self.pause()?;
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), CastError> {
        let Some((transport, media_session)) = self.session.media_target() else {
            debug!("No media session, ignoring play");
            return Ok(());
        };
        let entry = self
            .device
            .media
            .play(transport, media_session)
            .map_err(|e| CastError::renderer(format!("Failed to play: {}", e)))?;
        self.remember_entry(Some(&entry));
        Ok(())
    }

    fn pause(&mut self) -> Result<(), CastError> {
        let Some((transport, media_session)) = self.session.media_target() else {
            debug!("No media session, ignoring pause");
            return Ok(());
        };
        let entry = self
            .device
            .media
            .pause(transport, media_session)
            .map_err(|e| CastError::renderer(format!("Failed to pause: {}", e)))?;
        self.remember_entry(Some(&entry));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CastError> {
        let Some((transport, media_session)) = self.session.media_target() else {
            debug!("No media session, ignoring stop");
            return Ok(());
        };
        self.device
            .media
            .stop(transport, media_session)
            .map_err(|e| CastError::renderer(format!("Failed to stop: {}", e)))?;
        self.session.media_session_id = None;
        Ok(())
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        let Some((transport, media_session)) = self.session.media_target() else {
            debug!("No media session, ignoring seek");
            return Ok(());
        };
        let entry = self
            .device
            .media
            .seek(
                transport,
                media_session,
                Some(seconds as f32),
                Some(ResumeState::PlaybackStart),
            )
            .map_err(|e| CastError::renderer(format!("Failed to seek: {}", e)))?;
        self.remember_entry(Some(&entry));
        Ok(())
    }

    fn set_volume(&mut self, level: f32) -> Result<(), CastError> {
        self.device
            .receiver
            .set_volume(level.clamp(0.0, 1.0))
            .map_err(|e| CastError::renderer(format!("Failed to set volume: {}", e)))?;
        Ok(())
    }

    fn poll_status(&mut self) -> Result<RenderStatus, CastError> {
        self.device
            .heartbeat
            .ping()
            .map_err(|e| CastError::renderer(format!("Ping failed: {}", e)))?;

        let receiver = self
            .device
            .receiver
            .get_status()
            .map_err(|e| CastError::renderer(format!("Failed to get receiver status: {}", e)))?;
        let volume = level_to_percent(receiver.volume.level);

        // Une autre application a pu prendre la main sur l'appareil
        let still_ours = self.session.receiver_session_id.as_ref().is_some_and(|ours| {
            receiver
                .applications
                .iter()
                .any(|app| &app.session_id == ours)
        });
        if !still_ours {
            self.session.clear();
            return Ok(RenderStatus::idle(volume));
        }

        let Some(transport) = self.session.transport_id.clone() else {
            return Ok(RenderStatus::idle(volume));
        };
        let status = self
            .device
            .media
            .get_status(transport, self.session.media_session_id)
            .map_err(|e| CastError::renderer(format!("Failed to get media status: {}", e)))?;

        let Some(entry) = status.entries.first() else {
            return Ok(RenderStatus::idle(volume));
        };
        self.session.media_session_id = Some(entry.media_session_id);

        let media = entry.media.as_ref();
        Ok(RenderStatus {
            connection: ConnectionState::Ready,
            player_state: player_state(&entry.player_state),
            elapsed_secs: entry.current_time.unwrap_or(0.0).max(0.0) as u32,
            duration_secs: media.and_then(|m| m.duration).map(|d| d.max(0.0) as u32),
            volume_percent: volume,
            cast_track_id: media.map(|m| m.content_id.clone()),
        })
    }
}
