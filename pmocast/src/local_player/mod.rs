//! Local player backends.
//!
//! The set of supported players is closed, so they are dispatched through
//! the [`LocalPlayer`] enum rather than trait objects.

pub mod moode_client;
pub mod mpd_client;
pub mod volumio_client;

use std::time::Duration;

use pmoconfig::{Config, url_host};
use tracing::info;

pub use moode_client::MoodeClient;
pub use mpd_client::MpdClient;
pub use volumio_client::VolumioClient;

use crate::capabilities::PlayerControl;
use crate::errors::CastError;
use crate::model::PlaybackState;

/// Port of the moOde web UI, which also serves its cover art.
const MOODE_ART_PORT: u16 = 80;
/// Port Volumio serves `albumart` paths on.
const VOLUMIO_ART_PORT: u16 = 3001;

fn player_kind(config: &Config) -> String {
    config.get_player_kind().trim().to_ascii_lowercase()
}

pub enum LocalPlayer {
    Mpd(MpdClient),
    Volumio(VolumioClient),
}

impl LocalPlayer {
    /// Builds the player selected by `player.kind`.
    pub fn from_config(config: &Config) -> Result<Self, CastError> {
        let timeout = Duration::from_secs(config.get_player_timeout_secs().max(1));
        let kind = player_kind(config);

        match kind.as_str() {
            "mpd" => {
                let host = config.get_player_host();
                let port = config.get_player_port();
                info!(host = %host, port = port, "Using MPD player");
                Ok(LocalPlayer::Mpd(MpdClient::new(&host, port, timeout)))
            }
            "moode" => {
                let host = config.get_player_host();
                let port = config.get_player_port();
                let moode = MoodeClient::new(&config.get_moode_url(), timeout);
                info!(host = %host, port = port, web = %moode.base_url(), "Using moOde player");
                Ok(LocalPlayer::Mpd(
                    MpdClient::new(&host, port, timeout).with_cover_source(moode),
                ))
            }
            "volumio" => {
                let url = config.get_volumio_url();
                info!(url = %url, "Using Volumio player");
                Ok(LocalPlayer::Volumio(VolumioClient::new(&url, timeout)))
            }
            other => Err(CastError::player(format!("Unknown player kind '{}'", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LocalPlayer::Mpd(client) if client.has_cover_source() => "moode",
            LocalPlayer::Mpd(_) => "mpd",
            LocalPlayer::Volumio(_) => "volumio",
        }
    }
}

/// Web root the renderer fetches the player's own artwork paths from.
///
/// `player.art_url` wins. Otherwise the player's host on its artwork port,
/// where a loopback host is replaced by this machine's address since the
/// renderer cannot reach `localhost`.
pub fn player_artwork_base(config: &Config) -> Option<String> {
    let configured = config.get_player_art_url();
    let configured = configured.trim().trim_end_matches('/');
    if !configured.is_empty() {
        return Some(configured.to_string());
    }

    let (host, default_port) = match player_kind(config).as_str() {
        "moode" => (url_host(&config.get_moode_url())?, MOODE_ART_PORT),
        "volumio" => (url_host(&config.get_volumio_url())?, VOLUMIO_ART_PORT),
        _ => return None,
    };
    let host = if is_loopback(&host) {
        config.get_host_ip()
    } else {
        host
    };
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host
    };

    let port = config.get_player_art_port().unwrap_or(default_port);
    if port == 80 {
        Some(format!("http://{}", host))
    } else {
        Some(format!("http://{}:{}", host, port))
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

impl PlayerControl for LocalPlayer {
    fn poll(&mut self) -> Result<PlaybackState, CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.poll(),
            LocalPlayer::Volumio(client) => client.poll(),
        }
    }

    fn pause(&mut self) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.pause(),
            LocalPlayer::Volumio(client) => client.pause(),
        }
    }

    fn resume(&mut self) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.resume(),
            LocalPlayer::Volumio(client) => client.resume(),
        }
    }

    fn stop(&mut self) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.stop(),
            LocalPlayer::Volumio(client) => client.stop(),
        }
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.seek(seconds),
            LocalPlayer::Volumio(client) => client.seek(seconds),
        }
    }

    fn next(&mut self) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.next(),
            LocalPlayer::Volumio(client) => client.next(),
        }
    }

    fn previous(&mut self) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.previous(),
            LocalPlayer::Volumio(client) => client.previous(),
        }
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), CastError> {
        match self {
            LocalPlayer::Mpd(client) => client.set_volume(percent),
            LocalPlayer::Volumio(client) => client.set_volume(percent),
        }
    }

    fn artwork_hint(&mut self) -> Option<String> {
        match self {
            LocalPlayer::Mpd(client) => client.artwork_hint(),
            LocalPlayer::Volumio(client) => client.artwork_hint(),
        }
    }
}
