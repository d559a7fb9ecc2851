//! Client for the MPD text protocol.
//!
//! One TCP connection is kept open and reopened lazily: any I/O error drops
//! it, so the next call reconnects. Protocol errors (`ACK`) leave the
//! connection in place.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use super::moode_client::MoodeClient;
use crate::capabilities::PlayerControl;
use crate::errors::CastError;
use crate::model::{PlaybackState, PlayerStatus};

pub const MPD_DEFAULT_PORT: u16 = 6600;

const GREETING_PREFIX: &str = "OK MPD ";

struct MpdConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

pub struct MpdClient {
    host: String,
    port: u16,
    timeout: Duration,
    connection: Option<MpdConnection>,
    cover_source: Option<MoodeClient>,
}

impl MpdClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
            connection: None,
            cover_source: None,
        }
    }

    /// Takes cover art from a moOde web UI running next to MPD.
    pub fn with_cover_source(mut self, moode: MoodeClient) -> Self {
        self.cover_source = Some(moode);
        self
    }

    pub fn has_cover_source(&self) -> bool {
        self.cover_source.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn connect(&self) -> Result<MpdConnection, CastError> {
        let address = if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };

        let mut last_err = None;
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| CastError::player(format!("Failed to resolve {}: {}", address, e)))?;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    let writer = stream.try_clone()?;
                    let mut reader = BufReader::new(stream);

                    let mut greeting = String::new();
                    reader.read_line(&mut greeting)?;
                    let Some(version) = greeting.trim_end().strip_prefix(GREETING_PREFIX) else {
                        return Err(CastError::player(format!(
                            "Unexpected MPD greeting from {}: {}",
                            address,
                            greeting.trim_end()
                        )));
                    };
                    debug!(address = %address, version = version, "Connected to MPD");
                    return Ok(MpdConnection { reader, writer });
                }
                Err(err) => last_err = Some((addr, err)),
            }
        }

        match last_err {
            Some((addr, err)) => Err(CastError::player(format!(
                "Failed to connect to MPD via {}: {}",
                addr, err
            ))),
            None => Err(CastError::player(format!(
                "No socket addresses resolved for {}",
                address
            ))),
        }
    }

    /// Sends one command and returns its `key: value` pairs.
    fn command(&mut self, command: &str) -> Result<Vec<(String, String)>, CastError> {
        if self.connection.is_none() {
            self.connection = Some(self.connect()?);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(CastError::player("MPD connection unavailable"));
        };

        match exchange(connection, command) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = command, "MPD connection lost: {}", e);
                self.connection = None;
                Err(CastError::player(format!("MPD I/O error: {}", e)))
            }
        }
    }

    fn simple(&mut self, command: &str) -> Result<(), CastError> {
        debug!(command = command, "MPD command");
        self.command(command).map(|_| ())
    }
}

/// Writes `command` and reads the reply up to `OK` or `ACK`.
///
/// The outer result carries I/O failures, the inner one protocol errors.
fn exchange(
    connection: &mut MpdConnection,
    command: &str,
) -> std::io::Result<Result<Vec<(String, String)>, CastError>> {
    connection.writer.write_all(command.as_bytes())?;
    connection.writer.write_all(b"\n")?;
    connection.writer.flush()?;

    let mut pairs = Vec::new();
    loop {
        let mut line = String::new();
        if connection.reader.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by MPD",
            ));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            return Ok(Ok(pairs));
        }
        if let Some(ack) = line.strip_prefix("ACK ") {
            return Ok(Err(CastError::player(format!("MPD refused {}: {}", command, ack))));
        }
        if let Some((key, value)) = line.split_once(": ") {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
}

fn parse_seconds(value: Option<&String>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Builds a [`PlaybackState`] from `status` and `currentsong` replies.
pub fn parse_playback_state(
    status: &[(String, String)],
    song: &[(String, String)],
) -> Result<PlaybackState, CastError> {
    let status: HashMap<String, String> = status
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    let song: HashMap<&str, &String> = song.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let state = match status.get("state").map(String::as_str) {
        Some("play") => PlayerStatus::Playing,
        Some("pause") => PlayerStatus::Paused,
        Some("stop") => PlayerStatus::Stopped,
        other => {
            return Err(CastError::player(format!(
                "Missing or unknown MPD state: {:?}",
                other
            )));
        }
    };

    // MPD renvoie -1 quand il n'y a pas de mixer
    let volume_percent = status
        .get("volume")
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|v| *v >= 0)
        .map(|v| v.min(100) as u8);

    let track_id = status
        .get("songid")
        .or_else(|| song.get("Id").copied())
        .and_then(|v| v.trim().parse::<u32>().ok());

    Ok(PlaybackState {
        status: state,
        track_ref: non_empty(song.get("file").copied()),
        track_id,
        elapsed_secs: parse_seconds(status.get("elapsed")),
        duration_secs: parse_seconds(
            status
                .get("duration")
                .or_else(|| song.get("duration").copied()),
        ),
        volume_percent,
        audio_format: non_empty(status.get("audio")),
        title: non_empty(song.get("Title").copied()),
        artist: non_empty(song.get("Artist").copied()),
        album: non_empty(song.get("Album").copied()),
        artwork_hint: None,
    })
}

impl PlayerControl for MpdClient {
    fn poll(&mut self) -> Result<PlaybackState, CastError> {
        let status = self.command("status")?;
        let song = self.command("currentsong")?;
        parse_playback_state(&status, &song)
    }

    fn pause(&mut self) -> Result<(), CastError> {
        self.simple("pause 1")
    }

    fn resume(&mut self) -> Result<(), CastError> {
        self.simple("pause 0")
    }

    fn stop(&mut self) -> Result<(), CastError> {
        self.simple("stop")
    }

    fn seek(&mut self, seconds: u32) -> Result<(), CastError> {
        self.simple(&format!("seekcur {}", seconds))
    }

    fn next(&mut self) -> Result<(), CastError> {
        self.simple("next")
    }

    fn previous(&mut self) -> Result<(), CastError> {
        self.simple("previous")
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), CastError> {
        self.simple(&format!("setvol {}", percent.min(100)))
    }

    fn artwork_hint(&mut self) -> Option<String> {
        let moode = self.cover_source.as_ref()?;
        match moode.cover_url() {
            Ok(cover) => cover,
            Err(e) => {
                warn!("Problem getting moOde status for artwork: {}", e);
                None
            }
        }
    }
}
