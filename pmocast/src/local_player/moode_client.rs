//! moOde web UI, queried for the cover of the current track.
//!
//! moOde plays through MPD, which knows nothing about artwork; the web UI
//! publishes the cover it resolved in the `coverurl` field of
//! `engine-mpd.php`.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use ureq::Agent;

use super::volumio_client::build_agent;
use crate::errors::CastError;
use crate::model::is_remote_uri;

const ENGINE_PATH: &str = "/engine-mpd.php";

#[derive(Debug, Default, Deserialize)]
struct MoodeEngineRaw {
    #[serde(default)]
    coverurl: Option<String>,
}

pub struct MoodeClient {
    base_url: String,
    agent: Agent,
}

impl MoodeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: build_agent(timeout),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cover of the current track as a URL or a path on the moOde web root.
    pub fn cover_url(&self) -> Result<Option<String>, CastError> {
        let url = format!("{}{}", self.base_url, ENGINE_PATH);
        let body = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| CastError::player(format!("HTTP request to {} failed: {}", url, e)))?
            .body_mut()
            .read_to_string()
            .map_err(|e| CastError::player(format!("Failed to read moOde response: {}", e)))?;

        let cover = parse_cover_url(&body)?;
        debug!(cover = ?cover, "moOde cover");
        Ok(cover)
    }
}

pub fn parse_cover_url(body: &str) -> Result<Option<String>, CastError> {
    let raw: MoodeEngineRaw = serde_json::from_str(body)
        .map_err(|e| CastError::player(format!("Failed to parse moOde status JSON: {}", e)))?;

    Ok(raw
        .coverurl
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .map(|c| {
            if is_remote_uri(&c) || c.starts_with('/') {
                c
            } else {
                format!("/{}", c)
            }
        }))
}
