//! Chromecast device discovery via mDNS.
//!
//! Chromecast devices advertise themselves on the `_googlecast._tcp.local`
//! service. A scan browses that service for a fixed window and turns every
//! answer into a [`RendererEndpoint`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_std::{future, task};
use futures_util::{StreamExt, pin_mut};
use tracing::{debug, warn};

use crate::errors::CastError;
use crate::model::RendererEndpoint;

pub const SERVICE_NAME: &str = "_googlecast._tcp.local";

/// Default Chromecast control port.
pub const DEFAULT_CHROMECAST_PORT: u16 = 8009;

/// Interval between mDNS queries while a scan window is open.
const QUERY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Default)]
pub struct ChromecastDiscovery;

impl ChromecastDiscovery {
    pub fn new() -> Self {
        Self
    }

    /// Browses the network for `window` and returns every device that
    /// answered, deduplicated by device id.
    pub fn scan(&self, window: Duration) -> Result<Vec<RendererEndpoint>, CastError> {
        let mut found: HashMap<String, RendererEndpoint> = HashMap::new();

        task::block_on(async {
            let discovery = mdns::discover::all(SERVICE_NAME, QUERY_INTERVAL)
                .map_err(|e| CastError::Discovery(e.to_string()))?;
            let stream = discovery.listen();
            pin_mut!(stream);

            let collect = async {
                while let Some(answer) = stream.next().await {
                    match answer {
                        Ok(response) => {
                            if let Some(endpoint) = endpoint_from_response(&response) {
                                found.entry(endpoint.uuid.clone()).or_insert(endpoint);
                            }
                        }
                        Err(e) => warn!("mDNS error during Chromecast scan: {}", e),
                    }
                }
            };

            // La fenêtre expire normalement avant la fin du flux
            let _ = future::timeout(window, collect).await;
            Ok::<(), CastError>(())
        })?;

        debug!("Chromecast scan found {} devices", found.len());
        Ok(found.into_values().collect())
    }
}

/// Builds an endpoint from one mDNS answer.
///
/// Returns `None` when the answer has no PTR record or no address.
pub fn endpoint_from_response(response: &mdns::Response) -> Option<RendererEndpoint> {
    let service_name = response.records().find_map(|r| {
        if let mdns::RecordKind::PTR(ref name) = r.kind {
            Some(name.clone())
        } else {
            None
        }
    });
    let Some(service_name) = service_name else {
        warn!("No PTR record found in mDNS response");
        return None;
    };

    let addresses: Vec<IpAddr> = response
        .records()
        .filter_map(|r| match r.kind {
            mdns::RecordKind::A(addr) => Some(IpAddr::V4(addr)),
            mdns::RecordKind::AAAA(addr) => Some(IpAddr::V6(addr)),
            _ => None,
        })
        .collect();

    // Prefer IPv4 addresses
    let Some(host) = addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addresses.first())
        .map(|addr| addr.to_string())
    else {
        warn!("No IP address found for Chromecast device: {}", service_name);
        return None;
    };

    let port = response
        .records()
        .find_map(|r| {
            if let mdns::RecordKind::SRV { port, .. } = r.kind {
                Some(port)
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_CHROMECAST_PORT);

    let txt = parse_txt(response.records().filter_map(|r| {
        if let mdns::RecordKind::TXT(ref data) = r.kind {
            Some(data.clone())
        } else {
            None
        }
    }));

    let uuid = txt
        .get("id")
        .cloned()
        .unwrap_or_else(|| format!("chromecast-{}-{}", host, port));
    let friendly_name = txt
        .get("fn")
        .cloned()
        .unwrap_or_else(|| friendly_name_from_service(&service_name));
    let model = txt.get("md").cloned();

    debug!(
        "Discovered Chromecast: {} at {}:{} (UUID: {}, Model: {:?})",
        friendly_name, host, port, uuid, model
    );

    Some(RendererEndpoint {
        friendly_name,
        host,
        port,
        uuid,
        model,
    })
}

/// Flattens TXT records (`key=value` strings) into a map.
pub fn parse_txt<I>(records: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    records
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Derives a readable name from a service instance name, dropping the
/// service suffix and the 32-character hex id Chromecasts append.
pub fn friendly_name_from_service(service_name: &str) -> String {
    let instance = service_name
        .split(&format!(".{}", SERVICE_NAME))
        .next()
        .unwrap_or_default();
    let name = instance
        .split('-')
        .take_while(|part| part.len() != 32)
        .collect::<Vec<_>>()
        .join("-")
        .trim()
        .to_string();
    if name.is_empty() {
        "Unknown Chromecast".to_string()
    } else {
        name
    }
}
