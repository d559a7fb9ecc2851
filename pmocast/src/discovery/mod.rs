//! Periodic renderer discovery feeding the [`DeviceRegistry`].

pub mod chromecast_discovery;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

pub use chromecast_discovery::ChromecastDiscovery;

use crate::errors::CastError;
use crate::model::RendererEndpoint;
use crate::registry::DeviceRegistry;
use crate::supervisor::Supervisor;

/// Scans the network on a fixed interval and publishes each result as a
/// complete registry snapshot.
pub struct RegistryRefresher {
    registry: Arc<DeviceRegistry>,
    discovery: ChromecastDiscovery,
    refresh_interval: Duration,
    scan_window: Duration,
    devices_file: Option<PathBuf>,
}

impl RegistryRefresher {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        refresh_interval: Duration,
        scan_window: Duration,
    ) -> Self {
        Self {
            registry,
            discovery: ChromecastDiscovery::new(),
            refresh_interval,
            scan_window,
            devices_file: None,
        }
    }

    /// Also writes the discovered names, one per line, to `path`.
    pub fn with_devices_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.devices_file = Some(path.into());
        self
    }

    /// Runs a single scan and publishes its result.
    pub fn refresh_once(&self) -> Result<usize, CastError> {
        let endpoints = self.discovery.scan(self.scan_window)?;
        let total = endpoints.len();
        self.registry.refresh(endpoints);

        if let Some(path) = &self.devices_file {
            if let Err(e) = write_devices_file(path, &self.registry.names()) {
                warn!(file = %path.display(), "Failed to write renderer list: {}", e);
            }
        }
        Ok(total)
    }

    /// Refresh loop. Scan failures are logged and retried on the next
    /// cycle; the loop itself never returns.
    pub fn run(self) -> Result<(), CastError> {
        info!(
            interval = self.refresh_interval.as_secs(),
            window = self.scan_window.as_secs(),
            "Starting renderer discovery"
        );
        loop {
            match self.refresh_once() {
                Ok(total) => debug!("Registry refreshed with {} renderers", total),
                Err(e) => warn!("Renderer discovery failed: {}", e),
            }
            thread::sleep(self.refresh_interval);
        }
    }
}

/// Starts the refresher as a supervised task.
pub fn spawn_registry_refresher(
    supervisor: &mut Supervisor,
    refresher: RegistryRefresher,
) -> Result<(), CastError> {
    supervisor.spawn_task("registry-refresher", move || refresher.run())
}

/// One friendly name per line, sorted.
pub fn write_devices_file(path: &Path, names: &[String]) -> std::io::Result<()> {
    let mut body = names.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body)
}

/// Runs a one-shot scan, used by the CLI commands that list renderers.
pub fn scan_once(window: Duration) -> Result<Vec<RendererEndpoint>, CastError> {
    let mut endpoints = ChromecastDiscovery::new().scan(window)?;
    endpoints.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
    Ok(endpoints)
}
