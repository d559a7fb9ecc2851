//! Registry of reachable renderers, keyed by friendly name.
//!
//! The refresher thread is the only writer. Each refresh builds a complete
//! new map and swaps it in; readers clone the current `Arc` once per call so
//! they never see a half-updated set.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::errors::CastError;
use crate::model::RendererEndpoint;

type Snapshot = Arc<HashMap<String, RendererEndpoint>>;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    snapshot: RwLock<Snapshot>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replaces the whole endpoint map.
    ///
    /// When two endpoints share a friendly name the first one wins.
    pub fn refresh(&self, endpoints: Vec<RendererEndpoint>) {
        let mut map = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            map.entry(endpoint.friendly_name.clone()).or_insert(endpoint);
        }
        let total = map.len();
        let fresh = Arc::new(map);

        match self.snapshot.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        info!("Discovered {} renderers", total);
    }

    /// Looks up a renderer by name in the last published snapshot.
    ///
    /// Never blocks on the network: connecting is the caller's job.
    pub fn resolve(&self, name: &str) -> Result<RendererEndpoint, CastError> {
        let snapshot = self.current();
        match snapshot.get(name) {
            Some(endpoint) => {
                debug!(
                    renderer = name,
                    host = %endpoint.host,
                    port = endpoint.port,
                    "Resolved renderer"
                );
                Ok(endpoint.clone())
            }
            None => Err(CastError::RendererNotFound(name.to_string())),
        }
    }

    /// Sorted friendly names of the current snapshot.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.current().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }
}
