//! # pmocast - Mirror a local music player on a Chromecast
//!
//! This crate keeps a Chromecast (or any Cast receiver) playing the same
//! track, at the same position, as a local MPD or Volumio player.
//!
//! ## Components
//!
//! - [`local_player`]: MPD and Volumio clients behind [`PlayerControl`]
//! - [`chromecast_renderer`]: Cast protocol client behind [`RendererControl`]
//! - [`discovery`] and [`registry`]: mDNS discovery feeding a snapshot
//!   registry of renderers keyed by friendly name
//! - [`media_locator`]: URLs and MIME types for local tracks and artwork
//! - [`artwork`]: covers extracted from audio tags
//! - [`sync_engine`]: the once-per-second synchronization state machine
//! - [`supervisor`]: task and heartbeat supervision
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pmocast::{
//!     ChromecastConnector, DeviceRegistry, Heartbeat, LocalPlayer, MediaLocator, SyncEngine,
//!     SyncSettings,
//! };
//!
//! let config = Arc::new(pmoconfig::Config::load_config("")?);
//! let engine = SyncEngine::new(
//!     LocalPlayer::from_config(&config)?,
//!     ChromecastConnector::new(),
//!     Arc::new(DeviceRegistry::new()),
//!     MediaLocator::from_config(&config),
//!     SyncSettings::from_config(&config),
//!     Heartbeat::new(),
//! )
//! .with_target(config.cast_target());
//! engine.run()?;
//! ```

pub mod artwork;
pub mod capabilities;
pub mod chromecast_renderer;
pub mod discovery;
pub mod errors;
pub mod local_player;
pub mod media_locator;
pub mod model;
pub mod registry;
pub mod supervisor;
pub mod sync_engine;

pub use artwork::ArtworkExtractor;
pub use capabilities::{PlayerControl, RendererConnector, RendererControl};
pub use chromecast_renderer::{ChromecastConnector, ChromecastRenderer};
pub use discovery::{ChromecastDiscovery, RegistryRefresher, spawn_registry_refresher};
pub use errors::CastError;
pub use local_player::{LocalPlayer, MoodeClient, MpdClient, VolumioClient, player_artwork_base};
pub use media_locator::MediaLocator;
pub use model::{
    CastMedia, ConnectionState, PlaybackState, PlayerStatus, RenderStatus, RendererEndpoint,
    RendererPlayerState,
};
pub use registry::DeviceRegistry;
pub use supervisor::{Heartbeat, Supervisor};
pub use sync_engine::{CastStatus, SyncEngine, SyncSession, SyncSettings, TickAction};
