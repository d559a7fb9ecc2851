//! Control surfaces consumed by the synchronization engine.
//!
//! The engine never talks to a protocol directly: it drives a local player
//! through [`PlayerControl`] and a renderer through [`RendererControl`]
//! handles obtained from a [`RendererConnector`].

use crate::errors::CastError;
use crate::model::{CastMedia, PlaybackState, RenderStatus, RendererEndpoint};

/// Query and transport commands of the local player.
pub trait PlayerControl {
    fn poll(&mut self) -> Result<PlaybackState, CastError>;

    fn pause(&mut self) -> Result<(), CastError>;

    fn resume(&mut self) -> Result<(), CastError>;

    fn stop(&mut self) -> Result<(), CastError>;

    /// Seek inside the current track, in seconds.
    fn seek(&mut self, seconds: u32) -> Result<(), CastError>;

    fn next(&mut self) -> Result<(), CastError>;

    fn previous(&mut self) -> Result<(), CastError>;

    /// Volume on the player's 0-100 scale.
    fn set_volume(&mut self, percent: u8) -> Result<(), CastError>;

    /// Artwork path or URL published by the player for the current track,
    /// fetched on demand when [`PlaybackState::artwork_hint`] is empty.
    fn artwork_hint(&mut self) -> Option<String> {
        None
    }
}

/// Opens a live connection to a discovered renderer.
pub trait RendererConnector {
    type Handle: RendererControl;

    fn connect(&self, endpoint: &RendererEndpoint) -> Result<Self::Handle, CastError>;
}

/// Commands and status of one connected renderer.
pub trait RendererControl {
    /// True when no application other than the idle screen is running.
    fn is_idle(&mut self) -> Result<bool, CastError>;

    /// Stops whatever application currently owns the renderer.
    fn kill_current_application(&mut self) -> Result<(), CastError>;

    fn load(&mut self, media: &CastMedia, autoplay: bool) -> Result<(), CastError>;

    fn play(&mut self) -> Result<(), CastError>;

    fn pause(&mut self) -> Result<(), CastError>;

    fn stop(&mut self) -> Result<(), CastError>;

    fn seek(&mut self, seconds: u32) -> Result<(), CastError>;

    /// Volume on the renderer's 0.0-1.0 scale.
    fn set_volume(&mut self, level: f32) -> Result<(), CastError>;

    fn poll_status(&mut self) -> Result<RenderStatus, CastError>;
}
