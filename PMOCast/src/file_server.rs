//! Static HTTP server exposing the music and artwork roots to the renderer.
//!
//! Runs on its own current-thread tokio runtime so the rest of the process
//! stays synchronous.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// A directory served under a route.
#[derive(Clone, Debug)]
pub struct Mount {
    pub route: String,
    pub root: PathBuf,
}

impl Mount {
    pub fn new(route: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            route: format!("/{}", route.trim_matches('/')),
            root: root.into(),
        }
    }
}

/// Router serving every mount; a mount on `/` catches the remaining paths.
pub fn router(mounts: &[Mount]) -> Router {
    let mut router = Router::new();
    for mount in mounts {
        let files = ServeDir::new(&mount.root);
        router = if mount.route == "/" {
            router.fallback_service(files)
        } else {
            router.nest_service(&mount.route, files)
        };
    }
    router.layer(TraceLayer::new_for_http())
}

/// Blocks serving `mounts` on `0.0.0.0:port`.
pub fn serve(port: u16, mounts: Vec<Mount>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Cannot build media server runtime")?;

    runtime.block_on(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind media server to {}", addr))?;
        for mount in &mounts {
            info!(
                "📁 Serving {} under {} on port {}",
                mount.root.display(),
                mount.route,
                port
            );
        }
        axum::serve(listener, router(&mounts))
            .await
            .context("Media server stopped")
    })
}
