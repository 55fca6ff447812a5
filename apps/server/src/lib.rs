//! # Notice Server
//!
//! Exposes the notice event bus over HTTP: `POST /event/do?taskId=<id>` posts a
//! [`TaskEvent`] under routing key `<id>`.
//!
//! ## Example
//! ```no_run
//! use notice_server::{AppConfig, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Server::builder().config(AppConfig::default()).build()?.run().await
//! }
//! ```

mod config;
mod listeners;
mod router;

pub use crate::config::{AppConfig, ConfigError, DEFAULT_CONFIG_FILE, ENV_PREFIX, ServerConfig, load_config};
pub use crate::listeners::{AService, CService, DService, TaskEvent, UnroutedLogger, register_all};
pub use crate::router::{ApiError, AppState};

use anyhow::{Context, Result};
use axum::Router;
use notice_bus::EventBus;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct ServerBuilder {
    cfg: AppConfig,
}

impl ServerBuilder {
    pub fn config(mut self, cfg: AppConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub const fn port(mut self, port: u16) -> Self {
        self.cfg.server.port = port;
        self
    }

    /// Builds the bus and registers the demo listeners.
    ///
    /// Must be called inside a tokio runtime when the bus uses the `tokio` executor.
    ///
    /// # Errors
    /// Fails if the bus cannot be built from its configuration or a listener is malformed.
    pub fn build(self) -> Result<Server> {
        let bus = EventBus::from_config(&self.cfg.bus).context("Failed to build the event bus")?;
        register_all(&bus).context("Failed to register listeners")?;

        let address = SocketAddr::new(self.cfg.server.host, self.cfg.server.port);
        info!(address = %address, bus = bus.identifier(), "Initializing server");

        Ok(Server { address, state: AppState { bus } })
    }
}

#[must_use = "call .run().await to start the server"]
#[derive(Debug)]
pub struct Server {
    address: SocketAddr,
    state: AppState,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Router serving the HTTP surface, for embedding or tests.
    pub fn router(&self) -> Router {
        router::init(self.state.clone())
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.state.bus
    }

    /// Serves until Ctrl+C or SIGTERM, then drains in-flight requests.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run(self) -> Result<()> {
        let listener =
            TcpListener::bind(self.address).await.with_context(|| format!("Failed to bind {}", self.address))?;
        info!("Starting HTTP server on http://{}", self.address);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if let Err(e) = shutdown_signal().await {
                    error!("Error while waiting for shutdown signal: {e}");
                }
                info!("Shutdown signal received, starting graceful shutdown...");
            })
            .await
            .context("HTTP server failed")?;

        info!("Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res,
        res = terminate => res,
    }
}
