//! [`FleetServer`] – WebSocket listener for vehicles and query tools.
//!
//! Every accepted connection gets its own [`ConnectionHandler`] and session
//! task; all of them share one [`Registry`].  A housekeeping tick logs
//! vehicles that have gone quiet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fleet_registry::Registry;
use fleet_rpc::DEFAULT_CALL_TIMEOUT;
use fleet_types::FleetError;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::ConnectionHandler;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8009";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Bound on outbound status checks and command pushes.
    pub call_timeout: Duration,
    pub housekeeping_interval: Duration,
    /// Silence after which housekeeping reports a vehicle.
    pub stale_after: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_ADDR.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            housekeeping_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// FleetServer
// ---------------------------------------------------------------------------

pub struct FleetServer {
    listener: TcpListener,
    registry: Registry,
    config: ServerConfig,
}

impl FleetServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Bind`] if the address is unusable or taken.
    pub async fn bind(config: ServerConfig, registry: Registry) -> Result<Self, FleetError> {
        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|e| FleetError::Bind {
                addr: config.listen_addr.clone(),
                details: e.to_string(),
            })?;
        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, FleetError> {
        self.listener.local_addr().map_err(|e| FleetError::Bind {
            addr: self.config.listen_addr.clone(),
            details: e.to_string(),
        })
    }

    /// Accept connections until `shutdown` turns true or its sender is dropped.
    ///
    /// Sessions already running are not cut off; they end with their
    /// connections or with the runtime.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "fleet coordinator listening"),
            Err(e) => warn!(error = %e, "listener address unavailable"),
        }

        let mut housekeeping = tokio::time::interval(self.config.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        housekeeping.tick().await;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = housekeeping.tick() => self.housekeeping(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(vehicles = self.registry.len(), "fleet coordinator stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = self.registry.clone();
        let call_timeout = self.config.call_timeout;
        tokio::spawn(async move {
            let handler = Arc::new(ConnectionHandler::new(registry, peer.to_string()));
            match fleet_rpc::accept(stream, peer, handler, call_timeout).await {
                Ok(session) => {
                    debug!(peer = %peer, "connection opened");
                    session.closed().await;
                    debug!(peer = %peer, "connection closed");
                }
                Err(e) => warn!(peer = %peer, error = %e, "connection rejected"),
            }
        });
    }

    fn housekeeping(&self) {
        let stale = self.registry.stale(self.config.stale_after);
        if !stale.is_empty() {
            warn!(
                count = stale.len(),
                vins = ?stale,
                silent_secs = self.config.stale_after.as_secs(),
                "vehicles have stopped reporting"
            );
        }
        debug!(
            vehicles = self.registry.len(),
            pacer = ?self.registry.pacer(),
            "housekeeping"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
