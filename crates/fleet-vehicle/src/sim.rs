//! [`VehicleSim`] – keeps one simulated vehicle connected and reporting.
//!
//! Loop: connect, `Register`, then `UpdateStats` on every report tick.  A
//! lost or refused session is retried after the reconnect delay.  On
//! shutdown the vehicle unregisters and closes the connection.

use std::sync::Arc;
use std::time::Duration;

use fleet_rpc::{DEFAULT_CALL_TIMEOUT, PeerHandle, Session};
use fleet_types::{Call, FleetError, ReplyValue};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{MovementPlan, VehicleResponder};

/// A fresh VIN: `J` followed by ten upper-case hex digits.
pub fn random_vin() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("J{}", &hex[..10])
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub server_addr: String,
    pub report_interval: Duration,
    pub reconnect_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8009".to_string(),
            report_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

pub struct VehicleSim {
    vin: String,
    config: SimConfig,
    responder: Arc<VehicleResponder>,
}

impl VehicleSim {
    pub fn new(vin: impl Into<String>, config: SimConfig) -> Self {
        let vin = vin.into();
        Self {
            responder: Arc::new(VehicleResponder::new(vin.clone())),
            vin,
            config,
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    /// Drive until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut plan = MovementPlan::new();
        info!(vin = %self.vin, server = %self.config.server_addr, "vehicle starting");

        while !stop_requested(&shutdown) {
            let connected = tokio::select! {
                result = fleet_rpc::connect(
                    &self.config.server_addr,
                    Arc::clone(&self.responder),
                    self.config.call_timeout,
                ) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(session) => {
                    let outcome = self.drive(&session, &mut plan, &mut shutdown).await;
                    session.peer().close();
                    session.closed().await;
                    match outcome {
                        Ok(()) => break,
                        Err(e) => warn!(vin = %self.vin, error = %e, "session lost"),
                    }
                }
                Err(e) => warn!(vin = %self.vin, error = %e, "coordinator unreachable"),
            }

            let retry_in = self.config.reconnect_delay;
            debug!(vin = %self.vin, retry_in_ms = millis(retry_in), "reconnecting");
            if wait_or_stop(&mut shutdown, retry_in).await {
                break;
            }
        }
        info!(vin = %self.vin, "vehicle stopped");
    }

    /// One connected session.  `Ok` means shutdown was requested.
    async fn drive(
        &self,
        session: &Session,
        plan: &mut MovementPlan,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), FleetError> {
        let peer = session.peer();
        peer.call(Call::Register(self.vin.clone())).await?;
        info!(vin = %self.vin, "registered with coordinator");

        let mut ticker = tokio::time::interval(self.config.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.report(peer, plan).await?,
                changed = shutdown.changed() => {
                    if changed.is_err() || stop_requested(shutdown) {
                        break;
                    }
                }
            }
        }

        match peer.call(Call::UnRegister(self.vin.clone())).await {
            Ok(_) => info!(vin = %self.vin, "unregistered"),
            Err(e) => warn!(vin = %self.vin, error = %e, "unregister failed"),
        }
        Ok(())
    }

    async fn report(&self, peer: &PeerHandle, plan: &mut MovementPlan) -> Result<(), FleetError> {
        let movement = plan.advance();
        // The coordinator may ask for the status while handling this update.
        self.responder.set_drive_status(movement.status);
        match peer.call(Call::UpdateStats(movement.stats(&self.vin))).await? {
            ReplyValue::Ack(_) => {
                debug!(
                    vin = %self.vin,
                    x = movement.x,
                    y = movement.y,
                    speed = movement.speed,
                    status = %movement.status,
                    "stats reported"
                );
                Ok(())
            }
            other => Err(FleetError::Protocol(format!("unexpected reply to UpdateStats: {other:?}"))),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleep for `delay`.  True if shutdown was requested meanwhile.
async fn wait_or_stop(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => stop_requested(shutdown),
        changed = shutdown.changed() => changed.is_err() || stop_requested(shutdown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_registry::Registry;
    use fleet_server::{FleetServer, ServerConfig};
    use fleet_types::{DriveStatus, QueryFilter};

    fn fast(addr: &str) -> SimConfig {
        SimConfig {
            server_addr: addr.to_string(),
            report_interval: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(50),
            call_timeout: Duration::from_millis(500),
        }
    }

    async fn serve(addr: &str, registry: &Registry) -> (String, watch::Sender<bool>) {
        let config = ServerConfig {
            listen_addr: addr.to_string(),
            ..ServerConfig::default()
        };
        let server = FleetServer::bind(config, registry.clone()).await.unwrap();
        let bound = server.local_addr().unwrap().to_string();
        let (stop, rx) = watch::channel(false);
        tokio::spawn(server.run(rx));
        (bound, stop)
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[test]
    fn vins_are_j_plus_ten_hex_digits() {
        let vin = random_vin();
        assert_eq!(vin.len(), 11);
        assert!(vin.starts_with('J'));
        assert!(vin[1..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(random_vin(), vin);
    }

    #[test]
    fn reconnect_delay_millis_saturate() {
        assert_eq!(millis(Duration::from_secs(5)), 5000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn reports_then_unregisters_on_shutdown() {
        let registry = Registry::new();
        let (addr, _server) = serve("127.0.0.1:0", &registry).await;

        let sim = Arc::new(VehicleSim::new("JTEST000001", fast(&addr)));
        let (stop, rx) = watch::channel(false);
        let running = tokio::spawn({
            let sim = Arc::clone(&sim);
            async move { sim.run(rx).await }
        });

        let filter = QueryFilter::Vin("JTEST000001".to_string());
        eventually("a driving report", || {
            registry
                .query(&filter)
                .first()
                .is_some_and(|v| v.drive_status == DriveStatus::Driving.as_str())
        })
        .await;
        assert_eq!(registry.pacer().as_deref(), Some("JTEST000001"));

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("vehicle must stop")
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnect_backoff() {
        // Nothing listens on a port that was just released.
        let addr = {
            let spare = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().to_string()
        };
        let config = SimConfig {
            reconnect_delay: Duration::from_secs(60),
            ..fast(&addr)
        };
        let sim = VehicleSim::new(random_vin(), config);
        let (stop, rx) = watch::channel(false);
        let running = tokio::spawn(async move { sim.run(rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("vehicle must not sit out the backoff")
            .unwrap();
    }

    #[tokio::test]
    async fn connects_once_coordinator_comes_up() {
        let addr = {
            let spare = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().to_string()
        };
        let sim = VehicleSim::new("JLATE000001", fast(&addr));
        let (_stop, rx) = watch::channel(false);
        tokio::spawn(async move { sim.run(rx).await });

        tokio::time::sleep(Duration::from_millis(120)).await;
        let registry = Registry::new();
        let (_addr, _server) = serve(&addr, &registry).await;
        eventually("the late vehicle to register", || registry.len() == 1).await;
    }
}
