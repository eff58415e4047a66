//! `fleet` – one binary, three roles.
//!
//! * `fleet server [addr]` – the coordinator.
//! * `fleet client [addr]` (or `vehicle`) – one simulated vehicle.
//! * `fleet cli [addr]` – interactive query shell.
//!
//! Ctrl-C flips a shutdown channel that the server accept loop and the
//! vehicle loop watch; the vehicle unregisters before exiting.

mod cli;
mod config;
mod logging;
mod repl;

use std::time::Duration;

use colored::Colorize;
use fleet_registry::Registry;
use fleet_server::FleetServer;
use fleet_vehicle::{VehicleSim, random_vin};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, Role};

fn main() {
    let args = Cli::parse_or_exit();
    let guard = logging::init_tracing("fleet");

    let mut cfg = config::load_or_default();
    if let Some(addr) = args.addr {
        cfg.server_addr = addr;
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; Ctrl-C will not shut down cleanly");
    }

    // Built after logging so the OTLP exporter never needs a runtime.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start tokio runtime");
            drop(guard);
            std::process::exit(1);
        }
    };

    let code = match args.role {
        Role::Server => runtime.block_on(run_server(&cfg, shutdown_rx)),
        Role::Client => runtime.block_on(run_vehicle(&cfg, shutdown_rx)),
        Role::Cli => {
            repl::run(&runtime, &cfg.server_addr, cfg.call_timeout(), shutdown_rx);
            0
        }
    };

    runtime.shutdown_timeout(Duration::from_secs(1));
    drop(guard);
    std::process::exit(code);
}

async fn run_server(cfg: &config::Config, shutdown: watch::Receiver<bool>) -> i32 {
    let server = match FleetServer::bind(cfg.server_config(), Registry::new()).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "coordinator failed to start");
            eprintln!("{}: {}", "Cannot start coordinator".red(), e);
            return 1;
        }
    };
    server.run(shutdown).await;
    0
}

async fn run_vehicle(cfg: &config::Config, shutdown: watch::Receiver<bool>) -> i32 {
    let sim = VehicleSim::new(random_vin(), cfg.sim_config());
    info!(vin = %sim.vin(), server = %cfg.server_addr, "simulated vehicle ready");
    println!("  Vehicle {} reporting to {}", sim.vin().bold(), cfg.server_addr.bold());
    sim.run(shutdown).await;
    0
}
