use clap::{Parser, ValueEnum};

/// fleet: vehicle fleet coordinator, simulated vehicle and query tool
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(about = "Track a fleet of vehicles over persistent WebSocket connections", long_about = None)]
pub struct Cli {
    /// Which part of the system to run
    #[arg(value_enum)]
    pub role: Role,

    /// Coordinator address (host:port), overriding the configured one
    pub addr: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Run the coordinator
    Server,
    /// Run one simulated vehicle
    #[value(alias = "vehicle")]
    Client,
    /// Interactive query shell
    Cli,
}

impl Cli {
    /// Parse the process arguments.  Usage errors exit with status 1.
    pub fn parse_or_exit() -> Self {
        match <Self as Parser>::try_parse() {
            Ok(cli) => cli,
            Err(e) => {
                // Help and version output are not failures.
                let code = if e.use_stderr() { 1 } else { 0 };
                let _ = e.print();
                std::process::exit(code);
            }
        }
    }
}
