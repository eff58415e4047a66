//! REPL – interactive query shell against a running coordinator.
//!
//! Supported commands:
//!   show all        – every connected vehicle
//!   show vin <VIN>  – one vehicle
//!   help            – show this list
//!   exit | quit     – leave the shell
//!
//! Each query opens its own connection, so the shell survives coordinator
//! restarts.

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use fleet_rpc::NoInboundCalls;
use fleet_types::{Call, FleetError, QueryFilter, ReplyValue, Vehicle};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show(QueryFilter),
    Help,
    Exit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        _ if line.starts_with("show") => match QueryFilter::parse(line) {
            Some(filter) => Command::Show(filter),
            None => Command::Unknown(line.to_string()),
        },
        _ => Command::Unknown(line.to_string()),
    }
}

/// Run the shell until `exit`, end of input or shutdown.
pub fn run(runtime: &Runtime, addr: &str, call_timeout: Duration, shutdown: watch::Receiver<bool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start line editor".red(), e);
            return;
        }
    };

    println!("  Querying coordinator at {}", addr.bold());
    println!("  Type {} for a list of commands.\n", "help".bold().cyan());

    while !*shutdown.borrow() {
        let line = match editor.readline("fleet> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let _ = editor.add_history_entry(line.as_str());

        match parse_command(&line) {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::Exit => break,
            Command::Show(filter) => {
                match runtime.block_on(fetch(addr, &filter, call_timeout)) {
                    Ok(vehicles) => print_vehicles(&vehicles),
                    Err(e) => println!("{}: {}", "Coordinator unavailable".red(), e),
                }
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "help".bold()
                );
            }
        }
    }
    println!("{}", "Goodbye.".green());
}

fn cmd_help() {
    println!();
    println!("{}", "Fleet Query Commands".bold().underline());
    println!("  {}        – list every connected vehicle", "show all".bold().cyan());
    println!("  {}  – show one vehicle", "show vin <VIN>".bold().cyan());
    println!("  {}     – leave the shell", "exit  quit".bold().cyan());
    println!();
}

/// One `Query` round trip on a short-lived connection.
async fn fetch(
    addr: &str,
    filter: &QueryFilter,
    call_timeout: Duration,
) -> Result<Vec<Vehicle>, FleetError> {
    let session = fleet_rpc::connect(addr, Arc::new(NoInboundCalls), call_timeout).await?;
    let reply = session.peer().call(Call::Query(filter.to_string())).await;
    session.peer().close();
    session.closed().await;
    debug!(%filter, "query finished");

    match reply? {
        ReplyValue::Vehicles(mut vehicles) => {
            vehicles.sort_by(|a, b| a.vin.cmp(&b.vin));
            Ok(vehicles)
        }
        other => Err(FleetError::Protocol(format!("unexpected reply to Query: {other:?}"))),
    }
}

fn print_vehicles(vehicles: &[Vehicle]) {
    if vehicles.is_empty() {
        println!("{}", "No vehicle data found".yellow());
        return;
    }
    for vehicle in vehicles {
        let line = format_vehicle(vehicle);
        if vehicle.is_pacer {
            println!("{}", line.green());
        } else {
            println!("{line}");
        }
    }
}

pub fn format_vehicle(v: &Vehicle) -> String {
    let status = if v.drive_status.is_empty() {
        "unknown"
    } else {
        v.drive_status.as_str()
    };
    format!(
        "VIN:{}, IsPacer:{}, Coordinates:({},{}), Speed:{}, Status:{}",
        v.vin, v.is_pacer, v.x, v.y, v.speed, status
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_commands_become_queries() {
        assert_eq!(parse_command("show all"), Command::Show(QueryFilter::All));
        assert_eq!(
            parse_command("  show vin JABC123  "),
            Command::Show(QueryFilter::Vin("JABC123".to_string()))
        );
    }

    #[test]
    fn malformed_show_is_unknown() {
        assert_eq!(parse_command("show vin"), Command::Unknown("show vin".to_string()));
        assert_eq!(parse_command("show everything"), Command::Unknown("show everything".to_string()));
    }

    #[test]
    fn shell_commands() {
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("quit"), Command::Exit);
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("all"), Command::Unknown("all".to_string()));
    }

    #[test]
    fn vehicle_line_layout() {
        let mut v = Vehicle::new("J1");
        v.x = 12;
        v.y = 19;
        v.speed = 11;
        v.drive_status = "reverse".to_string();
        v.is_pacer = true;
        assert_eq!(
            format_vehicle(&v),
            "VIN:J1, IsPacer:true, Coordinates:(12,19), Speed:11, Status:reverse"
        );
        assert!(format_vehicle(&Vehicle::new("J2")).ends_with("Status:unknown"));
    }
}
