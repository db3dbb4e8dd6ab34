//! lixnet-ctl: command-line interface for the lixnet daemon.

mod cmd;

use anyhow::{Context, Result};
use lixnet_core::LixnetConfig;

fn default_port() -> u16 {
    LixnetConfig::load()
        .map(|c| c.server.api_port)
        .unwrap_or_else(|_| LixnetConfig::default().server.api_port)
}

fn print_usage() {
    println!("Usage: lixnet-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  ping                    Check that the daemon answers");
    println!("  call <event> <json>     Call an RPC event and print its result");
    println!();
    println!("Options:");
    println!("  --port <port>   Daemon port (default: {})", default_port());
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = Some(
                args.get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?,
            );
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    let port = port.unwrap_or_else(default_port);

    match remaining.as_slice() {
        ["ping"] => cmd::call::cmd_ping(port).await,
        ["call", event, input] => cmd::call::cmd_call(port, event, input).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
