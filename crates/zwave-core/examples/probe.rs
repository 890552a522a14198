//! Z-Wave Module Probe
//!
//! Opens a Z-Wave controller, queries its library version, network ids and
//! SUC node id, then prints unsolicited commands until interrupted.
//!
//! Usage:
//!   cargo run --example probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first detected port)
//!   --config FILE     Load adapter settings from a JSON file
//!   --timeout MS      Response timeout in ms (default: 30000)
//!   --listen SECS     Print unsolicited commands for SECS seconds (default: 0)
//!   --list            List serial ports and exit

use std::time::Duration;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;
use zwave_core::api::{GetSucNodeId, SucNodeId};
use zwave_core::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = AdapterConfig::default();
    let mut listen_secs = 0u64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.port_name = args[i].clone();
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    let port_name = std::mem::take(&mut config.port_name);
                    config = AdapterConfig::from_json_file(&args[i])
                        .with_context(|| format!("loading {}", args[i]))?;
                    if !port_name.is_empty() {
                        config.port_name = port_name;
                    }
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    config.timeout_ms = args[i].parse().unwrap_or(config.timeout_ms);
                }
            }
            "--listen" | "-l" => {
                i += 1;
                if i < args.len() {
                    listen_secs = args[i].parse().unwrap_or(0);
                }
            }
            "--list" => {
                for port in list_ports() {
                    println!("{:<20} {}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                println!("Usage: probe [--port PORT] [--config FILE] [--timeout MS] [--listen SECS] [--list]");
                return Ok(());
            }
            arg if !arg.starts_with('-') => config.port_name = arg.to_string(),
            other => bail!("unknown option {}", other),
        }
        i += 1;
    }

    if config.port_name.is_empty() {
        config.port_name = list_ports()
            .into_iter()
            .next()
            .map(|port| port.name)
            .context("no serial ports found")?;
    }

    println!("Z-Wave probe v{}", zwave_core::VERSION);
    println!("Port: {} @ {} baud", config.port_name, config.baud_rate);

    let adapter = Adapter::serial(config)?;
    if !adapter.start().await? {
        bail!("could not open port");
    }

    adapter.subscribe(|update: &ApplicationUpdate| {
        println!("Application update: {:?} from node {}", update.event, update.node_id);
    });
    adapter.subscribe(|command: &ApplicationCommand| {
        println!(
            "Application command from node {}: {:02X?}",
            command.source_node_id, command.payload
        );
    });

    let outcome = adapter.send_command(&GetLibraryVersion).await?;
    match outcome.response_as::<LibraryVersion>() {
        Some(version) => println!(
            "Library: {} ({:?}, version {})",
            version.description, version.library_type, version.version
        ),
        None => println!("Library version query failed: {:?}", outcome.state),
    }

    let outcome = adapter.send_command(&GetNetworkIds).await?;
    if let Some(ids) = outcome.response_as::<NetworkIds>() {
        println!("Home id: {:#010X}, node id: {}", ids.home_id, ids.node_id);
    }

    let outcome = adapter.send_command(&GetSucNodeId).await?;
    if let Some(suc) = outcome.response_as::<SucNodeId>() {
        println!("SUC node id: {}", suc.node_id);
    }

    if listen_secs > 0 {
        println!("Listening for {} s...", listen_secs);
        tokio::time::sleep(Duration::from_secs(listen_secs)).await;
    }

    let rx = adapter.rx_statistics();
    let tx = adapter.tx_statistics();
    println!(
        "RX: {} frames, {} ACK, {} NAK, {} CAN, {} dropped",
        rx.sof, rx.ack, rx.nak, rx.can, rx.dropped
    );
    println!("TX: {} frames, {} ACK, {} NAK", tx.sof, tx.ack, tx.nak);

    adapter.stop().await?;
    Ok(())
}
