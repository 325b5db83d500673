//! Live reading monitor example
//!
//! Connects to a meter, selects a mode and prints every reading the poller
//! produces until Ctrl+C.
//!
//! Run with: cargo run --example monitor -- --address AA:BB:CC:DD:EE:FF [--mode dc-voltage]
//!
//! The address can also be given through the `DM40_ADDRESS` environment variable.

use dm40_rust_ble::{ConnectionState, Error, MeasurementMode, Multimeter, MultimeterConfig, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,dm40_rust_ble=info")
        .init();

    println!("DM40 Monitor");
    println!("============\n");

    let args: Vec<String> = std::env::args().collect();
    let address = arg_value(&args, "--address")
        .or_else(|| std::env::var("DM40_ADDRESS").ok())
        .ok_or_else(|| Error::InvalidParameter {
            name: "address".to_string(),
            value: "missing, pass --address or set DM40_ADDRESS".to_string(),
        })?;
    let mode: MeasurementMode = arg_value(&args, "--mode")
        .unwrap_or_else(|| "dc-voltage".to_string())
        .parse()?;

    let config = MultimeterConfig::new(address).with_poll_interval(Duration::from_millis(500));
    let meter = Multimeter::new(config).await?;

    println!("Connecting to {}...", meter.address());
    meter.connect().await?;

    if !meter.set_mode(mode).await? {
        println!("Meter did not acknowledge {}, continuing anyway", mode);
    }

    meter.set_data_callback(|value, unit, mode| {
        println!("{:>12.2} {:<3} ({})", value, unit, mode);
    });

    meter.start_polling().await?;
    println!("Polling. Press Ctrl+C to exit.\n");

    let mut events = meter.subscribe_connection();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            Ok(event) = events.recv() => {
                if matches!(event.state, ConnectionState::Disconnected | ConnectionState::Failed) {
                    println!("\nConnection {}: {}", event.identifier, event.state);
                    break;
                }
            }
        }
    }

    let state = meter.stop_polling().await;
    println!("Poller finished: {}", state);
    if let Some(at) = meter.last_update() {
        println!("Last reading at {}", at.to_rfc3339());
    }

    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
