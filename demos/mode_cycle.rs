//! Mode cycling example
//!
//! Steps through every measurement mode, taking one manual reading in each.
//! The whole run is scoped with `with_connection`, so the meter is released
//! even if a step fails.
//!
//! Run with: cargo run --example mode_cycle -- --address AA:BB:CC:DD:EE:FF

use dm40_rust_ble::{Error, MeasurementMode, Multimeter, MultimeterConfig, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,dm40_rust_ble=debug")
        .init();

    println!("DM40 Mode Cycle");
    println!("===============\n");

    let args: Vec<String> = std::env::args().collect();
    let address = args
        .iter()
        .position(|arg| arg == "--address")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .or_else(|| std::env::var("DM40_ADDRESS").ok())
        .ok_or_else(|| Error::InvalidParameter {
            name: "address".to_string(),
            value: "missing, pass --address or set DM40_ADDRESS".to_string(),
        })?;

    let meter = Multimeter::new(MultimeterConfig::new(address)).await?;

    meter
        .with_connection(|meter| {
            Box::pin(async move {
                for mode in MeasurementMode::ALL {
                    let answered = meter.set_mode(mode).await?;
                    // Give the meter time to settle on the new range.
                    tokio::time::sleep(Duration::from_millis(800)).await;

                    let reading = meter.read().await?;
                    println!(
                        "{:<12} ack={:<5} {}",
                        mode.name(),
                        answered,
                        reading
                    );
                }
                Ok(())
            })
        })
        .await?;

    println!("\nDone, connection state: {}", meter.connection_state());
    Ok(())
}
