//! Raw command example
//!
//! Sends a hex-encoded frame to the meter and prints whatever comes back.
//! Useful for exploring commands the library does not wrap.
//!
//! Run with: cargo run --example raw_command -- --address AA:BB:CC:DD:EE:FF af0503090040
//!
//! Without a frame the data-read command is sent.

use dm40_rust_ble::protocol::{decode, READ_DATA_FRAME};
use dm40_rust_ble::{Error, Multimeter, MultimeterConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,dm40_rust_ble=trace")
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let address = match args.iter().position(|arg| arg == "--address") {
        Some(i) if i + 1 < args.len() => {
            let address = args.remove(i + 1);
            args.remove(i);
            Some(address)
        }
        _ => std::env::var("DM40_ADDRESS").ok(),
    }
    .ok_or_else(|| Error::InvalidParameter {
        name: "address".to_string(),
        value: "missing, pass --address or set DM40_ADDRESS".to_string(),
    })?;

    let frame = if args.is_empty() {
        READ_DATA_FRAME.to_vec()
    } else {
        let joined: String = args.concat();
        hex::decode(&joined).map_err(|e| Error::InvalidParameter {
            name: "frame".to_string(),
            value: format!("{joined}: {e}"),
        })?
    };

    let meter = Multimeter::new(MultimeterConfig::new(address)).await?;
    meter.connect().await?;

    println!("-> {}", hex::encode(&frame));
    match meter.send_raw(frame).await? {
        Some(response) => {
            println!("<- {} ({} bytes)", response.hex, response.bytes.len());
            let reading = decode(&response.bytes);
            if reading.is_present() {
                println!("   decodes as {}", reading);
            }
        }
        None => println!("<- (no response)"),
    }

    meter.disconnect().await;
    Ok(())
}
