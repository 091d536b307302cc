//! List the devices present on this machine and draw from the preferred one.
//!
//! Run with: `RUST_LOG=debug cargo run -p rngdevices-core --example basic [config.json]`

use rngdevices_core::{CancelToken, Registry, RngConfig, SourceKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => RngConfig::from_path(path.as_ref())?,
        None => RngConfig::default(),
    };
    let registry = Registry::new(config);

    println!("rngdevices-core {}", rngdevices_core::VERSION);
    for kind in SourceKind::ALL {
        let device = registry.device(kind);
        let mark = if device.is_device_available() { "yes" } else { "no" };
        println!("  {:<12} {:<4} {}", kind.to_string(), mark, device.info().description);
    }

    let device = registry.preferred();
    let cancel = CancelToken::new();
    let bytes = device.get_bytes_async(16, &cancel).await?;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    println!("\n{} bytes: {hex}", device.info().name);
    println!("d6 roll:   {}", device.random_int_async(1, 7, &cancel).await?);
    println!("u32:       {}", device.random_u32_async(&cancel).await?);

    registry.close_all_async().await?;
    Ok(())
}
