//! Example: Create and remove folders on a simulated device
//!
//! Usage:
//!   cargo run --example mkdir -- <NAME> [SUBFOLDER]

mod cli;

use cli::{init_tracing, positionals, simulated_phone, usage_and_exit};
use mtplib::{DeviceError, DeviceSession, Result, SessionConfig};

const USAGE: &str = "Usage: cargo run --example mkdir -- <NAME> [SUBFOLDER]";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = positionals(USAGE);
    if args.is_empty() || args.len() > 2 {
        usage_and_exit(USAGE);
    }

    let session = DeviceSession::spawn(simulated_phone()?, SessionConfig::default());
    let devices = session.scan().await?;
    let device = devices.first().ok_or(DeviceError::NoDeviceFound)?;
    let info = session.open(device, "mkdir").await?;
    let root = &info.storages[0].root;

    println!("Creating directory: {}", args[0]);
    let folder = match session.create_folder(root, &args[0]).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("Failed to create directory: {}", e);
            session.close().await;
            return Err(e);
        }
    };
    println!("Path: {}", folder.full_path());
    println!("Handle: {:#x}", folder.object_id);

    if let Some(sub) = args.get(1) {
        let child = session.create_folder(&folder, sub).await?;
        println!("Created {}", child.full_path());
    }

    print!("{}", session.dump().await?);

    println!("Removing {}", folder.full_path());
    session.delete_file_or_folder(&folder).await?;
    let stats = session.resource_stats().await;
    println!(
        "Native resources: {} live ({} bytes), {} acquired, {} released",
        stats.live, stats.live_bytes, stats.acquired, stats.released
    );

    session.close().await;
    Ok(())
}
