//! Example: Print the filesystem tree of a simulated device
//!
//! Usage:
//!   cargo run --example tree -- [PATH]
//!
//! Set `RUST_LOG=mtplib=debug` to see device calls and resource handling.

mod cli;

use cli::{init_tracing, positionals, simulated_phone, usage_and_exit};
use mtplib::{DeviceError, DeviceSession, Result, SessionConfig};

const USAGE: &str = "Usage: cargo run --example tree -- [PATH]";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = positionals(USAGE);
    if args.len() > 1 {
        usage_and_exit(USAGE);
    }

    let session = DeviceSession::spawn(simulated_phone()?, SessionConfig::default());

    println!("Scanning...");
    let devices = session.scan().await?;
    let device = devices.first().ok_or(DeviceError::NoDeviceFound)?;
    println!("Found: {}", device.display_name());

    let info = session.open(device, "tree").await?;
    for space in session.free_space().await? {
        println!(
            "Storage {:#x}: {:.2} GB / {:.2} GB ({:.1}% used)",
            space.storage_id,
            space.used() as f64 / 1_073_741_824.0,
            space.total as f64 / 1_073_741_824.0,
            space.usage_percent()
        );
    }

    match args.first() {
        Some(path) => match session.stat(path).await? {
            Some(node) if node.is_folder() => {
                for entry in session.entries_of(&node).await? {
                    let kind = if entry.is_folder() { "dir " } else { "file" };
                    println!("  {} {} {}", kind, entry.name, format_size(entry.size));
                }
            }
            Some(node) => println!("{} ({})", node.full_path(), format_size(node.size)),
            None => eprintln!("Not found: {}", path),
        },
        None => {
            println!("\nGeneration {}:", info.generation);
            print!("{}", session.dump().await?);
        }
    }

    session.close().await;
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1_048_576 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1_073_741_824 {
        format!("{:.1}MB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{:.2}GB", bytes as f64 / 1_073_741_824.0)
    }
}
