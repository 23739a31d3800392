use std::env;
use std::process;

use mtplib::transport::StorageInfo;
use mtplib::{DeviceInfo, MemoryTransport};
use tracing_subscriber::{EnvFilter, fmt};

pub const STORAGE_ID: u32 = 0x0001_0001;

pub fn usage_and_exit(usage: &str) -> ! {
    eprintln!("{usage}");
    process::exit(1);
}

/// Positional arguments, exiting with `usage` on `--help`.
pub fn positionals(usage: &str) -> Vec<String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{usage}");
        process::exit(0);
    }
    args
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mtplib=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

/// A simulated phone with a few folders and files on its internal storage.
pub fn simulated_phone() -> mtplib::Result<MemoryTransport> {
    let bus = MemoryTransport::new();
    bus.attach(
        DeviceInfo {
            vendor_id: 0x18d1,
            product_id: 0x4ee1,
            bus: 1,
            address: 7,
            serial: Some("0123456789ABCDEF".to_string()),
            manufacturer: "Google".to_string(),
            model: "Pixel 7".to_string(),
        },
        vec![StorageInfo {
            storage_id: STORAGE_ID,
            description: "Internal shared storage".to_string(),
            capacity: 128 * 1024 * 1024 * 1024,
            free_space: 64 * 1024 * 1024 * 1024,
        }],
    );

    let music = bus.add_folder(STORAGE_ID, None, "Music")?;
    bus.add_file(STORAGE_ID, Some(music), "Intro.mp3", 4_812_331)?;
    let albums = bus.add_folder(STORAGE_ID, Some(music), "Albums")?;
    bus.add_file(STORAGE_ID, Some(albums), "Track 01.flac", 31_202_112)?;
    let dcim = bus.add_folder(STORAGE_ID, None, "DCIM")?;
    let camera = bus.add_folder(STORAGE_ID, Some(dcim), "Camera")?;
    bus.add_file(STORAGE_ID, Some(camera), "PXL_20240601.jpg", 3_114_020)?;
    bus.add_folder(STORAGE_ID, None, "Download")?;
    Ok(bus)
}
