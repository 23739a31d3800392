#![allow(dead_code)] // Not every test binary uses every fixture.

use std::time::Duration;

use mtplib::transport::StorageInfo;
use mtplib::{DeviceInfo, DeviceSession, MemoryTransport, SessionConfig, SessionInfo, StorageId};

pub const INTERNAL: StorageId = 0x0001_0001;
pub const CARD: StorageId = 0x0002_0001;

pub fn phone() -> DeviceInfo {
    DeviceInfo {
        vendor_id: 0x18d1,
        product_id: 0x4ee1,
        bus: 2,
        address: 5,
        serial: Some("HT7A1B2C3D".to_string()),
        manufacturer: "Google".to_string(),
        model: "Pixel".to_string(),
    }
}

/// A bus with one phone: internal storage and an SD card, both mostly empty.
pub fn bus() -> MemoryTransport {
    let bus = MemoryTransport::new();
    bus.attach(
        phone(),
        vec![
            StorageInfo {
                storage_id: INTERNAL,
                description: "Internal storage".to_string(),
                capacity: 32 << 30,
                free_space: 16 << 30,
            },
            StorageInfo {
                storage_id: CARD,
                description: "SD card".to_string(),
                capacity: 8 << 30,
                free_space: 8 << 30,
            },
        ],
    );
    bus
}

/// A bus with one phone exposing a single, empty storage.
pub fn empty_phone_bus() -> MemoryTransport {
    let bus = MemoryTransport::new();
    bus.attach(
        phone(),
        vec![StorageInfo {
            storage_id: INTERNAL,
            description: "Internal storage".to_string(),
            capacity: 32 << 30,
            free_space: 16 << 30,
        }],
    );
    bus
}

/// Like [`bus`], with some content on the internal storage.
pub fn populated_bus() -> MemoryTransport {
    let bus = bus();
    let music = bus.add_folder(INTERNAL, None, "Music").unwrap();
    bus.add_file(INTERNAL, Some(music), "intro.mp3", 4_000).unwrap();
    let albums = bus.add_folder(INTERNAL, Some(music), "Albums").unwrap();
    bus.add_file(INTERNAL, Some(albums), "track01.flac", 30_000).unwrap();
    bus.add_file(INTERNAL, None, "readme.txt", 12).unwrap();
    bus.add_folder(CARD, None, "DCIM").unwrap();
    bus
}

pub fn spawn(bus: &MemoryTransport) -> DeviceSession {
    DeviceSession::spawn(bus.clone(), SessionConfig::default())
}

/// Spawn a session on `bus` and open its phone.
pub async fn open(bus: &MemoryTransport) -> (DeviceSession, SessionInfo) {
    let session = spawn(bus);
    let devices = session.scan().await.unwrap();
    let info = session.open(&devices[0], "test_library").await.unwrap();
    (session, info)
}

/// Wait until the bus has no outstanding native resources.
pub async fn wait_for_release(bus: &MemoryTransport) -> bool {
    for _ in 0..200 {
        if bus.outstanding_resources() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
