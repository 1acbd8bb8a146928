//! Tests against a real Lambda controller.
//!
//! Ignored by default. Run with a controller attached:
//!
//! ```bash
//! TEST_PORT=/dev/ttyUSB0 cargo test --features hardware-tests -- --ignored
//! ```

#![cfg(feature = "hardware-tests")]

use lambda_link::devices::{FilterWheel, HubOptions, LambdaHub, Shutter, ShutterId, WheelId};
use lambda_link::port::{PortConfiguration, PortId, SerialPortTransport};
use lambda_link::protocol::CommandEngine;
use lambda_link::registry::PortRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_port() -> Option<PortId> {
    match std::env::var("TEST_PORT") {
        Ok(name) if !name.trim().is_empty() => Some(PortId::new(name.trim())),
        _ => {
            println!("Skipping: TEST_PORT not set");
            None
        }
    }
}

fn connect(port: &PortId) -> Arc<LambdaHub> {
    let transport = SerialPortTransport::new();
    transport
        .open(port, &PortConfiguration::default())
        .expect("failed to open TEST_PORT");
    let engine = CommandEngine::with_registry(Arc::new(transport), Arc::new(PortRegistry::new()));
    let hub = Arc::new(LambdaHub::with_options(port.clone(), engine, HubOptions::default()));
    hub.initialize().expect("controller did not come online");
    hub
}

#[test]
#[ignore] // Requires hardware
fn test_real_controller_identifies() {
    let Some(port) = test_port() else { return };
    let hub = connect(&port);

    let info = hub.controller_info();
    println!("controller {} (id {:?}) on {port}", info.controller_type, info.id);

    let status = hub.status().expect("status query failed");
    println!("status block: {status:02x?}");
}

#[test]
#[ignore] // Requires hardware
fn test_real_wheel_cycles_positions() {
    let Some(port) = test_port() else { return };
    let hub = connect(&port);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);

    for position in [1, 5, 0] {
        let started = Instant::now();
        wheel.set_position(position).expect("wheel move failed");
        println!("position {position} in {:?}", started.elapsed());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}

#[test]
#[ignore] // Requires hardware
fn test_real_shutter_toggles() {
    let Some(port) = test_port() else { return };
    let hub = connect(&port);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    shutter.set_open(true).expect("open failed");
    assert!(shutter.is_open());
    shutter.set_open(false).expect("close failed");
    assert!(!shutter.is_open());
}
