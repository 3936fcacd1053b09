//! Example showing how to drive an Anova cooker over Bluetooth Low Energy (BLE)
//!
//! Usage:
//!   cargo run --example btle --features ble
//!   cargo run --example btle --features ble -- 42.5

use anova::{Anova, AnovaEvent, Config, TemperatureUnit};
use futures::StreamExt;
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with DEBUG level for anova
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("anova=debug".parse()?),
        )
        .init();

    // Optional target temperature in Celsius from the command line
    let target: Option<f32> = env::args().nth(1).map(|t| t.parse()).transpose()?;

    println!("Scanning for Anova devices...");
    let devices = Anova::ble_discover(&Config::default(), false).await?;
    for device in &devices {
        println!("  - {} ({:?})", device.address, device.name);
    }

    let anova = Anova::ble(Config::default()).await?;
    println!("Connected via BLE!");

    // Print stale notifications as they are dropped
    let mut events = anova.event_stream();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let AnovaEvent::StaleNotification { payload } = event {
                println!("(dropped late response: {})", payload);
            }
        }
    });

    println!("Status: {}", anova.get_status().await?);
    println!("Unit: {}", anova.get_unit().await?);
    println!("Current temperature: {}", anova.get_current_temperature().await?);
    println!("Target temperature: {}", anova.get_target_temperature().await?);
    println!("Timer: {}", anova.get_timer().await?);

    if let Some(target) = target {
        anova.set_unit(TemperatureUnit::Celsius).await?;
        println!(
            "Set target: {}",
            anova.set_temperature(target, TemperatureUnit::Celsius).await?
        );
    }

    // Raw commands are passed through as typed
    match anova.execute_raw("read date", Duration::from_secs(2)).await {
        Ok(date) => println!("Date: {}", date),
        Err(e) => println!("read date failed: {}", e),
    }

    println!("\nDisconnecting...");
    anova.disconnect().await?;

    Ok(())
}
