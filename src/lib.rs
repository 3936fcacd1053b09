//! Anova - Rust library for controlling Anova precision cookers
//!
//! Bluetooth-only cookers accept short text commands and answer later on a
//! notification channel that carries no request id. This library turns that
//! stream into ordinary awaitable calls: commands from concurrent tasks are
//! sent one at a time, and each caller gets exactly the response to its own
//! command, or a timeout.
//!
//! # BLE Example
//!
//! Requires the `ble` feature.
//!
//! ```no_run
//! # #[cfg(feature = "ble")]
//! # async fn run() -> Result<(), anova::Error> {
//! use anova::{Anova, Config, TemperatureUnit};
//!
//! // Discover and connect to the first cooker in range
//! let anova = Anova::ble(Config::default()).await?;
//!
//! anova.set_unit(TemperatureUnit::Celsius).await?;
//! anova.set_temperature(42.0, TemperatureUnit::Celsius).await?;
//! anova.start().await?;
//! println!("Current temperature: {}", anova.get_current_temperature().await?);
//! anova.stop().await?;
//!
//! anova.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom transports
//!
//! Any open channel can drive the client: implement [`Transport`] for the
//! write side and hand every inbound notification to
//! [`Anova::reader`]`().handle_notification(..)`. Pass the task doing that
//! to [`Anova::attach`] so it is stopped with the client.

pub mod command;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reader;

mod anova;

#[cfg(feature = "ble")]
pub use anova::ble::DiscoveredDevice;
pub use anova::Anova;
pub use command::{Command, CommandBuilder, Operation, Temperature, TemperatureUnit};
pub use config::Config;
pub use connection::{ChannelTransport, OutboundWrite, Transport};
pub use correlator::{Correlator, Delivery};
pub use error::Error;
pub use events::AnovaEvent;
pub use reader::NotificationReader;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;
