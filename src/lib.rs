//! # RIC Alarm
//!
//! A Rust client library for raising and clearing alarms against the
//! near-RT RIC Alarm Manager.
//!
//! ## Features
//!
//! - Raise, clear, re-raise and clear-all alarms
//! - Delivery over the platform message bus, with automatic fallback to
//!   the Alarm Manager HTTP API
//! - Static bus routing table written and published at startup
//! - Receiving alarm messages from the bus
//! - Configuration from the platform environment variables
//!
//! ## Example
//!
//! ```rust,no_run
//! use ric_alarm::{RicAlarm, Severity};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let alarmer = RicAlarm::init("my-pod", "my-app");
//!
//!     // Sends made before the bus is up go over HTTP
//!     let _ = tokio::time::timeout(Duration::from_secs(5), alarmer.wait_bus_ready()).await;
//!
//!     let alarm = alarmer.new_alarm(1234, Severity::Major, "Some App data", "eth 0 1");
//!     alarmer.raise(alarm.clone()).await?;
//!     alarmer.reraise(alarm.clone()).await?;
//!     alarmer.clear(alarm).await?;
//!     alarmer.clear_all().await?;
//!     Ok(())
//! }
//! ```

mod bootstrap;
mod bus;
mod client;
mod config;
mod errors;
mod http;
mod loopback;
mod routing;
mod sink;
mod tcp_bus;
mod types;

pub use bus::{BusContext, BusRuntime, BusSink, BusStatus, MessageBuffer, ALARM_MEID};
pub use client::RicAlarm;
pub use config::AlarmConfig;
pub use errors::{AlarmError, Result};
pub use http::{HttpSink, ALARMS_PATH};
pub use loopback::LoopbackBus;
pub use routing::{RouteEntry, RouteTable, DEFAULT_ROUTE_TABLE_PATH};
pub use sink::{deliver_first, AlarmSink};
pub use tcp_bus::TcpBus;
pub use types::{
    Alarm, AlarmAction, AlarmConfigParams, AlarmDefinition, AlarmMessage, Severity,
    ACTIVE_ALARM_EXCEED_MAX_THRESHOLD, ALARM_HISTORY_EXCEED_MAX_THRESHOLD,
    E2_CONNECTION_PROBLEM, RIC_ALARM_QUERY, RIC_ALARM_UPDATE,
};
