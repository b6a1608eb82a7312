//! vpn-conductor - Connection orchestration core for a VPN client
//!
//! Decides, tracks and exposes the lifecycle of a tunnel connection, picks the
//! server a profile resolves to, and keeps a short history of recently used
//! profiles. The actual tunnel work sits behind the [`TunnelDriver`] trait.
//!
//! # Architecture
//!
//! - `catalog`: Immutable server snapshots, catalog sources and the updater
//! - `selection`: Pure server selection over a snapshot
//! - `profile`: Profiles, default connection, recents and persistence
//! - `monitor`: Connection state machine and its observers
//! - `tunnel`: Tunnel driver boundary and a simulated driver
//! - `home`: Quick connect, connect-to-country and default-country actions
//! - `session`: Composition root and interactive session
//! - `config`: Configuration file handling (TOML)

pub mod catalog;
pub mod config;
pub mod home;
pub mod monitor;
pub mod profile;
pub mod selection;
pub mod session;
pub mod tunnel;

pub use catalog::{ServerCatalog, Snapshot, Tier};
pub use config::Config;
pub use monitor::{ConnectionMonitor, ConnectionState, MonitorBuilder, VpnStatus};
pub use profile::{Profile, ServerWrapper};
pub use tunnel::TunnelDriver;
