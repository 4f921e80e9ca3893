// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hostscout engine
//!
//! Discovery and host-registry engine for a console that supervises remote
//! management-agent hosts. Agents are found over UDP (interface broadcast,
//! IPv6 multicast, loopback, and unicast to known or explicitly given
//! addresses) and reconciled into one registry record per logical host.
//!
//! # Architecture
//!
//! ```text
//! Console (one task, owns everything)
//! +-- DiscoveryTransport   (UDP endpoints, query sends, inbound filter)
//! +-- wire codec           (QUERY / ANNOUNCE / STATUS / REDIRECT)
//! +-- HostRegistry         (id -> HostRecord, row-level change events)
//! +-- ConfigStore          (SQLite key/value: registry save/load)
//! ```
//!
//! Inbound datagrams flow transport -> codec -> registry; the registry
//! queues `RegistryEvent`s which the console loop drains and fans out to
//! subscribers after each mutating call. Queries are fire-and-forget: the
//! only reliability mechanism is the repetition of the scheduled queries.
//!
//! # Example
//!
//! ```ignore
//! use hostscout::{Console, ConsoleConfig, SqliteStore};
//!
//! let config = ConsoleConfig::default();
//! let store = SqliteStore::new(&config.store_path)?;
//! let (console, handle, mut events) = Console::bind(config, store).await?;
//! tokio::spawn(console.run());
//! handle.load().await;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

pub mod config;
pub mod console;
pub mod iface;
pub mod interchange;
pub mod persist;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod transport;

pub use config::{ConfigError, ConsoleConfig};
pub use console::{Console, ConsoleCommand, ConsoleError, ConsoleHandle};
pub use persist::{ConfigStore, SqliteStore};
pub use protocol::{DecodeError, DiscoveryMessage};
pub use record::{HostAddress, HostRecord};
pub use registry::{Column, HostFields, HostRegistry, RegistryEvent};
pub use transport::DiscoveryTransport;

/// Well-known UDP port agents listen on for discovery queries.
pub const DEFAULT_DISCOVERY_PORT: u16 = 7430;
