// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console core: the one task that owns the registry, the transport, and
//! the settings store.
//!
//! Everything that mutates the registry -- inbound datagrams, the four
//! schedules (broadcast, loopback, known-host, staleness), and user
//! commands -- is dispatched from a single `select!` loop, so there is no
//! concurrent-write hazard and no locking. Registry notifications are
//! drained after every mutating call and fanned out over a channel;
//! consumers observe them strictly after the mutation has completed.

use crate::config::ConsoleConfig;
use crate::iface;
use crate::interchange;
use crate::persist::{self, ConfigStore};
use crate::protocol::{self, DiscoveryMessage};
use crate::record::HostRecord;
use crate::registry::{HostFields, HostRegistry, RegistryEvent};
use crate::transport::{self, DiscoveryTransport};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

/// Commands from the UI layer.
#[derive(Debug)]
pub enum ConsoleCommand {
    /// Query one explicit address immediately.
    QueryAddress(SocketAddr),
    /// Query a block of consecutive IPv4 addresses (clamped to 256).
    QueryRange { start: Ipv4Addr, count: u32 },
    /// Enable or disable the scheduled broadcast query. Answers are
    /// received and processed either way.
    SetAutoBroadcast(bool),
    Erase {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    ClearAll,
    SetPreferredAddress {
        id: String,
        address: String,
        port: u16,
    },
    RemoveAddress {
        id: String,
        address: String,
        port: u16,
    },
    Save {
        reply: oneshot::Sender<bool>,
    },
    Load {
        reply: oneshot::Sender<bool>,
    },
    Export {
        reply: oneshot::Sender<Option<String>>,
    },
    Import {
        doc: String,
        reply: oneshot::Sender<bool>,
    },
    /// Copy of the current registry rows, in row order.
    Snapshot {
        reply: oneshot::Sender<Vec<HostRecord>>,
    },
}

/// Cloneable handle to a running console.
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<ConsoleCommand>,
    shutdown: Arc<Notify>,
}

impl ConsoleHandle {
    pub async fn query_address(&self, dest: SocketAddr) {
        let _ = self.commands.send(ConsoleCommand::QueryAddress(dest)).await;
    }

    pub async fn query_range(&self, start: Ipv4Addr, count: u32) {
        let _ = self
            .commands
            .send(ConsoleCommand::QueryRange { start, count })
            .await;
    }

    pub async fn set_auto_broadcast(&self, enabled: bool) {
        let _ = self
            .commands
            .send(ConsoleCommand::SetAutoBroadcast(enabled))
            .await;
    }

    /// Erase one record. Returns `false` for an unknown id.
    pub async fn erase(&self, id: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Erase {
                id: id.to_string(),
                reply: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn clear_all(&self) {
        let _ = self.commands.send(ConsoleCommand::ClearAll).await;
    }

    pub async fn set_preferred_address(&self, id: &str, address: &str, port: u16) {
        let _ = self
            .commands
            .send(ConsoleCommand::SetPreferredAddress {
                id: id.to_string(),
                address: address.to_string(),
                port,
            })
            .await;
    }

    pub async fn remove_address(&self, id: &str, address: &str, port: u16) {
        let _ = self
            .commands
            .send(ConsoleCommand::RemoveAddress {
                id: id.to_string(),
                address: address.to_string(),
                port,
            })
            .await;
    }

    /// Save the registry to the settings store.
    pub async fn save(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Save { reply: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Replace the registry with the saved records.
    pub async fn load(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Load { reply: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Export the registry as a portable host-list document.
    pub async fn export(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Export { reply: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Merge a portable host-list document into the registry.
    pub async fn import(&self, doc: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Import {
                doc: doc.to_string(),
                reply: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Copy of the current registry rows, in row order.
    pub async fn snapshot(&self) -> Vec<HostRecord> {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(ConsoleCommand::Snapshot { reply: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the console loop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Console error types.
#[derive(Debug)]
pub enum ConsoleError {
    Bind(String),
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(s) => write!(f, "Bind error: {}", s),
        }
    }
}

impl std::error::Error for ConsoleError {}

/// The console core. Owns every mutable part of the engine; see the module
/// docs for the dispatch model.
pub struct Console<S: ConfigStore> {
    config: ConsoleConfig,
    registry: HostRegistry,
    transport: DiscoveryTransport,
    store: S,
    auto_broadcast: bool,
    commands: mpsc::Receiver<ConsoleCommand>,
    events: mpsc::UnboundedSender<RegistryEvent>,
    shutdown: Arc<Notify>,
}

impl<S: ConfigStore> Console<S> {
    /// Bind the discovery endpoints and assemble the console.
    ///
    /// Returns the console (drive it with [`Console::run`]), a cloneable
    /// command handle, and the registry notification stream.
    pub async fn bind(
        config: ConsoleConfig,
        store: S,
    ) -> Result<
        (
            Self,
            ConsoleHandle,
            mpsc::UnboundedReceiver<RegistryEvent>,
        ),
        ConsoleError,
    > {
        let transport = DiscoveryTransport::bind(config.bind_address, config.port)
            .map_err(|e| ConsoleError::Bind(e.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        let auto_broadcast = config.auto_broadcast;
        let console = Self {
            config,
            registry: HostRegistry::new(),
            transport,
            store,
            auto_broadcast,
            commands: command_rx,
            events: event_tx,
            shutdown: shutdown.clone(),
        };
        let handle = ConsoleHandle {
            commands: command_tx,
            shutdown,
        };

        Ok((console, handle, event_rx))
    }

    /// Local address of the discovery endpoint.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Run the console loop until shutdown.
    pub async fn run(mut self) {
        let mut broadcast_timer = tokio::time::interval(self.config.broadcast_interval());
        let mut loopback_timer = tokio::time::interval(self.config.loopback_interval());
        let mut known_host_timer = tokio::time::interval(self.config.known_host_interval());
        let mut stale_timer = tokio::time::interval(self.config.stale_check_interval());

        info!(
            "console running on port {} (auto-search {})",
            self.config.port,
            if self.auto_broadcast { "on" } else { "off" }
        );

        loop {
            tokio::select! {
                _ = broadcast_timer.tick() => {
                    if self.auto_broadcast {
                        self.broadcast_query().await;
                    }
                }
                _ = loopback_timer.tick() => {
                    self.transport.send_loopback().await;
                }
                _ = known_host_timer.tick() => {
                    self.query_known_hosts().await;
                }
                _ = stale_timer.tick() => {
                    self.registry.check_staleness(self.config.stale_after_secs);
                    self.flush_events();
                }
                result = self.transport.recv() => {
                    match result {
                        Ok((payload, source)) => {
                            self.handle_datagram(&payload, source);
                            self.flush_events();
                        }
                        Err(e) => warn!("receive error: {}", e),
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            self.handle_command(command).await;
                            self.flush_events();
                        }
                        None => break,
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        info!("console stopped");
    }

    async fn broadcast_query(&self) {
        match iface::list_interfaces() {
            Ok(interfaces) => self.transport.send_broadcast(&interfaces).await,
            Err(e) => debug!("interface enumeration failed: {}", e),
        }
    }

    /// Query every address recorded for every known host. This reaches
    /// hosts that cannot answer broadcasts, e.g. across a VPN.
    async fn query_known_hosts(&self) {
        let mut targets: Vec<SocketAddr> = Vec::new();
        for rec in self.registry.records() {
            for pair in &rec.addresses {
                if let Ok(ip) = pair.address.parse::<IpAddr>() {
                    let port = if pair.port != 0 { pair.port } else { self.config.port };
                    targets.push(SocketAddr::new(ip, port));
                }
            }
        }
        for dest in targets {
            self.transport.send_to(dest).await;
        }
    }

    fn handle_datagram(&mut self, payload: &[u8], source: SocketAddr) {
        let message = match protocol::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping datagram from {}: {}", source, e);
                return;
            }
        };

        let (source_address, preferred) = transport::format_source(source.ip());

        match message {
            // Queries are what we send; another console's query is not an
            // answer (and neither is our own loopback query echoing back).
            DiscoveryMessage::Query => {}

            DiscoveryMessage::Announce {
                id,
                name,
                role,
                version,
                platform,
                status,
                os,
                mac,
            } => {
                let id = protocol::effective_id(&id, &source_address);
                let fields = HostFields {
                    name,
                    role,
                    version,
                    platform,
                    status,
                    os,
                    mac,
                };
                self.registry.apply_announce(
                    &id,
                    &fields,
                    &source_address,
                    self.config.port,
                    preferred,
                );
            }

            DiscoveryMessage::Status { id, status } => {
                let id = protocol::effective_id(&id, &source_address);
                self.registry.apply_status(&id, &status);
            }

            DiscoveryMessage::Redirect {
                id,
                address,
                port,
                name,
                role,
                version,
                platform,
                status,
                os,
            } => {
                let id = protocol::effective_id(&id, &source_address);
                let fields = HostFields {
                    name,
                    role,
                    version,
                    platform,
                    status,
                    os,
                    mac: String::new(),
                };
                let port = if port != 0 { port } else { self.config.port };
                self.registry.apply_redirect(
                    &id,
                    &fields,
                    &address,
                    &source_address,
                    port,
                    preferred,
                );
            }
        }
    }

    async fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::QueryAddress(dest) => {
                self.transport.send_to(dest).await;
            }
            ConsoleCommand::QueryRange { start, count } => {
                self.transport.send_range(start, count).await;
            }
            ConsoleCommand::SetAutoBroadcast(enabled) => {
                info!("auto-search {}", if enabled { "enabled" } else { "disabled" });
                self.auto_broadcast = enabled;
            }
            ConsoleCommand::Erase { id, reply } => {
                let _ = reply.send(self.registry.erase(&id));
            }
            ConsoleCommand::ClearAll => {
                self.registry.clear();
            }
            ConsoleCommand::SetPreferredAddress { id, address, port } => {
                self.registry.set_preferred_address(&id, &address, port);
            }
            ConsoleCommand::RemoveAddress { id, address, port } => {
                self.registry.remove_address(&id, &address, port);
            }
            ConsoleCommand::Save { reply } => {
                let result = persist::save_registry(&self.store, &self.registry);
                if let Err(e) = &result {
                    warn!("saving registry failed: {:#}", e);
                }
                let _ = reply.send(result.is_ok());
            }
            ConsoleCommand::Load { reply } => {
                let result = persist::load_registry(&self.store, &mut self.registry);
                if let Err(e) = &result {
                    warn!("loading registry failed: {:#}", e);
                }
                let _ = reply.send(result.is_ok());
            }
            ConsoleCommand::Export { reply } => {
                let doc = match interchange::export_hosts(&self.registry) {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        warn!("exporting host list failed: {:#}", e);
                        None
                    }
                };
                let _ = reply.send(doc);
            }
            ConsoleCommand::Import { doc, reply } => {
                let result = interchange::import_hosts(&doc, &mut self.registry, self.config.port);
                match &result {
                    Ok(applied) => info!("imported {} host entries", applied),
                    Err(e) => warn!("importing host list failed: {:#}", e),
                }
                let _ = reply.send(result.is_ok());
            }
            ConsoleCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.records().cloned().collect());
            }
        }
    }

    fn flush_events(&mut self) {
        for event in self.registry.take_events() {
            if self.events.send(event).is_err() {
                // No subscriber; notifications are droppable.
                break;
            }
        }
    }
}
