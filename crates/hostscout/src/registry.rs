// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Authoritative host table.
//!
//! All mutation paths funnel through `HostRegistry`: inbound discovery
//! messages, the staleness scan, and the manual console commands. Rows are
//! ordered by the lexicographic order of the host id, and every mutation
//! queues a row-level `RegistryEvent` which the owner drains with
//! [`HostRegistry::take_events`] once the mutating call has returned --
//! notification consumers can therefore never re-enter the registry while
//! a mutation is still on the stack.

use crate::record::HostRecord;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::{SystemTime, UNIX_EPOCH};

/// Table columns, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Column {
    Address,
    Name,
    Role,
    Version,
    Platform,
    Status,
    LastHeard,
    Os,
    Mac,
}

/// Row-level change notification.
///
/// `row` is the position of the record in id order at the time the event
/// was queued. `RowChanged` carries the contiguous span of changed columns;
/// consumers that repaint whole rows may ignore the span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    RowInserted { row: usize },
    RowChanged { row: usize, first: Column, last: Column },
    RowRemoved { row: usize },
    Reset,
}

/// Identity fields carried by an ANNOUNCE or REDIRECT message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFields {
    pub name: String,
    pub role: String,
    pub version: String,
    pub platform: String,
    pub status: String,
    pub os: String,
    pub mac: String,
}

/// The authoritative in-memory host table, keyed and ordered by id.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: BTreeMap<String, HostRecord>,
    pending: Vec<RegistryEvent>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl HostRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Row index of `id` in id order.
    ///
    /// Well-defined for absent ids too: the sorted position the id would be
    /// inserted at, so insert notifications can reference a valid future row.
    pub fn row_index(&self, id: &str) -> usize {
        self.hosts
            .range::<str, _>((Bound::Unbounded, Bound::Excluded(id)))
            .count()
    }

    /// Apply an ANNOUNCE message.
    pub fn apply_announce(
        &mut self,
        id: &str,
        fields: &HostFields,
        source_address: &str,
        port: u16,
        preferred: bool,
    ) {
        self.apply_update(id, fields, None, source_address, port, preferred);
    }

    /// Apply a REDIRECT message. `redirect_address`, when non-empty, becomes
    /// the record's display-only override address.
    pub fn apply_redirect(
        &mut self,
        id: &str,
        fields: &HostFields,
        redirect_address: &str,
        source_address: &str,
        port: u16,
        preferred: bool,
    ) {
        self.apply_update(
            id,
            fields,
            Some(redirect_address),
            source_address,
            port,
            preferred,
        );
    }

    fn apply_update(
        &mut self,
        id: &str,
        fields: &HostFields,
        redirect_address: Option<&str>,
        source_address: &str,
        port: u16,
        preferred: bool,
    ) {
        let now = now_secs();
        let row = self.row_index(id);

        if let Some(rec) = self.hosts.get_mut(id) {
            let mut changed: Vec<Column> = Vec::new();

            if rec.merge_address(source_address, port, preferred) {
                changed.push(Column::Address);
            }

            // name/role/version/platform/status/os are compared independently
            // and overwritten whenever different; mac only by a non-empty value.
            let updates: [(&String, &mut String, Column); 6] = [
                (&fields.name, &mut rec.name, Column::Name),
                (&fields.role, &mut rec.role, Column::Role),
                (&fields.version, &mut rec.version, Column::Version),
                (&fields.platform, &mut rec.platform, Column::Platform),
                (&fields.status, &mut rec.status, Column::Status),
                (&fields.os, &mut rec.os, Column::Os),
            ];
            for (incoming, current, column) in updates {
                if *incoming != *current {
                    *current = incoming.clone();
                    changed.push(column);
                }
            }
            if !fields.mac.is_empty() && fields.mac != rec.mac {
                rec.mac = fields.mac.clone();
                changed.push(Column::Mac);
            }

            if let Some(addr) = redirect_address {
                if !addr.is_empty() {
                    rec.host_address = Some(addr.to_string());
                }
            }

            if now > rec.last_heard {
                rec.last_heard = now;
                changed.push(Column::LastHeard);
            }
            rec.needs_stale_notice = true;

            if let (Some(first), Some(last)) =
                (changed.iter().min().copied(), changed.iter().max().copied())
            {
                self.pending.push(RegistryEvent::RowChanged { row, first, last });
            }
        } else {
            let mut rec = HostRecord::new(id);
            rec.name = fields.name.clone();
            rec.role = fields.role.clone();
            rec.version = fields.version.clone();
            rec.platform = fields.platform.clone();
            rec.status = fields.status.clone();
            rec.os = fields.os.clone();
            rec.mac = fields.mac.clone();
            if let Some(addr) = redirect_address {
                if !addr.is_empty() {
                    rec.host_address = Some(addr.to_string());
                }
            }
            rec.merge_address(source_address, port, preferred);
            rec.last_heard = now;
            rec.needs_stale_notice = true;

            self.hosts.insert(id.to_string(), rec);
            self.pending.push(RegistryEvent::RowInserted { row });
        }
    }

    /// Apply a STATUS heartbeat. A heartbeat for an unknown id never creates
    /// a record.
    pub fn apply_status(&mut self, id: &str, status: &str) {
        let now = now_secs();
        let row = self.row_index(id);

        if let Some(rec) = self.hosts.get_mut(id) {
            rec.status = status.to_string();
            if now > rec.last_heard {
                rec.last_heard = now;
            }
            rec.needs_stale_notice = true;
            self.pending.push(RegistryEvent::RowChanged {
                row,
                first: Column::Status,
                last: Column::Status,
            });
        }
    }

    /// Scan all records for staleness.
    ///
    /// A record that has not been heard from within `threshold_secs` and
    /// still carries its stale-notice flag gets exactly one last-heard
    /// column notification (the UI shades the row); the flag is cleared so
    /// the notice is not repeated until the record is updated again. Records
    /// are never removed here -- staleness is a display hint, not a TTL.
    pub fn check_staleness(&mut self, threshold_secs: u64) {
        let now = now_secs();
        let mut stale: Vec<usize> = Vec::new();

        for (row, rec) in self.hosts.values_mut().enumerate() {
            if rec.needs_stale_notice && now.saturating_sub(rec.last_heard) > threshold_secs {
                rec.needs_stale_notice = false;
                stale.push(row);
            }
        }
        for row in stale {
            self.pending.push(RegistryEvent::RowChanged {
                row,
                first: Column::LastHeard,
                last: Column::LastHeard,
            });
        }
    }

    /// Remove one record. Returns `false` if the id is unknown.
    pub fn erase(&mut self, id: &str) -> bool {
        let row = self.row_index(id);
        if self.hosts.remove(id).is_some() {
            self.pending.push(RegistryEvent::RowRemoved { row });
            true
        } else {
            false
        }
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.hosts.clear();
        self.pending.push(RegistryEvent::Reset);
    }

    /// Move the matching (address, port) pair of `id` to the front of its
    /// address list. No-op if the id or the pair is absent.
    pub fn set_preferred_address(&mut self, id: &str, address: &str, port: u16) -> bool {
        let row = self.row_index(id);
        let Some(rec) = self.hosts.get_mut(id) else {
            return false;
        };
        if rec.set_preferred_address(address, port) {
            self.pending.push(RegistryEvent::RowChanged {
                row,
                first: Column::Address,
                last: Column::Address,
            });
            true
        } else {
            false
        }
    }

    /// Delete the matching (address, port) pair of `id` if present.
    pub fn remove_address(&mut self, id: &str, address: &str, port: u16) -> bool {
        let row = self.row_index(id);
        let Some(rec) = self.hosts.get_mut(id) else {
            return false;
        };
        if rec.remove_address(address, port) {
            self.pending.push(RegistryEvent::RowChanged {
                row,
                first: Column::Address,
                last: Column::Address,
            });
            true
        } else {
            false
        }
    }

    /// Insert a fully-built record (import path). Returns `false` if the id
    /// already exists; existing records are never replaced this way.
    pub fn insert_record(&mut self, rec: HostRecord) -> bool {
        if self.hosts.contains_key(&rec.id) {
            return false;
        }
        let row = self.row_index(&rec.id);
        self.hosts.insert(rec.id.clone(), rec);
        self.pending.push(RegistryEvent::RowInserted { row });
        true
    }

    /// Overwrite the mac of an existing record with a non-empty value
    /// (import-merge path). Nothing else is touched.
    pub fn set_mac(&mut self, id: &str, mac: &str) -> bool {
        let row = self.row_index(id);
        let Some(rec) = self.hosts.get_mut(id) else {
            return false;
        };
        if !mac.is_empty() && mac != rec.mac {
            rec.mac = mac.to_string();
            self.pending.push(RegistryEvent::RowChanged {
                row,
                first: Column::Mac,
                last: Column::Mac,
            });
        }
        true
    }

    /// Replace the whole table with reconstructed records (load path).
    pub fn restore(&mut self, records: Vec<HostRecord>) {
        self.hosts.clear();
        for rec in records {
            self.hosts.insert(rec.id.clone(), rec);
        }
        self.pending.push(RegistryEvent::Reset);
    }

    /// Drain the queued notifications.
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.pending)
    }

    pub fn get(&self, id: &str) -> Option<&HostRecord> {
        self.hosts.get(id)
    }

    /// Records in row (id) order.
    pub fn records(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
