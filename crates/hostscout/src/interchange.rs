// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Portable host-list import/export.
//!
//! The interchange document carries, per host, its id, name, MAC, and an
//! address-to-port map:
//!
//! ```json
//! { "hostList": [
//!   { "hostId": "h1", "name": "Server1", "MAC": "00:11:22:33:44:55",
//!     "address": { "10.0.0.5": 7430, "172.16.0.9": 7431 } }
//! ] }
//! ```
//!
//! A legacy variant has no `hostId` and a bare string `address`; such
//! entries are keyed by that address, at the well-known port.
//!
//! Import merges strictly additively into a possibly non-empty registry:
//! an entry whose id already exists refreshes that record's MAC and nothing
//! else; a new entry becomes a record with empty role/version/platform/
//! status/os that acquires a live identity only once its agent actually
//! answers a query. A document that does not parse is rejected whole -- no
//! partial merge.

use crate::record::HostRecord;
use crate::registry::HostRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct HostListDoc {
    #[serde(rename = "hostList", default)]
    host_list: Vec<HostEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostEntry {
    #[serde(rename = "hostId", default, skip_serializing_if = "Option::is_none")]
    host_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(rename = "MAC", default)]
    mac: String,
    #[serde(default)]
    address: AddressField,
}

/// Map of address string to port in the current format; a bare address
/// string in the legacy format.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AddressField {
    Map(serde_json::Map<String, serde_json::Value>),
    Legacy(String),
}

impl Default for AddressField {
    fn default() -> Self {
        Self::Map(serde_json::Map::new())
    }
}

fn is_loopback(address: &str) -> bool {
    address
        .parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Serialize the registry to the interchange document.
///
/// Loopback addresses are never exported -- they are meaningless outside
/// the originating machine.
pub fn export_hosts(registry: &HostRegistry) -> Result<String> {
    let host_list = registry
        .records()
        .map(|rec| {
            let mut address = serde_json::Map::new();
            for pair in &rec.addresses {
                if !is_loopback(&pair.address) {
                    address.insert(pair.address.clone(), pair.port.into());
                }
            }
            HostEntry {
                host_id: Some(rec.id.clone()),
                name: rec.name.clone(),
                mac: rec.mac.clone(),
                address: AddressField::Map(address),
            }
        })
        .collect();

    serde_json::to_string_pretty(&HostListDoc { host_list }).context("serializing host list")
}

/// Merge the interchange document into the registry.
///
/// Returns the number of entries applied. The whole document is parsed
/// before anything is merged; a parse failure changes nothing.
pub fn import_hosts(
    doc: &str,
    registry: &mut HostRegistry,
    default_port: u16,
) -> Result<usize> {
    let doc: HostListDoc = serde_json::from_str(doc).context("parsing host list")?;

    let mut applied = 0;
    for entry in doc.host_list {
        let id = match (&entry.host_id, &entry.address) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            // Legacy export: the single address is the identity.
            (_, AddressField::Legacy(address)) if !address.is_empty() => address.clone(),
            _ => continue,
        };

        if registry.get(&id).is_some() {
            // Explicit identity match is trusted for a MAC refresh; nothing
            // else of an existing record is touched.
            registry.set_mac(&id, &entry.mac);
            applied += 1;
            continue;
        }

        let mut rec = HostRecord::new(id);
        rec.name = entry.name.clone();
        rec.mac = entry.mac.clone();
        match &entry.address {
            AddressField::Map(map) => {
                for (address, port) in map.iter().rev() {
                    let port = port.as_u64().and_then(|p| u16::try_from(p).ok());
                    if let Some(port) = port {
                        rec.merge_address(address, port, false);
                    }
                }
            }
            AddressField::Legacy(address) => {
                if !address.is_empty() {
                    rec.merge_address(address, default_port, false);
                }
            }
        }
        registry.insert_record(rec);
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostFields;

    #[test]
    fn test_export_skips_loopback() {
        let mut reg = HostRegistry::new();
        reg.apply_announce("h1", &HostFields::default(), "10.0.0.5", 7430, true);
        reg.apply_announce("h1", &HostFields::default(), "127.0.0.1", 7430, false);
        reg.apply_announce("h1", &HostFields::default(), "::1", 7430, false);
        reg.take_events();

        let doc = export_hosts(&reg).unwrap();
        assert!(doc.contains("10.0.0.5"));
        assert!(!doc.contains("127.0.0.1"));
        assert!(!doc.contains("::1\""));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut reg = HostRegistry::new();
        let fields = HostFields {
            name: "Server1".to_string(),
            mac: "00:11:22:33:44:55".to_string(),
            ..HostFields::default()
        };
        reg.apply_announce("h1", &fields, "10.0.0.5", 7430, true);
        reg.take_events();

        let doc = export_hosts(&reg).unwrap();

        let mut imported = HostRegistry::new();
        assert_eq!(import_hosts(&doc, &mut imported, 7430).unwrap(), 1);

        let rec = imported.get("h1").unwrap();
        assert_eq!(rec.name, "Server1");
        assert_eq!(rec.mac, "00:11:22:33:44:55");
        assert_eq!(rec.addresses.len(), 1);
        assert_eq!(rec.addresses[0].address, "10.0.0.5");
        assert_eq!(rec.addresses[0].port, 7430);
        // Live-only fields start empty until the agent answers.
        assert_eq!(rec.status, "");
        assert_eq!(rec.role, "");
    }

    #[test]
    fn test_import_existing_id_updates_mac_only() {
        let mut reg = HostRegistry::new();
        let fields = HostFields {
            name: "Live name".to_string(),
            role: "fileserver".to_string(),
            status: "up".to_string(),
            ..HostFields::default()
        };
        reg.apply_announce("h1", &fields, "10.0.0.5", 7430, true);
        reg.take_events();

        let doc = r#"{ "hostList": [
            { "hostId": "h1", "name": "Imported name",
              "MAC": "aa:bb:cc:dd:ee:ff", "address": { "172.16.0.9": 7431 } }
        ] }"#;
        assert_eq!(import_hosts(doc, &mut reg, 7430).unwrap(), 1);

        let rec = reg.get("h1").unwrap();
        assert_eq!(rec.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(rec.name, "Live name");
        assert_eq!(rec.role, "fileserver");
        assert_eq!(rec.status, "up");
        // Import never adds addresses to an existing record.
        assert_eq!(rec.addresses.len(), 1);
        assert_eq!(rec.addresses[0].address, "10.0.0.5");
    }

    #[test]
    fn test_import_new_host_reverse_document_order() {
        let doc = r#"{ "hostList": [
            { "hostId": "h1", "name": "Server1", "MAC": "",
              "address": { "10.0.0.5": 7430, "172.16.0.9": 7431 } }
        ] }"#;

        let mut reg = HostRegistry::new();
        import_hosts(doc, &mut reg, 7430).unwrap();

        let rec = reg.get("h1").unwrap();
        assert_eq!(rec.addresses[0].address, "172.16.0.9");
        assert_eq!(rec.addresses[0].port, 7431);
        assert_eq!(rec.addresses[1].address, "10.0.0.5");
    }

    #[test]
    fn test_import_legacy_single_address() {
        let doc = r#"{ "hostList": [
            { "name": "Old exporter", "MAC": "", "address": "192.168.1.40" }
        ] }"#;

        let mut reg = HostRegistry::new();
        import_hosts(doc, &mut reg, 7430).unwrap();

        let rec = reg.get("192.168.1.40").unwrap();
        assert_eq!(rec.name, "Old exporter");
        assert_eq!(rec.addresses[0].address, "192.168.1.40");
        assert_eq!(rec.addresses[0].port, 7430);
    }

    #[test]
    fn test_import_parse_failure_rejects_whole_document() {
        let mut reg = HostRegistry::new();
        reg.apply_announce("h1", &HostFields::default(), "10.0.0.5", 7430, true);
        reg.take_events();

        assert!(import_hosts("{ not json", &mut reg, 7430).is_err());
        assert!(import_hosts(r#"{ "hostList": 42 }"#, &mut reg, 7430).is_err());
        assert_eq!(reg.len(), 1);
        assert!(reg.take_events().is_empty());
    }

    #[test]
    fn test_import_never_removes() {
        let mut reg = HostRegistry::new();
        reg.apply_announce("h1", &HostFields::default(), "10.0.0.5", 7430, true);
        reg.take_events();

        import_hosts(r#"{ "hostList": [] }"#, &mut reg, 7430).unwrap();
        assert_eq!(reg.len(), 1);
    }
}
