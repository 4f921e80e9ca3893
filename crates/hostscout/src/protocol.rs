// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery wire codec.
//!
//! Plain JSON datagrams with a top-level `command` tag. The console sends
//! exactly one message (`QUERY`, no payload) and understands three answers:
//!
//! - `ANNOUNCE` -- full identity broadcast; any field may be empty
//! - `STATUS`   -- lightweight heartbeat, id + status only
//! - `REDIRECT` -- the answering process fronts another address/port
//!
//! Anything that does not parse as a JSON object is not a message; a valid
//! object with an unrecognized tag is ignored entirely. Neither case is
//! surfaced to the user.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Discovery protocol message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum DiscoveryMessage {
    /// Query for agents. The only outbound message; carries no payload.
    #[serde(rename = "QUERY")]
    Query,

    /// Full identity broadcast from an agent.
    #[serde(rename = "ANNOUNCE")]
    Announce {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        role: String,
        #[serde(default)]
        version: String,
        #[serde(default)]
        platform: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        os: String,
        #[serde(default)]
        mac: String,
    },

    /// Heartbeat that updates status and last-heard only.
    #[serde(rename = "STATUS")]
    Status {
        #[serde(default)]
        id: String,
        #[serde(default)]
        status: String,
    },

    /// The answering process is fronting another address/port. A non-zero
    /// `port` overrides the well-known port for this host.
    #[serde(rename = "REDIRECT")]
    Redirect {
        #[serde(default)]
        id: String,
        #[serde(default)]
        address: String,
        #[serde(default)]
        port: u16,
        #[serde(default)]
        name: String,
        #[serde(default)]
        role: String,
        #[serde(default)]
        version: String,
        #[serde(default)]
        platform: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        os: String,
    },
}

/// Decode failure. Both variants are silently dropped by callers; the
/// distinction exists for tests and debug logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not a JSON object with a string `command` field.
    Malformed,
    /// Valid document, unrecognized command tag.
    UnknownCommand(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "not a discovery message"),
            Self::UnknownCommand(tag) => write!(f, "unknown command: {}", tag),
        }
    }
}

impl std::error::Error for DecodeError {}

/// The serialized `QUERY` message. Built once, reused for every send.
pub fn query_bytes() -> &'static [u8] {
    static QUERY: OnceLock<Vec<u8>> = OnceLock::new();
    QUERY.get_or_init(|| {
        serde_json::to_vec(&DiscoveryMessage::Query).expect("QUERY message serializes")
    })
}

/// Decode an inbound datagram into a typed message.
pub fn decode(payload: &[u8]) -> Result<DiscoveryMessage, DecodeError> {
    let doc: serde_json::Value =
        serde_json::from_slice(payload).map_err(|_| DecodeError::Malformed)?;

    let tag = doc
        .get("command")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::Malformed)?;
    if !matches!(tag, "QUERY" | "ANNOUNCE" | "STATUS" | "REDIRECT") {
        return Err(DecodeError::UnknownCommand(tag.to_string()));
    }

    serde_json::from_value(doc).map_err(|_| DecodeError::Malformed)
}

/// Identity-by-address compatibility fallback.
///
/// Older agents never send an id; they are keyed by the textual form of
/// their source address instead. An address-keyed host whose address later
/// changes shows up as a second row -- a known limitation of the legacy
/// format, isolated here so it can be dropped once all agents are upgraded.
pub fn effective_id(id: &str, source_address: &str) -> String {
    if id.is_empty() {
        source_address.to_string()
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_bytes_roundtrip() {
        let bytes = query_bytes();
        assert_eq!(decode(bytes).unwrap(), DiscoveryMessage::Query);
        // Cached bytes are stable across calls.
        assert_eq!(bytes.as_ptr(), query_bytes().as_ptr());
    }

    #[test]
    fn test_decode_announce() {
        let json = br#"{"command":"ANNOUNCE","id":"h1","name":"Server1","status":"idle"}"#;
        match decode(json).unwrap() {
            DiscoveryMessage::Announce {
                id, name, status, mac, ..
            } => {
                assert_eq!(id, "h1");
                assert_eq!(name, "Server1");
                assert_eq!(status, "idle");
                assert_eq!(mac, "");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_status() {
        let json = br#"{"command":"STATUS","id":"h1","status":"3 apps running"}"#;
        match decode(json).unwrap() {
            DiscoveryMessage::Status { id, status } => {
                assert_eq!(id, "h1");
                assert_eq!(status, "3 apps running");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_redirect() {
        let json = br#"{"command":"REDIRECT","id":"h2","address":"172.16.0.9","port":7431}"#;
        match decode(json).unwrap() {
            DiscoveryMessage::Redirect {
                id, address, port, ..
            } => {
                assert_eq!(id, "h2");
                assert_eq!(address, "172.16.0.9");
                assert_eq!(port, 7431);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_redirect_port_defaults_to_zero() {
        let json = br#"{"command":"REDIRECT","id":"h2"}"#;
        match decode(json).unwrap() {
            DiscoveryMessage::Redirect { port, .. } => assert_eq!(port, 0),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_command() {
        let json = br#"{"command":"WAKEUP","id":"h1"}"#;
        assert_eq!(
            decode(json),
            Err(DecodeError::UnknownCommand("WAKEUP".to_string()))
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(decode(b"not json at all"), Err(DecodeError::Malformed));
        assert_eq!(decode(b"[1,2,3]"), Err(DecodeError::Malformed));
        assert_eq!(decode(br#"{"command":42}"#), Err(DecodeError::Malformed));
        assert_eq!(decode(br#"{"id":"h1"}"#), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_effective_id_fallback() {
        assert_eq!(effective_id("h1", "192.168.1.9"), "h1");
        assert_eq!(effective_id("", "192.168.1.9"), "192.168.1.9");
    }
}
