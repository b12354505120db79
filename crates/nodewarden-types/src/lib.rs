//! nodewarden-types: Shared API type definitions for the nodewarden ecosystem.
//!
//! This crate contains the data models exchanged between the API server, the
//! node-side engines, and client applications, plus the `vpn://` connection
//! link codec in [`link`].

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod link;

/// A VPN backend running on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// AmneziaWG (obfuscated WireGuard).
    Amneziawg,
    /// Xray with VLESS + Reality.
    Xray,
}

impl Protocol {
    /// Stable lowercase name, as used on the wire and in env configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amneziawg => "amneziawg",
            Self::Xray => "xray",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amneziawg" => Ok(Self::Amneziawg),
            "xray" => Ok(Self::Xray),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Traffic counters for a single peer, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traffic {
    /// Bytes received by the server from this peer.
    pub received: u64,
    /// Bytes sent by the server to this peer.
    pub sent: u64,
}

/// One connected device of a user, joined from runtime state and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDevice {
    /// Backend-specific client id (WireGuard public key or Xray UUID).
    pub id: String,
    /// Device label parsed from the `"Name [Device]"` naming convention.
    pub name: Option<String>,
    /// Allowed IPs assigned to the peer (empty for Xray clients).
    pub allowed_ips: Vec<String>,
    /// Unix timestamp of the last handshake, 0 when never seen.
    pub last_handshake: i64,
    /// Transfer counters.
    pub traffic: Traffic,
    /// Remote endpoint as observed by the server, if any.
    pub endpoint: Option<String>,
    /// Whether the peer handshaked recently enough to be considered online.
    pub online: bool,
    /// Unix timestamp after which the client is revoked by the expiry sweep.
    pub expires_at: Option<i64>,
    /// Backend this device belongs to.
    pub protocol: Protocol,
}

/// A logical user: one display name grouping one or more devices, possibly
/// across protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Display name (the base part of `"Name [Device]"`).
    pub username: String,
    /// All devices belonging to this user.
    pub devices: Vec<UserDevice>,
}

/// Result of provisioning a new client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientResult {
    /// Backend-specific client id.
    pub id: String,
    /// Portable `vpn://` connection string.
    pub config: String,
    /// Backend the client was created under.
    pub protocol: Protocol,
}

/// Operator-supplied metadata attached to a peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Display name, optionally carrying a `[Device]` suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Creation timestamp, stored as an opaque string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    /// Unix timestamp after which the client is revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// One row of the clients table side-file, keyed by peer public key.
///
/// Historical files may carry the key under `publicKey` instead of
/// `clientId`; [`ClientTableEntry::id`] resolves either.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTableEntry {
    /// Peer public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Legacy spelling of the peer public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Operator metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserData>,
}

impl ClientTableEntry {
    /// Build a fresh entry for a newly provisioned peer.
    pub fn new(client_id: impl Into<String>, user_data: UserData) -> Self {
        Self {
            client_id: Some(client_id.into()),
            public_key: None,
            user_data: Some(user_data),
        }
    }

    /// Effective client id: `clientId` or the legacy `publicKey`, skipping
    /// empty values. `None` means the entry is invalid and ignored.
    pub fn id(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.public_key.as_deref().filter(|s| !s.is_empty()))
    }

    /// Expiry timestamp, if one is set.
    pub fn expires_at(&self) -> Option<i64> {
        self.user_data.as_ref().and_then(|u| u.expires_at)
    }
}

/// AmneziaWG secret and config bundle for backup/restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmneziaBackup {
    /// Full WireGuard-style config text.
    pub wg_config: String,
    /// Shared preshared key.
    pub preshared_key: String,
    /// Server public key.
    pub server_public_key: String,
    /// Clients table rows.
    pub clients: Vec<ClientTableEntry>,
}

/// Xray secret and config bundle for backup/restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrayBackup {
    /// Full Xray server config JSON text.
    pub server_config: String,
    /// Default client UUID.
    pub uuid: String,
    /// Reality public key.
    pub public_key: String,
    /// Reality private key.
    pub private_key: String,
    /// Reality short id.
    pub short_id: String,
}

/// Versioned disaster-recovery payload covering every enabled backend.
///
/// On import, each protocol listed in `protocols` must come with its
/// matching bundle or the import is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerBackup {
    /// When the backup was generated.
    pub generated_at: DateTime<Utc>,
    /// Identity of the node the backup was taken from.
    pub server_id: Option<String>,
    /// Backends covered by this payload.
    pub protocols: Vec<Protocol>,
    /// AmneziaWG bundle, present iff `protocols` contains it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amnezia: Option<AmneziaBackup>,
    /// Xray bundle, present iff `protocols` contains it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xray: Option<XrayBackup>,
}

/// Aggregated node identity and capacity report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Operator-assigned node id.
    pub id: String,
    /// Deployment region label.
    pub region: String,
    /// Load-balancing weight.
    pub weight: u32,
    /// Configured peer cap, 0 when unlimited.
    pub max_peers: u32,
    /// Current device count across all enabled backends.
    pub total_peers: u32,
    /// Enabled backends.
    pub protocols: Vec<Protocol>,
}

/// Basic host load metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLoad {
    /// Seconds since host boot.
    pub uptime_secs: u64,
    /// 1, 5 and 15 minute load averages.
    pub load_avg: [f64; 3],
    /// Total physical memory in bytes.
    pub mem_total_bytes: u64,
    /// Available memory in bytes.
    pub mem_available_bytes: u64,
}
