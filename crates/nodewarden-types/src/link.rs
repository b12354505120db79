// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The `vpn://` connection link codec.
//!
//! A link carries a JSON envelope describing every container a client may
//! connect to. The payload framing is an external interchange contract and
//! must round-trip byte-for-byte with compatible client apps:
//!
//! ```text
//! payload = u32_be(len(json_bytes)) + deflate(json_bytes, level = 8)
//! link    = "vpn://" + base64_urlsafe_nopad(payload)
//! ```

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

/// URI scheme prefix of every connection link.
pub const LINK_SCHEME: &str = "vpn://";

/// Top-level envelope carried inside a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBundle {
    /// Per-container connection material.
    pub containers: Vec<ContainerEntry>,
    /// Name of the container a client should pick by default.
    pub default_container: String,
    /// Human-readable description shown in the client app.
    pub description: String,
    /// Primary DNS resolver.
    pub dns1: String,
    /// Secondary DNS resolver.
    pub dns2: String,
    /// Public hostname or address of the node.
    pub host_name: String,
}

/// Connection material for one container; exactly one protocol object is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEntry {
    /// Container name, e.g. `amnezia-awg`.
    pub container: String,
    /// AmneziaWG connection parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awg: Option<AwgContainer>,
    /// Xray connection parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xray: Option<XrayContainer>,
}

/// AmneziaWG parameters: the junk-packet set plus the rendered client config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwgContainer {
    /// Junk packet count.
    #[serde(rename = "Jc")]
    pub jc: String,
    /// Junk packet minimum size.
    #[serde(rename = "Jmin")]
    pub jmin: String,
    /// Junk packet maximum size.
    #[serde(rename = "Jmax")]
    pub jmax: String,
    /// Init packet junk size.
    #[serde(rename = "S1")]
    pub s1: String,
    /// Response packet junk size.
    #[serde(rename = "S2")]
    pub s2: String,
    /// Init packet magic header.
    #[serde(rename = "H1")]
    pub h1: String,
    /// Response packet magic header.
    #[serde(rename = "H2")]
    pub h2: String,
    /// Underload packet magic header.
    #[serde(rename = "H3")]
    pub h3: String,
    /// Transport packet magic header.
    #[serde(rename = "H4")]
    pub h4: String,
    /// Full client-side configuration document, JSON-encoded.
    pub last_config: String,
    /// Server listen port, as text.
    pub port: String,
    /// Transport protocol, always `udp`.
    pub transport_proto: String,
}

/// Xray VLESS + Reality parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayContainer {
    /// Full client-side configuration document, JSON-encoded.
    pub last_config: String,
    /// Server port, as text.
    pub port: String,
    /// Reality camouflage server name.
    pub site: String,
    /// Reality public key.
    pub public_key: String,
    /// Reality short id.
    pub short_id: String,
    /// Transport protocol, always `tcp`.
    pub transport_proto: String,
}

/// Failures while encoding or decoding a link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The string does not start with `vpn://`.
    #[error("missing {LINK_SCHEME} scheme")]
    MissingScheme,

    /// The base64 body is malformed.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is shorter than the 4-byte length header.
    #[error("payload truncated before length header")]
    TruncatedHeader,

    /// Compression or decompression failed.
    #[error("deflate error: {0}")]
    Deflate(#[from] std::io::Error),

    /// The inflated size disagrees with the length header.
    #[error("length header says {expected} bytes, inflated {actual}")]
    LengthMismatch {
        /// Byte count promised by the header.
        expected: usize,
        /// Byte count actually inflated.
        actual: usize,
    },

    /// The inflated bytes are not a valid envelope.
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frame and compress raw bytes into the link payload (without the scheme).
pub fn encode_payload(raw: &[u8]) -> Result<String, LinkError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(8));
    encoder.write_all(raw)?;
    let compressed = encoder.finish()?;

    let mut framed = Vec::with_capacity(4 + compressed.len());
    framed.extend_from_slice(&(raw.len() as u32).to_be_bytes());
    framed.extend_from_slice(&compressed);

    Ok(URL_SAFE_NO_PAD.encode(framed))
}

/// Reverse [`encode_payload`], validating the length header.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>, LinkError> {
    let framed = URL_SAFE_NO_PAD.decode(encoded)?;
    if framed.len() < 4 {
        return Err(LinkError::TruncatedHeader);
    }

    let mut header = [0u8; 4];
    header.copy_from_slice(&framed[..4]);
    let expected = u32::from_be_bytes(header) as usize;

    let mut raw = Vec::with_capacity(expected);
    ZlibDecoder::new(&framed[4..]).read_to_end(&mut raw)?;

    if raw.len() != expected {
        return Err(LinkError::LengthMismatch {
            expected,
            actual: raw.len(),
        });
    }
    Ok(raw)
}

/// Serialize an envelope into a full `vpn://` connection string.
pub fn encode_link(bundle: &ConnectionBundle) -> Result<String, LinkError> {
    let json = serde_json::to_vec(bundle)?;
    Ok(format!("{LINK_SCHEME}{}", encode_payload(&json)?))
}

/// Parse a full `vpn://` connection string back into its envelope.
pub fn decode_link(link: &str) -> Result<ConnectionBundle, LinkError> {
    let encoded = link.strip_prefix(LINK_SCHEME).ok_or(LinkError::MissingScheme)?;
    let raw = decode_payload(encoded)?;
    Ok(serde_json::from_slice(&raw)?)
}
