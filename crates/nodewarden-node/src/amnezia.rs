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

//! AmneziaWG client lifecycle: keypair generation, address allocation,
//! config and table mutation, and `vpn://` link synthesis.

use std::collections::HashMap;
use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rand::rngs::OsRng;
use tracing::{info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use nodewarden_types::link::{self, AwgContainer, ConnectionBundle, ContainerEntry};
use nodewarden_types::{
    AmneziaBackup, ClientTableEntry, CreateClientResult, Protocol, Traffic, UserData, UserDevice,
    UserRecord,
};

use crate::alloc;
use crate::error::NodeError;
use crate::exec::{CommandRunner, NodeShell};
use crate::label;
use crate::store::{ClientsTableStore, WgConfigStore};
use crate::wgconf::{AwgParams, Line, PEER_SECTION, Section, WgConfig};

/// Seconds without a handshake before a peer counts as offline.
pub const ONLINE_WINDOW_SECS: i64 = 180;

pub const DEFAULT_CONTAINER: &str = "amnezia-awg";
pub const DEFAULT_INTERFACE: &str = "wg0";
pub const DEFAULT_CONF_PATH: &str = "/opt/amnezia/awg/wg0.conf";
pub const DEFAULT_CLIENTS_TABLE_PATH: &str = "/opt/amnezia/awg/clientsTable";
pub const DEFAULT_SERVER_PUBLIC_KEY_PATH: &str =
    "/opt/amnezia/awg/wireguard_server_public_key.key";
pub const DEFAULT_PSK_PATH: &str = "/opt/amnezia/awg/wireguard_psk.key";

const DEFAULT_MTU: &str = "1376";
const DEFAULT_KEEPALIVE: &str = "25";
const TRANSPORT: &str = "udp";

#[derive(Debug, Clone)]
pub struct AmneziaSettings {
    pub container: Option<String>,
    pub interface: Option<String>,
    pub conf_path: String,
    pub clients_table_path: String,
    pub server_public_key_path: String,
    pub preshared_key_path: String,
    pub public_host: Option<String>,
    pub description: String,
    pub dns1: String,
    pub dns2: String,
}

impl Default for AmneziaSettings {
    fn default() -> Self {
        Self {
            container: Some(DEFAULT_CONTAINER.to_string()),
            interface: Some(DEFAULT_INTERFACE.to_string()),
            conf_path: DEFAULT_CONF_PATH.to_string(),
            clients_table_path: DEFAULT_CLIENTS_TABLE_PATH.to_string(),
            server_public_key_path: DEFAULT_SERVER_PUBLIC_KEY_PATH.to_string(),
            preshared_key_path: DEFAULT_PSK_PATH.to_string(),
            public_host: None,
            description: "AmneziaWG".to_string(),
            dns1: "1.1.1.1".to_string(),
            dns2: "1.0.0.1".to_string(),
        }
    }
}

/// Fresh WireGuard keypair, base64-encoded `(private, public)`.
pub fn generate_keypair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (
        BASE64.encode(secret.to_bytes()),
        BASE64.encode(public.as_bytes()),
    )
}

#[derive(Debug, Clone)]
pub struct AmneziaEngine<R> {
    config_store: WgConfigStore<R>,
    table: ClientsTableStore<R>,
    settings: AmneziaSettings,
}

impl<R: CommandRunner + Clone> AmneziaEngine<R> {
    pub fn new(runner: R, settings: AmneziaSettings) -> Self {
        let shell = NodeShell::new(runner, settings.container.clone());
        Self {
            config_store: WgConfigStore::new(
                shell.clone(),
                settings.conf_path.clone(),
                settings.interface.clone(),
            ),
            table: ClientsTableStore::new(shell, settings.clients_table_path.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &AmneziaSettings {
        &self.settings
    }

    /// Provision a new peer: keypair, address, config + table mutation,
    /// sync, and the portable connection link.
    #[tracing::instrument(skip(self))]
    pub async fn create_client(
        &self,
        client_name: &str,
        expires_at: Option<i64>,
    ) -> Result<CreateClientResult, NodeError> {
        let (client_private_key, client_id) = generate_keypair();

        let raw = self.config_store.read_config().await?;
        let mut config = WgConfig::parse(&raw);

        let assigned_ip = alloc::first_free_address(&config)?;
        let psk = self
            .config_store
            .read_secret(&self.settings.preshared_key_path)
            .await?;

        let mut peer = Section::new(PEER_SECTION);
        peer.push("PublicKey", client_id.clone());
        if !psk.is_empty() {
            peer.push("PresharedKey", psk.clone());
        }
        peer.push("AllowedIPs", format!("{assigned_ip}/32"));

        // blank separator line before the new stanza
        if let Some(last) = config.sections.last_mut() {
            last.lines.push(Line::Other(String::new()));
        }
        config.push_peer(peer);

        self.config_store.write_config(&config.to_string()).await?;
        self.config_store.sync_config().await?;

        let mut table = self.table.read().await?;
        table.push(ClientTableEntry::new(
            client_id.clone(),
            UserData {
                client_name: Some(client_name.to_string()),
                creation_date: Some(Utc::now().to_rfc3339()),
                expires_at,
            },
        ));
        self.table.write(&table).await?;

        let link = self
            .build_link(
                &config,
                &client_id,
                &client_private_key,
                &assigned_ip,
                &psk,
                client_name,
            )
            .await?;

        info!(client = %client_id, ip = %assigned_ip, "created amneziawg client");
        Ok(CreateClientResult {
            id: client_id,
            config: link,
            protocol: Protocol::Amneziawg,
        })
    }

    /// Rebuild the connection link for an existing peer. The private key is
    /// not stored anywhere, so the rendered config carries an empty one.
    #[tracing::instrument(skip(self))]
    pub async fn client_config(&self, client_id: &str) -> Result<Option<String>, NodeError> {
        let raw = self.config_store.read_config().await?;
        let config = WgConfig::parse(&raw);

        let Some(peer) = config.find_peer(client_id) else {
            return Ok(None);
        };
        let psk = peer.get("PresharedKey").unwrap_or_default().to_string();
        let client_ip = peer
            .get("AllowedIPs")
            .and_then(|v| v.split(',').find_map(|e| e.trim().strip_suffix("/32")))
            .unwrap_or_default()
            .to_string();

        let link = self
            .build_link(&config, client_id, "", &client_ip, &psk, client_id)
            .await?;
        Ok(Some(link))
    }

    /// Live peers joined with table metadata, grouped by display name.
    pub async fn get_users(&self) -> Result<Vec<UserRecord>, NodeError> {
        self.get_users_at(Utc::now().timestamp()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_users_at(&self, now: i64) -> Result<Vec<UserRecord>, NodeError> {
        let dump = self.config_store.read_dump().await?;
        if dump.trim().is_empty() {
            return Ok(Vec::new());
        }

        let table = self.table.read().await?;

        struct Meta {
            username: String,
            device: Option<String>,
            expires_at: Option<i64>,
        }
        let mut meta: HashMap<&str, Meta> = HashMap::new();
        for entry in &table {
            let Some(id) = entry.id() else { continue };
            let Some(name) = entry
                .user_data
                .as_ref()
                .and_then(|u| u.client_name.as_deref())
            else {
                continue;
            };
            let (username, device) = label::split_label(name);
            meta.insert(
                id,
                Meta {
                    username,
                    device,
                    expires_at: entry.expires_at(),
                },
            );
        }

        let mut users: Vec<UserRecord> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for line in dump.lines() {
            let Some(peer) = parse_dump_line(line, now) else {
                continue;
            };
            let (username, name, expires_at) = match meta.get(peer.id.as_str()) {
                Some(m) => (m.username.clone(), m.device.clone(), m.expires_at),
                // peers without metadata keep their public key as the name
                None => (peer.id.clone(), None, None),
            };

            let device = UserDevice {
                id: peer.id,
                name,
                allowed_ips: peer.allowed_ips,
                last_handshake: peer.last_handshake,
                traffic: peer.traffic,
                endpoint: peer.endpoint,
                online: peer.online,
                expires_at,
                protocol: Protocol::Amneziawg,
            };

            match by_name.get(&username) {
                Some(&i) => users[i].devices.push(device),
                None => {
                    by_name.insert(username.clone(), users.len());
                    users.push(UserRecord {
                        username,
                        devices: vec![device],
                    });
                }
            }
        }

        Ok(users)
    }

    /// Remove a peer from the table and the config. Returns false (not an
    /// error) when the id is unknown, which makes concurrent deletes safe.
    #[tracing::instrument(skip(self))]
    pub async fn delete_client(&self, client_id: &str) -> Result<bool, NodeError> {
        let mut table = self.table.read().await?;
        let before = table.len();
        table.retain(|entry| entry.id() != Some(client_id));
        if table.len() == before {
            return Ok(false);
        }
        self.table.write(&table).await?;

        let raw = self.config_store.read_config().await?;
        if !raw.trim().is_empty() {
            let mut config = WgConfig::parse(&raw);
            if config.remove_peer(client_id) {
                self.config_store.write_config(&config.to_string()).await?;
                self.config_store.sync_config().await?;
            }
        }

        info!(client = %client_id, "deleted amneziawg client");
        Ok(true)
    }

    /// Set or clear the expiry of a table entry; false when the id is unknown.
    #[tracing::instrument(skip(self))]
    pub async fn update_expires_at(
        &self,
        client_id: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, NodeError> {
        let mut table = self.table.read().await?;
        let updated = match table.iter_mut().find(|e| e.id() == Some(client_id)) {
            Some(entry) => {
                entry.user_data.get_or_insert_with(UserData::default).expires_at = expires_at;
                true
            }
            None => false,
        };
        if !updated {
            return Ok(false);
        }
        self.table.write(&table).await?;
        Ok(true)
    }

    /// Delete every table entry whose expiry has passed. Individual failures
    /// are logged and skipped; the count reflects successful removals only.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self, now: i64) -> Result<usize, NodeError> {
        let table = self.table.read().await?;
        let expired: Vec<String> = table
            .iter()
            .filter(|e| e.expires_at().is_some_and(|t| t <= now))
            .filter_map(|e| e.id().map(str::to_string))
            .collect();

        let mut removed = 0;
        for id in expired {
            match self.delete_client(&id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(client = %id, error = %err, "failed to remove expired client");
                }
            }
        }
        Ok(removed)
    }

    /// Number of peer stanzas currently in the config file.
    pub async fn count_peers(&self) -> Result<usize, NodeError> {
        let raw = self.config_store.read_config().await?;
        Ok(WgConfig::parse(&raw).peer_count())
    }

    #[tracing::instrument(skip(self))]
    pub async fn export_backup(&self) -> Result<AmneziaBackup, NodeError> {
        Ok(AmneziaBackup {
            wg_config: self.config_store.read_config().await?,
            preshared_key: self
                .config_store
                .read_secret(&self.settings.preshared_key_path)
                .await?,
            server_public_key: self
                .config_store
                .read_secret(&self.settings.server_public_key_path)
                .await?,
            clients: self.table.read().await?,
        })
    }

    #[tracing::instrument(skip(self, data))]
    pub async fn import_backup(&self, data: &AmneziaBackup) -> Result<(), NodeError> {
        self.config_store.write_config(&data.wg_config).await?;
        self.table.write(&data.clients).await?;
        self.config_store
            .write_secret(&self.settings.preshared_key_path, &data.preshared_key)
            .await?;
        self.config_store
            .write_secret(&self.settings.server_public_key_path, &data.server_public_key)
            .await?;
        self.config_store.sync_config().await?;
        info!(clients = data.clients.len(), "imported amneziawg backup");
        Ok(())
    }

    async fn build_link(
        &self,
        config: &WgConfig,
        client_id: &str,
        client_private_key: &str,
        client_ip: &str,
        psk: &str,
        description_subject: &str,
    ) -> Result<String, NodeError> {
        let server_public_key = self
            .config_store
            .read_secret(&self.settings.server_public_key_path)
            .await?;
        let listen_port = config.listen_port();
        let params = config.awg_params();
        let host = self.settings.public_host.clone().unwrap_or_default();

        let client_conf = render_client_config(
            &params,
            client_private_key,
            client_ip,
            &server_public_key,
            psk,
            &host,
            listen_port,
        );
        let last_config = last_config_json(
            &params,
            client_id,
            client_ip,
            client_private_key,
            &client_conf,
            &host,
            listen_port,
            psk,
            &server_public_key,
        )?;

        let container = self
            .settings
            .container
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER.to_string());

        let bundle = ConnectionBundle {
            containers: vec![ContainerEntry {
                container: container.clone(),
                awg: Some(AwgContainer {
                    jc: params.jc,
                    jmin: params.jmin,
                    jmax: params.jmax,
                    s1: params.s1,
                    s2: params.s2,
                    h1: params.h1,
                    h2: params.h2,
                    h3: params.h3,
                    h4: params.h4,
                    last_config,
                    port: listen_port.map(|p| p.to_string()).unwrap_or_default(),
                    transport_proto: TRANSPORT.to_string(),
                }),
                xray: None,
            }],
            default_container: container,
            description: format!("{} | {}", self.settings.description, description_subject),
            dns1: self.settings.dns1.clone(),
            dns2: self.settings.dns2.clone(),
            host_name: host,
        };

        Ok(link::encode_link(&bundle)?)
    }
}

/// Client-side config text: the mirror image of the server's stanzas, with
/// `$PRIMARY_DNS`/`$SECONDARY_DNS` left for the client app to substitute.
fn render_client_config(
    params: &AwgParams,
    private_key: &str,
    client_ip: &str,
    server_public_key: &str,
    psk: &str,
    host: &str,
    listen_port: Option<u16>,
) -> String {
    let mut conf = String::new();
    writeln!(conf, "[Interface]").unwrap();
    writeln!(conf, "Address = {client_ip}/32").unwrap();
    writeln!(conf, "DNS = $PRIMARY_DNS, $SECONDARY_DNS").unwrap();
    writeln!(conf, "PrivateKey = {private_key}").unwrap();
    writeln!(conf, "Jc = {}", params.jc).unwrap();
    writeln!(conf, "Jmin = {}", params.jmin).unwrap();
    writeln!(conf, "Jmax = {}", params.jmax).unwrap();
    writeln!(conf, "S1 = {}", params.s1).unwrap();
    writeln!(conf, "S2 = {}", params.s2).unwrap();
    writeln!(conf, "H1 = {}", params.h1).unwrap();
    writeln!(conf, "H2 = {}", params.h2).unwrap();
    writeln!(conf, "H3 = {}", params.h3).unwrap();
    writeln!(conf, "H4 = {}", params.h4).unwrap();
    writeln!(conf).unwrap();
    writeln!(conf, "[Peer]").unwrap();
    writeln!(conf, "PublicKey = {server_public_key}").unwrap();
    writeln!(conf, "PresharedKey = {psk}").unwrap();
    writeln!(conf, "AllowedIPs = 0.0.0.0/0, ::/0").unwrap();
    if let Some(port) = listen_port
        && !host.is_empty()
    {
        writeln!(conf, "Endpoint = {host}:{port}").unwrap();
    }
    writeln!(conf, "PersistentKeepalive = {DEFAULT_KEEPALIVE}").unwrap();
    conf
}

#[allow(clippy::too_many_arguments)]
fn last_config_json(
    params: &AwgParams,
    client_id: &str,
    client_ip: &str,
    client_private_key: &str,
    client_conf: &str,
    host: &str,
    listen_port: Option<u16>,
    psk: &str,
    server_public_key: &str,
) -> Result<String, serde_json::Error> {
    let mut doc = serde_json::json!({
        "Jc": params.jc,
        "Jmin": params.jmin,
        "Jmax": params.jmax,
        "S1": params.s1,
        "S2": params.s2,
        "H1": params.h1,
        "H2": params.h2,
        "H3": params.h3,
        "H4": params.h4,
        "allowed_ips": ["0.0.0.0/0", "::/0"],
        "clientId": client_id,
        "client_ip": client_ip,
        "client_priv_key": client_private_key,
        "client_pub_key": client_id,
        "config": client_conf,
        "hostName": host,
        "mtu": DEFAULT_MTU,
        "persistent_keep_alive": DEFAULT_KEEPALIVE,
        "psk_key": psk,
        "server_pub_key": server_public_key,
    });
    if let Some(port) = listen_port {
        doc["port"] = serde_json::json!(port);
    }
    serde_json::to_string_pretty(&doc)
}

struct DumpPeer {
    id: String,
    endpoint: Option<String>,
    allowed_ips: Vec<String>,
    last_handshake: i64,
    traffic: Traffic,
    online: bool,
}

/// One `wg show <iface> dump` line. The interface header line and malformed
/// or placeholder rows fail the field checks and are skipped.
fn parse_dump_line(line: &str, now: i64) -> Option<DumpPeer> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 8 {
        return None;
    }
    if !(parts[2].contains(':') || parts[3].contains('/')) {
        return None;
    }

    let endpoint = parts[2];
    let endpoint =
        (!endpoint.is_empty() && endpoint != "(none)").then(|| endpoint.to_string());

    let allowed_ips = parts[3]
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut last_handshake = parts[4].parse::<i64>().unwrap_or(0);
    // some builds report nanoseconds
    if last_handshake > 1_000_000_000_000 {
        last_handshake /= 1_000_000_000;
    }

    let received = parts[5].parse().unwrap_or(0);
    let sent = parts[6].parse().unwrap_or(0);
    let online = last_handshake > 0 && now - last_handshake < ONLINE_WINDOW_SECS;

    Some(DumpPeer {
        id: parts[0].to_string(),
        endpoint,
        allowed_ips,
        last_handshake,
        traffic: Traffic { received, sent },
        online,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn params() -> AwgParams {
        AwgParams {
            jc: "4".into(),
            jmin: "10".into(),
            jmax: "50".into(),
            s1: "116".into(),
            s2: "61".into(),
            h1: "1".into(),
            h2: "2".into(),
            h3: "3".into(),
            h4: "4".into(),
        }
    }

    #[test]
    fn keypair_is_base64_and_unique() {
        let (private_a, public_a) = generate_keypair();
        let (_, public_b) = generate_keypair();
        assert_eq!(BASE64.decode(&private_a).unwrap().len(), 32);
        assert_eq!(BASE64.decode(&public_a).unwrap().len(), 32);
        assert_ne!(public_a, public_b);
    }

    #[test]
    fn client_config_mirrors_server_stanzas() {
        let conf = render_client_config(
            &params(),
            "priv",
            "10.8.1.2",
            "serverpub",
            "psk",
            "vpn.example.com",
            Some(38291),
        );
        assert!(conf.starts_with("[Interface]\nAddress = 10.8.1.2/32\n"));
        assert!(conf.contains("DNS = $PRIMARY_DNS, $SECONDARY_DNS\n"));
        assert!(conf.contains("Jc = 4\n"));
        assert!(conf.contains("[Peer]\nPublicKey = serverpub\n"));
        assert!(conf.contains("AllowedIPs = 0.0.0.0/0, ::/0\n"));
        assert!(conf.contains("Endpoint = vpn.example.com:38291\n"));
        assert!(conf.ends_with("PersistentKeepalive = 25\n"));
    }

    #[test_case("", Some(38291), false; "no host")]
    #[test_case("vpn.example.com", None, false; "no port")]
    #[test_case("vpn.example.com", Some(38291), true; "host and port")]
    fn endpoint_line_requires_host_and_port(host: &str, port: Option<u16>, present: bool) {
        let conf = render_client_config(&params(), "k", "10.8.1.2", "s", "p", host, port);
        assert_eq!(conf.contains("Endpoint ="), present);
    }

    #[test]
    fn last_config_omits_port_when_unknown() {
        let with = last_config_json(&params(), "id", "ip", "k", "c", "h", Some(1), "p", "s").unwrap();
        let without = last_config_json(&params(), "id", "ip", "k", "c", "h", None, "p", "s").unwrap();
        assert!(with.contains("\"port\": 1"));
        assert!(!without.contains("\"port\""));
    }

    const DUMP_PEER: &str =
        "pk1\tpsk\t203.0.113.9:51820\t10.8.1.2/32\t1700000000\t100\t200\t25";

    #[test]
    fn dump_line_parses_fields() {
        let peer = parse_dump_line(DUMP_PEER, 1700000060).unwrap();
        assert_eq!(peer.id, "pk1");
        assert_eq!(peer.endpoint.as_deref(), Some("203.0.113.9:51820"));
        assert_eq!(peer.allowed_ips, vec!["10.8.1.2/32"]);
        assert_eq!(peer.last_handshake, 1700000000);
        assert_eq!(peer.traffic, Traffic { received: 100, sent: 200 });
        assert!(peer.online);
    }

    #[test]
    fn dump_line_offline_after_window() {
        let peer = parse_dump_line(DUMP_PEER, 1700000000 + ONLINE_WINDOW_SECS).unwrap();
        assert!(!peer.online);
    }

    #[test]
    fn dump_line_normalizes_nanoseconds() {
        let line = "pk1\tpsk\t(none)\t10.8.1.2/32\t1700000000000000000\t0\t0\toff";
        let peer = parse_dump_line(line, 1700000060).unwrap();
        assert_eq!(peer.last_handshake, 1700000000);
        assert_eq!(peer.endpoint, None);
    }

    #[test_case("privkey\tpubkey\t51820\toff"; "interface header line")]
    #[test_case("pk\tpsk\tnocolon\tnoslash\t0\t0\t0\t25"; "placeholder fields")]
    #[test_case(""; "blank")]
    #[test_case("pk\tpsk\t1.2.3.4:1\t10.8.1.2/32\t0\t0\t0"; "too few fields")]
    fn dump_line_rejects_malformed(line: &str) {
        assert!(parse_dump_line(line, 0).is_none());
    }
}
