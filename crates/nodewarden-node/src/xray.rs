//! Xray (VLESS + Reality) client lifecycle: inbound JSON mutation, container
//! restart on change, traffic stats retrieval, and `vpn://` link synthesis.
//!
//! Unlike WireGuard there is no live-sync primitive here: every mutation of
//! the server config must be followed by a container restart to take effect.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use nodewarden_types::link::{self, ConnectionBundle, ContainerEntry, XrayContainer};
use nodewarden_types::{
    CreateClientResult, Protocol, Traffic, UserDevice, UserRecord, XrayBackup,
};

use crate::error::NodeError;
use crate::exec::{CommandRunner, ExecOpts, NodeShell, shell_quote};

pub const DEFAULT_CONTAINER: &str = "amnezia-xray";
pub const DEFAULT_SERVER_CONFIG_PATH: &str = "/opt/amnezia/xray/server.json";
pub const DEFAULT_UUID_PATH: &str = "/opt/amnezia/xray/xray_uuid.key";
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "/opt/amnezia/xray/xray_public.key";
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "/opt/amnezia/xray/xray_private.key";
pub const DEFAULT_SHORT_ID_PATH: &str = "/opt/amnezia/xray/xray_short_id.key";
pub const DEFAULT_SITE: &str = "www.googletagmanager.com";

const DEFAULT_PORT: u16 = 443;
const DEFAULT_LOCAL_PROXY_PORT: u16 = 10808;
const FLOW: &str = "xtls-rprx-vision";
const FINGERPRINT: &str = "chrome";
const TRANSPORT: &str = "tcp";
const STATS_SERVER: &str = "127.0.0.1:10085";

#[derive(Debug, Clone)]
pub struct XraySettings {
    pub container: Option<String>,
    pub server_config_path: String,
    pub uuid_path: String,
    pub public_key_path: String,
    pub private_key_path: String,
    pub short_id_path: String,
    pub public_host: Option<String>,
    pub site: String,
    pub description: String,
    pub dns1: String,
    pub dns2: String,
}

impl Default for XraySettings {
    fn default() -> Self {
        Self {
            container: Some(DEFAULT_CONTAINER.to_string()),
            server_config_path: DEFAULT_SERVER_CONFIG_PATH.to_string(),
            uuid_path: DEFAULT_UUID_PATH.to_string(),
            public_key_path: DEFAULT_PUBLIC_KEY_PATH.to_string(),
            private_key_path: DEFAULT_PRIVATE_KEY_PATH.to_string(),
            short_id_path: DEFAULT_SHORT_ID_PATH.to_string(),
            public_host: None,
            site: DEFAULT_SITE.to_string(),
            description: "Xray".to_string(),
            dns1: "1.1.1.1".to_string(),
            dns2: "1.0.0.1".to_string(),
        }
    }
}

/// One entry of `inbounds[0].settings.clients`. Unknown keys written by
/// other tooling are preserved through the flattened map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XrayClient {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct XrayEngine<R> {
    shell: NodeShell<R>,
    settings: XraySettings,
}

impl<R: CommandRunner + Clone> XrayEngine<R> {
    pub fn new(runner: R, settings: XraySettings) -> Self {
        Self {
            shell: NodeShell::new(runner, settings.container.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &XraySettings {
        &self.settings
    }

    /// Append a UUID-identified client to the first inbound, restart the
    /// container, and synthesize the connection link.
    #[tracing::instrument(skip(self))]
    pub async fn create_client(
        &self,
        client_name: &str,
        expires_at: Option<i64>,
    ) -> Result<CreateClientResult, NodeError> {
        let client_id = Uuid::new_v4().to_string();

        let mut config = self.read_server_config().await?;
        let mut clients = read_clients(&config)?;

        if clients.iter().any(|c| c.id == client_id) {
            return Err(NodeError::DuplicateClientId(client_id));
        }
        clients.push(XrayClient {
            id: client_id.clone(),
            flow: Some(FLOW.to_string()),
            username: Some(client_name.to_string()),
            expires_at,
            extra: serde_json::Map::new(),
        });

        write_clients(&mut config, &clients)?;
        self.write_server_config(&config).await?;
        self.restart_container().await?;

        let link = self.build_link(&config, &client_id, client_name).await?;

        info!(client = %client_id, "created xray client");
        Ok(CreateClientResult {
            id: client_id,
            config: link,
            protocol: Protocol::Xray,
        })
    }

    /// Rebuild the connection link for an existing client.
    #[tracing::instrument(skip(self))]
    pub async fn client_config(&self, client_id: &str) -> Result<Option<String>, NodeError> {
        let config = self.read_server_config().await?;
        let clients = read_clients(&config)?;

        let Some(client) = clients.iter().find(|c| c.id == client_id) else {
            return Ok(None);
        };
        let subject = client.username.clone().unwrap_or_else(|| client_id.to_string());
        Ok(Some(self.build_link(&config, client_id, &subject).await?))
    }

    /// Configured clients with per-client traffic counters. Clients map 1:1
    /// to user records here; cross-protocol grouping happens upstream.
    #[tracing::instrument(skip(self))]
    pub async fn get_users(&self) -> Result<Vec<UserRecord>, NodeError> {
        let raw = self.read_raw_config().await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let config: Value = serde_json::from_str(&raw)?;
        let clients = read_clients(&config)?;

        let mut users = Vec::with_capacity(clients.len());
        for client in clients {
            let traffic = self.query_traffic(stats_name(&client)).await;
            let username = client
                .username
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| client.id.clone());

            users.push(UserRecord {
                username,
                devices: vec![UserDevice {
                    id: client.id,
                    name: None,
                    allowed_ips: Vec::new(),
                    last_handshake: 0,
                    traffic,
                    endpoint: None,
                    online: false,
                    expires_at: client.expires_at,
                    protocol: Protocol::Xray,
                }],
            });
        }
        Ok(users)
    }

    /// Remove a client by id; false (not an error) when the id is unknown.
    #[tracing::instrument(skip(self))]
    pub async fn delete_client(&self, client_id: &str) -> Result<bool, NodeError> {
        let mut config = self.read_server_config().await?;
        let mut clients = read_clients(&config)?;

        let before = clients.len();
        clients.retain(|c| c.id != client_id);
        if clients.len() == before {
            return Ok(false);
        }

        write_clients(&mut config, &clients)?;
        self.write_server_config(&config).await?;
        self.restart_container().await?;

        info!(client = %client_id, "deleted xray client");
        Ok(true)
    }

    /// Set or clear a client's expiry. Expiry is sweep-enforced metadata the
    /// Xray runtime ignores, so no restart is needed here.
    #[tracing::instrument(skip(self))]
    pub async fn update_expires_at(
        &self,
        client_id: &str,
        expires_at: Option<i64>,
    ) -> Result<bool, NodeError> {
        let mut config = self.read_server_config().await?;
        let mut clients = read_clients(&config)?;

        let Some(client) = clients.iter_mut().find(|c| c.id == client_id) else {
            return Ok(false);
        };
        client.expires_at = expires_at;

        write_clients(&mut config, &clients)?;
        self.write_server_config(&config).await?;
        Ok(true)
    }

    /// Drop every expired client in one pass: one rewrite and one restart
    /// per sweep instead of one restart per deletion.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self, now: i64) -> Result<usize, NodeError> {
        let raw = self.read_raw_config().await?;
        if raw.trim().is_empty() {
            return Ok(0);
        }
        let mut config: Value = serde_json::from_str(&raw)?;
        let mut clients = read_clients(&config)?;

        let before = clients.len();
        clients.retain(|c| !c.expires_at.is_some_and(|t| t <= now));
        let removed = before - clients.len();

        if removed > 0 {
            write_clients(&mut config, &clients)?;
            self.write_server_config(&config).await?;
            self.restart_container().await?;
            info!(removed, "removed expired xray clients");
        }
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    pub async fn export_backup(&self) -> Result<XrayBackup, NodeError> {
        Ok(XrayBackup {
            server_config: self.read_raw_config().await?,
            uuid: self.read_secret(&self.settings.uuid_path).await?,
            public_key: self.read_secret(&self.settings.public_key_path).await?,
            private_key: self.read_secret(&self.settings.private_key_path).await?,
            short_id: self.read_secret(&self.settings.short_id_path).await?,
        })
    }

    /// Write everything verbatim. The next mutating operation restarts the
    /// container, so none is triggered here.
    #[tracing::instrument(skip(self, data))]
    pub async fn import_backup(&self, data: &XrayBackup) -> Result<(), NodeError> {
        self.shell
            .write_file(&self.settings.server_config_path, &data.server_config)
            .await?;
        self.shell.write_file(&self.settings.uuid_path, &data.uuid).await?;
        self.shell
            .write_file(&self.settings.public_key_path, &data.public_key)
            .await?;
        self.shell
            .write_file(&self.settings.private_key_path, &data.private_key)
            .await?;
        self.shell
            .write_file(&self.settings.short_id_path, &data.short_id)
            .await?;
        info!("imported xray backup");
        Ok(())
    }

    /// Number of configured clients; 0 when no config exists yet.
    pub async fn count_clients(&self) -> Result<usize, NodeError> {
        let raw = self.read_raw_config().await?;
        if raw.trim().is_empty() {
            return Ok(0);
        }
        let config: Value = serde_json::from_str(&raw)?;
        Ok(read_clients(&config)?.len())
    }

    async fn read_raw_config(&self) -> Result<String, NodeError> {
        Ok(self.shell.read_file(&self.settings.server_config_path).await?)
    }

    async fn read_server_config(&self) -> Result<Value, NodeError> {
        let raw = self.read_raw_config().await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_server_config(&self, config: &Value) -> Result<(), NodeError> {
        let payload = serde_json::to_string_pretty(config)?;
        self.shell
            .write_file(&self.settings.server_config_path, &payload)
            .await?;
        Ok(())
    }

    async fn read_secret(&self, path: &str) -> Result<String, NodeError> {
        Ok(self.shell.read_file(path).await?.trim().to_string())
    }

    async fn restart_container(&self) -> Result<(), NodeError> {
        let Some(container) = self.shell.container() else {
            return Ok(());
        };
        self.shell
            .run_on_host(&format!("docker restart {container}"), ExecOpts::default())
            .await?;
        Ok(())
    }

    async fn query_traffic(&self, name: &str) -> Traffic {
        Traffic {
            received: self
                .query_stat(&format!("user>>>{name}>>>traffic>>>uplink"))
                .await,
            sent: self
                .query_stat(&format!("user>>>{name}>>>traffic>>>downlink"))
                .await,
        }
    }

    /// One counter from the stats API; any failure degrades to zero.
    async fn query_stat(&self, counter: &str) -> u64 {
        let cmd = format!(
            "xray api stats --server={STATS_SERVER} -name {}",
            shell_quote(counter)
        );
        match self
            .shell
            .run(&cmd, ExecOpts::with_timeout(Duration::from_secs(2)))
            .await
        {
            Ok(out) => parse_stat_value(&out.stdout),
            Err(err) => {
                debug!(counter, error = %err, "stats query failed, assuming zero");
                0
            }
        }
    }

    async fn build_link(
        &self,
        config: &Value,
        client_id: &str,
        description_subject: &str,
    ) -> Result<String, NodeError> {
        let public_key = self.read_secret(&self.settings.public_key_path).await?;
        if public_key.is_empty() {
            return Err(NodeError::MissingSecret("xray public key"));
        }
        let short_id = self.read_secret(&self.settings.short_id_path).await?;
        if short_id.is_empty() {
            return Err(NodeError::MissingSecret("xray short id"));
        }

        let host = self.settings.public_host.clone().unwrap_or_default();
        let port = inbound_port(config).unwrap_or(DEFAULT_PORT);
        let last_config = client_config_json(
            &host,
            port,
            client_id,
            &self.settings.site,
            &public_key,
            &short_id,
        )?;

        let container = self
            .settings
            .container
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER.to_string());

        let bundle = ConnectionBundle {
            containers: vec![ContainerEntry {
                container: container.clone(),
                awg: None,
                xray: Some(XrayContainer {
                    last_config,
                    port: port.to_string(),
                    site: self.settings.site.clone(),
                    public_key,
                    short_id,
                    transport_proto: TRANSPORT.to_string(),
                }),
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

fn stats_name(client: &XrayClient) -> &str {
    match client.username.as_deref() {
        Some(name) if !name.is_empty() => name,
        _ => &client.id,
    }
}

fn read_clients(config: &Value) -> Result<Vec<XrayClient>, NodeError> {
    let first = config
        .get("inbounds")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .ok_or(NodeError::MissingInbound)?;

    let clients = first
        .get("settings")
        .and_then(|s| s.get("clients"))
        .cloned()
        .unwrap_or_else(|| json!([]));
    Ok(serde_json::from_value(clients)?)
}

fn write_clients(config: &mut Value, clients: &[XrayClient]) -> Result<(), NodeError> {
    let first = config
        .get_mut("inbounds")
        .and_then(Value::as_array_mut)
        .and_then(|a| a.first_mut())
        .and_then(Value::as_object_mut)
        .ok_or(NodeError::MissingInbound)?;

    let settings = first
        .entry("settings")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or(NodeError::MissingInbound)?;

    settings.insert("clients".to_string(), serde_json::to_value(clients)?);
    Ok(())
}

fn inbound_port(config: &Value) -> Option<u16> {
    config
        .get("inbounds")?
        .as_array()?
        .first()?
        .get("port")?
        .as_u64()?
        .try_into()
        .ok()
}

/// `xray api stats` prints `{"stat":{"name":"...","value":"123"}}`; the
/// value shows up as a string or a number depending on the build.
fn parse_stat_value(stdout: &str) -> u64 {
    let Ok(doc) = serde_json::from_str::<Value>(stdout) else {
        return 0;
    };
    match doc.get("stat").and_then(|s| s.get("value")) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn client_config_json(
    host: &str,
    port: u16,
    uuid: &str,
    site: &str,
    public_key: &str,
    short_id: &str,
) -> Result<String, serde_json::Error> {
    let doc = json!({
        "inbounds": [{
            "listen": "127.0.0.1",
            "port": DEFAULT_LOCAL_PROXY_PORT,
            "protocol": "socks",
            "settings": { "udp": true }
        }],
        "outbounds": [{
            "protocol": "vless",
            "settings": {
                "vnext": [{
                    "address": host,
                    "port": port,
                    "users": [{
                        "id": uuid,
                        "encryption": "none",
                        "flow": FLOW
                    }]
                }]
            },
            "streamSettings": {
                "network": TRANSPORT,
                "security": "reality",
                "realitySettings": {
                    "serverName": site,
                    "publicKey": public_key,
                    "shortId": short_id,
                    "fingerprint": FINGERPRINT
                }
            }
        }]
    });
    serde_json::to_string_pretty(&doc)
}
