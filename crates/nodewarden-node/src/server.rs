//! Node-level reporting and administration: status, host load metrics,
//! backup orchestration across backends, and reboot.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use nodewarden_types::{Protocol, ServerBackup, ServerLoad, ServerStatus};

use crate::clients::ClientManager;
use crate::error::NodeError;
use crate::exec::{CommandRunner, ExecOpts, NodeShell};

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    pub id: Option<String>,
    pub region: Option<String>,
    pub weight: Option<u32>,
    pub max_peers: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServerService<R> {
    manager: ClientManager<R>,
    host: NodeShell<R>,
    settings: ServerSettings,
}

impl<R: CommandRunner + Clone> ServerService<R> {
    pub fn new(runner: R, manager: ClientManager<R>, settings: ServerSettings) -> Self {
        Self {
            manager,
            host: NodeShell::new(runner, None),
            settings,
        }
    }

    pub fn manager(&self) -> &ClientManager<R> {
        &self.manager
    }

    #[tracing::instrument(skip(self))]
    pub async fn status(&self) -> Result<ServerStatus, NodeError> {
        let users = self.manager.get_users().await?;
        let protocols = self.manager.enabled_protocols().await?;

        Ok(ServerStatus {
            id: self.settings.id.clone().unwrap_or_default(),
            region: self.settings.region.clone().unwrap_or_default(),
            weight: self.settings.weight.unwrap_or(0),
            max_peers: self.settings.max_peers.unwrap_or(0),
            total_peers: users.iter().map(|u| u.devices.len()).sum::<usize>() as u32,
            protocols,
        })
    }

    /// Host metrics from /proc. Individual metrics that fail to parse
    /// degrade to zero instead of failing the whole report.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> Result<ServerLoad, NodeError> {
        let uptime = self.host.read_file("/proc/uptime").await?;
        let loadavg = self.host.read_file("/proc/loadavg").await?;
        let meminfo = self.host.read_file("/proc/meminfo").await?;

        Ok(ServerLoad {
            uptime_secs: parse_uptime_secs(&uptime),
            load_avg: parse_load_avg(&loadavg),
            mem_total_bytes: parse_meminfo_kb(&meminfo, "MemTotal:") * 1024,
            mem_available_bytes: parse_meminfo_kb(&meminfo, "MemAvailable:") * 1024,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn export_backup(&self) -> Result<ServerBackup, NodeError> {
        let protocols = self.manager.enabled_protocols().await?;

        let mut payload = ServerBackup {
            generated_at: Utc::now(),
            server_id: self.settings.id.clone(),
            protocols: protocols.clone(),
            amnezia: None,
            xray: None,
        };

        if protocols.contains(&Protocol::Amneziawg) {
            payload.amnezia = Some(self.manager.amnezia().export_backup().await?);
        }
        if protocols.contains(&Protocol::Xray) {
            payload.xray = Some(self.manager.xray().export_backup().await?);
        }
        Ok(payload)
    }

    /// Validate the whole payload before touching the node, then restore
    /// each listed backend's bundle verbatim.
    #[tracing::instrument(skip(self, payload))]
    pub async fn import_backup(&self, payload: &ServerBackup) -> Result<(), NodeError> {
        if payload.protocols.is_empty() {
            return Err(NodeError::InvalidBackup("empty protocol list"));
        }

        let amnezia = if payload.protocols.contains(&Protocol::Amneziawg) {
            Some(
                payload
                    .amnezia
                    .as_ref()
                    .ok_or(NodeError::InvalidBackup("missing amnezia bundle"))?,
            )
        } else {
            None
        };
        let xray = if payload.protocols.contains(&Protocol::Xray) {
            Some(
                payload
                    .xray
                    .as_ref()
                    .ok_or(NodeError::InvalidBackup("missing xray bundle"))?,
            )
        } else {
            None
        };

        if let Some(data) = amnezia {
            self.manager.amnezia().import_backup(data).await?;
        }
        if let Some(data) = xray {
            self.manager.xray().import_backup(data).await?;
        }
        info!(protocols = payload.protocols.len(), "imported server backup");
        Ok(())
    }

    /// Best effort: the box going down kills the connection before the
    /// command can report success, so failures are only logged.
    pub async fn reboot(&self) {
        info!("rebooting node host");
        if let Err(err) = self
            .host
            .run_on_host("sudo reboot", ExecOpts::with_timeout(Duration::from_millis(1500)))
            .await
        {
            warn!(error = %err, "reboot command failed");
        }
    }
}

fn parse_uptime_secs(raw: &str) -> u64 {
    raw.split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v as u64)
        .unwrap_or(0)
}

fn parse_load_avg(raw: &str) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (slot, token) in out.iter_mut().zip(raw.split_whitespace()) {
        *slot = token.parse().unwrap_or(0.0);
    }
    out
}

fn parse_meminfo_kb(raw: &str, key: &str) -> u64 {
    raw.lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
