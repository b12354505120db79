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

//! Protocol dispatch: gating, peer-cap enforcement, cross-protocol user
//! merging, and the expiry-sweep entry point.

use std::collections::HashMap;

use chrono::Utc;
use tracing::warn;

use nodewarden_types::{CreateClientResult, Protocol, UserRecord};

use crate::amnezia::AmneziaEngine;
use crate::error::NodeError;
use crate::exec::{self, CommandRunner};
use crate::xray::XrayEngine;

#[derive(Debug, Clone)]
pub struct ClientManager<R> {
    amnezia: AmneziaEngine<R>,
    xray: XrayEngine<R>,
    runner: R,
    protocols_enabled: Option<Vec<Protocol>>,
    max_peers: Option<u32>,
}

impl<R: CommandRunner + Clone> ClientManager<R> {
    pub fn new(
        runner: R,
        amnezia: AmneziaEngine<R>,
        xray: XrayEngine<R>,
        protocols_enabled: Option<Vec<Protocol>>,
        max_peers: Option<u32>,
    ) -> Self {
        Self {
            amnezia,
            xray,
            runner,
            protocols_enabled,
            max_peers,
        }
    }

    pub fn amnezia(&self) -> &AmneziaEngine<R> {
        &self.amnezia
    }

    pub fn xray(&self) -> &XrayEngine<R> {
        &self.xray
    }

    /// The statically configured protocol list, or auto-detection by probing
    /// which known containers are running. Neither yielding anything is a
    /// service-unavailable condition.
    pub async fn enabled_protocols(&self) -> Result<Vec<Protocol>, NodeError> {
        if let Some(list) = &self.protocols_enabled
            && !list.is_empty()
        {
            return Ok(list.clone());
        }

        let running = exec::list_running_containers(&self.runner).await;
        let mut enabled = Vec::new();
        if self
            .amnezia
            .settings()
            .container
            .as_deref()
            .is_some_and(|c| running.contains(c))
        {
            enabled.push(Protocol::Amneziawg);
        }
        if self
            .xray
            .settings()
            .container
            .as_deref()
            .is_some_and(|c| running.contains(c))
        {
            enabled.push(Protocol::Xray);
        }

        if enabled.is_empty() {
            return Err(NodeError::NoProtocols);
        }
        Ok(enabled)
    }

    async fn ensure_enabled(&self, protocol: Protocol) -> Result<(), NodeError> {
        if !self.enabled_protocols().await?.contains(&protocol) {
            return Err(NodeError::ProtocolDisabled(protocol));
        }
        Ok(())
    }

    /// Configured peer count across enabled backends, read from the file
    /// truth (not the live dump).
    pub async fn total_peers(&self) -> Result<usize, NodeError> {
        let mut total = 0;
        for protocol in self.enabled_protocols().await? {
            total += match protocol {
                Protocol::Amneziawg => self.amnezia.count_peers().await?,
                Protocol::Xray => self.xray.count_clients().await?,
            };
        }
        Ok(total)
    }

    /// Gate on the enabled set, enforce the optional global peer cap, then
    /// delegate. The cap check reads current state first; the window between
    /// check and write is an accepted limitation.
    #[tracing::instrument(skip(self))]
    pub async fn create_client(
        &self,
        client_name: &str,
        protocol: Protocol,
        expires_at: Option<i64>,
    ) -> Result<CreateClientResult, NodeError> {
        self.ensure_enabled(protocol).await?;

        if let Some(limit) = self.max_peers
            && limit > 0
            && self.total_peers().await? >= limit as usize
        {
            return Err(NodeError::PeerLimitReached { limit });
        }

        match protocol {
            Protocol::Amneziawg => self.amnezia.create_client(client_name, expires_at).await,
            Protocol::Xray => self.xray.create_client(client_name, expires_at).await,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_client(
        &self,
        client_id: &str,
        protocol: Protocol,
    ) -> Result<bool, NodeError> {
        self.ensure_enabled(protocol).await?;
        match protocol {
            Protocol::Amneziawg => self.amnezia.delete_client(client_id).await,
            Protocol::Xray => self.xray.delete_client(client_id).await,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_expires_at(
        &self,
        client_id: &str,
        protocol: Protocol,
        expires_at: Option<i64>,
    ) -> Result<bool, NodeError> {
        self.ensure_enabled(protocol).await?;
        match protocol {
            Protocol::Amneziawg => self.amnezia.update_expires_at(client_id, expires_at).await,
            Protocol::Xray => self.xray.update_expires_at(client_id, expires_at).await,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn client_config(
        &self,
        client_id: &str,
        protocol: Protocol,
    ) -> Result<Option<String>, NodeError> {
        self.ensure_enabled(protocol).await?;
        match protocol {
            Protocol::Amneziawg => self.amnezia.client_config(client_id).await,
            Protocol::Xray => self.xray.client_config(client_id).await,
        }
    }

    /// Fan out across enabled backends and merge records by display name: a
    /// user present under two protocols appears once, with every device
    /// tagged by its source protocol. A failing backend yields partial
    /// results rather than failing the whole listing.
    #[tracing::instrument(skip(self))]
    pub async fn get_users(&self) -> Result<Vec<UserRecord>, NodeError> {
        let enabled = self.enabled_protocols().await?;

        let mut merged: Vec<UserRecord> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for protocol in enabled {
            let users = match protocol {
                Protocol::Amneziawg => self.amnezia.get_users().await,
                Protocol::Xray => self.xray.get_users().await,
            };
            let users = match users {
                Ok(users) => users,
                Err(err) => {
                    warn!(protocol = %protocol, error = %err, "backend listing failed, returning partial results");
                    continue;
                }
            };

            for user in users {
                match by_name.get(&user.username) {
                    Some(&i) => merged[i].devices.extend(user.devices),
                    None => {
                        by_name.insert(user.username.clone(), merged.len());
                        merged.push(user);
                    }
                }
            }
        }

        Ok(merged)
    }

    /// Revoke every client past its expiry across enabled backends. One
    /// backend being unreachable doesn't stop the other's sweep.
    pub async fn cleanup_expired(&self) -> Result<usize, NodeError> {
        self.cleanup_expired_at(Utc::now().timestamp()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired_at(&self, now: i64) -> Result<usize, NodeError> {
        let enabled = self.enabled_protocols().await?;
        let mut removed = 0;

        if enabled.contains(&Protocol::Amneziawg) {
            match self.amnezia.cleanup_expired(now).await {
                Ok(n) => removed += n,
                Err(err) => {
                    warn!(error = %err, "amneziawg unavailable, skipping expired-client cleanup");
                }
            }
        }
        if enabled.contains(&Protocol::Xray) {
            match self.xray.cleanup_expired(now).await {
                Ok(n) => removed += n,
                Err(err) => {
                    warn!(error = %err, "xray unavailable, skipping expired-client cleanup");
                }
            }
        }

        Ok(removed)
    }
}
