use std::env;
use std::time::Duration;

use thiserror::Error;

use nodewarden_node::amnezia::AmneziaSettings;
use nodewarden_node::server::ServerSettings;
use nodewarden_node::xray::XraySettings;
use nodewarden_types::Protocol;

#[derive(Debug)]
pub struct Config {
    pub bind_addr: String,
    pub api_key: String,
    pub sweep_interval: Duration,
    pub protocols_enabled: Option<Vec<Protocol>>,
    pub server: ServerSettings,
    pub amnezia: AmneziaSettings,
    pub xray: XraySettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

fn require_env(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingEnvVar { var })
}

/// Set and non-empty, trimmed.
fn opt_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Apply an env var onto an optional setting: unset keeps the default,
/// an empty value clears it, anything else replaces it.
fn override_opt(var: &str, slot: &mut Option<String>) {
    if let Ok(value) = env::var(var) {
        let value = value.trim();
        *slot = (!value.is_empty()).then(|| value.to_string());
    }
}

fn override_path(var: &str, slot: &mut String) {
    if let Some(value) = opt_env(var) {
        *slot = value;
    }
}

fn parse_opt_u32(var: &'static str) -> Result<Option<u32>, ConfigError> {
    match opt_env(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

fn parse_protocols(var: &'static str, raw: &str) -> Result<Vec<Protocol>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::InvalidValue {
                var,
                value: s.to_string(),
            })
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = require_env("API_KEY")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let sweep_interval = Duration::from_secs(match opt_env("SWEEP_INTERVAL_SECS") {
            None => 10,
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "SWEEP_INTERVAL_SECS",
                value,
            })?,
        });

        let protocols_enabled = match opt_env("PROTOCOLS_ENABLED") {
            Some(raw) => Some(parse_protocols("PROTOCOLS_ENABLED", &raw)?),
            None => None,
        };

        let server = ServerSettings {
            id: opt_env("SERVER_ID"),
            region: opt_env("SERVER_REGION"),
            weight: parse_opt_u32("SERVER_WEIGHT")?,
            max_peers: parse_opt_u32("SERVER_MAX_PEERS")?,
        };

        let public_host = opt_env("SERVER_PUBLIC_HOST");

        let mut amnezia = AmneziaSettings::default();
        override_opt("AMNEZIA_DOCKER_CONTAINER", &mut amnezia.container);
        override_opt("AMNEZIA_INTERFACE", &mut amnezia.interface);
        override_path("AMNEZIA_WG_CONF_PATH", &mut amnezia.conf_path);
        override_path("AMNEZIA_CLIENTS_TABLE_PATH", &mut amnezia.clients_table_path);
        override_path(
            "AMNEZIA_SERVER_PUBLIC_KEY_PATH",
            &mut amnezia.server_public_key_path,
        );
        override_path("AMNEZIA_PSK_PATH", &mut amnezia.preshared_key_path);
        override_path("AMNEZIA_DESCRIPTION", &mut amnezia.description);
        amnezia.public_host = opt_env("AMNEZIA_PUBLIC_HOST").or_else(|| public_host.clone());

        let mut xray = XraySettings::default();
        override_opt("XRAY_DOCKER_CONTAINER", &mut xray.container);
        override_path("XRAY_SERVER_CONFIG_PATH", &mut xray.server_config_path);
        override_path("XRAY_UUID_PATH", &mut xray.uuid_path);
        override_path("XRAY_PUBLIC_KEY_PATH", &mut xray.public_key_path);
        override_path("XRAY_PRIVATE_KEY_PATH", &mut xray.private_key_path);
        override_path("XRAY_SHORT_ID_PATH", &mut xray.short_id_path);
        override_path("XRAY_SITE", &mut xray.site);
        override_path("XRAY_DESCRIPTION", &mut xray.description);
        xray.public_host = opt_env("XRAY_PUBLIC_HOST").or_else(|| public_host.clone());

        Ok(Self {
            bind_addr,
            api_key,
            sweep_interval,
            protocols_enabled,
            server,
            amnezia,
            xray,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("amneziawg", vec![Protocol::Amneziawg]; "single")]
    #[test_case("amneziawg,xray", vec![Protocol::Amneziawg, Protocol::Xray]; "both")]
    #[test_case(" xray , amneziawg ", vec![Protocol::Xray, Protocol::Amneziawg]; "whitespace and order kept")]
    fn protocol_list_parsing(raw: &str, expected: Vec<Protocol>) {
        assert_eq!(parse_protocols("PROTOCOLS_ENABLED", raw).unwrap(), expected);
    }

    #[test]
    fn protocol_list_rejects_unknown() {
        assert!(parse_protocols("PROTOCOLS_ENABLED", "amneziawg,openvpn").is_err());
    }
}
