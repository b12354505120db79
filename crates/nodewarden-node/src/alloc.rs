//! First-free client address selection inside the node's /24 pool.
//!
//! Stateless: the set of used hosts is re-derived from the config document
//! on every call, so allocation always agrees with the file truth.

use std::collections::BTreeSet;

use crate::wgconf::WgConfig;

/// Used when the `[Interface]` stanza carries no usable `Address`.
pub const DEFAULT_PREFIX: &str = "10.8.1";

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("no free host addresses left in the /24 pool")]
    PoolExhausted,
}

/// First unused `prefix.host` address, scanning hosts 1..=254 in order.
pub fn first_free_address(config: &WgConfig) -> Result<String, AllocError> {
    let prefix = subnet_prefix(config);
    let used = used_hosts(config);

    for host in 1..=254u8 {
        if !used.contains(&host) {
            return Ok(format!("{prefix}.{host}"));
        }
    }
    Err(AllocError::PoolExhausted)
}

/// First three octets of the interface `Address`, or [`DEFAULT_PREFIX`].
pub fn subnet_prefix(config: &WgConfig) -> String {
    config
        .interface()
        .and_then(|s| s.get("Address"))
        .and_then(first_three_octets)
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string())
}

/// Host octets currently claimed by `AllowedIPs = x.x.x.<host>/32` entries
/// anywhere in the document.
pub fn used_hosts(config: &WgConfig) -> BTreeSet<u8> {
    let mut used = BTreeSet::new();
    for section in &config.sections {
        let Some(value) = section.get("AllowedIPs") else {
            continue;
        };
        for entry in value.split(',') {
            if let Some(host) = host_octet_of_slash32(entry.trim()) {
                used.insert(host);
            }
        }
    }
    used
}

fn first_three_octets(address: &str) -> Option<String> {
    let ip = address.split(',').next()?.trim();
    let ip = ip.split('/').next()?;
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 || octets.iter().any(|o| o.is_empty() || o.parse::<u8>().is_err()) {
        return None;
    }
    Some(octets[..3].join("."))
}

fn host_octet_of_slash32(entry: &str) -> Option<u8> {
    let ip = entry.strip_suffix("/32")?;
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 || octets[..3].iter().any(|o| o.parse::<u8>().is_err()) {
        return None;
    }
    octets[3].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config_with_hosts(hosts: &[u8]) -> WgConfig {
        let mut text = String::from("[Interface]\nAddress = 10.8.1.1/24\n");
        for host in hosts {
            text.push_str(&format!(
                "\n[Peer]\nPublicKey = pk{host}\nAllowedIPs = 10.8.1.{host}/32\n"
            ));
        }
        WgConfig::parse(&text)
    }

    #[test]
    fn returns_first_gap() {
        // interface address 10.8.1.1 is not an AllowedIPs entry, so host 1 is
        // free even though the interface holds it; this mirrors the node's
        // own allocation behavior.
        let config = config_with_hosts(&[2, 3, 5]);
        assert_eq!(first_free_address(&config).unwrap(), "10.8.1.1");
    }

    #[test]
    fn skips_contiguous_prefix() {
        let config = config_with_hosts(&[1, 2, 3]);
        assert_eq!(first_free_address(&config).unwrap(), "10.8.1.4");
    }

    #[test]
    fn exhausted_pool_errors() {
        let hosts: Vec<u8> = (1..=254).collect();
        let config = config_with_hosts(&hosts);
        assert!(matches!(
            first_free_address(&config),
            Err(AllocError::PoolExhausted)
        ));
    }

    #[test_case("[Interface]\nAddress = 192.168.7.1/24\n", "192.168.7"; "from interface")]
    #[test_case("[Interface]\nListenPort = 1\n", DEFAULT_PREFIX; "missing address")]
    #[test_case("[Interface]\nAddress = garbage\n", DEFAULT_PREFIX; "unparseable address")]
    #[test_case("", DEFAULT_PREFIX; "empty config")]
    fn prefix_resolution(text: &str, expected: &str) {
        assert_eq!(subnet_prefix(&WgConfig::parse(text)), expected);
    }

    #[test]
    fn ignores_non_slash32_entries() {
        let text = "[Interface]\nAddress = 10.8.1.1/24\n\n[Peer]\nPublicKey = pk\nAllowedIPs = 0.0.0.0/0, 10.8.1.9/32\n";
        let used = used_hosts(&WgConfig::parse(text));
        assert_eq!(used.into_iter().collect::<Vec<_>>(), vec![9]);
    }
}
