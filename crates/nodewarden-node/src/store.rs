//! File-backed stores for the node's WireGuard config, secret files, and the
//! JSON clients table. These own all file I/O for their domain; validation
//! and dedup are the engines' job.

use nodewarden_types::ClientTableEntry;
use tracing::{debug, warn};

use crate::error::NodeError;
use crate::exec::{CommandRunner, ExecError, ExecOpts, NodeShell};

/// Reads and writes the WireGuard-style config text and companion secret
/// files, and applies an edited config to the running interface.
#[derive(Debug, Clone)]
pub struct WgConfigStore<R> {
    shell: NodeShell<R>,
    conf_path: String,
    interface: Option<String>,
}

impl<R: CommandRunner> WgConfigStore<R> {
    pub fn new(shell: NodeShell<R>, conf_path: String, interface: Option<String>) -> Self {
        Self {
            shell,
            conf_path,
            interface,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_config(&self) -> Result<String, ExecError> {
        self.shell.read_file(&self.conf_path).await
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn write_config(&self, content: &str) -> Result<(), ExecError> {
        self.shell.write_file(&self.conf_path, content).await
    }

    /// Apply the config file to the live interface via `wg syncconf`.
    ///
    /// A node without a configured interface, or with its interface down, is
    /// a no-op; genuine sync failures propagate.
    #[tracing::instrument(skip(self))]
    pub async fn sync_config(&self) -> Result<(), ExecError> {
        let Some(interface) = self.interface.as_deref() else {
            debug!("no interface configured, skipping sync");
            return Ok(());
        };

        let cmd = format!(
            "wg syncconf {interface} <(wg-quick strip {})",
            self.conf_path
        );
        match self.shell.run(&cmd, ExecOpts::default()).await {
            Ok(_) => Ok(()),
            Err(ExecError::Failed { ref stderr, .. }) if interface_is_down(stderr) => {
                warn!(interface, "interface is down, sync skipped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Live peer dump, tab-separated; empty when no interface is configured.
    #[tracing::instrument(skip(self))]
    pub async fn read_dump(&self) -> Result<String, ExecError> {
        let Some(interface) = self.interface.as_deref() else {
            return Ok(String::new());
        };
        let out = self
            .run(&format!("wg show {interface} dump"))
            .await?;
        Ok(out.stdout)
    }

    pub async fn read_secret(&self, path: &str) -> Result<String, ExecError> {
        Ok(self.shell.read_file(path).await?.trim().to_string())
    }

    pub async fn write_secret(&self, path: &str, content: &str) -> Result<(), ExecError> {
        self.shell.write_file(path, content).await
    }

    async fn run(&self, cmd: &str) -> Result<crate::exec::ExecOutput, ExecError> {
        self.shell.run(cmd, ExecOpts::default()).await
    }
}

fn interface_is_down(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no such device") || s.contains("unable to access interface")
}

/// Reads and writes the JSON array mapping peer public keys to operator
/// metadata. Reads never fail on content: missing files, unparseable JSON,
/// non-arrays and malformed rows all degrade to fewer (or zero) entries.
#[derive(Debug, Clone)]
pub struct ClientsTableStore<R> {
    shell: NodeShell<R>,
    path: String,
}

impl<R: CommandRunner> ClientsTableStore<R> {
    pub fn new(shell: NodeShell<R>, path: String) -> Self {
        Self { shell, path }
    }

    #[tracing::instrument(skip(self))]
    pub async fn read(&self) -> Result<Vec<ClientTableEntry>, ExecError> {
        let raw = self.shell.read_file(&self.path).await?;
        Ok(parse_table(&raw))
    }

    #[tracing::instrument(skip(self, entries))]
    pub async fn write(&self, entries: &[ClientTableEntry]) -> Result<(), NodeError> {
        let payload = serde_json::to_string(entries)?;
        self.shell.write_file(&self.path, &payload).await?;
        Ok(())
    }
}

fn parse_table(raw: &str) -> Vec<ClientTableEntry> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(raw) else {
        warn!("clients table is not a json array, treating as empty");
        return Vec::new();
    };

    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping malformed clients table row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(""; "empty file")]
    #[test_case("   \n"; "whitespace only")]
    #[test_case("not json"; "garbage")]
    #[test_case(r#"{"clientId":"x"}"#; "object instead of array")]
    fn degenerate_tables_read_empty(raw: &str) {
        assert!(parse_table(raw).is_empty());
    }

    #[test]
    fn parses_entries_and_skips_malformed_rows() {
        let raw = r#"[
            {"clientId":"pk1","userData":{"clientName":"Alice","expiresAt":123}},
            42,
            {"publicKey":"pk2"}
        ]"#;
        let table = parse_table(raw);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].id(), Some("pk1"));
        assert_eq!(table[0].expires_at(), Some(123));
        assert_eq!(table[1].id(), Some("pk2"));
    }

    #[test]
    fn interface_down_detection() {
        assert!(interface_is_down("Unable to access interface: No such device"));
        assert!(!interface_is_down("invalid key"));
    }
}
