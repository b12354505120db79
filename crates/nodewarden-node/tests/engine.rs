use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use nodewarden_node::amnezia::{self, AmneziaEngine, AmneziaSettings};
use nodewarden_node::clients::ClientManager;
use nodewarden_node::error::NodeError;
use nodewarden_node::exec::{CommandRunner, ExecError, ExecOpts, ExecOutput};
use nodewarden_node::server::{ServerService, ServerSettings};
use nodewarden_node::wgconf::WgConfig;
use nodewarden_node::xray::{self, XrayEngine, XraySettings};
use nodewarden_types::link::decode_link;
use nodewarden_types::{Protocol, ServerBackup};

// -- Mock node --
//
// Emulates the node's shell surface: a tiny in-memory filesystem driven by
// the `cat`/here-document commands the stores issue, plus the wg/docker
// commands the engines run. Commands wrapped in `docker exec ... sh -lc`
// are unwrapped first, which also exercises the quoting round trip.

#[derive(Clone, Default)]
struct MockNode {
    files: Arc<Mutex<HashMap<String, String>>>,
    dump: Arc<Mutex<String>>,
    containers: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<String>>>,
    syncs: Arc<Mutex<u32>>,
    restarts: Arc<Mutex<u32>>,
    fail_substring: Arc<Mutex<Option<String>>>,
}

impl MockNode {
    fn set_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn set_dump(&self, dump: &str) {
        *self.dump.lock().unwrap() = dump.to_string();
    }

    fn set_containers(&self, names: &[&str]) {
        *self.containers.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }

    fn fail_commands_containing(&self, needle: &str) {
        *self.fail_substring.lock().unwrap() = Some(needle.to_string());
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn syncs(&self) -> u32 {
        *self.syncs.lock().unwrap()
    }

    fn restarts(&self) -> u32 {
        *self.restarts.lock().unwrap()
    }
}

fn unwrap_container_cmd(cmd: &str) -> String {
    if let Some(rest) = cmd.strip_prefix("docker exec ")
        && let Some(idx) = rest.find(" sh -lc ")
    {
        let quoted = &rest[idx + " sh -lc ".len()..];
        if let Some(inner) = quoted
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            return inner.replace(r"'\''", "'");
        }
    }
    cmd.to_string()
}

impl CommandRunner for MockNode {
    async fn run(&self, raw_cmd: &str, _opts: ExecOpts) -> Result<ExecOutput, ExecError> {
        let cmd = unwrap_container_cmd(raw_cmd);
        self.commands.lock().unwrap().push(cmd.clone());

        if let Some(needle) = self.fail_substring.lock().unwrap().as_deref()
            && cmd.contains(needle)
        {
            return Err(ExecError::DaemonUnavailable);
        }

        let ok = |stdout: String| {
            Ok(ExecOutput {
                stdout,
                stderr: String::new(),
            })
        };

        if let Some(rest) = cmd.strip_prefix("cat > ") {
            // cat > {path}.tmp <<"EOF"\n{body}\nEOF\nmv {path}.tmp {path}
            let (head, rest) = rest.split_once('\n').expect("heredoc body");
            let path_tmp = head.split_whitespace().next().expect("heredoc path");
            let path = path_tmp.strip_suffix(".tmp").expect("tmp suffix");
            let tail = format!("\nEOF\nmv {path_tmp} {path}");
            let body = rest.strip_suffix(tail.as_str()).expect("heredoc tail");
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), format!("{body}\n"));
            return ok(String::new());
        }
        if let Some(rest) = cmd.strip_prefix("cat ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            return ok(self.file(path).unwrap_or_default());
        }
        if cmd.starts_with("wg show ") {
            return ok(self.dump.lock().unwrap().clone());
        }
        if cmd.starts_with("wg syncconf ") {
            *self.syncs.lock().unwrap() += 1;
            return ok(String::new());
        }
        if cmd.starts_with("docker restart ") {
            *self.restarts.lock().unwrap() += 1;
            return ok(String::new());
        }
        if cmd == "docker ps --format '{{.Names}}'" {
            return ok(self.containers.lock().unwrap().join("\n"));
        }
        ok(String::new())
    }
}

// -- Fixtures --

const WG_CONF: &str = "\
[Interface]
Address = 10.8.1.1/24
ListenPort = 38291
PrivateKey = serverpriv
Jc = 4
Jmin = 10
Jmax = 50
S1 = 116
S2 = 61
H1 = 1139437039
H2 = 1088834137
H3 = 977425783
H4 = 1583407056

[Peer]
PublicKey = pk-alice
PresharedKey = sharedpsk
AllowedIPs = 10.8.1.2/32
";

const DUMP_ALICE: &str = "pk-alice\tsharedpsk\t203.0.113.5:51820\t10.8.1.2/32\t1700000000\t10\t20\t25";

fn amnezia_settings() -> AmneziaSettings {
    AmneziaSettings {
        public_host: Some("vpn.example.com".to_string()),
        ..AmneziaSettings::default()
    }
}

fn xray_settings() -> XraySettings {
    XraySettings {
        public_host: Some("vpn.example.com".to_string()),
        ..XraySettings::default()
    }
}

fn seeded_mock() -> MockNode {
    let mock = MockNode::default();
    mock.set_file(amnezia::DEFAULT_CONF_PATH, WG_CONF);
    mock.set_file(amnezia::DEFAULT_PSK_PATH, "sharedpsk\n");
    mock.set_file(amnezia::DEFAULT_SERVER_PUBLIC_KEY_PATH, "serverpub\n");
    mock.set_file(
        amnezia::DEFAULT_CLIENTS_TABLE_PATH,
        r#"[{"clientId":"pk-alice","userData":{"clientName":"Alice [Laptop]"}}]"#,
    );
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        r#"{"inbounds":[{"port":443,"protocol":"vless","settings":{"clients":[]}}]}"#,
    );
    mock.set_file(xray::DEFAULT_PUBLIC_KEY_PATH, "pbk\n");
    mock.set_file(xray::DEFAULT_SHORT_ID_PATH, "0123abcd\n");
    mock.set_file(xray::DEFAULT_PRIVATE_KEY_PATH, "prv\n");
    mock.set_file(xray::DEFAULT_UUID_PATH, "11111111-1111-1111-1111-111111111111\n");
    mock
}

fn manager(
    mock: &MockNode,
    protocols: Option<Vec<Protocol>>,
    max_peers: Option<u32>,
) -> ClientManager<MockNode> {
    ClientManager::new(
        mock.clone(),
        AmneziaEngine::new(mock.clone(), amnezia_settings()),
        XrayEngine::new(mock.clone(), xray_settings()),
        protocols,
        max_peers,
    )
}

fn table_entries(mock: &MockNode) -> Vec<serde_json::Value> {
    let raw = mock.file(amnezia::DEFAULT_CLIENTS_TABLE_PATH).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn xray_clients(mock: &MockNode) -> Vec<serde_json::Value> {
    let raw = mock.file(xray::DEFAULT_SERVER_CONFIG_PATH).unwrap();
    let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
    config["inbounds"][0]["settings"]["clients"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

// -- AmneziaWG engine --

#[tokio::test]
async fn create_client_provisions_peer_table_and_link() {
    let mock = seeded_mock();
    let engine = AmneziaEngine::new(mock.clone(), amnezia_settings());

    let result = engine.create_client("Bob [Phone]", Some(123)).await.unwrap();

    assert_eq!(result.protocol, Protocol::Amneziawg);
    assert_eq!(BASE64.decode(&result.id).unwrap().len(), 32);

    // host .1 is free (only .2 is allocated), so the new peer lands there
    let conf = WgConfig::parse(&mock.file(amnezia::DEFAULT_CONF_PATH).unwrap());
    let peer = conf.find_peer(&result.id).expect("peer stanza written");
    assert_eq!(peer.get("AllowedIPs"), Some("10.8.1.1/32"));
    assert_eq!(peer.get("PresharedKey"), Some("sharedpsk"));
    assert!(conf.find_peer("pk-alice").is_some(), "existing peer kept");
    assert!(mock.syncs() >= 1, "config must be synced after the write");

    let entries = table_entries(&mock);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["clientId"], result.id.as_str());
    assert_eq!(entries[1]["userData"]["clientName"], "Bob [Phone]");
    assert_eq!(entries[1]["userData"]["expiresAt"], 123);

    let bundle = decode_link(&result.config).unwrap();
    assert_eq!(bundle.host_name, "vpn.example.com");
    assert_eq!(bundle.description, "AmneziaWG | Bob [Phone]");
    assert_eq!(bundle.default_container, "amnezia-awg");
    let awg = bundle.containers[0].awg.as_ref().expect("awg container");
    assert_eq!(awg.jc, "4");
    assert_eq!(awg.h4, "1583407056");
    assert_eq!(awg.port, "38291");
    assert_eq!(awg.transport_proto, "udp");

    let last: serde_json::Value = serde_json::from_str(&awg.last_config).unwrap();
    assert_eq!(last["client_ip"], "10.8.1.1");
    assert_eq!(last["client_pub_key"], result.id.as_str());
    assert_eq!(last["port"], 38291);
    assert!(!last["client_priv_key"].as_str().unwrap().is_empty());
    let conf_text = last["config"].as_str().unwrap();
    assert!(conf_text.contains("Endpoint = vpn.example.com:38291"));
    assert!(conf_text.contains("PublicKey = serverpub"));
}

#[tokio::test]
async fn client_config_regenerates_link_without_private_key() {
    let mock = seeded_mock();
    let engine = AmneziaEngine::new(mock.clone(), amnezia_settings());

    let link = engine.client_config("pk-alice").await.unwrap().unwrap();
    let bundle = decode_link(&link).unwrap();
    let awg = bundle.containers[0].awg.as_ref().unwrap();
    let last: serde_json::Value = serde_json::from_str(&awg.last_config).unwrap();
    assert_eq!(last["client_ip"], "10.8.1.2");
    assert_eq!(last["client_priv_key"], "");
    assert_eq!(last["psk_key"], "sharedpsk");

    assert!(engine.client_config("pk-unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_client_is_idempotent() {
    let mock = seeded_mock();
    let engine = AmneziaEngine::new(mock.clone(), amnezia_settings());

    assert!(engine.delete_client("pk-alice").await.unwrap());
    let conf_after = mock.file(amnezia::DEFAULT_CONF_PATH).unwrap();
    assert!(WgConfig::parse(&conf_after).find_peer("pk-alice").is_none());
    assert!(table_entries(&mock).is_empty());
    let syncs_after_first = mock.syncs();

    // second delete: no-op false, state untouched
    assert!(!engine.delete_client("pk-alice").await.unwrap());
    assert_eq!(mock.file(amnezia::DEFAULT_CONF_PATH).unwrap(), conf_after);
    assert_eq!(mock.syncs(), syncs_after_first);
}

#[tokio::test]
async fn update_expires_at_touches_only_the_table() {
    let mock = seeded_mock();
    let engine = AmneziaEngine::new(mock.clone(), amnezia_settings());

    assert!(engine.update_expires_at("pk-alice", Some(777)).await.unwrap());
    assert_eq!(table_entries(&mock)[0]["userData"]["expiresAt"], 777);
    assert_eq!(mock.file(amnezia::DEFAULT_CONF_PATH).unwrap(), WG_CONF);

    assert!(engine.update_expires_at("pk-alice", None).await.unwrap());
    assert!(table_entries(&mock)[0]["userData"].get("expiresAt").is_none());

    assert!(!engine.update_expires_at("pk-unknown", Some(1)).await.unwrap());
}

#[tokio::test]
async fn expiry_sweep_removes_only_past_entries() {
    let now = 1_700_000_000;
    let mock = seeded_mock();
    let conf = format!(
        "{WG_CONF}\n[Peer]\nPublicKey = pk-old\nAllowedIPs = 10.8.1.3/32\n\n[Peer]\nPublicKey = pk-fresh\nAllowedIPs = 10.8.1.4/32\n"
    );
    mock.set_file(amnezia::DEFAULT_CONF_PATH, &conf);
    mock.set_file(
        amnezia::DEFAULT_CLIENTS_TABLE_PATH,
        &format!(
            r#"[
              {{"clientId":"pk-old","userData":{{"clientName":"Old","expiresAt":{}}}}},
              {{"clientId":"pk-fresh","userData":{{"clientName":"Fresh","expiresAt":{}}}}},
              {{"clientId":"pk-alice","userData":{{"clientName":"Alice [Laptop]"}}}}
            ]"#,
            now - 10,
            now + 10
        ),
    );

    let engine = AmneziaEngine::new(mock.clone(), amnezia_settings());
    assert_eq!(engine.cleanup_expired(now).await.unwrap(), 1);

    let entries = table_entries(&mock);
    assert_eq!(entries.len(), 2);
    let conf = WgConfig::parse(&mock.file(amnezia::DEFAULT_CONF_PATH).unwrap());
    assert!(conf.find_peer("pk-old").is_none());
    assert!(conf.find_peer("pk-fresh").is_some());
    assert!(conf.find_peer("pk-alice").is_some());
}

// -- Xray engine --

#[tokio::test]
async fn xray_create_appends_client_and_restarts() {
    let mock = seeded_mock();
    let engine = XrayEngine::new(mock.clone(), xray_settings());

    let result = engine.create_client("Bob", None).await.unwrap();
    assert_eq!(result.protocol, Protocol::Xray);
    assert!(uuid::Uuid::parse_str(&result.id).is_ok());
    assert_eq!(mock.restarts(), 1);

    let clients = xray_clients(&mock);
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["id"], result.id.as_str());
    assert_eq!(clients[0]["flow"], "xtls-rprx-vision");
    assert_eq!(clients[0]["username"], "Bob");

    let bundle = decode_link(&result.config).unwrap();
    assert_eq!(bundle.default_container, "amnezia-xray");
    let xc = bundle.containers[0].xray.as_ref().expect("xray container");
    assert_eq!(xc.public_key, "pbk");
    assert_eq!(xc.short_id, "0123abcd");
    assert_eq!(xc.port, "443");
    assert_eq!(xc.site, xray::DEFAULT_SITE);
    let last: serde_json::Value = serde_json::from_str(&xc.last_config).unwrap();
    assert_eq!(
        last["outbounds"][0]["settings"]["vnext"][0]["users"][0]["id"],
        result.id.as_str()
    );
}

#[tokio::test]
async fn xray_create_requires_an_inbound() {
    let mock = seeded_mock();
    mock.set_file(xray::DEFAULT_SERVER_CONFIG_PATH, r#"{"inbounds":[]}"#);
    let engine = XrayEngine::new(mock.clone(), xray_settings());

    let err = engine.create_client("Bob", None).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInbound));
    assert_eq!(mock.restarts(), 0);
}

#[tokio::test]
async fn xray_delete_is_idempotent_and_restarts_once() {
    let mock = seeded_mock();
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        r#"{"inbounds":[{"port":443,"settings":{"clients":[{"id":"u1","username":"Bob"}]}}]}"#,
    );
    let engine = XrayEngine::new(mock.clone(), xray_settings());

    assert!(engine.delete_client("u1").await.unwrap());
    assert_eq!(mock.restarts(), 1);
    assert!(xray_clients(&mock).is_empty());

    assert!(!engine.delete_client("u1").await.unwrap());
    assert_eq!(mock.restarts(), 1, "no restart for a no-op delete");
}

#[tokio::test]
async fn xray_sweep_batches_one_restart() {
    let now = 1_700_000_000;
    let mock = seeded_mock();
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        &format!(
            r#"{{"inbounds":[{{"port":443,"settings":{{"clients":[
                {{"id":"u1","expiresAt":{}}},
                {{"id":"u2","expiresAt":{}}},
                {{"id":"u3","expiresAt":{}}}
            ]}}}}]}}"#,
            now - 5,
            now - 1,
            now + 100
        ),
    );
    let engine = XrayEngine::new(mock.clone(), xray_settings());

    assert_eq!(engine.cleanup_expired(now).await.unwrap(), 2);
    assert_eq!(mock.restarts(), 1, "sweep restarts once, not per deletion");
    let remaining = xray_clients(&mock);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["id"], "u3");

    // nothing expired: no rewrite, no restart
    assert_eq!(engine.cleanup_expired(now).await.unwrap(), 0);
    assert_eq!(mock.restarts(), 1);
}

// -- Dispatcher --

#[tokio::test]
async fn gating_rejects_disabled_protocol_before_any_node_io() {
    let mock = seeded_mock();
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg]), None);

    let err = mgr.create_client("Bob", Protocol::Xray, None).await.unwrap_err();
    assert!(matches!(err, NodeError::ProtocolDisabled(Protocol::Xray)));
    assert!(mock.commands().is_empty(), "gating must precede node I/O");
}

#[tokio::test]
async fn peer_cap_conflicts_without_writing() {
    let mock = seeded_mock();
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg]), Some(1));

    // one peer already provisioned, cap is one
    let err = mgr
        .create_client("Bob", Protocol::Amneziawg, None)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::PeerLimitReached { limit: 1 }));
    assert!(
        !mock.commands().iter().any(|c| c.starts_with("cat > ")),
        "cap check must not write anything"
    );
    assert_eq!(mock.file(amnezia::DEFAULT_CONF_PATH).unwrap(), WG_CONF);
}

#[tokio::test]
async fn merged_listing_groups_users_across_protocols() {
    let mock = seeded_mock();
    mock.set_dump(DUMP_ALICE);
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        r#"{"inbounds":[{"port":443,"settings":{"clients":[{"id":"u1","username":"Alice"}]}}]}"#,
    );
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);

    let users = mgr.get_users().await.unwrap();
    assert_eq!(users.len(), 1, "same display name merges into one record");
    let alice = &users[0];
    assert_eq!(alice.username, "Alice");
    assert_eq!(alice.devices.len(), 2);
    assert_eq!(alice.devices[0].protocol, Protocol::Amneziawg);
    assert_eq!(alice.devices[0].name.as_deref(), Some("Laptop"));
    assert_eq!(alice.devices[0].id, "pk-alice");
    assert_eq!(alice.devices[1].protocol, Protocol::Xray);
    assert_eq!(alice.devices[1].id, "u1");
}

#[tokio::test]
async fn listing_survives_one_backend_failing() {
    let mock = seeded_mock();
    mock.set_dump(DUMP_ALICE);
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        r#"{"inbounds":[{"port":443,"settings":{"clients":[{"id":"u1","username":"Bob"}]}}]}"#,
    );
    mock.fail_commands_containing("wg show");
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);

    let users = mgr.get_users().await.unwrap();
    assert_eq!(users.len(), 1, "partial results instead of a hard failure");
    assert_eq!(users[0].username, "Bob");
}

#[tokio::test]
async fn sweep_sums_backends() {
    let now = 1_700_000_000;
    let mock = seeded_mock();
    mock.set_file(
        amnezia::DEFAULT_CLIENTS_TABLE_PATH,
        &format!(r#"[{{"clientId":"pk-alice","userData":{{"clientName":"Alice","expiresAt":{}}}}}]"#, now - 1),
    );
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        &format!(
            r#"{{"inbounds":[{{"port":443,"settings":{{"clients":[{{"id":"u1","expiresAt":{}}}]}}}}]}}"#,
            now - 1
        ),
    );
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);

    assert_eq!(mgr.cleanup_expired_at(now).await.unwrap(), 2);
}

#[tokio::test]
async fn protocols_auto_detect_from_running_containers() {
    let mock = seeded_mock();
    mock.set_containers(&["amnezia-awg", "unrelated"]);
    let mgr = manager(&mock, None, None);
    assert_eq!(mgr.enabled_protocols().await.unwrap(), vec![Protocol::Amneziawg]);

    mock.set_containers(&[]);
    let err = mgr.enabled_protocols().await.unwrap_err();
    assert!(matches!(err, NodeError::NoProtocols));
    assert!(err.is_unavailable());
}

// -- Server service --

#[tokio::test]
async fn status_counts_devices_across_backends() {
    let mock = seeded_mock();
    mock.set_dump(DUMP_ALICE);
    mock.set_file(
        xray::DEFAULT_SERVER_CONFIG_PATH,
        r#"{"inbounds":[{"port":443,"settings":{"clients":[{"id":"u1","username":"Bob"}]}}]}"#,
    );
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);
    let service = ServerService::new(
        mock.clone(),
        mgr,
        ServerSettings {
            id: Some("node-1".into()),
            region: Some("eu-1".into()),
            weight: Some(10),
            max_peers: Some(100),
        },
    );

    let status = service.status().await.unwrap();
    assert_eq!(status.id, "node-1");
    assert_eq!(status.region, "eu-1");
    assert_eq!(status.total_peers, 2);
    assert_eq!(status.protocols, vec![Protocol::Amneziawg, Protocol::Xray]);
}

#[tokio::test]
async fn backup_round_trips_through_a_fresh_node() {
    let mock = seeded_mock();
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);
    let service = ServerService::new(
        mock.clone(),
        mgr,
        ServerSettings {
            id: Some("node-1".into()),
            ..ServerSettings::default()
        },
    );

    let payload = service.export_backup().await.unwrap();
    assert_eq!(payload.server_id.as_deref(), Some("node-1"));
    let amnezia_data = payload.amnezia.as_ref().expect("amnezia bundle");
    assert_eq!(amnezia_data.wg_config, WG_CONF);
    assert_eq!(amnezia_data.preshared_key, "sharedpsk");
    assert_eq!(amnezia_data.server_public_key, "serverpub");
    assert_eq!(amnezia_data.clients.len(), 1);
    let xray_data = payload.xray.as_ref().expect("xray bundle");
    assert_eq!(xray_data.public_key, "pbk");
    assert_eq!(xray_data.short_id, "0123abcd");

    // restore onto an empty node
    let fresh = MockNode::default();
    let fresh_mgr = manager(&fresh, Some(vec![Protocol::Amneziawg, Protocol::Xray]), None);
    let fresh_service = ServerService::new(fresh.clone(), fresh_mgr, ServerSettings::default());
    fresh_service.import_backup(&payload).await.unwrap();

    assert_eq!(fresh.file(amnezia::DEFAULT_CONF_PATH).unwrap(), WG_CONF);
    assert_eq!(fresh.file(amnezia::DEFAULT_PSK_PATH).unwrap(), "sharedpsk\n");
    assert!(fresh.syncs() >= 1, "amnezia import must re-sync");
    assert_eq!(fresh.restarts(), 0, "xray import must not restart");
    assert!(
        fresh
            .file(xray::DEFAULT_SERVER_CONFIG_PATH)
            .unwrap()
            .contains("inbounds")
    );
}

#[tokio::test]
async fn import_rejects_malformed_payloads() {
    let mock = seeded_mock();
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg]), None);
    let service = ServerService::new(mock.clone(), mgr, ServerSettings::default());

    let empty = ServerBackup {
        generated_at: chrono::Utc::now(),
        server_id: None,
        protocols: vec![],
        amnezia: None,
        xray: None,
    };
    assert!(matches!(
        service.import_backup(&empty).await.unwrap_err(),
        NodeError::InvalidBackup(_)
    ));

    let missing_bundle = ServerBackup {
        protocols: vec![Protocol::Amneziawg],
        ..empty
    };
    assert!(matches!(
        service.import_backup(&missing_bundle).await.unwrap_err(),
        NodeError::InvalidBackup(_)
    ));
    assert!(
        !mock.commands().iter().any(|c| c.starts_with("cat > ")),
        "rejected imports must not write"
    );
}

#[tokio::test]
async fn load_reads_proc_metrics() {
    let mock = seeded_mock();
    mock.set_file("/proc/uptime", "5000.12 9000.00\n");
    mock.set_file("/proc/loadavg", "0.10 0.20 0.30 1/100 999\n");
    mock.set_file(
        "/proc/meminfo",
        "MemTotal:       2048 kB\nMemAvailable:   1024 kB\n",
    );
    let mgr = manager(&mock, Some(vec![Protocol::Amneziawg]), None);
    let service = ServerService::new(mock.clone(), mgr, ServerSettings::default());

    let load = service.load().await.unwrap();
    assert_eq!(load.uptime_secs, 5000);
    assert_eq!(load.load_avg, [0.10, 0.20, 0.30]);
    assert_eq!(load.mem_total_bytes, 2048 * 1024);
    assert_eq!(load.mem_available_bytes, 1024 * 1024);
}
