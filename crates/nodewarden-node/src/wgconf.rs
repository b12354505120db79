//! Structured model of the WireGuard-style configuration text.
//!
//! The file is an ordered list of `[Section]` stanzas holding `Key = Value`
//! pairs. Parsing is total: anything that is not a header or a pair is kept
//! as an opaque line, and serialization reproduces order, unknown keys,
//! comments and blank lines verbatim. Mutations always go through this model
//! and the file is rewritten wholesale.

use std::fmt;

pub const INTERFACE_SECTION: &str = "Interface";
pub const PEER_SECTION: &str = "Peer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Pair { key: String, value: String },
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub lines: Vec<Line>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// First value stored under `key`, case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Pair { key: k, value } if k.eq_ignore_ascii_case(key) => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.lines.push(Line::Pair {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Replace the first `key` pair or append one if absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let Line::Pair { key: k, value: v } = line
                && k.eq_ignore_ascii_case(key)
            {
                *v = value;
                return;
            }
        }
        self.push(key, value);
    }
}

/// AmneziaWG junk-packet parameters carried in the `[Interface]` stanza.
/// Absent keys read as empty strings so they pass through templates verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwgParams {
    pub jc: String,
    pub jmin: String,
    pub jmax: String,
    pub s1: String,
    pub s2: String,
    pub h1: String,
    pub h2: String,
    pub h3: String,
    pub h4: String,
}

impl AwgParams {
    pub fn from_section(section: &Section) -> Self {
        let val = |key: &str| section.get(key).unwrap_or_default().to_string();
        Self {
            jc: val("Jc"),
            jmin: val("Jmin"),
            jmax: val("Jmax"),
            s1: val("S1"),
            s2: val("S2"),
            h1: val("H1"),
            h2: val("H2"),
            h3: val("H3"),
            h4: val("H4"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgConfig {
    /// Lines appearing before the first section header.
    pub preamble: Vec<Line>,
    pub sections: Vec<Section>,
}

impl WgConfig {
    pub fn parse(text: &str) -> Self {
        let mut config = WgConfig::default();

        for raw in text.lines() {
            let trimmed = raw.trim();

            if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
                config
                    .sections
                    .push(Section::new(trimmed[1..trimmed.len() - 1].trim()));
                continue;
            }

            let line = match parse_pair(trimmed) {
                Some((key, value)) => Line::Pair { key, value },
                None => Line::Other(raw.to_string()),
            };

            match config.sections.last_mut() {
                Some(section) => section.lines.push(line),
                None => config.preamble.push(line),
            }
        }

        config
    }

    pub fn interface(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_named(INTERFACE_SECTION))
    }

    pub fn peers(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_named(PEER_SECTION))
    }

    pub fn peer_count(&self) -> usize {
        self.peers().count()
    }

    /// Peer stanza whose `PublicKey` equals `public_key` exactly. Exact value
    /// equality keeps removal safe even if one key were a prefix of another.
    pub fn find_peer(&self, public_key: &str) -> Option<&Section> {
        self.peers().find(|s| s.get("PublicKey") == Some(public_key))
    }

    pub fn push_peer(&mut self, peer: Section) {
        self.sections.push(peer);
    }

    /// Remove the peer stanza keyed by `public_key`; false when absent.
    pub fn remove_peer(&mut self, public_key: &str) -> bool {
        let before = self.sections.len();
        self.sections
            .retain(|s| !(s.is_named(PEER_SECTION) && s.get("PublicKey") == Some(public_key)));
        self.sections.len() < before
    }

    pub fn listen_port(&self) -> Option<u16> {
        self.interface()?.get("ListenPort")?.trim().parse().ok()
    }

    pub fn awg_params(&self) -> AwgParams {
        self.interface()
            .map(AwgParams::from_section)
            .unwrap_or_default()
    }
}

impl fmt::Display for WgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.preamble {
            write_line(f, line)?;
        }
        for section in &self.sections {
            writeln!(f, "[{}]", section.name)?;
            for line in &section.lines {
                write_line(f, line)?;
            }
        }
        Ok(())
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, line: &Line) -> fmt::Result {
    match line {
        Line::Pair { key, value } => writeln!(f, "{key} = {value}"),
        Line::Other(raw) => writeln!(f, "{raw}"),
    }
}

fn parse_pair(trimmed: &str) -> Option<(String, String)> {
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SAMPLE: &str = "\
[Interface]
Address = 10.8.1.1/24
ListenPort = 38291
PrivateKey = sk
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
PublicKey = abc
PresharedKey = psk1
AllowedIPs = 10.8.1.2/32

[Peer]
PublicKey = abcdef
AllowedIPs = 10.8.1.3/32
";

    #[test]
    fn round_trips_canonical_text() {
        let config = WgConfig::parse(SAMPLE);
        assert_eq!(config.to_string(), SAMPLE);
    }

    #[test]
    fn preserves_comments_and_unknown_keys() {
        let text = "# managed file\n[Interface]\nAddress = 10.8.1.1/24\nFwMark = 51820\n";
        let config = WgConfig::parse(text);
        assert_eq!(config.to_string(), text);
        assert_eq!(config.interface().unwrap().get("FwMark"), Some("51820"));
    }

    #[test]
    fn interface_lookups() {
        let config = WgConfig::parse(SAMPLE);
        assert_eq!(config.listen_port(), Some(38291));
        let params = config.awg_params();
        assert_eq!(params.jc, "4");
        assert_eq!(params.h4, "1583407056");
        assert_eq!(config.peer_count(), 2);
    }

    #[test]
    fn missing_awg_params_read_empty() {
        let config = WgConfig::parse("[Interface]\nAddress = 10.0.0.1/24\n");
        assert_eq!(config.awg_params().jc, "");
    }

    #[test_case("abc", true; "first peer")]
    #[test_case("abcdef", true; "longer key")]
    #[test_case("ab", false; "prefix of a key is not a match")]
    #[test_case("bc", false; "substring is not a match")]
    fn find_peer_is_exact(key: &str, found: bool) {
        let config = WgConfig::parse(SAMPLE);
        assert_eq!(config.find_peer(key).is_some(), found);
    }

    #[test]
    fn remove_peer_keeps_others_intact() {
        let mut config = WgConfig::parse(SAMPLE);
        assert!(config.remove_peer("abc"));
        assert_eq!(config.peer_count(), 1);
        assert!(config.find_peer("abcdef").is_some());
        // idempotent
        assert!(!config.remove_peer("abc"));
    }

    #[test]
    fn remove_peer_by_prefix_does_not_false_match() {
        let mut config = WgConfig::parse(SAMPLE);
        assert!(!config.remove_peer("ab"));
        assert_eq!(config.peer_count(), 2);
    }

    #[test]
    fn push_peer_appends_after_existing_sections() {
        let mut config = WgConfig::parse(SAMPLE);
        let mut peer = Section::new(PEER_SECTION);
        peer.push("PublicKey", "xyz");
        peer.push("AllowedIPs", "10.8.1.4/32");
        config.push_peer(peer);
        assert_eq!(config.peer_count(), 3);
        assert!(config.to_string().ends_with("[Peer]\nPublicKey = xyz\nAllowedIPs = 10.8.1.4/32\n"));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let config = WgConfig::parse("[interface]\naddress = 10.0.0.1/24\n");
        assert_eq!(config.interface().unwrap().get("Address"), Some("10.0.0.1/24"));
    }

    #[test]
    fn set_replaces_in_place() {
        let mut section = Section::new(INTERFACE_SECTION);
        section.push("Address", "10.8.1.1/24");
        section.set("Address", "10.8.2.1/24");
        section.set("ListenPort", "51820");
        assert_eq!(section.get("Address"), Some("10.8.2.1/24"));
        assert_eq!(section.get("ListenPort"), Some("51820"));
        assert_eq!(section.lines.len(), 2);
    }
}
