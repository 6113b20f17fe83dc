use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EMBEDDED: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/settings/default.toml"));

/// Longest prefix the kernel keeps for a log statement.
const MAX_LOG_PREFIX: usize = 127;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid settings {origin}: {message}")]
    Invalid { origin: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundDefault {
    Drop,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundDefault {
    Pass,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub table: String,
    pub default_inbound: InboundDefault,
    pub default_outbound: OutboundDefault,
    pub stateful: bool,
    pub log_prefix: String,
    #[serde(default)]
    pub approximate_dynamic_addresses: bool,
    #[serde(default)]
    pub waive: BTreeSet<String>,
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
    #[serde(default)]
    pub pseudo_interfaces: BTreeMap<String, String>,
}

impl Settings {
    /// Built-in settings shipped with the binary.
    pub fn embedded() -> Result<Settings, SettingsError> {
        parse_settings(EMBEDDED, "embedded")
    }

    /// Load from `path` when given, otherwise the embedded defaults.
    /// Returns the settings with their source (`embedded` or `file:<path>`).
    pub fn load(path: Option<&Path>) -> Result<(Settings, String), SettingsError> {
        let Some(path) = path else {
            return Ok((Settings::embedded()?, "embedded".to_string()));
        };
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = format!("file:{}", path.display());
        let settings = parse_settings(&raw, &origin)?;
        Ok((settings, origin))
    }

    /// Linux device for a BSD device, renamed when configured.
    pub fn device_name<'a>(&'a self, device: &'a str) -> &'a str {
        self.devices.get(device).map(String::as_str).unwrap_or(device)
    }

    pub fn is_waived(&self, construct: &str) -> bool {
        self.waive.contains(construct)
    }
}

fn parse_settings(raw: &str, origin: &str) -> Result<Settings, SettingsError> {
    let settings: Settings = toml::from_str(raw).map_err(|source| SettingsError::Toml {
        origin: origin.to_string(),
        source,
    })?;
    validate(&settings).map_err(|message| SettingsError::Invalid {
        origin: origin.to_string(),
        message,
    })?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), String> {
    if !is_identifier(&settings.table) {
        return Err(format!("table name '{}' is not a valid nft identifier", settings.table));
    }
    if settings.log_prefix.len() > MAX_LOG_PREFIX || settings.log_prefix.contains('"') {
        return Err(format!(
            "log_prefix must be at most {MAX_LOG_PREFIX} characters without quotes"
        ));
    }
    for (from, to) in settings.devices.iter().chain(&settings.pseudo_interfaces) {
        if !is_device_name(to) {
            return Err(format!("device mapping '{from}' -> '{to}' is not a valid device name"));
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Linux interface names: up to 15 bytes, optional trailing `*` wildcard.
fn is_device_name(name: &str) -> bool {
    let body = name.strip_suffix('*').unwrap_or(name);
    !body.is_empty()
        && name.len() <= 15
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
}

#[cfg(test)]
mod tests {
    use super::{InboundDefault, OutboundDefault, Settings, SettingsError};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn embedded_settings_load() {
        let (settings, source) = Settings::load(None).expect("embedded");
        assert_eq!(source, "embedded");
        assert_eq!(settings.table, "patronus");
        assert_eq!(settings.default_inbound, InboundDefault::Drop);
        assert_eq!(settings.default_outbound, OutboundDefault::Pass);
        assert!(settings.stateful);
        assert!(settings.waive.is_empty());
    }

    #[test]
    fn file_override_reports_source() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("edge.toml");
        fs::write(
            &path,
            r#"
table = "edge"
default_inbound = "reject"
default_outbound = "pass"
stateful = false
log_prefix = "edge"
waive = ["sched"]

[devices]
em0 = "eth0"

[pseudo_interfaces]
openvpn = "tun*"
"#,
        )
        .expect("write settings");

        let (settings, source) = Settings::load(Some(&path)).expect("settings");
        assert!(source.starts_with("file:"));
        assert_eq!(settings.device_name("em0"), "eth0");
        assert_eq!(settings.device_name("em1"), "em1");
        assert!(settings.is_waived("sched"));
        assert_eq!(settings.pseudo_interfaces["openvpn"], "tun*");
    }

    #[test]
    fn rejects_bad_table_name() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        fs::write(
            &path,
            "table = \"9lives\"\ndefault_inbound = \"drop\"\ndefault_outbound = \"pass\"\nstateful = true\nlog_prefix = \"x\"\n",
        )
        .expect("write settings");

        let err = Settings::load(Some(&path)).expect_err("must fail");
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("typo.toml");
        fs::write(
            &path,
            "table = \"t\"\ndefault_inbound = \"drop\"\ndefault_outbound = \"pass\"\nstateful = true\nlog_prefix = \"x\"\nstatefull = true\n",
        )
        .expect("write settings");

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(SettingsError::Toml { .. })
        ));
    }
}
