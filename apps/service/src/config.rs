use std::collections::HashSet;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::monitoring::checker::ProbeMethod;
use crate::monitoring::types::{HostRole, HostTarget};
use crate::validation::{
    parse_report_time, validate_host_name, validate_interval, validate_probe_address,
    validate_threshold, validate_timeout, validate_webhook_url,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding state, audit logs, error logs and the run lock
    pub base_dir: path::PathBuf,
    pub probe_timeout_ms: u64,
    pub cycle_interval_secs: u64,
    /// Overall deadline for one round of probes; derived from the timeout when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_deadline_ms: Option<u64>,
    /// Local wall-clock time (`HH:MM`) after which the daily report is sent
    pub report_time: String,
    pub probe_method: ProbeMethod,
    /// Port used by the TCP prober when an address carries none
    pub tcp_port: u16,
    pub notifier: NotifierConfig,
    #[serde(deserialize_with = "lenient_hosts")]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    Webhook,
    #[default]
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Name of the environment variable holding the API credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Accounts or tags prefixed to every message
    pub mention_tags: String,
    pub max_message_len: usize,
    /// Delivery attempts (one per cycle) before a message is dropped
    pub max_attempts: u32,
    pub send_timeout_ms: u64,
}

/// One `[[hosts]]` entry as written by the operator, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostEntry {
    pub name: String,
    pub address: String,
    pub role: String,
    pub threshold: i64,
    /// Why the entry could not be read, reported once logging is up
    #[serde(skip)]
    pub rejected: Option<String>,
}

impl Default for HostEntry {
    fn default() -> Self {
        Self { name: String::new(), address: String::new(), role: "remote".into(), threshold: 2, rejected: None }
    }
}

impl HostEntry {
    fn new(name: &str, address: &str, role: HostRole, threshold: i64) -> Self {
        Self { name: name.into(), address: address.into(), role: role.to_string(), threshold, rejected: None }
    }

    fn malformed(index: usize, value: &toml::Value, reason: String) -> Self {
        let name = match value.get("name").and_then(toml::Value::as_str) {
            Some(name) => name.to_string(),
            None => format!("#{}", index + 1),
        };
        Self { name, rejected: Some(reason), ..Default::default() }
    }

    /// Validate the entry into a probe target
    pub fn to_target(&self) -> anyhow::Result<HostTarget> {
        if let Some(reason) = &self.rejected {
            anyhow::bail!("malformed entry: {}", reason);
        }
        validate_host_name(&self.name).to_result()?;
        validate_probe_address(self.address.trim()).to_result()?;
        validate_threshold(self.threshold).to_result()?;
        let role: HostRole = self.role.parse().map_err(anyhow::Error::msg)?;

        Ok(HostTarget::new(self.name.trim(), self.address.trim(), role, self.threshold as u32))
    }
}

/// Keep entries that do not even have the right shape as rejected instead of
/// failing the whole file. The config is parsed before logging starts, so
/// `targets` is where they get reported.
fn lenient_hosts<'de, D>(deserializer: D) -> Result<Vec<HostEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<toml::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value.clone().try_into::<HostEntry>() {
            Ok(entry) => entry,
            Err(e) => HostEntry::malformed(index, &value, e.to_string()),
        })
        .collect())
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/netwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("netwatch/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: path::PathBuf::from("."),
            probe_timeout_ms: 1000,
            cycle_interval_secs: 60,
            cycle_deadline_ms: None,
            report_time: "08:00".into(),
            probe_method: ProbeMethod::Icmp,
            tcp_port: 443,
            notifier: NotifierConfig::default(),
            hosts: vec![
                HostEntry::new("Gateway", "192.168.1.1", HostRole::Gateway, 2),
                HostEntry::new("Google-DNS", "8.8.8.8", HostRole::Remote, 3),
                HostEntry::new("Cloudflare", "1.1.1.1", HostRole::Remote, 3),
                HostEntry::new("Quad9", "9.9.9.9", HostRole::Remote, 5),
            ],
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            url: None,
            token_env: None,
            mention_tags: String::new(),
            max_message_len: 280,
            max_attempts: 3,
            send_timeout_ms: 5000,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Monitor Configuration:")?;
        write_title_1(f, "Cycle")?;
        write_1(f, "Base Directory", &self.base_dir.display())?;
        write_1(f, "Interval (s)", &self.cycle_interval_secs)?;
        write_1(f, "Probe Timeout (ms)", &self.probe_timeout_ms)?;
        write_1(f, "Probe Deadline (ms)", &self.cycle_deadline().as_millis())?;
        write_1(f, "Probe Method", &self.probe_method)?;
        write_1(f, "Daily Report Time", &self.report_time)?;
        write_title_1(f, "Notifier")?;
        write_1(f, "Kind", &format!("{:?}", self.notifier.kind).to_lowercase())?;
        write_1(f, "URL", &self.notifier.url.as_deref().unwrap_or("-"))?;
        write_1(f, "Credential Variable", &self.notifier.token_env.as_deref().unwrap_or("-"))?;
        write_1(f, "Max Attempts", &self.notifier.max_attempts)?;
        write_title_1(f, "Hosts")?;
        for target in self.targets() {
            write_1(f, &target.name, &target.address)?;
            write_2(f, "Role", &target.role)?;
            write_2(f, "Threshold", &target.threshold)?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/netwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// A freshly written config keeps its state next to itself.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            let mut config = Self::from_toml(&raw_string)?;
            // Relative storage paths are anchored at the config file, not the cwd
            if config.base_dir.is_relative() {
                if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    config.base_dir = parent.join(&config.base_dir);
                }
            }
            Ok(config)
        } else {
            let mut config = Self::default();
            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.base_dir = parent.to_path_buf();
            }
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Check settings that affect every host. Host entries are validated
    /// one by one in [`Config::targets`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: Option<String>| ConfigError::Invalid {
            field,
            reason: reason.unwrap_or_default(),
        };

        let interval = validate_interval(self.cycle_interval_secs);
        if !interval.is_valid {
            return Err(invalid("cycle_interval_secs", interval.error));
        }
        let timeout = validate_timeout(self.probe_timeout_ms, self.cycle_interval_secs);
        if !timeout.is_valid {
            return Err(invalid("probe_timeout_ms", timeout.error));
        }
        if self.cycle_deadline_ms == Some(0) {
            return Err(invalid("cycle_deadline_ms", Some("Deadline must be positive".into())));
        }
        self.report_time()?;

        if self.notifier.kind == NotifierKind::Webhook {
            let Some(url) = self.notifier.url.as_deref() else {
                return Err(invalid("notifier.url", Some("Webhook notifier requires a url".into())));
            };
            let check = validate_webhook_url(url);
            if !check.is_valid {
                return Err(invalid("notifier.url", check.error));
            }
        }
        if self.notifier.max_attempts == 0 {
            return Err(invalid("notifier.max_attempts", Some("Must be at least 1".into())));
        }

        Ok(())
    }

    pub fn report_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_report_time(&self.report_time)
            .map_err(|e| ConfigError::Invalid { field: "report_time", reason: e.to_string() })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        self.cycle_deadline_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.probe_timeout() * 2 + Duration::from_millis(500))
    }

    pub fn state_path(&self) -> path::PathBuf {
        self.base_dir.join("state.json")
    }

    pub fn audit_dir(&self) -> path::PathBuf {
        self.base_dir.join("host-logs")
    }

    pub fn lock_path(&self) -> path::PathBuf {
        self.base_dir.join("netwatch.lock")
    }

    /// Validated hosts. Invalid or duplicate entries are skipped with a
    /// warning so the remaining hosts are still monitored.
    pub fn targets(&self) -> Vec<HostTarget> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.hosts.len());

        for entry in &self.hosts {
            match entry.to_target() {
                Ok(target) if !seen.insert(target.name.clone()) => {
                    warn!("Ignoring duplicate host entry '{}'", target.name);
                }
                Ok(target) => targets.push(target),
                Err(e) => warn!("Ignoring host entry '{}': {}", entry.name, e),
            }
        }

        targets
    }
}
