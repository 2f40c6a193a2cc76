//! Daemon configuration
//!
//! Layering (later wins): built-in defaults, TOML file, `QUILL_*` environment.
//! Nested keys use `__`, e.g. `QUILL_DISPATCH__SLOTS=4`.

use config::{Config, ConfigError, Environment, File, FileFormat, Map};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ENV_PREFIX: &str = "QUILL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub dispatch: DispatchSettings,
    pub generator: GeneratorSettings,
    pub identity: IdentitySettings,
    pub rate_limit: RateLimitSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub ws_addr: String,
    pub rpc_host: String,
    pub rpc_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:8080".to_string(),
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 8081,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Concurrent generations
    pub slots: usize,
    /// 0 removes a waiting entry as soon as its member's last socket closes
    pub disconnect_grace_ms: i64,
    pub sweep_interval_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            slots: 1,
            disconnect_grace_ms: 0,
            sweep_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Http,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub kind: GeneratorKind,
    /// Generation service endpoint (kind = http)
    pub url: String,
    /// Program to run (kind = command)
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub timeout_secs: u64,
    pub env_allowlist: Vec<String>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Http,
            url: "http://127.0.0.1:8000/generate".to_string(),
            command: String::new(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: 600,
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Trust the member id and plan sent in the upgrade request
    Handshake,
    /// Validate the bearer token against an auth service
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub kind: IdentityKind,
    pub url: String,
    pub timeout_secs: u64,
    /// Handshake mode only: honor the client's `x-plan` claim (development)
    pub trust_plan_claim: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            kind: IdentityKind::Handshake,
            url: String::new(),
            timeout_secs: 5,
            trust_plan_claim: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub ws_burst: u32,
    pub ws_per_sec: u32,
    pub rpc_burst: u32,
    pub rpc_per_sec: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            ws_burst: 20,
            ws_per_sec: 5,
            rpc_burst: 200,
            rpc_per_sec: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Used when RUST_LOG is unset
    pub filter: String,
    /// Daily rolling log files are written here when set
    pub directory: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "quill=info".to_string(),
            directory: None,
        }
    }
}

/// `<config dir>/quill-queue/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "quill", "quill-queue").map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(path: Option<&str>, env: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (Some(expand_path(p)), true),
            None => (default_config_path(), false),
        };

        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(required));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("generator.args")
                    .with_list_parse_key("generator.env_allowlist")
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.slots == 0 {
            return Err(ConfigError::Message("dispatch.slots must be at least 1".into()));
        }
        if self.dispatch.disconnect_grace_ms < 0 {
            return Err(ConfigError::Message("dispatch.disconnect_grace_ms cannot be negative".into()));
        }
        if self.dispatch.disconnect_grace_ms > 0 && self.dispatch.sweep_interval_ms == 0 {
            return Err(ConfigError::Message(
                "dispatch.sweep_interval_ms must be at least 1 when a disconnect grace is set".into(),
            ));
        }
        match self.generator.kind {
            GeneratorKind::Command if self.generator.command.trim().is_empty() => {
                return Err(ConfigError::Message(
                    "generator.command is required when generator.kind = \"command\"".into(),
                ));
            }
            GeneratorKind::Http if self.generator.url.trim().is_empty() => {
                return Err(ConfigError::Message("generator.url cannot be empty".into()));
            }
            _ => {}
        }
        if self.identity.kind == IdentityKind::Http && self.identity.url.trim().is_empty() {
            return Err(ConfigError::Message(
                "identity.url is required when identity.kind = \"http\"".into(),
            ));
        }
        Ok(())
    }
}
