use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that points at an alternate config file.
pub const CONFIG_ENV: &str = "WORKBENCH_CONFIG";

/// Top-level configuration loaded from `~/.workbench/config.toml`.
///
/// Every section falls back to its defaults, so a partial file (or no file at
/// all) is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

impl Config {
    /// Load config from `$WORKBENCH_CONFIG` or `~/.workbench/config.toml`,
    /// falling back to defaults when the file does not exist. Environment
    /// overrides are applied last.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut cfg = if path.exists() {
            Self::parse_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Config::default()
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific path without consulting the environment.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let cfg = Self::parse_file(&path.into())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `WORKBENCH_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("WORKBENCH_HOST") {
            self.daemon.host = host;
        }
        if let Ok(port) = std::env::var("WORKBENCH_PORT") {
            self.daemon.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("WORKBENCH_PORT '{port}' is not a port")))?;
        }
        if let Ok(root) = std::env::var("WORKBENCH_ROOT") {
            self.workspace.root = root;
        }
        if let Ok(secs) = std::env::var("WORKBENCH_EXEC_TIMEOUT_SECS") {
            self.exec.timeout_secs = secs.parse().map_err(|_| {
                ConfigError::Validation(format!("WORKBENCH_EXEC_TIMEOUT_SECS '{secs}' is not a number"))
            })?;
        }
        Ok(())
    }

    /// Semantic validation for values the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        if self.daemon.port == 0 {
            return Err(ConfigError::Validation("daemon.port must be non-zero".into()));
        }
        if self.workspace.root.trim().is_empty() {
            return Err(ConfigError::Validation("workspace.root must not be empty".into()));
        }
        self.exec.validate()
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".workbench")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be 'human' or 'json', got '{other}'"
            ))),
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    /// Upper bound for request bodies (file writes).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl DaemonConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    8787
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding one sub-directory per project. `~/` is expanded.
    #[serde(default = "default_workspace_root")]
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

impl WorkspaceConfig {
    /// The root with a leading `~/` replaced by the home directory.
    pub fn root_path(&self) -> PathBuf {
        match (self.root.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.root),
        }
    }
}

fn default_workspace_root() -> String {
    "~/.workbench/projects".into()
}

/// Limits and shell settings for spawned commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_shell_flag")]
    pub shell_flag: String,
    /// Maximum lifetime of a single execution.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-stream output cap; older bytes are discarded past it.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Maximum number of live executions (0 = unlimited).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long finished results stay readable.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_max_retained_results")]
    pub max_retained_results: usize,
    /// How long teardown waits for a killed process to be reaped.
    #[serde(default = "default_kill_wait_secs")]
    pub kill_wait_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            shell_flag: default_shell_flag(),
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            max_concurrent: default_max_concurrent(),
            result_ttl_secs: default_result_ttl_secs(),
            max_retained_results: default_max_retained_results(),
            kill_wait_secs: default_kill_wait_secs(),
        }
    }
}

impl ExecConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.trim().is_empty() {
            return Err(ConfigError::Validation("exec.shell must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation("exec.timeout_secs must be greater than 0".into()));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Validation(
                "exec.max_output_bytes must be greater than 0".into(),
            ));
        }
        if self.max_retained_results == 0 {
            return Err(ConfigError::Validation(
                "exec.max_retained_results must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".into()
    } else {
        "/bin/sh".into()
    }
}
fn default_shell_flag() -> String {
    if cfg!(windows) {
        "/C".into()
    } else {
        "-c".into()
    }
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_max_output_bytes() -> usize {
    1024 * 1024
}
fn default_max_concurrent() -> usize {
    32
}
fn default_result_ttl_secs() -> u64 {
    600
}
fn default_max_retained_results() -> usize {
    256
}
fn default_kill_wait_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_root_is_expanded() {
        let ws = WorkspaceConfig {
            root: "~/projects".into(),
        };
        let path = ws.root_path();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("projects"));
    }

    #[test]
    fn absolute_root_is_kept() {
        let ws = WorkspaceConfig {
            root: "/srv/workbench".into(),
        };
        assert_eq!(ws.root_path(), PathBuf::from("/srv/workbench"));
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let daemon = DaemonConfig::default();
        assert_eq!(daemon.bind_addr(), "127.0.0.1:8787");
    }
}
