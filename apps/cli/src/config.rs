//! CLI configuration and Prism credentials.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/prism-ova/config.toml`
//! - Windows: `%APPDATA%/prism-ova/config.toml`
//!
//! Credentials live in a separate shell-style file (`PRISM=`, `USER=`,
//! `PASS=`) and can be overridden with the `PRISM`, `PRISM_USER` and
//! `PRISM_PASS` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use prism_ova_engine::{OrchestratorConfig, PollPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Upload chunk size in MiB.
    #[serde(default = "default_chunk_size_mib")]
    pub chunk_size_mib: u64,

    /// Concurrent chunk uploads per OVA.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds between task status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound in seconds on waiting for one remote task.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Attempts per chunk, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Accept Prism's self-signed certificate.
    #[serde(default = "default_true")]
    pub insecure_tls: bool,

    /// Directory holding `vm-export-*` restore points.
    #[serde(default = "default_restore_points_dir")]
    pub restore_points_dir: PathBuf,

    /// Shell-style credentials file.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

fn default_chunk_size_mib() -> u64 {
    100
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_wait_secs() -> u64 {
    7200
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_restore_points_dir() -> PathBuf {
    "restore-points".into()
}

fn default_credentials_file() -> PathBuf {
    ".nutanix_creds".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size_mib: default_chunk_size_mib(),
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            retry_attempts: default_retry_attempts(),
            insecure_tls: default_true(),
            restore_points_dir: default_restore_points_dir(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads `path`, writing defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }

    /// Engine settings derived from this configuration.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            chunk_size: self.chunk_size_mib * 1024 * 1024,
            concurrency: self.concurrency,
            poll: self.poll_policy(),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("prism-ova").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("prism-ova")
            .join("config.toml"))
    }
}

/// Prism Central endpoint and login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Reads the credentials file (if present) and applies env overrides.
    pub fn resolve(file: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", file.display()));
            }
        };
        Self::from_sources(&content, |key| std::env::var(key).ok())
    }

    fn from_sources(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut host = None;
        let mut username = None;
        let mut password = None;
        for (key, value) in parse_shell_vars(content) {
            match key.as_str() {
                "PRISM" => host = Some(value),
                "USER" => username = Some(value),
                "PASS" => password = Some(value),
                _ => {}
            }
        }

        let host = env("PRISM").or(host).filter(|v| !v.is_empty());
        let username = env("PRISM_USER").or(username).filter(|v| !v.is_empty());
        let password = env("PRISM_PASS").or(password);

        let (Some(host), Some(username), Some(password)) = (host, username, password) else {
            bail!("Prism credentials incomplete: set PRISM, USER and PASS in the credentials file or PRISM, PRISM_USER and PRISM_PASS in the environment");
        };
        Ok(Self {
            host,
            username,
            password,
        })
    }
}

/// Parses `KEY=value` lines, allowing `export` prefixes, quotes and comments.
fn parse_shell_vars(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size_mib, 100);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_wait_secs, 7200);
        assert!(config.insecure_tls);
        assert_eq!(config.restore_points_dir, PathBuf::from("restore-points"));
    }

    #[test]
    fn config_partial_toml() {
        let config: Config = toml::from_str("concurrency = 1\ninsecure_tls = false").unwrap();
        assert_eq!(config.concurrency, 1);
        assert!(!config.insecure_tls);
        assert_eq!(config.chunk_size_mib, 100);
    }

    #[test]
    fn orchestrator_settings() {
        let config = Config {
            chunk_size_mib: 8,
            retry_attempts: 5,
            ..Config::default()
        };
        let o = config.orchestrator();
        assert_eq!(o.chunk_size, 8 * 1024 * 1024);
        assert_eq!(o.retry.max_attempts, 5);
        assert_eq!(o.poll.max_wait, Duration::from_secs(7200));
        assert!(o.validate().is_ok());
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert_eq!(created, Config::default());
        assert!(path.exists());

        let edited = Config {
            concurrency: 2,
            ..Config::default()
        };
        edited.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), edited);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn parses_credentials_file() {
        let content = "# prism\nexport PRISM=\"pc.example.com\"\nUSER='admin'\nPASS=s3cr=t\n";
        let creds = Credentials::from_sources(content, |_| None).unwrap();
        assert_eq!(creds.host, "pc.example.com");
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "s3cr=t");
    }

    #[test]
    fn env_overrides_file() {
        let content = "PRISM=pc1\nUSER=admin\nPASS=a";
        let creds = Credentials::from_sources(content, |key| {
            (key == "PRISM_PASS").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(creds.host, "pc1");
        assert_eq!(creds.password, "from-env");
    }

    #[test]
    fn missing_credentials_fail() {
        assert!(Credentials::from_sources("PRISM=pc1", |_| None).is_err());
        assert!(Credentials::from_sources("PRISM=\nUSER=a\nPASS=b", |_| None).is_err());
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::from_sources("PRISM=h\nUSER=u\nPASS=topsecret", |_| None).unwrap();
        assert!(!format!("{creds:?}").contains("topsecret"));
    }
}
