//! Configuration file parser.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Command-line flags are applied on top by the binary.
//! Unknown keys are accepted but logged, since they are usually typos.
use crate::feed::{BuildOptions, FetchOptions, OutputFormat};
use crate::instances::{WikiConfig, DEFAULT_REPO, DEFAULT_ROW_SELECTOR};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is unusable, e.g. a zero timeout.
    #[error("Invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Where instances come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// The comma-separated `instances` list.
    #[default]
    Static,
    /// The Nitter wiki's public instance table.
    Wiki,
}

/// `[wiki]` table. Only consulted when `provider = "wiki"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WikiSection {
    pub repo: String,
    pub row_selector: String,
    /// Proxy URL for requests to the repository.
    pub proxy: Option<String>,
    pub refresh_interval_secs: u64,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_concurrent_probes: usize,
    pub allow_private_hosts: bool,
}

impl Default for WikiSection {
    fn default() -> Self {
        Self {
            repo: DEFAULT_REPO.to_string(),
            row_selector: DEFAULT_ROW_SELECTOR.to_string(),
            proxy: None,
            refresh_interval_secs: 30 * 60,
            probe_interval_secs: 10,
            probe_timeout_secs: 10,
            max_concurrent_probes: 30,
            allow_private_hosts: false,
        }
    }
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to listen on.
    pub addr: String,
    /// Public base URL of this proxy, used in JSON feeds.
    pub base: Option<String>,
    pub format: OutputFormat,
    /// Comma-separated Nitter base URLs for the static provider.
    pub instances: String,
    pub provider: ProviderKind,
    /// Per-instance fetch timeout.
    pub timeout_secs: u64,
    /// Bound on a whole request across all instances.
    pub request_deadline_secs: u64,
    /// Rotate the first instance tried on each request.
    pub cycle: bool,
    /// Rewrite Nitter links in item bodies.
    pub rewrite: bool,
    /// Log per-feed author counts.
    pub debug_authors: bool,
    pub wiki: WikiSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "localhost:8080".to_string(),
            base: None,
            format: OutputFormat::Atom,
            instances: "https://twiiit.com".to_string(),
            provider: ProviderKind::Static,
            timeout_secs: 10,
            request_deadline_secs: 60,
            cycle: true,
            rewrite: true,
            debug_authors: true,
            wiki: WikiSection::default(),
        }
    }
}

/// Validated provider settings.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Comma-separated instance list.
    Static(String),
    Wiki(WikiConfig),
}

const KNOWN_KEYS: [&str; 11] = [
    "addr",
    "base",
    "format",
    "instances",
    "provider",
    "timeout_secs",
    "request_deadline_secs",
    "cycle",
    "rewrite",
    "debug_authors",
    "wiki",
];

const KNOWN_WIKI_KEYS: [&str; 8] = [
    "repo",
    "row_selector",
    "proxy",
    "refresh_interval_secs",
    "probe_interval_secs",
    "probe_timeout_secs",
    "max_concurrent_probes",
    "allow_private_hosts",
];

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }
    if let Some(toml::Value::Table(wiki)) = raw.get("wiki") {
        for key in wiki.keys() {
            if !KNOWN_WIKI_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %format!("wiki.{}", key), "Unknown key in config file, ignoring");
            }
        }
    }
}

fn positive_secs(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(key, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            path = %path.display(),
            provider = ?config.provider,
            format = ?config.format,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parsed `base`, if set.
    pub fn base_url(&self) -> Result<Option<Url>, ConfigError> {
        self.base
            .as_deref()
            .map(|b| Url::parse(b).map_err(|e| invalid("base", format!("{b:?}: {e}"))))
            .transpose()
    }

    pub fn fetch_options(&self) -> Result<FetchOptions, ConfigError> {
        Ok(FetchOptions {
            cycle: self.cycle,
            timeout: positive_secs("timeout_secs", self.timeout_secs)?,
        })
    }

    pub fn build_options(&self) -> Result<BuildOptions, ConfigError> {
        Ok(BuildOptions {
            format: self.format,
            rewrite: self.rewrite,
            debug_authors: self.debug_authors,
            base: self.base_url()?,
        })
    }

    pub fn request_deadline(&self) -> Result<Duration, ConfigError> {
        positive_secs("request_deadline_secs", self.request_deadline_secs)
    }

    /// Checks the provider settings and converts them to their typed form.
    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        match self.provider {
            ProviderKind::Static => Ok(ProviderConfig::Static(self.instances.clone())),
            ProviderKind::Wiki => {
                let wiki = &self.wiki;
                Url::parse(&wiki.repo)
                    .map_err(|e| invalid("wiki.repo", format!("{:?}: {e}", wiki.repo)))?;
                let proxy = wiki
                    .proxy
                    .as_deref()
                    .map(|p| Url::parse(p).map_err(|e| invalid("wiki.proxy", format!("{p:?}: {e}"))))
                    .transpose()?;
                if wiki.max_concurrent_probes == 0 {
                    return Err(invalid("wiki.max_concurrent_probes", "must be at least 1"));
                }
                Ok(ProviderConfig::Wiki(WikiConfig {
                    repo: wiki.repo.clone(),
                    row_selector: wiki.row_selector.clone(),
                    proxy,
                    refresh_interval: positive_secs(
                        "wiki.refresh_interval_secs",
                        wiki.refresh_interval_secs,
                    )?,
                    probe_interval: positive_secs("wiki.probe_interval_secs", wiki.probe_interval_secs)?,
                    probe_timeout: positive_secs("wiki.probe_timeout_secs", wiki.probe_timeout_secs)?,
                    max_concurrent_probes: wiki.max_concurrent_probes,
                    allow_private_hosts: wiki.allow_private_hosts,
                }))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> Result<Config, ConfigError> {
        Config::parse(content, Path::new("config.toml"))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.addr, "localhost:8080");
        assert_eq!(config.base, None);
        assert_eq!(config.format, OutputFormat::Atom);
        assert_eq!(config.instances, "https://twiiit.com");
        assert_eq!(config.provider, ProviderKind::Static);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.request_deadline_secs, 60);
        assert!(config.cycle);
        assert!(config.rewrite);
        assert!(config.debug_authors);
        assert_eq!(config.wiki.max_concurrent_probes, 30);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/nitter_rss_proxy_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        assert_eq!(parse("   \n  \n  ").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = parse("format = \"json\"\ncycle = false\n").unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(!config.cycle);
        assert_eq!(config.addr, "localhost:8080");
        assert!(config.rewrite);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
addr = "0.0.0.0:9000"
base = "https://proxy.example.org/tw/"
format = "rss"
instances = "https://a.example,https://b.example"
provider = "wiki"
timeout_secs = 5
request_deadline_secs = 30
cycle = false
rewrite = false
debug_authors = false

[wiki]
repo = "https://github.com/example/nitter"
proxy = "socks5://127.0.0.1:9050"
refresh_interval_secs = 600
probe_interval_secs = 20
probe_timeout_secs = 3
max_concurrent_probes = 8
allow_private_hosts = true
"#;
        let config = parse(content).unwrap();
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.format, OutputFormat::Rss);
        assert_eq!(config.provider, ProviderKind::Wiki);
        assert_eq!(config.request_deadline().unwrap(), Duration::from_secs(30));
        assert_eq!(
            config.base_url().unwrap().map(String::from),
            Some("https://proxy.example.org/tw/".to_string())
        );

        let fetch = config.fetch_options().unwrap();
        assert!(!fetch.cycle);
        assert_eq!(fetch.timeout, Duration::from_secs(5));

        match config.provider_config().unwrap() {
            ProviderConfig::Wiki(wiki) => {
                assert_eq!(wiki.repo, "https://github.com/example/nitter");
                assert_eq!(wiki.row_selector, DEFAULT_ROW_SELECTOR);
                assert_eq!(
                    wiki.proxy.map(String::from),
                    Some("socks5://127.0.0.1:9050".to_string())
                );
                assert_eq!(wiki.refresh_interval, Duration::from_secs(600));
                assert_eq!(wiki.probe_interval, Duration::from_secs(20));
                assert_eq!(wiki.probe_timeout, Duration::from_secs(3));
                assert_eq!(wiki.max_concurrent_probes, 8);
                assert!(wiki.allow_private_hosts);
            }
            other => panic!("Expected wiki provider, got {:?}", other),
        }
    }

    #[test]
    fn test_static_provider() {
        let config = parse("instances = \"https://a.example\"\n").unwrap();
        match config.provider_config().unwrap() {
            ProviderConfig::Static(list) => assert_eq!(list, "https://a.example"),
            other => panic!("Expected static provider, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(matches!(
            parse("format = \"html\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = parse("cycle = true\ntotally_fake_key = 1\n[wiki]\ntypo = 2\n").unwrap();
        assert!(config.cycle);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = parse("timeout_secs = 0\n").unwrap();
        assert!(matches!(
            config.fetch_options(),
            Err(ConfigError::Invalid {
                key: "timeout_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_bad_base_rejected() {
        let config = parse("base = \"not a url\"\n").unwrap();
        assert!(matches!(
            config.build_options(),
            Err(ConfigError::Invalid { key: "base", .. })
        ));
    }

    #[test]
    fn test_bad_wiki_settings_rejected() {
        let config = parse("provider = \"wiki\"\n[wiki]\nmax_concurrent_probes = 0\n").unwrap();
        assert!(config.provider_config().is_err());

        let config = parse("provider = \"wiki\"\n[wiki]\nrepo = \"nope\"\n").unwrap();
        assert!(matches!(
            config.provider_config(),
            Err(ConfigError::Invalid {
                key: "wiki.repo",
                ..
            })
        ));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("nitter_rss_proxy_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("nitter_rss_proxy_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "addr = \"127.0.0.1:1234\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.addr, "127.0.0.1:1234");

        std::fs::remove_dir_all(&dir).ok();
    }
}
