//! Node configuration.
//!
//! Configuration lives in a TOML file with an `[etb]` section whose keys
//! mirror the daemon's command-line flags (`-` replaced by `_`). Read
//! order: `~/.etb.toml`, then `./etb.toml`, then a `--conf` file, then the
//! command line - later sources override earlier ones field by field.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "etb.toml";
const HOME_CONFIG_FILE: &str = ".etb.toml";

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    26532
}

fn default_workdir() -> String {
    "etb_wd".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    60
}

fn default_remote_retries() -> u32 {
    3
}

fn default_wrapper_timeout_secs() -> u64 {
    300
}

/// The `[etb]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtbSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-node working directory: blob store, mirror, rules, logs.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Log file; stderr when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,

    /// Directory of wrapper manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrappers_dir: Option<String>,

    /// Rule files loaded (permanent) at startup.
    #[serde(default)]
    pub rule_files: Vec<String>,

    /// Deadline for one remote delegation attempt.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Attempts before a delegation fails with a fatal error claim.
    #[serde(default = "default_remote_retries")]
    pub remote_retries: u32,

    /// Deadline for a subprocess wrapper invocation.
    #[serde(default = "default_wrapper_timeout_secs")]
    pub wrapper_timeout_secs: u64,
}

impl Default for EtbSection {
    fn default() -> Self {
        EtbSection {
            host: default_host(),
            port: default_port(),
            workdir: default_workdir(),
            log: None,
            wrappers_dir: None,
            rule_files: Vec::new(),
            remote_timeout_secs: default_remote_timeout_secs(),
            remote_retries: default_remote_retries(),
            wrapper_timeout_secs: default_wrapper_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtbConfig {
    #[serde(default)]
    pub etb: EtbSection,
}

/// Field-by-field overlay source: only keys present in a file override.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    etb: RawSection,
}

#[derive(Debug, Default, Deserialize)]
struct RawSection {
    host: Option<String>,
    port: Option<u16>,
    workdir: Option<String>,
    log: Option<String>,
    wrappers_dir: Option<String>,
    rule_files: Option<Vec<String>>,
    remote_timeout_secs: Option<u64>,
    remote_retries: Option<u32>,
    wrapper_timeout_secs: Option<u64>,
}

impl EtbConfig {
    /// Load with the standard precedence. `conf` is the `--conf` file, read
    /// last so it overrides the discovered files.
    pub fn load(conf: Option<&Path>) -> EtbConfig {
        let mut config = EtbConfig::default();
        if let Some(home) = dirs::home_dir() {
            config.overlay_file(&home.join(HOME_CONFIG_FILE));
        }
        config.overlay_file(Path::new(CONFIG_FILE));
        if let Some(path) = conf {
            config.overlay_file(path);
        }
        config
    }

    fn overlay_file(&mut self, path: &Path) {
        if !path.exists() {
            return;
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<RawConfig>(&content) {
                Ok(raw) => self.overlay(raw.etb),
                Err(e) => warn!("ignoring malformed config {}: {}", path.display(), e),
            },
            Err(e) => warn!("failed to read config {}: {}", path.display(), e),
        }
    }

    fn overlay(&mut self, raw: RawSection) {
        let section = &mut self.etb;
        if let Some(v) = raw.host {
            section.host = v;
        }
        if let Some(v) = raw.port {
            section.port = v;
        }
        if let Some(v) = raw.workdir {
            section.workdir = v;
        }
        if let Some(v) = raw.log {
            section.log = Some(v);
        }
        if let Some(v) = raw.wrappers_dir {
            section.wrappers_dir = Some(v);
        }
        if let Some(v) = raw.rule_files {
            section.rule_files = v;
        }
        if let Some(v) = raw.remote_timeout_secs {
            section.remote_timeout_secs = v;
        }
        if let Some(v) = raw.remote_retries {
            section.remote_retries = v;
        }
        if let Some(v) = raw.wrapper_timeout_secs {
            section.wrapper_timeout_secs = v;
        }
    }

    pub fn workdir(&self) -> PathBuf {
        PathBuf::from(&self.etb.workdir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EtbConfig::default();
        assert_eq!(c.etb.host, "127.0.0.1");
        assert_eq!(c.etb.port, 26532);
        assert_eq!(c.etb.remote_retries, 3);
        assert!(c.etb.rule_files.is_empty());
    }

    #[test]
    fn test_overlay_only_present_keys() {
        let mut c = EtbConfig::default();
        let raw: RawConfig = toml::from_str("[etb]\nport = 9100\n").unwrap();
        c.overlay(raw.etb);
        assert_eq!(c.etb.port, 9100);
        assert_eq!(c.etb.host, "127.0.0.1");
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let mut c = EtbConfig::default();
        let first: RawConfig =
            toml::from_str("[etb]\nhost = \"10.0.0.1\"\nport = 9100\n").unwrap();
        let second: RawConfig = toml::from_str("[etb]\nport = 9200\n").unwrap();
        c.overlay(first.etb);
        c.overlay(second.etb);
        assert_eq!(c.etb.host, "10.0.0.1");
        assert_eq!(c.etb.port, 9200);
    }

    #[test]
    fn test_section_roundtrip() {
        let c = EtbConfig::default();
        let text = toml::to_string_pretty(&c).unwrap();
        assert!(text.contains("[etb]"));
        let back: EtbConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.etb.port, c.etb.port);
    }
}
