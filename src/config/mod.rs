//! Configuration module for the collector node
//!
//! Settings are resolved once at startup into a [`Config`] value and passed by
//! reference from there on. Environment variables (optionally seeded from a
//! `validator.env` file) are the primary source; a TOML file can supply the
//! same settings, with environment variables taking precedence.

mod template;

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};
use crate::utils::ensure_exists;
use crate::validator::{user_agent, ValidatorSettings};

pub use template::{env_template, write_env_template};

/// Env file read before resolving variables; never overrides variables already set.
pub const ENV_FILE: &str = "validator.env";

/// Environment variable names
pub mod vars {
    pub const VALIDATOR: &str = "ORCFAX_VALIDATOR";
    pub const CA_BUNDLE: &str = "VALIDATOR_CA_BUNDLE";
    pub const IDENTITY: &str = "NODE_IDENTITY_LOC";
    pub const SIGNING_KEY: &str = "NODE_SIGNING_KEY";
    pub const GOFER: &str = "GOFER";
    pub const GOFER_TIMEOUT: &str = "GOFER_TIMEOUT_SECS";
    pub const CNT_ENABLED: &str = "CNT_ENABLED";
    pub const CNT_DB: &str = "CNT_DB_NAME";
    pub const OGMIOS_URL: &str = "OGMIOS_URL";
    pub const WAIT_MIN: &str = "RANDOM_WAIT_MIN";
    pub const WAIT_MAX: &str = "RANDOM_WAIT_MAX";
    pub const ACK_TIMEOUT: &str = "ACK_TIMEOUT_SECS";
    pub const OPEN_TIMEOUT: &str = "OPEN_TIMEOUT_SECS";

    pub const ALL: [&str; 13] = [
        VALIDATOR, CA_BUNDLE, IDENTITY, SIGNING_KEY, GOFER, GOFER_TIMEOUT, CNT_ENABLED, CNT_DB,
        OGMIOS_URL, WAIT_MIN, WAIT_MAX, ACK_TIMEOUT, OPEN_TIMEOUT,
    ];
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub cex: CexConfig,
    /// Decentralized path; `None` disables it entirely
    #[serde(default)]
    pub dex: Option<DexConfig>,
    #[serde(default)]
    pub run: RunConfig,
}

/// Validator endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Candidate endpoints; one is chosen at random per run
    #[serde(default)]
    pub uris: Vec<String>,
    /// PEM bundle of trusted roots (bundled webpki roots when unset)
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
    /// Wait for each acknowledgment, in seconds
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Bound on opening the connection, in seconds
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
}

/// Node identity and key material locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub identity_loc: PathBuf,
    #[serde(default)]
    pub signing_key: PathBuf,
}

/// Centralized-exchange price fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CexConfig {
    #[serde(default)]
    pub gofer: PathBuf,
    /// Per-feed bound on the gofer process, in seconds
    #[serde(default = "default_gofer_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

/// CNT indexer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexConfig {
    #[serde(default)]
    pub cnt_db_name: PathBuf,
    #[serde(default)]
    pub ogmios_url: String,
    #[serde(default = "default_dex_timeout_secs")]
    pub timeout_secs: u64,
}

/// Run pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Inclusive stagger bounds in seconds
    #[serde(default = "default_random_wait_min")]
    pub random_wait_min: u64,
    #[serde(default = "default_random_wait_max")]
    pub random_wait_max: u64,
    /// Pause between consecutive sends, in milliseconds
    #[serde(default = "default_send_pause_ms")]
    pub send_pause_ms: u64,
}

// --------- Helper default functions for serde ---------
fn default_ack_timeout_secs() -> u64 {
    10
}
fn default_open_timeout_secs() -> u64 {
    120
}
fn default_gofer_timeout_secs() -> u64 {
    60
}
fn default_dex_timeout_secs() -> u64 {
    30
}
fn default_random_wait_min() -> u64 {
    1
}
fn default_random_wait_max() -> u64 {
    15
}
fn default_send_pause_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            validator: ValidatorConfig::default(),
            node: NodeConfig::default(),
            cex: CexConfig::default(),
            dex: None,
            run: RunConfig::default(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            uris: Vec::new(),
            ca_bundle: None,
            ack_timeout_secs: default_ack_timeout_secs(),
            open_timeout_secs: default_open_timeout_secs(),
        }
    }
}

impl Default for CexConfig {
    fn default() -> Self {
        Self { gofer: PathBuf::new(), fetch_timeout_secs: default_gofer_timeout_secs() }
    }
}

impl Default for DexConfig {
    fn default() -> Self {
        Self {
            cnt_db_name: PathBuf::new(),
            ogmios_url: String::new(),
            timeout_secs: default_dex_timeout_secs(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            random_wait_min: default_random_wait_min(),
            random_wait_max: default_random_wait_max(),
            send_pause_ms: default_send_pause_ms(),
        }
    }
}

impl Config {
    /// Resolve configuration at process start: read `validator.env` if present,
    /// then either `config_file` or the environment alone.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        match dotenv::from_filename(ENV_FILE) {
            | Ok(path) => debug!("loaded environment from {}", path.display()),
            | Err(e) => debug!("no {} loaded: {}", ENV_FILE, e),
        }
        match config_file {
            | Some(path) => Self::from_file(path),
            | None => Self::from_env(),
        }
    }

    /// Build from environment variables only. Fails naming the first missing
    /// required variable.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.merge_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.merge_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Merge environment variables into the configuration
    pub fn merge_env(&mut self) -> Result<()> {
        if let Some(raw) = var(vars::VALIDATOR) {
            self.validator.uris = parse_validator_uris(&raw)?;
        }
        if let Some(bundle) = var(vars::CA_BUNDLE) {
            self.validator.ca_bundle = Some(PathBuf::from(bundle));
        }
        if let Some(secs) = parsed_var(vars::ACK_TIMEOUT)? {
            self.validator.ack_timeout_secs = secs;
        }
        if let Some(secs) = parsed_var(vars::OPEN_TIMEOUT)? {
            self.validator.open_timeout_secs = secs;
        }
        if let Some(loc) = var(vars::IDENTITY) {
            self.node.identity_loc = PathBuf::from(loc);
        }
        if let Some(key) = var(vars::SIGNING_KEY) {
            self.node.signing_key = PathBuf::from(key);
        }
        if let Some(gofer) = var(vars::GOFER) {
            self.cex.gofer = PathBuf::from(gofer);
        }
        if let Some(secs) = parsed_var(vars::GOFER_TIMEOUT)? {
            self.cex.fetch_timeout_secs = secs;
        }

        // DEX collection is on when asked for explicitly or when any of its settings are present.
        if let Some(enabled) = var(vars::CNT_ENABLED) {
            match parse_bool(&enabled) {
                | Some(true) if self.dex.is_none() => self.dex = Some(DexConfig::default()),
                | Some(true) => {}
                | Some(false) => self.dex = None,
                | None => {
                    return Err(Error::ConfigError(format!(
                        "{} must be true or false, got '{}'",
                        vars::CNT_ENABLED,
                        enabled
                    )))
                }
            }
        } else if self.dex.is_none() && (var(vars::CNT_DB).is_some() || var(vars::OGMIOS_URL).is_some()) {
            self.dex = Some(DexConfig::default());
        }
        if let Some(dex) = self.dex.as_mut() {
            if let Some(db) = var(vars::CNT_DB) {
                dex.cnt_db_name = PathBuf::from(db);
            }
            if let Some(url) = var(vars::OGMIOS_URL) {
                dex.ogmios_url = url;
            }
        }

        if let Some(min) = parsed_var(vars::WAIT_MIN)? {
            self.run.random_wait_min = min;
        }
        if let Some(max) = parsed_var(vars::WAIT_MAX)? {
            self.run.random_wait_max = max;
        }
        Ok(())
    }

    /// Validate the configuration for required fields and reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.validator.uris.is_empty() {
            return Err(missing(vars::VALIDATOR, "wss://<node-ws-endpoint>"));
        }
        for uri in &self.validator.uris {
            let parsed = url::Url::parse(uri)
                .map_err(|e| Error::ConfigError(format!("invalid validator url '{}': {}", uri, e)))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(Error::ConfigError(format!(
                    "validator url must be ws:// or wss://: {}",
                    uri
                )));
            }
        }
        if let Some(bundle) = &self.validator.ca_bundle {
            ensure_exists(bundle, "CA bundle")?;
        }
        if self.validator.ack_timeout_secs == 0 || self.validator.open_timeout_secs == 0 {
            return Err(Error::ConfigError("validator timeouts must be > 0".to_string()));
        }

        if self.node.identity_loc.as_os_str().is_empty() {
            return Err(missing(vars::IDENTITY, "/tmp/.node-identity.json"));
        }
        if self.node.signing_key.as_os_str().is_empty() {
            return Err(missing(vars::SIGNING_KEY, "/path/to/signing-key"));
        }
        ensure_exists(&self.node.signing_key, "signing key")?;

        if self.cex.gofer.as_os_str().is_empty() {
            return Err(missing(vars::GOFER, "/path/to/gofer"));
        }
        ensure_exists(&self.cex.gofer, "gofer")?;
        if self.cex.fetch_timeout_secs == 0 {
            return Err(Error::ConfigError("gofer timeout must be > 0".to_string()));
        }

        if let Some(dex) = &self.dex {
            if dex.cnt_db_name.as_os_str().is_empty() {
                return Err(missing(vars::CNT_DB, "/path/to/cnt/database.db"));
            }
            ensure_exists(&dex.cnt_db_name, "cnt index database")?;
            if dex.ogmios_url.trim().is_empty() {
                return Err(missing(vars::OGMIOS_URL, "ws://<ip-address>"));
            }
        }

        if self.run.random_wait_min > self.run.random_wait_max {
            return Err(Error::ConfigError(format!(
                "{} ({}) cannot exceed {} ({})",
                vars::WAIT_MIN,
                self.run.random_wait_min,
                vars::WAIT_MAX,
                self.run.random_wait_max
            )));
        }
        Ok(())
    }

    /// Log the resolved settings (paths and endpoints only, never key material)
    pub fn log_summary(&self) {
        info!("websocket: {:?}", self.validator.uris);
        info!("node identity: {}", self.node.identity_loc.display());
        info!("signing key loc: {}", self.node.signing_key.display());
        info!("gofer loc: {}", self.cex.gofer.display());
        match &self.dex {
            | Some(dex) => {
                info!("db loc: {}", dex.cnt_db_name.display());
                info!("ogmios websocket: {}", dex.ogmios_url);
            }
            | None => info!("cnt collection disabled"),
        }
    }

    /// Pick the validator endpoint for this run.
    pub fn pick_validator_uri<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.validator.uris.choose(rng).map(String::as_str)
    }

    /// Transport settings for one run against `uri`.
    pub fn validator_settings(&self, uri: &str) -> ValidatorSettings {
        ValidatorSettings {
            base_url: uri.to_string(),
            ca_bundle: self.validator.ca_bundle.clone(),
            open_timeout: Duration::from_secs(self.validator.open_timeout_secs),
            ack_timeout: Duration::from_secs(self.validator.ack_timeout_secs),
            user_agent: user_agent(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        | Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::ConfigError(format!("{} is invalid ('{}'): {}", name, raw, e))),
        | None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        | "1" | "true" | "yes" | "on" => Some(true),
        | "0" | "false" | "no" | "off" => Some(false),
        | _ => None,
    }
}

/// A single URL, or a JSON list of URLs.
fn parse_validator_uris(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|e| {
            Error::ConfigError(format!("{} is not a valid JSON list: {}", vars::VALIDATOR, e))
        })
    } else {
        Ok(vec![raw.to_string()])
    }
}

fn missing(name: &str, example: &str) -> Error {
    Error::ConfigError(format!("{} needs setting, e.g. `export {}={}`", name, name, example))
}
