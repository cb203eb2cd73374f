//! Application configuration for tpsync.
//!
//! Config lives in `tpsync.toml` (working directory first, then
//! `~/.tpsync/tpsync.toml`). A handful of environment variables override
//! file values, and CLI flags override both. Secrets never live in the file:
//! it only names the environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TpsyncError};
use crate::types::NumberType;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "tpsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tpsync";

// ---------------------------------------------------------------------------
// Config structs (matching tpsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Compliance (TPS/CTPS) API settings.
    #[serde(default)]
    pub compliance: ComplianceConfig,

    /// CRM (HubSpot) settings.
    #[serde(default)]
    pub crm: CrmConfig,

    /// Batch sweep and reconciliation settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Retry policy for CRM writes.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Webhook receiver settings.
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// `[compliance]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Check endpoint URL.
    #[serde(default = "default_compliance_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum numbers per check request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds for batch checks.
    #[serde(default = "default_compliance_timeout")]
    pub timeout_secs: u64,

    /// Request timeout in seconds for single-number checks (webhook path).
    #[serde(default = "default_single_check_timeout")]
    pub single_timeout_secs: u64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_compliance_endpoint(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_compliance_timeout(),
            single_timeout_secs: default_single_check_timeout(),
        }
    }
}

fn default_compliance_endpoint() -> String {
    "https://api.tpsservices.co.uk/check".into()
}
fn default_api_key_env() -> String {
    "TPS_API_KEY".into()
}
fn default_batch_size() -> usize {
    10_000
}
fn default_compliance_timeout() -> u64 {
    30
}
fn default_single_check_timeout() -> u64 {
    10
}

/// `[crm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Object collection endpoint (contacts or companies).
    #[serde(default = "default_crm_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the private-app access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Page size requested when listing the collection.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Timeout in seconds for reads and webhook-path writes.
    #[serde(default = "default_crm_timeout")]
    pub timeout_secs: u64,

    /// Timeout in seconds for reconciliation writes.
    #[serde(default = "default_crm_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_crm_endpoint(),
            access_token_env: default_access_token_env(),
            page_limit: default_page_limit(),
            timeout_secs: default_crm_timeout(),
            write_timeout_secs: default_crm_write_timeout(),
        }
    }
}

fn default_crm_endpoint() -> String {
    "https://api.hubapi.com/crm/v3/objects/contacts".into()
}
fn default_access_token_env() -> String {
    "HUBSPOT_ACCESS_TOKEN".into()
}
fn default_page_limit() -> u32 {
    100
}
fn default_crm_timeout() -> u64 {
    10
}
fn default_crm_write_timeout() -> u64 {
    30
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path of the append-only results ledger.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Pause between compliance chunks, in milliseconds.
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay_ms: u64,

    /// CRM property holding the primary number.
    #[serde(default = "default_phone_property")]
    pub phone_property: String,

    /// CRM property holding the mobile number. Empty disables mobile checks.
    #[serde(default = "default_mobile_property")]
    pub mobile_property: String,

    /// CRM property set to `"true"` on every reconciled record.
    #[serde(default = "default_checked_property")]
    pub checked_property: String,

    /// CRM property receiving the primary number's status.
    #[serde(default = "default_phone_status_property")]
    pub phone_status_property: String,

    /// CRM property receiving the mobile number's status.
    #[serde(default = "default_mobile_status_property")]
    pub mobile_status_property: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            chunk_delay_ms: default_chunk_delay(),
            phone_property: default_phone_property(),
            mobile_property: default_mobile_property(),
            checked_property: default_checked_property(),
            phone_status_property: default_phone_status_property(),
            mobile_status_property: default_mobile_status_property(),
        }
    }
}

impl SyncConfig {
    /// Configured (number type, CRM property) pairs, skipping disabled ones.
    pub fn number_fields(&self) -> Vec<(NumberType, String)> {
        [
            (NumberType::Primary, &self.phone_property),
            (NumberType::Mobile, &self.mobile_property),
        ]
        .into_iter()
        .filter(|(_, property)| !property.trim().is_empty())
        .map(|(number_type, property)| (number_type, property.trim().to_string()))
        .collect()
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("tps_results.csv")
}
fn default_chunk_delay() -> u64 {
    2000
}
fn default_phone_property() -> String {
    "phone".into()
}
fn default_mobile_property() -> String {
    "mobilephone".into()
}
fn default_checked_property() -> String {
    "tps_checked".into()
}
fn default_phone_status_property() -> String {
    "tps_status_contact".into()
}
fn default_mobile_status_property() -> String {
    "mobile_phone___tps".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before each retry, in milliseconds. Its length is the retry count.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_backoff_ms() -> Vec<u64> {
    vec![2000, 5000]
}

/// `[webhook]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// CRM property holding the number to check.
    #[serde(default = "default_phone_property")]
    pub phone_property: String,

    /// CRM property receiving the status.
    #[serde(default = "default_webhook_status_property")]
    pub status_property: String,

    /// CRM property set to `"true"` after a check.
    #[serde(default = "default_checked_property")]
    pub checked_property: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            phone_property: default_phone_property(),
            status_property: default_webhook_status_property(),
            checked_property: default_checked_property(),
        }
    }
}

fn default_port() -> u16 {
    5000
}
fn default_webhook_status_property() -> String {
    "tps_status".into()
}

// ---------------------------------------------------------------------------
// Environment overrides & credentials
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply the recognized environment overrides.
    ///
    /// `lookup` is injected so callers decide where values come from; the
    /// binaries pass `std::env::var`, tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("TPS_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            self.compliance.endpoint = endpoint.trim().to_string();
        }
        if let Some(endpoint) = lookup("HUBSPOT_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            self.crm.endpoint = endpoint.trim().to_string();
        }
        if let Some(raw) = lookup("BATCH_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.compliance.batch_size = size,
                _ => tracing::warn!(value = %raw, "ignoring invalid BATCH_SIZE"),
            }
        }
        if let Some(raw) = lookup("PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.webhook.port = port,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid PORT"),
            }
        }
    }

    /// Validate values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        if self.compliance.batch_size == 0 {
            return Err(TpsyncError::config("compliance.batch_size must be at least 1"));
        }
        for (name, value) in [
            ("compliance.endpoint", &self.compliance.endpoint),
            ("crm.endpoint", &self.crm.endpoint),
        ] {
            url::Url::parse(value)
                .map_err(|e| TpsyncError::config(format!("{name} '{value}' is not a URL: {e}")))?;
        }
        if self.sync.phone_property.trim().is_empty() {
            return Err(TpsyncError::config("sync.phone_property must not be empty"));
        }
        Ok(())
    }
}

/// Secrets resolved once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub compliance_api_key: Option<String>,
    pub crm_access_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("compliance_api_key", &self.compliance_api_key.as_ref().map(|_| "***"))
            .field("crm_access_token", &self.crm_access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    /// Read the secrets named by `config` through `lookup`.
    pub fn resolve<F>(config: &AppConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            compliance_api_key: read(&config.compliance.api_key_env),
            crm_access_token: read(&config.crm.access_token_env),
        }
    }

    /// The compliance API key, or a config error naming the variable.
    pub fn require_compliance_key(&self, config: &AppConfig) -> Result<String> {
        self.compliance_api_key.clone().ok_or_else(|| {
            TpsyncError::config(format!(
                "compliance API key not found. Set the {} environment variable.",
                config.compliance.api_key_env
            ))
        })
    }

    /// The CRM access token, or a config error naming the variable.
    pub fn require_crm_token(&self, config: &AppConfig) -> Result<String> {
        self.crm_access_token.clone().ok_or_else(|| {
            TpsyncError::config(format!(
                "CRM access token not found. Set the {} environment variable.",
                config.crm.access_token_env
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.tpsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TpsyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Locate the config file: `./tpsync.toml` first, then `~/.tpsync/tpsync.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    config_dir()
        .ok()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

/// Load the application config, from `path` if given, else from the usual
/// locations. Returns defaults if no file exists.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match find_config_file() {
            Some(p) => p,
            None => {
                tracing::debug!("config file not found, using defaults");
                return Ok(AppConfig::default());
            }
        },
    };

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TpsyncError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TpsyncError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file to `path`, refusing to overwrite an existing one.
pub fn init_config(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(TpsyncError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TpsyncError::io(parent, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| TpsyncError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| TpsyncError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
