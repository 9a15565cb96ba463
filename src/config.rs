use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

/// Which scraping strategy a configured account uses.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Fund,
    UsStock,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Fund => write!(f, "fund"),
            StrategyKind::UsStock => write!(f, "usstock"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProductConfig {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    /// Sub-account name as displayed on the brokerage holdings page.
    pub account_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerTarget {
    pub account_id: i64,
    pub category_id: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub enabled: bool,
    pub matsui: ProductConfig,
    pub zaim: LedgerTarget,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrowserConfig {
    /// WebDriver endpoint, e.g. a local chromedriver.
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_headless() -> bool {
    true
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MatsuiConfig {
    pub login_id: String,
    pub password: String,
    /// Chrome user-data directory holding the brokerage session profile.
    pub user_data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthCodeConfig {
    /// Google Messages conversation that receives the brokerage SMS codes.
    pub conversation_url: String,
    pub user_data_dir: PathBuf,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ZaimConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// JSON file holding the persisted OAuth access token.
    pub access_token_file: PathBuf,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,
}

fn default_api_base_url() -> String {
    "https://api.zaim.net".to_string()
}

fn default_auth_base_url() -> String {
    "https://auth.zaim.net".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// JSON file recording the last synced cumulative valuation per account.
    pub total_amount_file: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub browser: BrowserConfig,
    pub matsui: MatsuiConfig,
    pub auth_code: AuthCodeConfig,
    pub zaim: ZaimConfig,
    pub sync: SyncConfig,
    /// When set, strategy failures dump a diagnostic capture here.
    #[serde(default)]
    pub error_log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("in", "codito", "assetsync")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Rejects configurations that would fold two brokerage sub-accounts
    /// into the same ledger account. Runs before any network activity.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for account in self.accounts.iter().filter(|a| a.enabled) {
            if !seen.insert(account.zaim.account_id) {
                bail!(
                    "Duplicate zaim.account_id {} in enabled accounts",
                    account.zaim.account_id
                );
            }
        }
        Ok(())
    }

    pub fn enabled_accounts(&self) -> Vec<&AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled).collect()
    }
}
