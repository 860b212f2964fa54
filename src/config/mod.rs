//! Configuration: `~/.tollbot/config.toml` plus environment overrides for
//! secrets. Every section has serde defaults so a missing file still yields
//! a runnable (if unpaid-to) configuration.

use anyhow::Context;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used to build payment resource URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscordConfig {
    /// Application public key (hex) for interactions signature verification.
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub application_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Shared secret echoed back by Telegram in
    /// `X-Telegram-Bot-Api-Secret-Token`.
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_facilitator_url")]
    pub facilitator_url: String,
    /// Receiving address for payments.
    #[serde(default)]
    pub pay_to: String,
    /// Maximum amount required, in the asset's atomic units.
    #[serde(default = "default_amount")]
    pub amount: String,
    /// Asset contract address.
    #[serde(default = "default_asset")]
    pub asset: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_payment_timeout")]
    pub max_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_url")]
    pub url: String,
    #[serde(default = "default_worker_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_lookback_default")]
    pub lookback_default_minutes: u32,
    #[serde(default = "default_lookback_min")]
    pub lookback_min_minutes: u32,
    #[serde(default = "default_lookback_max")]
    pub lookback_max_minutes: u32,
    /// How long a payment prompt stays redeemable.
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: u64,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pagination_ttl")]
    pub pagination_ttl_secs: u64,
    /// Hard budget for one delivery attempt.
    #[serde(default = "default_delivery_budget")]
    pub delivery_budget_secs: u64,
    /// Pause before the single best-effort redelivery.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3040
}
fn default_public_url() -> String {
    "http://127.0.0.1:3040".into()
}
fn default_facilitator_url() -> String {
    "https://x402.org/facilitator".into()
}
fn default_amount() -> String {
    "100000".into() // 0.10 USDC at 6 decimals
}
fn default_asset() -> String {
    // USDC on Base Sepolia
    "0x036CbD53842c5426634e7929541eC2318f3dCF7e".into()
}
fn default_network() -> String {
    "base-sepolia".into()
}
fn default_scheme() -> String {
    "exact".into()
}
fn default_payment_timeout() -> u64 {
    300
}
fn default_worker_url() -> String {
    "http://127.0.0.1:8090".into()
}
fn default_worker_timeout() -> u64 {
    120
}
fn default_lookback_default() -> u32 {
    60
}
fn default_lookback_min() -> u32 {
    5
}
fn default_lookback_max() -> u32 {
    1440
}
fn default_pending_ttl() -> u64 {
    1800
}
fn default_reaper_interval() -> u64 {
    1800
}
fn default_page_size() -> usize {
    5
}
fn default_pagination_ttl() -> u64 {
    1800
}
fn default_delivery_budget() -> u64 {
    5
}
fn default_retry_delay() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            facilitator_url: default_facilitator_url(),
            pay_to: String::new(),
            amount: default_amount(),
            asset: default_asset(),
            network: default_network(),
            scheme: default_scheme(),
            max_timeout_seconds: default_payment_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            url: default_worker_url(),
            timeout_secs: default_worker_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            lookback_default_minutes: default_lookback_default(),
            lookback_min_minutes: default_lookback_min(),
            lookback_max_minutes: default_lookback_max(),
            pending_ttl_secs: default_pending_ttl(),
            reaper_interval_secs: default_reaper_interval(),
            page_size: default_page_size(),
            pagination_ttl_secs: default_pagination_ttl(),
            delivery_budget_secs: default_delivery_budget(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl Config {
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Ok(home.join(".tollbot").join("config.toml"))
    }

    /// Load from the given path (or the default location). A missing file
    /// yields defaults; a malformed file is an error.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets can come from the environment instead of the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TOLLBOT_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Ok(v) = std::env::var("TOLLBOT_TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = v;
        }
        if let Ok(v) = std::env::var("TOLLBOT_DISCORD_PUBLIC_KEY") {
            self.discord.public_key = v;
        }
        if let Ok(v) = std::env::var("TOLLBOT_PAY_TO") {
            self.payment.pay_to = v;
        }
    }

    /// Clamp a requested lookback into the configured range.
    pub fn clamp_lookback(&self, minutes: u32) -> u32 {
        minutes.clamp(
            self.limits.lookback_min_minutes,
            self.limits.lookback_max_minutes,
        )
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.limits.pending_ttl_secs)
    }

    pub fn pagination_ttl(&self) -> Duration {
        Duration::from_secs(self.limits.pagination_ttl_secs)
    }

    pub fn delivery_budget(&self) -> Duration {
        Duration::from_secs(self.limits.delivery_budget_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.limits.retry_delay_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.limits.reaper_interval_secs)
    }

    /// Resource URL the payer must hit, with the request parameters encoded
    /// in the query so the paid call is self-describing.
    pub fn paid_resource_url(&self, token: &str, query: &str) -> String {
        format!(
            "{}/paid/{token}?{query}",
            self.gateway.public_url.trim_end_matches('/')
        )
    }
}
