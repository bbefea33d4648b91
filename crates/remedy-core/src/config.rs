use crate::error::{RemedyError, Result};
use crate::paths;
use crate::rate_limit::RateLimitPolicy;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RateLimitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_pacing_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_failure_penalty_ms")]
    pub failure_penalty_ms: u64,
    #[serde(default = "default_max_penalty_ms")]
    pub max_penalty_ms: u64,
    #[serde(default = "default_throttle_cooldown_ms")]
    pub throttle_cooldown_ms: u64,
    #[serde(default = "default_throttle_jitter_ms")]
    pub throttle_jitter_ms: u64,
}

fn default_max_requests() -> u32 {
    20
}

fn default_window_secs() -> u64 {
    60
}

fn default_min_interval_ms() -> u64 {
    1_500
}

fn default_pacing_jitter_ms() -> u64 {
    1_500
}

fn default_failure_penalty_ms() -> u64 {
    500
}

fn default_max_penalty_ms() -> u64 {
    5_000
}

fn default_throttle_cooldown_ms() -> u64 {
    30_000
}

fn default_throttle_jitter_ms() -> u64 {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            min_interval_ms: default_min_interval_ms(),
            jitter_ms: default_pacing_jitter_ms(),
            failure_penalty_ms: default_failure_penalty_ms(),
            max_penalty_ms: default_max_penalty_ms(),
            throttle_cooldown_ms: default_throttle_cooldown_ms(),
            throttle_jitter_ms: default_throttle_jitter_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs),
            min_interval: Duration::from_millis(self.min_interval_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            failure_penalty: Duration::from_millis(self.failure_penalty_ms),
            max_penalty: Duration::from_millis(self.max_penalty_ms),
            throttle_cooldown: Duration::from_millis(self.throttle_cooldown_ms),
            throttle_jitter: Duration::from_millis(self.throttle_jitter_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Listing pages get more attempts: a page that fails aborts the run.
    #[serde(default = "default_page_max_attempts")]
    pub page_max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_page_max_attempts() -> u32 {
    6
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_jitter_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            page_max_attempts: default_page_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_backoff_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// RemediationConfig
// ---------------------------------------------------------------------------

/// Where the unit-cost based value is written as a metafield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetafieldConfig {
    #[serde(default = "default_metafield_namespace")]
    pub namespace: String,
    pub key: String,
    pub multiplier: f64,
}

fn default_metafield_namespace() -> String {
    "custom".to_string()
}

/// Product metafield holding a color name to translate into Danish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMetafieldConfig {
    #[serde(default = "default_metafield_namespace")]
    pub namespace: String,
    #[serde(default = "default_color_key")]
    pub key: String,
    /// Written when neither the value nor the product names a known color.
    #[serde(default = "default_color_fallback")]
    pub fallback: String,
}

fn default_color_key() -> String {
    "farve".to_string()
}

fn default_color_fallback() -> String {
    "Natur".to_string()
}

impl Default for ColorMetafieldConfig {
    fn default() -> Self {
        Self {
            namespace: default_metafield_namespace(),
            key: default_color_key(),
            fallback: default_color_fallback(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Ledger name for this campaign.
    pub scope: String,
    pub vendor: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_true")]
    pub swap_lead_images: bool,
    /// Variant price = unit cost × multiplier. Price step is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_metafield: Option<MetafieldConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_metafield: Option<ColorMetafieldConfig>,
}

fn default_page_size() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

impl RemediationConfig {
    pub fn enabled_steps(&self) -> usize {
        usize::from(self.swap_lead_images)
            + usize::from(self.price_multiplier.is_some())
            + usize::from(self.cost_metafield.is_some())
            + usize::from(self.color_metafield.is_some())
    }
}

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2024-07".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(scope: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            version: 1,
            remediation: RemediationConfig {
                scope: scope.into(),
                vendor: vendor.into(),
                page_size: default_page_size(),
                swap_lead_images: true,
                price_multiplier: None,
                cost_metafield: None,
                color_metafield: None,
            },
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            api: ApiConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RemedyError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Fail on the first error-level finding from [`Config::validate`].
    pub fn ensure_valid(&self) -> Result<()> {
        match self
            .validate()
            .into_iter()
            .find(|w| w.level == WarnLevel::Error)
        {
            Some(w) => Err(RemedyError::InvalidConfig(w.message)),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if let Err(e) = paths::validate_scope(&self.remediation.scope) {
            error(e.to_string());
        }
        if self.remediation.vendor.trim().is_empty() {
            error("remediation.vendor is empty".to_string());
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            error("rate_limit.max_requests and rate_limit.window_secs must be positive".to_string());
        }
        if self.retry.max_attempts == 0 || self.retry.page_max_attempts == 0 {
            error("retry.max_attempts and retry.page_max_attempts must be at least 1".to_string());
        }
        if self.remediation.page_size == 0 || self.remediation.page_size > 250 {
            error(format!(
                "remediation.page_size={} is outside 1..=250",
                self.remediation.page_size
            ));
        }
        if let Some(m) = self.remediation.price_multiplier {
            if !(m.is_finite() && m > 0.0) {
                error(format!("remediation.price_multiplier={m} must be positive"));
            }
        }
        if let Some(mf) = &self.remediation.cost_metafield {
            if !(mf.multiplier.is_finite() && mf.multiplier > 0.0) {
                error(format!(
                    "remediation.cost_metafield.multiplier={} must be positive",
                    mf.multiplier
                ));
            }
            if mf.namespace.trim().is_empty() || mf.key.trim().is_empty() {
                error("remediation.cost_metafield needs a namespace and a key".to_string());
            }
        }
        if let Some(c) = &self.remediation.color_metafield {
            if c.namespace.trim().is_empty() || c.key.trim().is_empty() {
                error("remediation.color_metafield needs a namespace and a key".to_string());
            }
            if c.fallback.trim().is_empty() {
                error("remediation.color_metafield.fallback is empty".to_string());
            }
        }
        if self.remediation.enabled_steps() == 0 {
            error(
                "no sub-step enabled: set swap_lead_images, price_multiplier, cost_metafield \
                 or color_metafield"
                    .to_string(),
            );
        }

        if self.rate_limit.throttle_cooldown_ms <= self.retry.base_delay_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "rate_limit.throttle_cooldown_ms={} is not longer than retry.base_delay_ms={}",
                    self.rate_limit.throttle_cooldown_ms, self.retry.base_delay_ms
                ),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
