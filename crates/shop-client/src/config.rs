use std::time::Duration;

use remedy_core::config::ApiConfig;

use crate::error::ShopError;
use crate::Result;

/// Connection settings for one shop.
#[derive(Debug, Clone)]
pub struct ShopConfig {
    pub domain: String,
    pub token: String,
    pub api_version: String,
    pub timeout: Duration,
    /// Scheme and host requests go to. Defaults to `https://<domain>`.
    pub base_url: String,
}

impl ShopConfig {
    pub fn new(domain: impl Into<String>, token: impl Into<String>, api: &ApiConfig) -> Result<Self> {
        let domain = normalize_domain(&domain.into())?;
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ShopError::MissingCredential("SHOPIFY_TOKEN"));
        }
        Ok(Self {
            base_url: format!("https://{domain}"),
            domain,
            token,
            api_version: api.api_version.clone(),
            timeout: Duration::from_secs(api.timeout_secs),
        })
    }

    /// Point requests at another host, e.g. a local mock server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/admin/api/{}/graphql.json", self.base_url, self.api_version)
    }

    /// REST endpoint for `path`, e.g. `variants/123`.
    pub fn rest_url(&self, path: &str) -> String {
        format!("{}/admin/api/{}/{path}.json", self.base_url, self.api_version)
    }
}

/// Accepts `shop.myshopify.com` with or without scheme and trailing slash.
fn normalize_domain(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ShopError::MissingCredential("SHOPIFY_DOMAIN"));
    }
    let host = trimmed
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let valid = !host.is_empty()
        && host.contains('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(ShopError::InvalidDomain(raw.to_string()));
    }
    Ok(host.to_ascii_lowercase())
}
