//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SHOPFRONT_API_URL` - Base URL of the storefront REST API (e.g., `http://localhost:8080/api/v1`)
//!
//! ## Optional
//! - `SHOPFRONT_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 10)
//! - `SHOPFRONT_GUEST_CART_DIR` - Directory holding the guest cart file (default: .shopfront)
//! - `SHOPFRONT_PRODUCT_CACHE_TTL_SECS` - Product cache TTL, 0 disables (default: 300)
//! - `SHOPFRONT_PRODUCT_CACHE_CAPACITY` - Max cached products (default: 1000)
//! - `SHOPFRONT_MERGE_CONFIRM_ATTEMPTS` - Cart fetches while confirming a guest merge (default: 5)
//! - `SHOPFRONT_MERGE_CONFIRM_DELAY_MS` - Delay between confirmation fetches (default: 250)
//! - `SHOPFRONT_CURRENCY` - Store currency (default: IDR)
//! - `SHOPFRONT_TAX_RATE` - Tax rate applied to the subtotal (default: 0.10)
//! - `SHOPFRONT_FLAT_SHIPPING` - Flat shipping fee (default: 15000)
//! - `SHOPFRONT_FREE_SHIPPING_THRESHOLD` - Subtotal above which shipping is free (default: 500000)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use shopfront_core::CurrencyCode;
use thiserror::Error;
use url::Url;

use crate::summary::PricingRules;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// REST gateway configuration
    pub gateway: GatewayConfig,
    /// Directory holding the persisted guest cart
    pub guest_cart_dir: PathBuf,
    /// Guest merge confirmation policy
    pub merge: MergeConfig,
    /// Tax and shipping formulas
    pub pricing: PricingRules,
}

/// REST gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the REST API
    pub base_url: Url,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Product cache TTL (`Duration::ZERO` disables the cache)
    pub product_cache_ttl: Duration,
    /// Maximum number of cached products
    pub product_cache_capacity: u64,
}

impl GatewayConfig {
    /// Gateway config with default timeouts and caching.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Duration::from_secs(10),
            product_cache_ttl: Duration::from_secs(300),
            product_cache_capacity: 1000,
        }
    }
}

/// How the engine confirms a guest merge before discarding the guest cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeConfig {
    /// Number of authoritative cart fetches before giving up on consistency
    pub confirm_attempts: u32,
    /// Delay between fetches
    pub confirm_delay: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            confirm_attempts: 5,
            confirm_delay: Duration::from_millis(250),
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required keys are missing or invalid.
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let source = Source(&get);

        let base_url = source.required("SHOPFRONT_API_URL")?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("SHOPFRONT_API_URL".to_string(), e.to_string())
        })?;

        let gateway = GatewayConfig {
            base_url,
            request_timeout: Duration::from_secs(
                source.parsed_or("SHOPFRONT_REQUEST_TIMEOUT_SECS", 10)?,
            ),
            product_cache_ttl: Duration::from_secs(
                source.parsed_or("SHOPFRONT_PRODUCT_CACHE_TTL_SECS", 300)?,
            ),
            product_cache_capacity: source.parsed_or("SHOPFRONT_PRODUCT_CACHE_CAPACITY", 1000)?,
        };

        let merge = MergeConfig {
            confirm_attempts: source.parsed_or("SHOPFRONT_MERGE_CONFIRM_ATTEMPTS", 5)?,
            confirm_delay: Duration::from_millis(
                source.parsed_or("SHOPFRONT_MERGE_CONFIRM_DELAY_MS", 250)?,
            ),
        };

        let defaults = PricingRules::default();
        let pricing = PricingRules {
            currency: source.parsed_or("SHOPFRONT_CURRENCY", CurrencyCode::IDR)?,
            tax_rate: source.parsed_or("SHOPFRONT_TAX_RATE", defaults.tax_rate)?,
            flat_shipping: source.parsed_or("SHOPFRONT_FLAT_SHIPPING", defaults.flat_shipping)?,
            free_shipping_threshold: source.parsed_or::<Decimal>(
                "SHOPFRONT_FREE_SHIPPING_THRESHOLD",
                defaults.free_shipping_threshold,
            )?,
        };

        Ok(Self {
            gateway,
            guest_cart_dir: PathBuf::from(
                source
                    .optional("SHOPFRONT_GUEST_CART_DIR")
                    .unwrap_or_else(|| ".shopfront".to_string()),
            ),
            merge,
            pricing,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Source<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Source<'_, F> {
    /// Get a required variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get an optional variable.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Parse a variable, falling back to a default when unset.
    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_api_url() {
        let result = CartConfig::from_source(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref k)) if k == "SHOPFRONT_API_URL"));
    }

    #[test]
    fn test_invalid_api_url() {
        let result = CartConfig::from_source(lookup(&[("SHOPFRONT_API_URL", "not a url")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_defaults() {
        let config =
            CartConfig::from_source(lookup(&[("SHOPFRONT_API_URL", "http://localhost:8080/api/v1")]))
                .unwrap();

        assert_eq!(config.gateway.request_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.product_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.gateway.product_cache_capacity, 1000);
        assert_eq!(config.merge, MergeConfig::default());
        assert_eq!(config.guest_cart_dir, PathBuf::from(".shopfront"));
        assert_eq!(config.pricing, PricingRules::default());
    }

    #[test]
    fn test_overrides() {
        let config = CartConfig::from_source(lookup(&[
            ("SHOPFRONT_API_URL", "http://api.test/"),
            ("SHOPFRONT_REQUEST_TIMEOUT_SECS", "3"),
            ("SHOPFRONT_PRODUCT_CACHE_TTL_SECS", "0"),
            ("SHOPFRONT_MERGE_CONFIRM_ATTEMPTS", "2"),
            ("SHOPFRONT_MERGE_CONFIRM_DELAY_MS", "10"),
            ("SHOPFRONT_CURRENCY", "usd"),
            ("SHOPFRONT_TAX_RATE", "0.08"),
            ("SHOPFRONT_GUEST_CART_DIR", "/tmp/carts"),
        ]))
        .unwrap();

        assert_eq!(config.gateway.request_timeout, Duration::from_secs(3));
        assert_eq!(config.gateway.product_cache_ttl, Duration::ZERO);
        assert_eq!(config.merge.confirm_attempts, 2);
        assert_eq!(config.merge.confirm_delay, Duration::from_millis(10));
        assert_eq!(config.pricing.currency, CurrencyCode::USD);
        assert_eq!(config.pricing.tax_rate, Decimal::new(8, 2));
        assert_eq!(config.guest_cart_dir, PathBuf::from("/tmp/carts"));
    }

    #[test]
    fn test_invalid_number() {
        let result = CartConfig::from_source(lookup(&[
            ("SHOPFRONT_API_URL", "http://api.test/"),
            ("SHOPFRONT_REQUEST_TIMEOUT_SECS", "ten"),
        ]));
        assert!(
            matches!(result, Err(ConfigError::InvalidEnvVar(ref k, _)) if k == "SHOPFRONT_REQUEST_TIMEOUT_SECS")
        );
    }
}
