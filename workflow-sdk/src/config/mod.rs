//! Configuration management for the workflow dispatcher
//!
//! This module provides utilities for loading and validating configuration
//! for the dispatcher, with support for environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use url::Url;

use crate::error::{Result, WorkflowError};
use crate::resilience::{BackoffSchedule, CircuitBreakerConfig, RetryConfig};
use crate::tracking::DEFAULT_MAX_AGE;
use crate::util::parse_duration;

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|e| WorkflowError::configuration(format!("Invalid integer for key {}: {}", key, e)))
    }

    /// Get a float configuration value
    fn get_float(&self, key: &str) -> Result<f64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| WorkflowError::configuration(format!("Invalid float for key {}: {}", key, e)))
    }

    /// Get a duration configuration value ("250ms", "30s", "5m", "1h" or bare seconds)
    fn get_duration(&self, key: &str) -> Result<Duration> {
        let value = self.get_string(key)?;
        parse_duration(&value)
            .ok_or_else(|| WorkflowError::configuration(format!("Invalid duration for key {}: {}", key, value)))
    }

    /// Get a string configuration value with a default
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get an optional string configuration value
    fn get_optional(&self, key: &str) -> Option<String> {
        self.get_string(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get an integer configuration value, or `default` when the key is absent.
    ///
    /// A present value that does not parse is an error.
    fn get_int_or(&self, key: &str, default: i64) -> Result<i64> {
        match self.get_optional(key) {
            Some(_) => self.get_int(key),
            None => Ok(default),
        }
    }

    /// Get a float configuration value, or `default` when the key is absent
    fn get_float_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get_optional(key) {
            Some(_) => self.get_float(key),
            None => Ok(default),
        }
    }

    /// Get a duration configuration value, or `default` when the key is absent
    fn get_duration_or(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get_optional(key) {
            Some(_) => self.get_duration(key),
            None => Ok(default),
        }
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,

    /// Optional namespace for variables (e.g., "N8N", "BILLING")
    namespace: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a namespace for environment variables
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Format a configuration key as an environment variable
    fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        if let Some(ref namespace) = self.namespace {
            env_key.push_str(namespace);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                WorkflowError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => WorkflowError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    /// Configuration values
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty memory config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| WorkflowError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// A composite config provider that tries multiple providers in order
#[derive(Default)]
pub struct CompositeConfigProvider {
    /// Ordered list of config providers to try
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    /// Create a new composite config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider to the chain
    pub fn add_provider(&mut self, provider: impl ConfigProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Add a provider and return self (builder pattern)
    pub fn with_provider(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.add_provider(provider);
        self
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.providers
            .iter()
            .find_map(|provider| provider.get_string(key).ok())
            .ok_or_else(|| {
                WorkflowError::configuration(format!("Configuration key not found in any provider: {}", key))
            })
    }
}

/// Default configuration provider, reading `WORKFLOW_*` environment variables
pub static DEFAULT_PROVIDER: Lazy<Arc<EnvConfigProvider>> =
    Lazy::new(|| Arc::new(EnvConfigProvider::new().with_prefix("WORKFLOW")));

/// Outbound proxy settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`
    pub url: String,

    /// Basic auth user
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Add basic auth credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Base URL workflow ids are appended to, e.g. `https://n8n.internal/webhook`
    pub base_url: String,

    /// Per-attempt HTTP timeout; also the default sync-mode deadline
    pub timeout: Duration,

    /// Retry policy
    pub retry: RetryConfig,

    /// Circuit breaker policy
    pub circuit_breaker: CircuitBreakerConfig,

    /// Age after which unresolved tracked requests are swept
    pub tracker_max_age: Duration,

    /// URL the engine should deliver async replies to
    pub callback_url: Option<String>,

    /// Outbound proxy
    pub proxy: Option<ProxyConfig>,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// User agent
    pub user_agent: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678/webhook".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            tracker_max_age: DEFAULT_MAX_AGE,
            callback_url: None,
            proxy: None,
            auth_token: None,
            user_agent: format!("Phoenix-Workflow-SDK/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WorkflowConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let base_url = provider.get_string_or("base_url", &defaults.base_url);
        let timeout = provider.get_duration_or("timeout", defaults.timeout)?;

        let max_attempts = provider.get_int_or("max_attempts", defaults.retry.max_attempts as i64)?;
        let backoff = Self::backoff_from_provider(provider)?;

        let failure_threshold = provider.get_int_or(
            "failure_threshold",
            defaults.circuit_breaker.failure_threshold as i64,
        )?;
        let cooldown = provider.get_duration_or("cooldown", defaults.circuit_breaker.cooldown)?;

        let proxy = provider.get_optional("proxy_url").map(|url| ProxyConfig {
            url,
            username: provider.get_optional("proxy_username"),
            password: provider.get_optional("proxy_password"),
        });

        let config = Self {
            base_url,
            timeout,
            retry: RetryConfig {
                max_attempts: u32::try_from(max_attempts)
                    .map_err(|_| WorkflowError::configuration(format!("Invalid max_attempts: {}", max_attempts)))?,
                backoff,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: usize::try_from(failure_threshold).map_err(|_| {
                    WorkflowError::configuration(format!("Invalid failure_threshold: {}", failure_threshold))
                })?,
                cooldown,
            },
            tracker_max_age: provider.get_duration_or("tracker_max_age", defaults.tracker_max_age)?,
            callback_url: provider.get_optional("callback_url"),
            proxy,
            auth_token: provider.get_optional("auth_token"),
            user_agent: provider.get_string_or("user_agent", &defaults.user_agent),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `WORKFLOW_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_provider(&**DEFAULT_PROVIDER)
    }

    fn backoff_from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<BackoffSchedule> {
        let initial = provider.get_duration_or("backoff_initial", Duration::from_millis(200))?;

        match provider.get_string_or("backoff", "exponential").trim().to_lowercase().as_str() {
            "fixed" => Ok(BackoffSchedule::Fixed(initial)),
            "exponential" => Ok(BackoffSchedule::Exponential {
                initial,
                max: provider.get_duration_or("backoff_max", Duration::from_secs(5))?,
                multiplier: provider.get_float_or("backoff_multiplier", 2.0)?,
            }),
            other => Err(WorkflowError::configuration(format!("Unknown backoff schedule: {}", other))),
        }
    }

    /// Validate this configuration
    pub fn validate(&self) -> Result<()> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| WorkflowError::configuration(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(WorkflowError::configuration(format!(
                "Base URL must be http or https: {}",
                self.base_url
            )));
        }

        if let Some(ref callback_url) = self.callback_url {
            Url::parse(callback_url)
                .map_err(|e| WorkflowError::configuration(format!("Invalid callback URL {}: {}", callback_url, e)))?;
        }

        if let Some(ref proxy) = self.proxy {
            Url::parse(&proxy.url)
                .map_err(|e| WorkflowError::configuration(format!("Invalid proxy URL {}: {}", proxy.url, e)))?;
        }

        if self.retry.max_attempts == 0 {
            return Err(WorkflowError::configuration("max_attempts must be at least 1"));
        }

        if let BackoffSchedule::Exponential { multiplier, .. } = self.retry.backoff {
            if multiplier < 1.0 {
                return Err(WorkflowError::configuration("backoff_multiplier must be at least 1.0"));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(WorkflowError::configuration("failure_threshold must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(WorkflowError::configuration("timeout must be greater than zero"));
        }

        Ok(())
    }
}
