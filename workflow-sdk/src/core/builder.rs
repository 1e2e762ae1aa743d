//! Dispatcher builder implementation
//!
//! Assembles the HTTP client, the resilience facade and the request
//! tracker into a [`WorkflowDispatcher`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client as ReqwestClient;
use tracing::debug;

use crate::client::{HttpTransport, Transport, WorkflowDispatcher};
use crate::config::{ProxyConfig, WorkflowConfig};
use crate::error::{Result, WorkflowError};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, Resilience, RetryConfig};
use crate::tracking::{RequestTracker, DEFAULT_MAX_AGE};

/// Builder for [`WorkflowDispatcher`]
pub struct DispatcherBuilder {
    /// Base URL workflow ids are appended to
    base_url: Option<String>,

    /// Bearer token
    auth_token: Option<String>,

    /// Custom headers to include with all requests
    custom_headers: HashMap<String, String>,

    /// Per-attempt HTTP timeout and default sync deadline
    timeout: Duration,

    retry_config: RetryConfig,
    circuit_breaker_config: CircuitBreakerConfig,

    /// Breaker shared with other dispatchers
    shared_breaker: Option<Arc<CircuitBreaker>>,

    tracker_max_age: Duration,
    tracker: Option<Arc<RequestTracker>>,

    /// URL async replies are delivered to
    callback_url: Option<String>,

    proxy: Option<ProxyConfig>,

    user_agent: String,

    /// Enable response decompression
    compression: bool,

    /// Replaces the HTTP transport
    transport: Option<Arc<dyn Transport>>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        let defaults = WorkflowConfig::default();

        Self {
            base_url: None,
            auth_token: None,
            custom_headers: HashMap::new(),
            timeout: defaults.timeout,
            retry_config: defaults.retry,
            circuit_breaker_config: defaults.circuit_breaker,
            shared_breaker: None,
            tracker_max_age: DEFAULT_MAX_AGE,
            tracker: None,
            callback_url: None,
            proxy: None,
            user_agent: defaults.user_agent,
            compression: true,
            transport: None,
        }
    }
}

impl DispatcherBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration
    pub fn from_config(config: WorkflowConfig) -> Self {
        Self {
            base_url: Some(config.base_url),
            auth_token: config.auth_token,
            timeout: config.timeout,
            retry_config: config.retry,
            circuit_breaker_config: config.circuit_breaker,
            tracker_max_age: config.tracker_max_age,
            callback_url: config.callback_url,
            proxy: config.proxy,
            user_agent: config.user_agent,
            ..Self::default()
        }
    }

    /// Set the base URL of the workflow engine
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the bearer token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    /// Set the per-attempt timeout, also used as the sync-mode deadline of `send_with_mode`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Configure the circuit breaker
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker_config = config;
        self
    }

    /// Use a breaker shared with other dispatchers to the same engine
    pub fn shared_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.shared_breaker = Some(breaker);
        self
    }

    /// Age after which unresolved requests are swept
    pub fn tracker_max_age(mut self, max_age: Duration) -> Self {
        self.tracker_max_age = max_age;
        self
    }

    /// Use an existing tracker
    pub fn tracker(mut self, tracker: Arc<RequestTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// URL the engine should deliver async replies to
    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Route requests through a proxy
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable compression
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Replace the HTTP transport, e.g. with an in-process one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build an HTTP client with the configured settings
    pub fn build_http_client(&self) -> Result<ReqwestClient> {
        let mut builder = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .gzip(self.compression);

        let mut headers = HeaderMap::new();
        for (key, value) in &self.custom_headers {
            let header_name = HeaderName::from_str(key)
                .map_err(|e| WorkflowError::configuration(format!("Invalid header name: {}", e)))?;

            let header_value = HeaderValue::from_str(value)
                .map_err(|e| WorkflowError::configuration(format!("Invalid header value: {}", e)))?;

            headers.insert(header_name, header_value);
        }

        if let Some(ref token) = self.auth_token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| WorkflowError::configuration(format!("Invalid auth header: {}", e)))?,
            );
        }

        builder = builder.default_headers(headers);

        if let Some(ref proxy) = self.proxy {
            let mut reqwest_proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| WorkflowError::configuration(format!("Invalid proxy: {}", e)))?;
            if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
                reqwest_proxy = reqwest_proxy.basic_auth(username, password);
            }
            builder = builder.proxy(reqwest_proxy);
        }

        builder
            .build()
            .map_err(|e| WorkflowError::configuration(format!("Failed to build HTTP client: {}", e)))
    }

    /// Build a resilience facade with the configured settings
    pub fn build_resilience(&self) -> Resilience {
        match self.shared_breaker {
            Some(ref breaker) => Resilience::with_breaker(self.retry_config.clone(), Arc::clone(breaker)),
            None => Resilience::new(self.retry_config.clone(), self.circuit_breaker_config.clone()),
        }
    }

    /// Build the dispatcher
    pub fn build(self) -> Result<WorkflowDispatcher> {
        let config = WorkflowConfig {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| WorkflowConfig::default().base_url),
            timeout: self.timeout,
            retry: self.retry_config.clone(),
            circuit_breaker: self.circuit_breaker_config.clone(),
            tracker_max_age: self.tracker_max_age,
            callback_url: self.callback_url.clone(),
            proxy: self.proxy.clone(),
            auth_token: self.auth_token.clone(),
            user_agent: self.user_agent.clone(),
        };
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(ref transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(self.build_http_client()?, config.base_url.clone())),
        };

        let tracker = match self.tracker {
            Some(ref tracker) => Arc::clone(tracker),
            None => Arc::new(RequestTracker::new(self.tracker_max_age)),
        };

        debug!(base_url = %config.base_url, retry = %config.retry, "Built workflow dispatcher");

        Ok(WorkflowDispatcher::new(
            transport,
            self.build_resilience(),
            tracker,
            config.callback_url,
            config.timeout,
        ))
    }
}
