//! Configuration types for rpcgate clients

use std::collections::HashMap;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// Reconnect policy used by [`watch`](crate::watch::watch)
    pub retry: RetryConfig,

    /// Capacity of a streaming connection's outbound queue
    pub queue_size: usize,

    /// Largest inbound frame accepted on HTTP/2 and gRPC streams
    pub max_frame_size: usize,

    /// User agent string
    pub user_agent: Option<String>,

    /// Headers attached to every request or stream handshake
    pub headers: Option<HashMap<String, String>>,

    /// Extra trust anchors on top of the bundled web PKI roots
    #[serde(skip)]
    pub root_certificates: Vec<CertificateDer<'static>>,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Dial and handshake timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Request timeout for individual calls
    #[serde(with = "duration_serde")]
    pub request: Duration,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Connect attempts before giving up
    pub max_attempts: u32,

    /// Initial retry delay
    #[serde(with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum retry delay
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Whether to enable exponential backoff
    pub exponential_backoff: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            queue_size: 100,
            max_frame_size: rpcgate_json_rpc::framing::DEFAULT_MAX_FRAME_SIZE,
            user_agent: Some(format!("rpcgate-client/{}", env!("CARGO_PKG_VERSION"))),
            headers: None,
            root_certificates: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            exponential_backoff: true,
        }
    }
}

impl ClientConfig {
    /// Trust every certificate in a PEM bundle, e.g. a self-signed server cert
    pub fn add_root_certificate_pem(&mut self, pem: &[u8]) -> ClientResult<()> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ClientError::config(format!("certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(ClientError::config("no certificate found in PEM"));
        }
        self.root_certificates.extend(certs);
        Ok(())
    }

    pub fn with_root_certificate_pem(mut self, pem: &[u8]) -> ClientResult<Self> {
        self.add_root_certificate_pem(pem)?;
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Configured headers as an HTTP header map
    pub fn header_map(&self) -> ClientResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in self.headers.iter().flatten() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::config(format!("header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::config(format!("header value for {}: {}", name, e)))?;
            map.append(name, value);
        }
        Ok(map)
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let mut delay = self.initial_delay;

        if self.exponential_backoff && attempt > 1 {
            let multiplier = self.backoff_multiplier.powi((attempt - 1) as i32);
            delay = Duration::from_millis((delay.as_millis() as f64 * multiplier) as u64);
        }

        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter > 0.0 {
            let jitter_ms = (delay.as_millis() as f64 * self.jitter) as u64;
            let random_offset = rand::random::<f64>() * jitter_ms as f64;
            delay = Duration::from_millis(delay.as_millis() as u64 + random_offset as u64);
        }

        // jitter must not push past the cap either
        delay.min(self.max_delay)
    }

    /// Check if another connect attempt is allowed after `failures` failures
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

// Durations travel as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
