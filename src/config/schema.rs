//! Configuration schema definitions.
//!
//! Every section derives Serde traits and defaults, so a config file only
//! names what it changes.

use serde::{Deserialize, Serialize};

/// Root configuration shared by the origin, proxy and load commands.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StackConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Inbound socket policy.
    pub server: ServerConfig,

    /// Outbound socket policy and connection pool.
    pub client: ClientConfig,

    /// I/O buffer pool.
    pub buffers: BufferConfig,

    pub parser: ParserConfig,

    pub reactor: ReactorConfig,

    /// Virtual host routes used by the proxy.
    pub routes: Vec<RouteConfig>,

    /// Upstream for requests no route matches (e.g., "127.0.0.1:8081").
    pub default_upstream: Option<String>,

    /// Origin service behaviour.
    pub origin: OriginConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent inbound connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Add `Connection: close` to generated error responses and close after
    /// sending any response with status >= 300.
    pub close_after_error_response: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            close_after_error_response: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Return finished connections to the idle pool.
    pub reuse_connections: bool,

    /// Idle connections kept per upstream address.
    pub max_idle_per_peer: usize,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reuse_connections: true,
            max_idle_per_peer: 64,
            connect_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of each I/O buffer in bytes.
    pub size: usize,

    /// Buffers kept for reuse; more are allocated on demand up to `max_total`.
    pub max_pooled: usize,

    /// Hard limit on buffers in use. Exhaustion fails the requesting socket.
    pub max_total: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: 4_096,
            max_pooled: 1_024,
            max_total: 65_536,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Longest start line or header field accepted, in bytes.
    pub max_field_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_field_size: 4_096 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// A socket with no readiness for this long gets `handle_idle` and is closed.
    pub idle_timeout_ms: u64,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self { idle_timeout_ms: 30_000 }
    }
}

/// One virtual host route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Host the route applies to (case-insensitive).
    pub domain: String,

    /// Request path pattern with at most one `*`.
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Upstream address (e.g., "127.0.0.1:3000").
    #[serde(default)]
    pub upstream: Option<String>,

    /// Answer 403 instead of forwarding.
    #[serde(default)]
    pub deny: bool,
}

fn default_pattern() -> String {
    "*".to_string()
}

/// Origin service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Response body length in bytes.
    pub body_size: usize,

    /// Largest body block produced per call; small values exercise
    /// backpressure.
    pub max_chunk: usize,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            body_size: 1_024,
            max_chunk: 4_096,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is unset (e.g., "evented_http=info").
    pub log_filter: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "evented_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
