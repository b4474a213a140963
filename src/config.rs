use std::path::PathBuf;
use std::time::Duration;

use rustls::pki_types::CertificateDer;

/// Default CA bundle location (Debian-style layout).
pub const DEFAULT_CA_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Client configuration.
#[derive(Clone)]
pub struct Config {
    /// Size of each per-connection read and write buffer in bytes.
    /// A request or response larger than this fails the request.
    pub conn_buf_size: usize,
    /// Number of preallocated connection slots across all loops.
    pub pool_size: usize,
    /// Interval of the dispatcher timer that drains the overflow queue.
    pub queue_tick: Duration,
    /// Interval between TLS session-priming rounds for registered hosts.
    pub session_renew_interval: Duration,
    /// Optional SO_PRIORITY value applied to every connection socket.
    pub sock_priority: Option<u32>,
    /// Enable TCP_NODELAY on all connections.
    pub tcp_nodelay: bool,
    /// Number of event loops, each on its own thread. 1 = single-threaded.
    pub loops: usize,
    /// Whether to pin each loop thread to a CPU core.
    pub pin_to_core: bool,
    /// Starting CPU core index for pinning.
    pub core_offset: usize,
    /// PEM bundle of trusted CAs. `None` disables file loading.
    pub ca_file: Option<PathBuf>,
    /// Additional trusted root certificates (appended to the CA bundle).
    pub extra_roots: Vec<CertificateDer<'static>>,
    /// Hosts (https URLs) whose TLS sessions are primed periodically.
    pub primed_hosts: Vec<String>,
    /// Resumption tickets retained per host; the oldest is dropped when
    /// a priming handshake delivers more.
    pub session_tickets_per_host: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conn_buf_size: 64 * 1024,
            pool_size: 64,
            queue_tick: Duration::from_millis(1),
            session_renew_interval: Duration::from_secs(3600),
            sock_priority: None,
            tcp_nodelay: true,
            loops: 1,
            pin_to_core: false,
            core_offset: 0,
            ca_file: Some(PathBuf::from(DEFAULT_CA_FILE)),
            extra_roots: Vec::new(),
            primed_hosts: Vec::new(),
            session_tickets_per_host: 4,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.pool_size == 0 || self.pool_size > u16::MAX as usize {
            return Err(crate::error::Error::Config(
                "pool_size must be > 0 and <= 65535".into(),
            ));
        }
        if self.loops == 0 {
            return Err(crate::error::Error::Config("loops must be > 0".into()));
        }
        if self.pool_size % self.loops != 0 {
            return Err(crate::error::Error::Config(
                "pool_size must be a multiple of loops".into(),
            ));
        }
        if self.conn_buf_size < 1024 {
            return Err(crate::error::Error::Config(
                "conn_buf_size must be >= 1024".into(),
            ));
        }
        if self.queue_tick.is_zero() {
            return Err(crate::error::Error::Config(
                "queue_tick must be non-zero".into(),
            ));
        }
        if self.session_renew_interval.is_zero() {
            return Err(crate::error::Error::Config(
                "session_renew_interval must be non-zero".into(),
            ));
        }
        if self.session_tickets_per_host == 0 {
            return Err(crate::error::Error::Config(
                "session_tickets_per_host must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn slots_per_loop(&self) -> usize {
        self.pool_size / self.loops
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use burstline::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .pool_size(128)
///     .conn_buf_size(64 * 1024)
///     .loops(1)
///     .tcp_nodelay(true)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Pool settings ────────────────────────────────────────────────

    /// Set the number of preallocated connection slots.
    pub fn pool_size(mut self, n: usize) -> Self {
        self.config.pool_size = n;
        self
    }

    /// Set the per-connection buffer size in bytes.
    pub fn conn_buf_size(mut self, n: usize) -> Self {
        self.config.conn_buf_size = n;
        self
    }

    /// Set the overflow-queue dispatch interval.
    pub fn queue_tick(mut self, interval: Duration) -> Self {
        self.config.queue_tick = interval;
        self
    }

    // ── Socket settings ──────────────────────────────────────────────

    /// Enable or disable TCP_NODELAY on all connections.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    /// Set SO_PRIORITY on all connection sockets.
    pub fn sock_priority(mut self, priority: u32) -> Self {
        self.config.sock_priority = Some(priority);
        self
    }

    // ── Loop settings ────────────────────────────────────────────────

    /// Set the number of event-loop threads.
    pub fn loops(mut self, n: usize) -> Self {
        self.config.loops = n;
        self
    }

    /// Enable or disable CPU core pinning for loop threads.
    pub fn pin_to_core(mut self, enable: bool) -> Self {
        self.config.pin_to_core = enable;
        self
    }

    /// Set the starting CPU core index for pinning.
    pub fn core_offset(mut self, offset: usize) -> Self {
        self.config.core_offset = offset;
        self
    }

    // ── TLS settings ─────────────────────────────────────────────────

    /// Set the PEM bundle of trusted CAs.
    pub fn ca_file(mut self, path: PathBuf) -> Self {
        self.config.ca_file = Some(path);
        self
    }

    /// Skip CA bundle loading entirely.
    pub fn no_ca_file(mut self) -> Self {
        self.config.ca_file = None;
        self
    }

    /// Add a trusted root certificate.
    pub fn add_root(mut self, cert: CertificateDer<'static>) -> Self {
        self.config.extra_roots.push(cert);
        self
    }

    /// Register an https host for periodic session priming.
    pub fn prime_host(mut self, url: impl Into<String>) -> Self {
        self.config.primed_hosts.push(url.into());
        self
    }

    /// Set the interval between session-priming rounds.
    pub fn session_renew_interval(mut self, interval: Duration) -> Self {
        self.config.session_renew_interval = interval;
        self
    }

    /// Set the number of resumption tickets retained per host.
    pub fn session_tickets_per_host(mut self, n: usize) -> Self {
        self.config.session_tickets_per_host = n;
        self
    }

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Get mutable access to the underlying config for fields not covered
    /// by builder methods.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_pool() {
        let config = ConfigBuilder::new().pool_size(0).build();
        assert!(config.is_err());
    }

    #[test]
    fn rejects_uneven_loop_split() {
        let config = ConfigBuilder::new().pool_size(10).loops(3).build();
        assert!(config.is_err());
    }

    #[test]
    fn rejects_tiny_buffers() {
        let config = ConfigBuilder::new().conn_buf_size(16).build();
        assert!(config.is_err());
    }

    #[test]
    fn slots_split_evenly() {
        let config = ConfigBuilder::new().pool_size(12).loops(4).build().unwrap();
        assert_eq!(config.slots_per_loop(), 3);
    }
}
