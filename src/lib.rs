//! burstline — non-blocking HTTP/1.1 client for request bursts.
//!
//! burstline targets low-latency workloads that fire many concurrent
//! requests at a small set of hosts (API polling, market-data bursts).
//! It keeps a fixed pool of preallocated connection slots, drives each
//! slot through an explicit state machine on an epoll readiness loop,
//! and warms TLS session caches out of band so real requests get
//! abbreviated handshakes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use burstline::{ClientBuilder, ConfigBuilder, Method};
//!
//! fn main() -> Result<(), burstline::Error> {
//!     let config = ConfigBuilder::new().pool_size(64).build()?;
//!     let (client, handles) = ClientBuilder::new(config).launch()?;
//!
//!     client.enqueue(Method::Get, "http://example.test/ticks", b"", |resp| {
//!         if let Ok(body) = resp {
//!             println!("{} bytes", body.len());
//!         }
//!     })?;
//!
//!     client.shutdown();
//!     for h in handles {
//!         h.join().unwrap()?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Model
//!
//! One event loop by default; set `loops = N` for thread-per-loop
//! fan-out with round-robin slot assignment. Responses are fully
//! buffered (Content-Length or chunked, decoded in place) and handed to
//! the completion callback as a borrowed byte range; the callback runs
//! on the loop thread owning the slot and must copy anything it keeps.
//! Bodies larger than the fixed connection buffer fail the request.
//!
//! # Platform
//!
//! Linux only (epoll, timerfd, eventfd). IPv4 only.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod buffer;
pub(crate) mod conn;
pub(crate) mod event_loop;
pub(crate) mod framing;
pub(crate) mod pool;
pub(crate) mod reactor;
pub(crate) mod resolve;
pub(crate) mod tls;
pub(crate) mod transport;
pub(crate) mod worker;

// ── Public modules ──────────────────────────────────────────────────────
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod request;
pub mod session;
pub mod url;

/// Client handle: dispatch, queueing, priming, shutdown.
pub use client::Client;
/// Builder that spawns the event-loop threads.
pub use client::ClientBuilder;
/// Runtime configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Setup and dispatch errors.
pub use error::Error;
/// Per-request failures, delivered through the completion callback.
pub use error::RequestError;
/// HTTP request method.
pub use request::Method;
/// Completion callback type.
pub use request::ResponseFn;
/// TLS session cache (exposed for inspection and metrics).
pub use session::SessionCache;
/// Parsed request URL.
pub use url::Url;
