//! Client metrics.
//!
//! Counters for request outcomes, byte totals, cache effectiveness, and
//! TLS session reuse. Registered with the metriken global registry for
//! exposition by the embedding process.

use metriken::{Counter, Gauge, metric};

// ── Request lifecycle ────────────────────────────────────────────

#[metric(
    name = "burstline/requests/dispatched",
    description = "Requests handed to a connection slot"
)]
pub static REQUESTS_DISPATCHED: Counter = Counter::new();

#[metric(
    name = "burstline/requests/queued",
    description = "Requests parked in the overflow queue"
)]
pub static REQUESTS_QUEUED: Counter = Counter::new();

#[metric(
    name = "burstline/requests/completed",
    description = "Requests completed with a full response"
)]
pub static REQUESTS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "burstline/requests/failed",
    description = "Requests that observed a failure callback"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

#[metric(
    name = "burstline/requests/dropped",
    description = "Requests rejected without dispatch or queueing"
)]
pub static REQUESTS_DROPPED: Counter = Counter::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(name = "burstline/bytes/sent", description = "Request bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(name = "burstline/bytes/received", description = "Response bytes received")]
pub static BYTES_RECEIVED: Counter = Counter::new();

// ── Pool ─────────────────────────────────────────────────────────

#[metric(
    name = "burstline/pool/exhausted",
    description = "Dispatch attempts that found no free slot"
)]
pub static POOL_EXHAUSTED: Counter = Counter::new();

#[metric(
    name = "burstline/connections/active",
    description = "Connection slots currently in use"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// ── DNS cache ────────────────────────────────────────────────────

#[metric(name = "burstline/dns/hits", description = "Address cache hits")]
pub static DNS_CACHE_HITS: Counter = Counter::new();

#[metric(name = "burstline/dns/misses", description = "Address cache misses")]
pub static DNS_CACHE_MISSES: Counter = Counter::new();

// ── TLS ──────────────────────────────────────────────────────────

#[metric(
    name = "burstline/tls/handshakes",
    description = "TLS handshakes started"
)]
pub static TLS_HANDSHAKES: Counter = Counter::new();

#[metric(
    name = "burstline/tls/resumed",
    description = "TLS handshakes completed via session resumption"
)]
pub static TLS_RESUMED: Counter = Counter::new();

#[metric(
    name = "burstline/tls/sessions_primed",
    description = "Priming handshakes that completed"
)]
pub static SESSIONS_PRIMED: Counter = Counter::new();

#[metric(
    name = "burstline/tls/session_misses",
    description = "Handshakes that found no resumable session"
)]
pub static SESSION_CACHE_MISSES: Counter = Counter::new();
