use std::io;

use thiserror::Error;

/// Errors returned by setup and dispatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during setup (epoll, timerfd, eventfd, thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Configuration value out of range.
    #[error("config: {0}")]
    Config(String),
    /// URL failed to parse or used an unsupported scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Extra headers must be empty or end with CRLF.
    #[error("extra headers must end with CRLF")]
    MalformedHeaders,
    /// All connection slots are in use.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// An https request was made but no CA trust could be loaded.
    #[error("TLS unavailable: {0}")]
    TlsUnavailable(String),
    /// The client is shutting down.
    #[error("client is shutting down")]
    ShuttingDown,
}

/// Per-request failures, delivered through the completion callback.
///
/// Each admitted request observes exactly one callback invocation, either
/// `Ok(body)` or `Err(RequestError)`.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Host name resolution failed.
    #[error("DNS resolution failed for {host}: {detail}")]
    Dns { host: String, detail: String },
    /// TCP connect failed.
    #[error("connect failed: {0}")]
    Connect(io::Error),
    /// TLS handshake or record-layer error.
    #[error("TLS error: {0}")]
    Tls(rustls::Error),
    /// Socket I/O error after the connection was established.
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// The peer closed the connection before the response completed.
    #[error("peer closed the connection mid-response")]
    PeerClosed,
    /// The response did not fit in the connection's read buffer.
    #[error("response exceeds the connection read buffer")]
    BufferOverflow,
    /// The serialized request did not fit in the connection's write buffer.
    #[error("request exceeds the connection write buffer")]
    RequestTooLarge,
    /// The response carried neither Content-Length nor chunked encoding.
    #[error("response missing framing headers")]
    MissingFraming,
    /// The response violated HTTP/1.1 framing.
    #[error("malformed response: {0}")]
    BadResponse(&'static str),
    /// The client shut down while the request was in flight.
    #[error("client shut down before the response completed")]
    ShuttingDown,
}
