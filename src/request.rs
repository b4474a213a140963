//! Request descriptors.

use bytes::Bytes;

use crate::error::RequestError;
use crate::url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    /// Any other token, e.g. `Method::Extension("PUT")`.
    Extension(&'static str),
}

impl Method {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Extension(s) => s,
        }
    }
}

/// Completion callback. Invoked exactly once per admitted request, on the
/// loop thread owning the connection slot. The body slice borrows the
/// slot's read buffer and is only valid during the call; copy anything
/// that needs to outlive it.
pub type ResponseFn = Box<dyn FnOnce(Result<&[u8], RequestError>) + Send + 'static>;

/// An admitted request, owned end to end: the URL is parsed up front and
/// the extra-header block copied, so nothing borrows from the caller once
/// this record is queued or in flight.
pub(crate) struct PendingRequest {
    pub url: Url,
    pub method: Method,
    /// Verbatim header block; empty or CRLF-terminated (validated on admit).
    pub extra_headers: Bytes,
    /// `None` for priming handshakes, which complete without a response.
    pub handler: Option<ResponseFn>,
    /// Priming handshakes send no request and stop after the handshake.
    pub prime: bool,
}
