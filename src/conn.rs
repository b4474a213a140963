//! Connection slot and its state machine.
//!
//! Each slot owns one in-flight request end to end: socket, readiness
//! registrations, TLS endpoint, write and read buffers, and the response
//! framing cursor. Readiness events drive the state machine; every
//! transition that would block returns to the event loop with the
//! appropriate interest armed. Slots are preallocated and recycled
//! through the pool free list.

use std::io;
use std::mem;
use std::os::fd::RawFd;

use rustls::ClientConnection;
use rustls::pki_types::ServerName;

use crate::buffer::FixedBuf;
use crate::config::Config;
use crate::error::RequestError;
use crate::framing;
use crate::metrics;
use crate::reactor::{Poller, Token};
use crate::request::{Method, PendingRequest};
use crate::resolve::AddrCache;
use crate::tls::TlsContext;
use crate::transport::{FdSocket, HandshakeProgress, Transport};
use crate::url::Url;

/// Loop-owned collaborators handed to slot methods.
pub(crate) struct ConnCtx<'a> {
    pub poller: &'a Poller,
    pub config: &'a Config,
    pub resolver: &'a AddrCache,
    pub tls: Option<&'a TlsContext>,
}

/// What the event loop should do with the slot after a state step.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Continue,
    /// The slot finished (response, failure, or priming) and was torn
    /// down; return it to the free list.
    Release,
}

/// Connection lifecycle. Transitions only move forward; teardown resets
/// the slot to `Idle` for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// On the free list, no socket.
    Idle,
    /// Nonblocking connect in flight; writable readiness completes it.
    Connecting,
    /// TLS handshake in flight.
    Handshaking,
    /// Request bytes draining to the transport.
    Sending,
    /// Request sent; waiting for the response header block.
    Waiting,
    /// Header block framed; accumulating the body.
    Receiving,
    /// Priming handshake done; waiting for the ticket flight.
    Priming,
}

struct ResponseFraming {
    /// Offset of the body in the read buffer.
    body_start: usize,
    chunked: bool,
    expected_len: Option<usize>,
}

pub(crate) struct Slot {
    idx: u16,
    generation: u32,
    state: SlotState,
    fd: RawFd,
    transport: Option<Transport>,
    armed_read: bool,
    armed_write: bool,
    write_buf: FixedBuf,
    read_buf: FixedBuf,
    request: Option<PendingRequest>,
    framing: Option<ResponseFraming>,
}

impl Slot {
    pub(crate) fn new(idx: u16, buf_size: usize) -> Self {
        Slot {
            idx,
            generation: 0,
            state: SlotState::Idle,
            fd: -1,
            transport: None,
            armed_read: false,
            armed_write: false,
            write_buf: FixedBuf::new(buf_size),
            read_buf: FixedBuf::new(buf_size),
            request: None,
            framing: None,
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    fn token(&self) -> Token {
        Token::Conn {
            idx: self.idx,
            generation: self.generation,
        }
    }

    /// Begin a request on a freshly allocated slot: resolve, serialize,
    /// open the socket, and start the nonblocking connect.
    pub(crate) fn start(&mut self, req: PendingRequest, ctx: &ConnCtx) -> Action {
        debug_assert!(self.is_idle(), "start on a busy slot");
        self.request = Some(req);

        let resolved = {
            let req = self.request.as_ref().unwrap();
            ctx.resolver
                .resolve(req.url.host(), req.url.port_label(), req.url.port())
        };
        let addr = match resolved {
            Ok(a) => a,
            Err(e) => return self.fail(e, ctx),
        };

        let serialized = {
            let req = self.request.as_ref().unwrap();
            if req.prime {
                Ok(())
            } else {
                serialize_request(&mut self.write_buf, req.method, &req.url, &req.extra_headers)
            }
        };
        if serialized.is_err() {
            return self.fail(RequestError::RequestTooLarge, ctx);
        }

        let fd = match open_socket(ctx.config) {
            Ok(fd) => fd,
            Err(e) => return self.fail(e, ctx),
        };
        self.fd = fd;

        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_port = addr.port().to_be();
        sa.sin_addr.s_addr = u32::from_ne_bytes(addr.ip().octets());
        let ret = unsafe {
            libc::connect(
                fd,
                &sa as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return self.fail(RequestError::Connect(err), ctx);
            }
        }

        self.state = SlotState::Connecting;
        self.armed_read = true;
        self.armed_write = true;
        if let Err(e) = ctx.poller.register(fd, self.token(), true, true) {
            return self.fail(RequestError::Io(e), ctx);
        }
        Action::Continue
    }

    /// Dispatch a readiness event against the current state.
    pub(crate) fn on_event(&mut self, readable: bool, writable: bool, ctx: &ConnCtx) -> Action {
        match self.state {
            SlotState::Idle => Action::Continue,
            SlotState::Connecting if writable => self.finish_connect(ctx),
            SlotState::Handshaking => self.continue_handshake(ctx),
            SlotState::Sending if writable => self.continue_send(ctx),
            SlotState::Waiting | SlotState::Receiving if readable => self.read_response(ctx),
            SlotState::Priming if readable => self.finish_prime(ctx),
            _ => Action::Continue,
        }
    }

    fn finish_connect(&mut self, ctx: &ConnCtx) -> Action {
        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret != 0 {
            return self.fail(RequestError::Connect(io::Error::last_os_error()), ctx);
        }
        if err != 0 {
            return self.fail(
                RequestError::Connect(io::Error::from_raw_os_error(err)),
                ctx,
            );
        }

        let (secure, prime, host) = {
            let req = self.request.as_ref().expect("connected slot without request");
            (req.url.secure(), req.prime, req.url.host().to_string())
        };

        if secure {
            let Some(tls) = ctx.tls else {
                return self.fail(
                    RequestError::Tls(rustls::Error::General("TLS context unavailable".into())),
                    ctx,
                );
            };
            let server_name = match ServerName::try_from(host) {
                Ok(n) => n,
                Err(_) => {
                    return self.fail(
                        RequestError::Tls(rustls::Error::General("invalid server name".into())),
                        ctx,
                    );
                }
            };
            let config = if prime {
                tls.prime.clone()
            } else {
                tls.resume.clone()
            };
            let conn = match ClientConnection::new(config, server_name) {
                Ok(c) => c,
                Err(e) => return self.fail(RequestError::Tls(e), ctx),
            };
            self.transport = Some(Transport::Tls {
                sock: FdSocket(self.fd),
                conn: Box::new(conn),
            });
            metrics::TLS_HANDSHAKES.increment();
            self.state = SlotState::Handshaking;
            self.continue_handshake(ctx)
        } else {
            self.transport = Some(Transport::Plain(FdSocket(self.fd)));
            self.begin_send(ctx)
        }
    }

    fn continue_handshake(&mut self, ctx: &ConnCtx) -> Action {
        let transport = self.transport.as_mut().expect("handshake without transport");
        match transport.drive_handshake() {
            Err(e) => self.fail(e.into(), ctx),
            Ok(HandshakeProgress::InProgress {
                want_read,
                want_write,
            }) => {
                // Never park with no interest armed.
                self.set_interest(ctx, want_read || !want_write, want_write);
                Action::Continue
            }
            Ok(HandshakeProgress::Complete { resumed }) => {
                if resumed {
                    metrics::TLS_RESUMED.increment();
                }
                let prime = self.request.as_ref().is_some_and(|r| r.prime);
                if prime {
                    self.after_prime_handshake(ctx)
                } else {
                    self.begin_send(ctx)
                }
            }
        }
    }

    /// A priming handshake ends here. Session tickets arrive right after
    /// the server Finished; if this flight was already ingested during
    /// the handshake the slot can retire now, otherwise it waits for one
    /// more readable event.
    fn after_prime_handshake(&mut self, ctx: &ConnCtx) -> Action {
        if let Some(transport) = self.transport.as_mut() {
            let _ = self.read_buf.fill_from(transport);
        }
        let host = self
            .request
            .as_ref()
            .map(|r| r.url.host().to_string())
            .unwrap_or_default();
        let cached = ctx.tls.map(|t| t.cache.has_sessions(&host)).unwrap_or(false);
        if cached {
            return self.finish_prime(ctx);
        }
        self.state = SlotState::Priming;
        self.set_interest(ctx, true, false);
        Action::Continue
    }

    fn finish_prime(&mut self, ctx: &ConnCtx) -> Action {
        // Ingest whatever arrived; ticket records are stored as a side
        // effect of processing them.
        if let Some(transport) = self.transport.as_mut() {
            let _ = self.read_buf.fill_from(transport);
        }
        metrics::SESSIONS_PRIMED.increment();
        tracing::debug!(slot = self.idx, "priming handshake complete");
        self.teardown(ctx);
        Action::Release
    }

    fn begin_send(&mut self, ctx: &ConnCtx) -> Action {
        self.state = SlotState::Sending;
        self.continue_send(ctx)
    }

    fn send_step(&mut self) -> Result<(usize, bool), crate::transport::TransportError> {
        let transport = self.transport.as_mut().expect("send without transport");
        let before = self.write_buf.pending();
        let remaining = self.write_buf.drain_to(transport)?;
        metrics::BYTES_SENT.add((before - remaining) as u64);
        if remaining == 0 {
            transport.flush_tls()?;
        }
        Ok((remaining, transport.wants_write()))
    }

    fn continue_send(&mut self, ctx: &ConnCtx) -> Action {
        match self.send_step() {
            Err(e) => self.fail(e.into(), ctx),
            Ok((0, false)) => {
                self.state = SlotState::Waiting;
                self.set_interest(ctx, true, false);
                Action::Continue
            }
            Ok(_) => {
                self.set_interest(ctx, true, true);
                Action::Continue
            }
        }
    }

    fn read_response(&mut self, ctx: &ConnCtx) -> Action {
        if self.read_buf.head_room() == 0 {
            // Readiness with a full buffer: the response cannot fit.
            return self.fail(RequestError::BufferOverflow, ctx);
        }

        let filled = {
            let transport = self.transport.as_mut().expect("read without transport");
            self.read_buf.fill_from(transport)
        };
        let added = match filled {
            Ok(n) => n,
            Err(e) => return self.fail(e.into(), ctx),
        };
        if added == 0 {
            return Action::Continue;
        }
        metrics::BYTES_RECEIVED.add(added as u64);

        if self.state == SlotState::Waiting {
            let Some(body_start) =
                framing::find_headers_end(self.read_buf.filled(), self.read_buf.tail())
            else {
                return Action::Continue;
            };
            let headers = &self.read_buf.filled()[self.read_buf.tail()..body_start];
            let chunked = framing::is_chunked(headers);
            let expected_len = framing::parse_content_length(headers);
            self.read_buf.consume_to(body_start);
            self.framing = Some(ResponseFraming {
                body_start,
                chunked,
                expected_len,
            });
            self.state = SlotState::Receiving;
            if !chunked && expected_len.is_none() {
                return self.fail(RequestError::MissingFraming, ctx);
            }
        }

        let action = self.check_complete(ctx);
        // An incomplete response that already filled the buffer can never
        // finish (remaining plaintext may be parked inside the TLS layer
        // with no further readiness coming).
        if action == Action::Continue && self.read_buf.head_room() == 0 {
            return self.fail(RequestError::BufferOverflow, ctx);
        }
        action
    }

    fn check_complete(&mut self, ctx: &ConnCtx) -> Action {
        let Some(framing_state) = self.framing.as_ref() else {
            return Action::Continue;
        };
        let body_start = framing_state.body_start;
        let chunked = framing_state.chunked;
        let expected_len = framing_state.expected_len;

        if chunked {
            if !framing::chunked_body_complete(self.read_buf.filled()) {
                return Action::Continue;
            }
            let head = self.read_buf.head();
            match framing::decode_chunked_in_place(self.read_buf.filled_mut(), body_start, head) {
                Ok(len) => {
                    // Reclaim the framing overhead; keep the NUL.
                    self.read_buf.truncate(body_start + len + 1);
                    self.complete(len, ctx)
                }
                Err(msg) => self.fail(RequestError::BadResponse(msg), ctx),
            }
        } else {
            let expected = expected_len.unwrap_or(0);
            if self.read_buf.head() - body_start >= expected {
                self.complete(expected, ctx)
            } else {
                Action::Continue
            }
        }
    }

    fn complete(&mut self, content_len: usize, ctx: &ConnCtx) -> Action {
        let body_start = self.framing.as_ref().map(|f| f.body_start).unwrap_or(0);
        metrics::REQUESTS_COMPLETED.increment();
        if let Some(handler) = self.request.as_mut().and_then(|r| r.handler.take()) {
            let body = &self.read_buf.filled()[body_start..body_start + content_len];
            handler(Ok(body));
        }
        self.teardown(ctx);
        Action::Release
    }

    pub(crate) fn fail(&mut self, err: RequestError, ctx: &ConnCtx) -> Action {
        metrics::REQUESTS_FAILED.increment();
        tracing::debug!(slot = self.idx, error = %err, "request failed");
        if let Some(handler) = self.request.as_mut().and_then(|r| r.handler.take()) {
            handler(Err(err));
        }
        self.teardown(ctx);
        Action::Release
    }

    fn set_interest(&mut self, ctx: &ConnCtx, read: bool, write: bool) {
        if read == self.armed_read && write == self.armed_write {
            return;
        }
        self.armed_read = read;
        self.armed_write = write;
        if let Err(e) = ctx.poller.rearm(self.fd, self.token(), read, write) {
            tracing::warn!(slot = self.idx, error = %e, "readiness rearm failed");
        }
    }

    /// Release every per-request resource and return the slot to `Idle`.
    /// The close carries `SO_LINGER {on, 0}`: the caller never waits for
    /// an ordered shutdown, so the kernel sends an immediate RST.
    fn teardown(&mut self, ctx: &ConnCtx) {
        if self.fd >= 0 {
            let _ = ctx.poller.deregister(self.fd);
            let linger = libc::linger {
                l_onoff: 1,
                l_linger: 0,
            };
            unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    libc::SO_LINGER,
                    &linger as *const _ as *const libc::c_void,
                    mem::size_of::<libc::linger>() as libc::socklen_t,
                );
                libc::close(self.fd);
            }
            self.fd = -1;
        }
        self.transport = None;
        self.write_buf.reset();
        self.read_buf.reset();
        self.request = None;
        self.framing = None;
        self.armed_read = false;
        self.armed_write = false;
        self.state = SlotState::Idle;
        self.generation = self.generation.wrapping_add(1);
        metrics::CONNECTIONS_ACTIVE.decrement();
    }
}

fn open_socket(config: &Config) -> Result<RawFd, RequestError> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(RequestError::Connect(io::Error::last_os_error()));
    }

    if let Some(priority) = config.sock_priority {
        let val = priority as libc::c_int;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PRIORITY,
                &val as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }

    if config.tcp_nodelay {
        let val: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                &val as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }

    Ok(fd)
}

/// Serialize the request line, headers and (for POST with a query) the
/// form body into the write buffer. The extra-header block is appended
/// verbatim; the caller guarantees it is empty or CRLF-terminated.
pub(crate) fn serialize_request(
    buf: &mut FixedBuf,
    method: Method,
    url: &Url,
    extra_headers: &[u8],
) -> Result<(), ()> {
    let post_body = match method {
        Method::Post => url.query(),
        _ => None,
    };

    buf.append(method.as_str().as_bytes())?;
    buf.append(b" /")?;

    if let Some(body) = post_body {
        buf.append(url.path_only().as_bytes())?;
        buf.append(b" HTTP/1.1\r\nHost: ")?;
        buf.append(url.host().as_bytes())?;
        buf.append(b"\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: ")?;
        buf.append(body.len().to_string().as_bytes())?;
        buf.append(b"\r\n")?;
        buf.append(extra_headers)?;
        buf.append(b"\r\n")?;
        buf.append(body.as_bytes())?;
    } else {
        buf.append(url.path_and_query().as_bytes())?;
        buf.append(b" HTTP/1.1\r\nHost: ")?;
        buf.append(url.host().as_bytes())?;
        buf.append(b"\r\n")?;
        buf.append(extra_headers)?;
        buf.append(b"\r\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized(method: Method, url: &str, extra: &[u8]) -> String {
        let url = Url::parse(url).unwrap();
        let mut buf = FixedBuf::new(4096);
        serialize_request(&mut buf, method, &url, extra).unwrap();
        String::from_utf8(buf.filled().to_vec()).unwrap()
    }

    #[test]
    fn get_request_shape() {
        let req = serialized(Method::Get, "http://example.test/hello", b"");
        assert_eq!(req, "GET /hello HTTP/1.1\r\nHost: example.test\r\n\r\n");
    }

    #[test]
    fn get_keeps_query_in_path() {
        let req = serialized(Method::Get, "http://example.test/search?q=1", b"");
        assert!(req.starts_with("GET /search?q=1 HTTP/1.1\r\n"));
    }

    #[test]
    fn extra_headers_appended_verbatim() {
        let req = serialized(
            Method::Get,
            "http://example.test/",
            b"X-Token: abc\r\nAccept: */*\r\n",
        );
        assert!(req.contains("\r\nX-Token: abc\r\nAccept: */*\r\n\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn post_with_query_becomes_form_body() {
        let req = serialized(Method::Post, "http://example.test/form?a=1&b=2", b"");
        assert!(req.starts_with("POST /form HTTP/1.1\r\n"));
        assert!(req.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        assert!(req.contains("Content-Length: 7\r\n"));
        assert!(req.ends_with("\r\n\r\na=1&b=2"));
    }

    #[test]
    fn post_without_query_has_no_body() {
        let req = serialized(Method::Post, "http://example.test/submit", b"");
        assert_eq!(req, "POST /submit HTTP/1.1\r\nHost: example.test\r\n\r\n");
    }

    #[test]
    fn extension_method() {
        let req = serialized(Method::Extension("PURGE"), "http://example.test/x", b"");
        assert!(req.starts_with("PURGE /x HTTP/1.1\r\n"));
    }

    #[test]
    fn oversized_request_rejected() {
        let url = Url::parse("http://example.test/hello").unwrap();
        let mut buf = FixedBuf::new(32);
        let headers = vec![b'x'; 64];
        assert!(serialize_request(&mut buf, Method::Get, &url, &headers).is_err());
    }
}
