//! Byte transport over a nonblocking socket, plaintext or TLS.
//!
//! `Transport` hides the difference between a raw TCP socket and a rustls
//! client connection behind read/write calls with a uniform contract:
//! `Ok(0)` means "would block, wait for readiness", errors are terminal.

use std::io::{self, Read, Write};
use std::os::fd::RawFd;

use rustls::{ClientConnection, HandshakeKind};

/// Terminal transport failures.
#[derive(Debug)]
pub(crate) enum TransportError {
    /// Peer closed the connection.
    PeerClosed,
    /// Socket-level error.
    Io(io::Error),
    /// TLS protocol error.
    Tls(rustls::Error),
}

impl From<TransportError> for crate::error::RequestError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::PeerClosed => crate::error::RequestError::PeerClosed,
            TransportError::Io(e) => crate::error::RequestError::Io(e),
            TransportError::Tls(e) => crate::error::RequestError::Tls(e),
        }
    }
}

/// Borrowed view of a socket fd implementing the std I/O traits.
///
/// Does not own the fd; the connection slot closes it on teardown.
pub(crate) struct FdSocket(pub RawFd);

impl Read for FdSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let ret = unsafe { libc::read(self.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Write for FdSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            let ret = unsafe { libc::write(self.0, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outcome of one handshake-driving pass.
pub(crate) enum HandshakeProgress {
    /// Handshake still in flight; the flags say which readiness to wait for.
    InProgress { want_read: bool, want_write: bool },
    /// Handshake finished. `resumed` is true for an abbreviated handshake.
    Complete { resumed: bool },
}

/// A connected transport, either plaintext TCP or TLS.
pub(crate) enum Transport {
    Plain(FdSocket),
    Tls {
        sock: FdSocket,
        conn: Box<ClientConnection>,
    },
}

/// `EAGAIN`, `EWOULDBLOCK` and `ENOTCONN` all mean "come back on readiness".
fn is_retry(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected)
}

impl Transport {
    /// Write as much of `buf` as the transport accepts right now.
    ///
    /// Returns the number of bytes consumed; `Ok(0)` means the transport
    /// is blocked and the caller should wait for write readiness.
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        match self {
            Transport::Plain(sock) => match sock.write(buf) {
                Ok(n) => Ok(n),
                Err(e) if is_retry(&e) => Ok(0),
                Err(e) => Err(TransportError::Io(e)),
            },
            Transport::Tls { sock, conn } => {
                // Plaintext goes into the rustls send buffer; ciphertext is
                // flushed separately. A full send buffer yields Ok(0).
                let n = match conn.writer().write(buf) {
                    Ok(n) => n,
                    Err(e) if is_retry(&e) => 0,
                    Err(e) => return Err(TransportError::Io(e)),
                };
                flush_ciphertext(conn, sock)?;
                Ok(n)
            }
        }
    }

    /// Read available bytes into `out`.
    ///
    /// Returns the number of bytes produced; `Ok(0)` means no data is
    /// available right now. A peer close is an error, not a short read.
    pub(crate) fn read(&mut self, out: &mut [u8]) -> Result<usize, TransportError> {
        match self {
            Transport::Plain(sock) => match sock.read(out) {
                Ok(0) => Err(TransportError::PeerClosed),
                Ok(n) => Ok(n),
                Err(e) if is_retry(&e) => Ok(0),
                Err(e) => Err(TransportError::Io(e)),
            },
            Transport::Tls { sock, conn } => {
                loop {
                    // Drain decrypted plaintext first.
                    match conn.reader().read(out) {
                        Ok(0) => return Err(TransportError::PeerClosed),
                        Ok(n) => return Ok(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(TransportError::Io(e)),
                    }

                    // No plaintext buffered; pull ciphertext off the socket.
                    match conn.read_tls(sock) {
                        Ok(0) => return Err(TransportError::PeerClosed),
                        Ok(_) => {
                            let state = conn
                                .process_new_packets()
                                .map_err(TransportError::Tls)?;
                            if state.peer_has_closed() && state.plaintext_bytes_to_read() == 0 {
                                return Err(TransportError::PeerClosed);
                            }
                        }
                        Err(e) if is_retry(&e) => return Ok(0),
                        Err(e) => return Err(TransportError::Io(e)),
                    }

                    // Session tickets and alerts may want a response.
                    if conn.wants_write() {
                        flush_ciphertext(conn, sock)?;
                    }
                }
            }
        }
    }

    /// Flush buffered TLS ciphertext to the socket. No-op for plaintext.
    pub(crate) fn flush_tls(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Plain(_) => Ok(()),
            Transport::Tls { sock, conn } => flush_ciphertext(conn, sock),
        }
    }

    /// Whether the transport has buffered output waiting for write readiness.
    pub(crate) fn wants_write(&self) -> bool {
        match self {
            Transport::Plain(_) => false,
            Transport::Tls { conn, .. } => conn.wants_write(),
        }
    }

    /// Drive the TLS handshake as far as the socket allows.
    ///
    /// Must only be called on a TLS transport that is still handshaking.
    pub(crate) fn drive_handshake(&mut self) -> Result<HandshakeProgress, TransportError> {
        let Transport::Tls { sock, conn } = self else {
            debug_assert!(false, "handshake driven on plaintext transport");
            return Ok(HandshakeProgress::Complete { resumed: false });
        };

        loop {
            let mut progressed = false;

            while conn.wants_write() {
                match conn.write_tls(sock) {
                    Ok(0) => break,
                    Ok(_) => progressed = true,
                    Err(e) if is_retry(&e) => break,
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }

            if conn.is_handshaking() && conn.wants_read() {
                match conn.read_tls(sock) {
                    Ok(0) => return Err(TransportError::PeerClosed),
                    Ok(_) => {
                        conn.process_new_packets().map_err(TransportError::Tls)?;
                        progressed = true;
                    }
                    Err(e) if is_retry(&e) => {}
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }

            if !conn.is_handshaking() {
                // Push out the final flight before reporting completion.
                flush_ciphertext(conn, sock)?;
                let resumed = matches!(conn.handshake_kind(), Some(HandshakeKind::Resumed));
                return Ok(HandshakeProgress::Complete { resumed });
            }

            if !progressed {
                return Ok(HandshakeProgress::InProgress {
                    want_read: conn.wants_read(),
                    want_write: conn.wants_write(),
                });
            }
        }
    }
}

fn flush_ciphertext(conn: &mut ClientConnection, sock: &mut FdSocket) -> Result<(), TransportError> {
    while conn.wants_write() {
        match conn.write_tls(sock) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if is_retry(&e) => break,
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(())
}
