//! Integration tests: HTTPS against an in-process rustls server.
//!
//! A self-signed certificate is generated per test; the server thread
//! accepts TLS connections, answers HTTP/1.1 requests, and silently
//! drops priming connections that never send one.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use burstline::{ClientBuilder, ConfigBuilder, Method, metrics};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

static TEST_SERIALIZE: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn generate_self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    (CertificateDer::from(cert.cert), key.into())
}

fn server_tls_config(
    cert: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
) -> Arc<rustls::ServerConfig> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    Arc::new(config)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Accept loop: TLS handshake each connection, answer one request with
/// `response` if the peer sends one, drop the connection otherwise.
/// Runs until the process exits.
fn spawn_tls_server(listener: TcpListener, config: Arc<rustls::ServerConfig>, response: &'static [u8]) {
    thread::spawn(move || {
        loop {
            let Ok((mut tcp, _)) = listener.accept() else {
                return;
            };
            let config = config.clone();
            thread::spawn(move || {
                let mut conn = match rustls::ServerConnection::new(config) {
                    Ok(c) => c,
                    Err(_) => return,
                };
                let mut stream = rustls::Stream::new(&mut conn, &mut tcp);

                // Read until a full request or until the peer goes away.
                // Priming connections close without sending anything.
                let mut req = Vec::new();
                let mut tmp = [0u8; 1024];
                loop {
                    match stream.read(&mut tmp) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            req.extend_from_slice(&tmp[..n]);
                            if find(&req, b"\r\n\r\n").is_some() {
                                break;
                            }
                        }
                    }
                }

                let _ = stream.write_all(response);
                // Linger until the client tears down.
                let _ = stream.read(&mut tmp);
            });
        }
    });
}

#[test]
fn https_round_trip() {
    let _guard = TEST_SERIALIZE.lock().unwrap();
    let (cert, key) = generate_self_signed();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_tls_server(
        listener,
        server_tls_config(cert.clone(), key),
        b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecure",
    );

    let config = ConfigBuilder::new()
        .pool_size(2)
        .conn_buf_size(16 * 1024)
        .no_ca_file()
        .add_root(cert)
        .build()
        .unwrap();
    let (client, handles) = ClientBuilder::new(config).launch().unwrap();

    let (tx, rx) = mpsc::channel();
    client
        .enqueue(
            Method::Get,
            &format!("https://localhost:{port}/hello"),
            b"",
            move |resp| {
                tx.send(resp.map(|b| b.to_vec())).unwrap();
            },
        )
        .unwrap();

    let body = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("callback")
        .expect("response");
    assert_eq!(body, b"secure");

    client.shutdown();
    for h in handles {
        h.join().unwrap().unwrap();
    }
}

#[test]
fn priming_populates_cache_and_resumes() {
    let _guard = TEST_SERIALIZE.lock().unwrap();
    let (cert, key) = generate_self_signed();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    spawn_tls_server(
        listener,
        server_tls_config(cert.clone(), key),
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nquick",
    );

    let primed_before = metrics::SESSIONS_PRIMED.value();
    let resumed_before = metrics::TLS_RESUMED.value();

    // The first renew round fires one queue tick after launch and runs a
    // full pool of priming handshakes against the registered host.
    let config = ConfigBuilder::new()
        .pool_size(2)
        .conn_buf_size(16 * 1024)
        .no_ca_file()
        .add_root(cert)
        .prime_host(format!("https://localhost:{port}/"))
        .build()
        .unwrap();
    let (client, handles) = ClientBuilder::new(config).launch().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !client.has_cached_session("localhost") {
        assert!(Instant::now() < deadline, "no session was primed");
        thread::sleep(Duration::from_millis(10));
    }
    assert!(metrics::SESSIONS_PRIMED.value() > primed_before);

    // A real request now rides an abbreviated handshake.
    let (tx, rx) = mpsc::channel();
    client
        .enqueue(
            Method::Get,
            &format!("https://localhost:{port}/fast"),
            b"",
            move |resp| {
                tx.send(resp.map(|b| b.to_vec())).unwrap();
            },
        )
        .unwrap();

    let body = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("callback")
        .expect("response");
    assert_eq!(body, b"quick");
    assert!(metrics::TLS_RESUMED.value() > resumed_before);

    client.shutdown();
    for h in handles {
        h.join().unwrap().unwrap();
    }
}

#[test]
fn priming_requires_https() {
    let _guard = TEST_SERIALIZE.lock().unwrap();
    let (cert, _key) = generate_self_signed();
    let config = ConfigBuilder::new()
        .pool_size(2)
        .no_ca_file()
        .add_root(cert)
        .build()
        .unwrap();
    let (client, handles) = ClientBuilder::new(config).launch().unwrap();

    assert!(client.prime_host("http://example.test/").is_err());

    client.shutdown();
    for h in handles {
        h.join().unwrap().unwrap();
    }
}
