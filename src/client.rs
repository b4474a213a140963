//! Client handle and shared state.
//!
//! `ClientBuilder::launch` validates the configuration, builds the TLS
//! context, creates one injection channel and wakeup fd per event loop,
//! and spawns the loop threads. The returned `Client` is the public
//! surface: dispatch, queueing, session priming, shutdown.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::Sender;

use crate::config::Config;
use crate::error::{Error, RequestError};
use crate::metrics;
use crate::pool::PendingQueue;
use crate::reactor::{self, EventFd};
use crate::request::{Method, PendingRequest};
use crate::resolve::AddrCache;
use crate::tls::TlsContext;
use crate::url::Url;
use crate::worker;

/// Process-wide state shared by the client handle and every event loop.
pub(crate) struct Shared {
    pub config: Config,
    pub pending: PendingQueue,
    pub resolver: AddrCache,
    pub tls: Option<TlsContext>,
    pub primed: Mutex<Vec<Url>>,
    /// Free-slot count per loop; decremented when a request is routed,
    /// incremented when the owning loop releases the slot.
    pub loop_free: Box<[AtomicUsize]>,
    rr: AtomicUsize,
    injectors: Vec<Sender<PendingRequest>>,
    wake_fds: Vec<RawFd>,
    pub shutdown: AtomicBool,
}

impl Shared {
    /// Reserve capacity on some loop and hand the request to it.
    /// Returns the request when every loop is full.
    pub(crate) fn route(&self, req: PendingRequest) -> Result<(), PendingRequest> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(req);
        }
        let n = self.injectors.len();
        let start = self.rr.fetch_add(1, Ordering::Relaxed) % n;
        for i in 0..n {
            let target = (start + i) % n;
            let reserved = self.loop_free[target]
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
                .is_ok();
            if !reserved {
                continue;
            }
            match self.injectors[target].send(req) {
                Ok(()) => {
                    metrics::REQUESTS_DISPATCHED.increment();
                    reactor::wake(self.wake_fds[target]);
                    return Ok(());
                }
                Err(e) => {
                    // Loop thread already exited.
                    self.loop_free[target].fetch_add(1, Ordering::Release);
                    return Err(e.into_inner());
                }
            }
        }
        Err(req)
    }

    pub(crate) fn free_slots(&self) -> usize {
        self.loop_free
            .iter()
            .map(|c| c.load(Ordering::Acquire))
            .sum()
    }
}

/// Builder for launching the client's event-loop threads.
pub struct ClientBuilder {
    config: Config,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        ClientBuilder { config }
    }

    /// Spawn the event loops and return the client handle plus one join
    /// handle per loop thread.
    pub fn launch(self) -> Result<(Client, Vec<JoinHandle<Result<(), Error>>>), Error> {
        let config = self.config;
        config.validate()?;

        let tls = crate::tls::build_context(&config);

        let mut primed = Vec::with_capacity(config.primed_hosts.len());
        for url in &config.primed_hosts {
            let parsed = Url::parse(url)?;
            if !parsed.secure() {
                return Err(Error::Config(format!("primed host must be https: {url}")));
            }
            primed.push(parsed);
        }
        if !primed.is_empty() && tls.is_none() {
            return Err(Error::TlsUnavailable(
                "session priming requires trust anchors".into(),
            ));
        }

        let loops = config.loops;
        let per_loop = config.slots_per_loop();

        let mut injectors = Vec::with_capacity(loops);
        let mut receivers = Vec::with_capacity(loops);
        let mut wakes = Vec::with_capacity(loops);
        let mut wake_fds = Vec::with_capacity(loops);
        for _ in 0..loops {
            let (tx, rx) = crossbeam_channel::unbounded();
            injectors.push(tx);
            receivers.push(rx);
            let wake = EventFd::new()?;
            wake_fds.push(wake.fd());
            wakes.push(wake);
        }

        let shared = Arc::new(Shared {
            config,
            pending: PendingQueue::new(),
            resolver: AddrCache::new(),
            tls,
            primed: Mutex::new(primed),
            loop_free: (0..loops).map(|_| AtomicUsize::new(per_loop)).collect(),
            rr: AtomicUsize::new(0),
            injectors,
            wake_fds,
            shutdown: AtomicBool::new(false),
        });

        let handles = worker::spawn_loops(shared.clone(), wakes, receivers)?;
        Ok((Client { shared }, handles))
    }
}

/// Handle to a running client.
///
/// Cloning is cheap; all clones share the same pool, queue and caches.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Dispatch a request immediately. Fails with
    /// [`Error::PoolExhausted`] when no connection slot is free; the
    /// callback is not invoked in that case.
    pub fn request<F>(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[u8],
        on_response: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(Result<&[u8], RequestError>) + Send + 'static,
    {
        let req = self.admit(method, url, extra_headers, on_response)?;
        match self.shared.route(req) {
            Ok(()) => Ok(()),
            Err(_req) => {
                metrics::POOL_EXHAUSTED.increment();
                metrics::REQUESTS_DROPPED.increment();
                Err(Error::PoolExhausted)
            }
        }
    }

    /// Dispatch a request, parking it in the overflow queue when the
    /// pool is exhausted. Queued requests are dispatched in FIFO order
    /// by the queue-tick timer as slots free up.
    pub fn enqueue<F>(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[u8],
        on_response: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(Result<&[u8], RequestError>) + Send + 'static,
    {
        let req = self.admit(method, url, extra_headers, on_response)?;
        if let Err(req) = self.shared.route(req) {
            metrics::POOL_EXHAUSTED.increment();
            metrics::REQUESTS_QUEUED.increment();
            self.shared.pending.push(req);
        }
        Ok(())
    }

    fn admit<F>(
        &self,
        method: Method,
        url: &str,
        extra_headers: &[u8],
        on_response: F,
    ) -> Result<PendingRequest, Error>
    where
        F: FnOnce(Result<&[u8], RequestError>) + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let url = Url::parse(url)?;
        if url.secure() && self.shared.tls.is_none() {
            return Err(Error::TlsUnavailable("no trust anchors loaded".into()));
        }
        if !extra_headers.is_empty() && !extra_headers.ends_with(b"\r\n") {
            return Err(Error::MalformedHeaders);
        }
        Ok(PendingRequest {
            url,
            method,
            extra_headers: Bytes::copy_from_slice(extra_headers),
            handler: Some(Box::new(on_response)),
            prime: false,
        })
    }

    /// Register an https host for periodic TLS session priming. The next
    /// renewal round (the first fires shortly after launch) performs
    /// priming handshakes against it.
    pub fn prime_host(&self, url: &str) -> Result<(), Error> {
        let parsed = Url::parse(url)?;
        if !parsed.secure() {
            return Err(Error::Config(format!("primed host must be https: {url}")));
        }
        if self.shared.tls.is_none() {
            return Err(Error::TlsUnavailable("no trust anchors loaded".into()));
        }
        self.shared.primed.lock().unwrap().push(parsed);
        Ok(())
    }

    /// Free connection slots across all loops.
    pub fn free_slots(&self) -> usize {
        self.shared.free_slots()
    }

    /// Requests waiting in the overflow queue.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Total connection slots.
    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    /// Whether any resumable TLS session is cached for `host`.
    pub fn has_cached_session(&self, host: &str) -> bool {
        self.shared
            .tls
            .as_ref()
            .is_some_and(|t| t.cache.has_sessions(host))
    }

    /// Signal every loop to tear down its connections and exit. In-flight
    /// requests observe [`RequestError::ShuttingDown`]; queued requests
    /// are dropped. Join the handles returned by `launch` to wait for the
    /// loops to finish.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for &fd in &self.shared.wake_fds {
            reactor::wake(fd);
        }
    }
}

