//! TLS session cache.
//!
//! Resumable sessions are stored per server: a bounded queue of TLS 1.3
//! tickets (a priming round pushes fresh tickets and rotates the oldest
//! out) and a single TLS 1.2 slot that each renewal replaces. Real
//! connections consume tickets through the normal rustls store interface;
//! priming connections go through [`PrimeStore`], which feeds the cache
//! without ever spending it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use rustls::NamedGroup;
use rustls::client::{ClientSessionStore, Tls12ClientSessionValue, Tls13ClientSessionValue};
use rustls::pki_types::ServerName;

use crate::metrics;

#[derive(Default)]
struct HostSessions {
    kx_hint: Option<NamedGroup>,
    tls12: Option<Tls12ClientSessionValue>,
    tls13: VecDeque<Tls13ClientSessionValue>,
}

pub struct SessionCache {
    hosts: Mutex<HashMap<ServerName<'static>, HostSessions>>,
    tickets_per_host: usize,
}

impl SessionCache {
    pub fn new(tickets_per_host: usize) -> Self {
        SessionCache {
            hosts: Mutex::new(HashMap::new()),
            tickets_per_host,
        }
    }

    /// Number of TLS 1.3 tickets currently cached for `host`.
    pub fn ticket_count(&self, host: &str) -> usize {
        let Ok(name) = ServerName::try_from(host.to_string()) else {
            return 0;
        };
        self.hosts
            .lock()
            .unwrap()
            .get(&name)
            .map(|h| h.tls13.len() + usize::from(h.tls12.is_some()))
            .unwrap_or(0)
    }

    /// Whether any resumable state exists for `host`.
    pub fn has_sessions(&self, host: &str) -> bool {
        self.ticket_count(host) > 0
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts = self.hosts.lock().unwrap();
        f.debug_struct("SessionCache")
            .field("hosts", &hosts.len())
            .field("tickets_per_host", &self.tickets_per_host)
            .finish()
    }
}

impl ClientSessionStore for SessionCache {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.hosts
            .lock()
            .unwrap()
            .entry(server_name)
            .or_default()
            .kx_hint = Some(group);
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.hosts
            .lock()
            .unwrap()
            .get(&server_name.to_owned())
            .and_then(|h| h.kx_hint)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.hosts
            .lock()
            .unwrap()
            .entry(server_name)
            .or_default()
            .tls12 = Some(value);
    }

    fn tls12_session(&self, server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        self.hosts
            .lock()
            .unwrap()
            .get(&server_name.to_owned())
            .and_then(|h| h.tls12.clone())
    }

    fn remove_tls12_session(&self, server_name: &ServerName<'static>) {
        if let Some(host) = self.hosts.lock().unwrap().get_mut(server_name) {
            host.tls12 = None;
        }
    }

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.entry(server_name).or_default();
        if host.tls13.len() >= self.tickets_per_host {
            host.tls13.pop_front();
        }
        host.tls13.push_back(value);
    }

    fn take_tls13_ticket(&self, server_name: &ServerName<'static>) -> Option<Tls13ClientSessionValue> {
        let ticket = self
            .hosts
            .lock()
            .unwrap()
            .get_mut(server_name)
            .and_then(|h| h.tls13.pop_front());
        if ticket.is_none() {
            metrics::SESSION_CACHE_MISSES.increment();
            tracing::warn!(server = ?server_name, "no resumable TLS session cached");
        }
        ticket
    }
}

/// Store handed to priming connections: inserts flow through to the shared
/// cache, lookups always miss. A priming handshake therefore never spends
/// the tickets it exists to collect, and always runs a full handshake.
pub struct PrimeStore {
    cache: Arc<SessionCache>,
}

impl PrimeStore {
    pub fn new(cache: Arc<SessionCache>) -> Self {
        PrimeStore { cache }
    }
}

impl fmt::Debug for PrimeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimeStore").finish_non_exhaustive()
    }
}

impl ClientSessionStore for PrimeStore {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.cache.set_kx_hint(server_name, group);
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.cache.kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.cache.set_tls12_session(server_name, value);
    }

    fn tls12_session(&self, _server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        None
    }

    fn remove_tls12_session(&self, _server_name: &ServerName<'static>) {}

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        self.cache.insert_tls13_ticket(server_name, value);
    }

    fn take_tls13_ticket(&self, _server_name: &ServerName<'static>) -> Option<Tls13ClientSessionValue> {
        None
    }
}
