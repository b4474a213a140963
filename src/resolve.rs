//! Host resolution with a process-wide address cache.
//!
//! Resolution is IPv4-only, stream sockets, numeric service. Results are
//! memoized by `(host, port)` and never evicted; cached addresses outlive
//! every connection slot.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ptr;
use std::sync::Mutex;

use crate::error::RequestError;
use crate::metrics;

pub(crate) struct AddrCache {
    map: Mutex<HashMap<(String, u16), SocketAddrV4>>,
}

impl AddrCache {
    pub(crate) fn new() -> Self {
        AddrCache {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn resolve(
        &self,
        host: &str,
        port_label: &str,
        port: u16,
    ) -> Result<SocketAddrV4, RequestError> {
        let key = (host.to_string(), port);
        if let Some(addr) = self.map.lock().unwrap().get(&key) {
            metrics::DNS_CACHE_HITS.increment();
            return Ok(*addr);
        }
        metrics::DNS_CACHE_MISSES.increment();

        let addr = lookup_ipv4(host, port_label)?;
        self.map.lock().unwrap().insert(key, addr);
        Ok(addr)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }
}

fn lookup_ipv4(host: &str, service: &str) -> Result<SocketAddrV4, RequestError> {
    let dns_err = |detail: String| RequestError::Dns {
        host: host.to_string(),
        detail,
    };

    let c_host = CString::new(host).map_err(|_| dns_err("embedded NUL in host".into()))?;
    let c_service = CString::new(service).map_err(|_| dns_err("embedded NUL in port".into()))?;

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_INET;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = libc::AI_NUMERICSERV;

    let mut result: *mut libc::addrinfo = ptr::null_mut();
    let ret = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_service.as_ptr(), &hints, &mut result) };
    if ret != 0 {
        let detail = unsafe { CStr::from_ptr(libc::gai_strerror(ret)) }
            .to_string_lossy()
            .into_owned();
        return Err(dns_err(detail));
    }

    let mut found = None;
    let mut entry = result;
    while !entry.is_null() {
        let info = unsafe { &*entry };
        if info.ai_family == libc::AF_INET
            && info.ai_addrlen as usize >= std::mem::size_of::<libc::sockaddr_in>()
        {
            let sa = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sa.sin_addr.s_addr));
            let port = u16::from_be(sa.sin_port);
            found = Some(SocketAddrV4::new(ip, port));
            break;
        }
        entry = info.ai_next;
    }
    unsafe { libc::freeaddrinfo(result) };

    found.ok_or_else(|| dns_err("no IPv4 address".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_host_resolves() {
        let cache = AddrCache::new();
        let addr = cache.resolve("127.0.0.1", "8080", 8080).unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080));
    }

    #[test]
    fn second_lookup_is_cached() {
        let cache = AddrCache::new();
        cache.resolve("127.0.0.1", "80", 80).unwrap();
        cache.resolve("127.0.0.1", "80", 80).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_ports_are_distinct_entries() {
        let cache = AddrCache::new();
        cache.resolve("127.0.0.1", "80", 80).unwrap();
        cache.resolve("127.0.0.1", "81", 81).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
