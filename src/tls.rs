//! TLS client context.
//!
//! Two rustls configs share one trust store and one session cache: the
//! resuming config spends cached tickets on real requests, the priming
//! config only deposits them. Trust comes from a PEM CA bundle plus any
//! explicitly injected roots.

use std::sync::Arc;

use rustls::RootCertStore;
use rustls::client::Resumption;

use crate::config::Config;
use crate::session::{PrimeStore, SessionCache};

pub(crate) struct TlsContext {
    /// Config for real requests: resumes from the session cache.
    pub resume: Arc<rustls::ClientConfig>,
    /// Config for priming handshakes: fills the cache, never consumes it.
    pub prime: Arc<rustls::ClientConfig>,
    pub cache: Arc<SessionCache>,
}

/// Build the TLS context, or `None` when no trust anchors are available
/// (https dispatch then fails with a typed error instead of aborting).
pub(crate) fn build_context(config: &Config) -> Option<TlsContext> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &config.ca_file {
        match std::fs::read(path) {
            Ok(pem) => {
                let certs: Vec<_> = rustls_pemfile::certs(&mut pem.as_slice())
                    .filter_map(|c| c.ok())
                    .collect();
                let (added, ignored) = roots.add_parsable_certificates(certs);
                if ignored > 0 {
                    tracing::warn!(path = %path.display(), ignored, "unparsable CA certificates skipped");
                }
                tracing::debug!(path = %path.display(), added, "CA bundle loaded");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "CA bundle unreadable");
            }
        }
    }

    for cert in &config.extra_roots {
        if let Err(e) = roots.add(cert.clone()) {
            tracing::warn!(error = %e, "extra root certificate rejected");
        }
    }

    if roots.is_empty() {
        tracing::warn!("no trust anchors available; https requests will fail");
        return None;
    }

    let cache = Arc::new(SessionCache::new(config.session_tickets_per_host));

    let mut resume = rustls::ClientConfig::builder()
        .with_root_certificates(roots.clone())
        .with_no_client_auth();
    resume.resumption = Resumption::store(cache.clone());

    let mut prime = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    prime.resumption = Resumption::store(Arc::new(PrimeStore::new(cache.clone())));

    Some(TlsContext {
        resume: Arc::new(resume),
        prime: Arc::new(prime),
        cache,
    })
}
