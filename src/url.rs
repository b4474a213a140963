//! Request URL parsing.
//!
//! A `Url` owns its storage and records each component as an offset range,
//! so the source bytes stay intact and the value can be cloned and
//! re-serialized freely.

use std::ops::Range;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Url {
    storage: String,
    scheme: Range<usize>,
    host: Range<usize>,
    /// Explicit port digits, when the URL carried them.
    port_str: Option<Range<usize>>,
    /// Path after the leading slash, including any query.
    path: Range<usize>,
    /// Query after the `?`, when present.
    query: Option<Range<usize>>,
    port: u16,
    secure: bool,
}

impl Url {
    /// Parse an absolute http/https URL.
    ///
    /// The host section ends at the first `:` (explicit port) or `/`
    /// (default port); a URL with neither is rejected, as is a URL with a
    /// port but no path.
    pub fn parse(url: &str) -> Result<Url, Error> {
        let storage = url.to_string();
        let bytes = storage.as_bytes();

        let scheme_end = storage
            .find("://")
            .ok_or_else(|| Error::InvalidUrl(format!("missing scheme: {url}")))?;
        let scheme = 0..scheme_end;

        let secure = match &storage[scheme.clone()] {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::InvalidUrl(format!("unsupported scheme: {other}")));
            }
        };

        let host_start = scheme_end + 3;
        let mut it = host_start;
        while it < bytes.len() && bytes[it] != b':' && bytes[it] != b'/' {
            it += 1;
        }
        if it == bytes.len() {
            return Err(Error::InvalidUrl(format!("missing path: {url}")));
        }
        if it == host_start {
            return Err(Error::InvalidUrl(format!("empty host: {url}")));
        }
        let host = host_start..it;

        let (port_str, port, path_start) = if bytes[it] == b':' {
            let port_start = it + 1;
            let slash = storage[port_start..]
                .find('/')
                .map(|i| port_start + i)
                .ok_or_else(|| Error::InvalidUrl(format!("missing path: {url}")))?;
            let digits = &storage[port_start..slash];
            let port: u16 = digits
                .parse()
                .map_err(|_| Error::InvalidUrl(format!("bad port: {url}")))?;
            (Some(port_start..slash), port, slash + 1)
        } else {
            let port = if secure { 443 } else { 80 };
            (None, port, it + 1)
        };

        let path = path_start..storage.len();
        let query = storage[path.clone()]
            .find('?')
            .map(|i| path_start + i + 1..storage.len());

        Ok(Url {
            storage,
            scheme,
            host,
            port_str,
            path,
            query,
            port,
            secure,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.storage[self.scheme.clone()]
    }

    pub fn host(&self) -> &str {
        &self.storage[self.host.clone()]
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port as it appears on the wire for cache keys and resolution:
    /// the explicit digits, or the scheme default.
    pub fn port_label(&self) -> &str {
        match &self.port_str {
            Some(r) => &self.storage[r.clone()],
            None if self.secure => "443",
            None => "80",
        }
    }

    /// Path after the leading slash, including the query.
    pub fn path_and_query(&self) -> &str {
        &self.storage[self.path.clone()]
    }

    /// Path after the leading slash, excluding the query.
    pub fn path_only(&self) -> &str {
        match &self.query {
            Some(q) => &self.storage[self.path.start..q.start - 1],
            None => self.path_and_query(),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.clone().map(|r| &self.storage[r])
    }

    pub fn secure(&self) -> bool {
        self.secure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_http() {
        let url = Url::parse("http://example.test/hello").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host(), "example.test");
        assert_eq!(url.port(), 80);
        assert_eq!(url.port_label(), "80");
        assert_eq!(url.path_and_query(), "hello");
        assert_eq!(url.query(), None);
        assert!(!url.secure());
    }

    #[test]
    fn https_default_port() {
        let url = Url::parse("https://api.example.test/v1/data").unwrap();
        assert_eq!(url.port(), 443);
        assert_eq!(url.port_label(), "443");
        assert!(url.secure());
    }

    #[test]
    fn explicit_port() {
        let url = Url::parse("http://example.test:8080/x").unwrap();
        assert_eq!(url.host(), "example.test");
        assert_eq!(url.port(), 8080);
        assert_eq!(url.port_label(), "8080");
        assert_eq!(url.path_and_query(), "x");
    }

    #[test]
    fn query_split() {
        let url = Url::parse("http://example.test/form?a=1&b=2").unwrap();
        assert_eq!(url.path_and_query(), "form?a=1&b=2");
        assert_eq!(url.path_only(), "form");
        assert_eq!(url.query(), Some("a=1&b=2"));
    }

    #[test]
    fn empty_path() {
        let url = Url::parse("http://example.test/").unwrap();
        assert_eq!(url.path_and_query(), "");
        assert_eq!(url.path_only(), "");
    }

    #[test]
    fn round_trip_components() {
        // Parsed components reassemble into the input for well-formed URLs.
        for input in [
            "http://example.test/hello",
            "https://example.test:8443/a/b?x=1",
            "http://10.0.0.1:8080/metrics",
        ] {
            let url = Url::parse(input).unwrap();
            let port_part = if input.contains(&format!(":{}", url.port_label())) {
                format!(":{}", url.port_label())
            } else {
                String::new()
            };
            let rebuilt = format!(
                "{}://{}{}/{}",
                url.scheme(),
                url.host(),
                port_part,
                url.path_and_query()
            );
            assert_eq!(rebuilt, input);
        }
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(Url::parse("example.test/hello").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Url::parse("ftp://example.test/file").is_err());
    }

    #[test]
    fn rejects_missing_path() {
        assert!(Url::parse("http://example.test").is_err());
        assert!(Url::parse("http://example.test:8080").is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Url::parse("http://example.test:99999/x").is_err());
        assert!(Url::parse("http://example.test:abc/x").is_err());
    }
}
