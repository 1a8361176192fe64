//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::context::RequestContext;

/// An incoming HTTP request with its body already read.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) context: RequestContext,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method,
            path,
            headers,
            body,
            params: HashMap::new(),
            remote_addr,
            context: RequestContext::new(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn context(&self) -> &RequestContext { &self.context }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The caller's address as seen through the reverse proxy.
    ///
    /// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the TCP peer.
    /// Unparseable header values are skipped.
    pub fn client_ip(&self) -> IpAddr {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());

        forwarded
            .or_else(|| self.header("x-real-ip").and_then(|v| v.trim().parse().ok()))
            .unwrap_or_else(|| self.remote_addr.ip())
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}

#[cfg(test)]
impl Request {
    pub(crate) fn test(method: Method, path: &str) -> Self {
        Self::new(
            method,
            path.to_owned(),
            HeaderMap::new(),
            Bytes::new(),
            SocketAddr::from(([10, 1, 2, 3], 41000)),
        )
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(
            http::HeaderName::from_static(name),
            http::HeaderValue::from_str(value).unwrap(),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let req = Request::test(Method::GET, "/").with_header("x-trace-id", "abc");
        assert_eq!(req.header("X-Trace-ID"), Some("abc"));
        assert_eq!(req.header("x-trace-id"), Some("abc"));
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let req = Request::test(Method::GET, "/")
            .with_header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .with_header("x-real-ip", "198.51.100.4");
        assert_eq!(req.client_ip().to_string(), "203.0.113.9");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let req = Request::test(Method::GET, "/").with_header("x-real-ip", "198.51.100.4");
        assert_eq!(req.client_ip().to_string(), "198.51.100.4");

        let req = Request::test(Method::GET, "/").with_header("x-forwarded-for", "not-an-ip");
        assert_eq!(req.client_ip().to_string(), "10.1.2.3");
    }
}
