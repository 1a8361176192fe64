//! Request-scoped state shared along the middleware chain.
//!
//! A [`Request`](crate::Request) is moved into each layer in turn, so a layer
//! that needs to look at per-request state *after* delegating (the recovery
//! boundary, once a panic has swallowed the request) clones the
//! [`RequestContext`] first. The clone is a reference count, not a copy.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of a locally generated trace identifier.
pub const TRACE_ID_LEN: usize = 16;

/// Identifier correlating one request's logs, response header and error body.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TraceId(String);

impl TraceId {
    /// 16 characters from `[A-Za-z0-9]`, drawn from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let id = rand::rng()
            .sample_iter(Alphanumeric)
            .take(TRACE_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Adopts an inbound header value. `None` for an empty or blank value.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        (!value.is_empty()).then(|| Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request state. Lives exactly as long as the request it belongs to.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    trace_id: OnceLock<TraceId>,
    faulted: AtomicBool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trace id, once the observability layer has assigned one.
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.inner.trace_id.get()
    }

    /// Assigns the trace id. The first assignment sticks; the id that ends up
    /// stored is returned.
    pub(crate) fn set_trace_id(&self, id: TraceId) -> &TraceId {
        self.inner.trace_id.get_or_init(|| id)
    }

    /// Whether the recovery boundary caught a panic for this request.
    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_faulted(&self) {
        self.inner.faulted.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_are_16_alphanumeric_chars() {
        for _ in 0..100 {
            let id = TraceId::generate();
            assert_eq!(id.as_str().len(), TRACE_ID_LEN);
            assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn generated_ids_do_not_collide() {
        let ids: HashSet<_> = (0..10_000).map(|_| TraceId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn blank_header_values_are_rejected() {
        assert!(TraceId::from_header("").is_none());
        assert!(TraceId::from_header("   ").is_none());
        assert_eq!(TraceId::from_header("abc123").unwrap().as_str(), "abc123");
    }

    #[test]
    fn clones_share_the_trace_id() {
        let ctx = RequestContext::new();
        let seen_later = ctx.clone();
        assert!(seen_later.trace_id().is_none());

        ctx.set_trace_id(TraceId::from_header("first").unwrap());
        ctx.set_trace_id(TraceId::from_header("second").unwrap());

        assert_eq!(seen_later.trace_id().unwrap().as_str(), "first");

        assert!(!seen_later.is_faulted());
        ctx.mark_faulted();
        assert!(seen_later.is_faulted());
    }
}
