//! Request observability: trace ids and one log record per request.
//!
//! On entry the layer adopts the inbound `X-Trace-ID` or generates one, stores
//! it in the [`RequestContext`](crate::RequestContext) and runs the rest of
//! the chain inside a `request` span carrying it. The id is echoed back as a
//! response header.
//!
//! The summary record (`method`, `path`, `status`, `duration_ms`, `trace_id`,
//! `ip`) is written by a drop guard, so it is emitted on every exit path:
//!
//! - normal completion: `info`, with the final status;
//! - a panic caught by [`Recover`](super::Recover): `error`, status 500;
//! - the request future dropped mid-flight (client gone, write timeout):
//!   `warn`, no status.

use std::net::IpAddr;
use std::time::Instant;

use http::{HeaderName, HeaderValue, Method, StatusCode};
use tracing::{Instrument, error, info, info_span, warn};

use super::{Middleware, Next};
use crate::context::{RequestContext, TraceId};
use crate::handler::BoxFuture;
use crate::request::Request;

/// Inbound and outbound trace header (`X-Trace-ID`). Lookups are
/// case-insensitive.
pub const TRACE_HEADER: &str = "x-trace-id";

/// The observability layer. Register it after [`Recover`](super::Recover).
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn call<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let inbound = req.header(TRACE_HEADER).and_then(TraceId::from_header);
            let trace_id = req
                .context()
                .set_trace_id(inbound.unwrap_or_else(TraceId::generate))
                .clone();

            let mut summary = Summary {
                method: req.method().clone(),
                path: req.path().to_owned(),
                ip: req.client_ip(),
                trace_id: trace_id.clone(),
                context: req.context().clone(),
                start: Instant::now(),
                status: None,
            };

            let span = info_span!("request", trace_id = %trace_id);
            let mut response = next.run(req).instrument(span).await;

            if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
                response.headers_mut().insert(HeaderName::from_static(TRACE_HEADER), value);
            }
            summary.status = Some(response.status_code());
            response
        })
    }
}

/// Pending summary record; written when dropped.
struct Summary {
    method: Method,
    path: String,
    ip: IpAddr,
    trace_id: TraceId,
    context: RequestContext,
    start: Instant,
    status: Option<StatusCode>,
}

impl Drop for Summary {
    fn drop(&mut self) {
        let duration_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let faulted = std::thread::panicking() || self.context.is_faulted();

        match self.status {
            Some(status) => info!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                duration_ms,
                trace_id = %self.trace_id,
                ip = %self.ip,
                "HTTP request",
            ),
            None if faulted => error!(
                method = %self.method,
                path = %self.path,
                status = StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                duration_ms,
                trace_id = %self.trace_id,
                ip = %self.ip,
                "HTTP request",
            ),
            None => warn!(
                method = %self.method,
                path = %self.path,
                duration_ms,
                trace_id = %self.trace_id,
                ip = %self.ip,
                "HTTP request aborted before completion",
            ),
        }
    }
}
