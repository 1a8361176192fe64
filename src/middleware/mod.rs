//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A layer receives the request and a [`Next`]
//! continuation for the rest of the chain; it may act before delegating,
//! after, or both.
//!
//! Layers run in registration order: the first [`Router::layer`] call is the
//! outermost. The gateway registers exactly two, in this order:
//!
//! - [`Recover`]: recovery boundary and error envelope rendering. Must be
//!   first so that a panic in any later layer is still caught.
//! - [`Trace`]: trace-id assignment and one log record per request.
//!
//! [`Router::layer`]: crate::Router::layer

mod recover;
mod trace;

use std::sync::Arc;

pub use recover::Recover;
pub use trace::{TRACE_HEADER, Trace};

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// A layer in the request pipeline.
///
/// ```rust
/// use platform_api::{BoxFuture, Request};
/// use platform_api::middleware::{Middleware, Next};
///
/// struct Noop;
///
/// impl Middleware for Noop {
///     fn call<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a> {
///         Box::pin(async move { next.run(req).await })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a>;
}

/// The remainder of the chain: the layers not yet entered, then the router.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    layers: &'a [Arc<dyn Middleware>],
    router: &'a Router,
}

impl<'a> Next<'a> {
    pub(crate) fn new(layers: &'a [Arc<dyn Middleware>], router: &'a Router) -> Self {
        Self { layers, router }
    }

    /// Runs the rest of the chain to completion.
    pub async fn run(self, req: Request) -> Response {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.call(req, Next::new(rest, self.router)).await,
            None => self.router.dispatch(req).await,
        }
    }
}
