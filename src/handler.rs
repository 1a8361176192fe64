//! Route handlers.
//!
//! A handler is any `async fn(Request) -> impl IntoResponse`. The router keeps
//! them as `Arc<dyn Handler>`, one tree per method; at request time one
//! virtual call produces a boxed future that already ends in a [`Response`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future resolving to a [`Response`].
///
/// Handlers produce `BoxFuture<'static>`; middleware borrows the rest of the
/// chain and produces `BoxFuture<'a>`.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Implemented for every function usable as a route.
///
/// Returning `Result<T, AppError>` (or any `Result<T, E>` with
/// `E: Into<Failure>`) lets a handler report failure with `?`; the error
/// layer renders it.
///
/// [`AppError`]: crate::AppError
/// [`Failure`]: crate::Failure
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture<'static>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn call(&self, req: Request) -> BoxFuture<'static> {
        let fut = self(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// A handler as stored in the routing tree.
pub(crate) type Route = Arc<dyn Handler>;

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};

    use super::*;
    use crate::AppError;

    async fn plain(_req: Request) -> &'static str {
        "plain"
    }

    async fn failing(_req: Request) -> Result<Response, AppError> {
        Err(AppError::unauthorized("token expired"))
    }

    #[tokio::test]
    async fn erased_handlers_produce_responses() {
        let plain: Route = Arc::new(plain);
        let failing: Route = Arc::new(failing);

        let ok = plain.call(Request::test(Method::GET, "/")).await;
        assert_eq!(ok.body(), b"plain");

        let err = failing.call(Request::test(Method::GET, "/")).await;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.recorded_failure().is_some());
    }
}
