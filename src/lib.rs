//! # platform-api
//!
//! Public HTTP gateway of the platform. Today it serves two routes, `/health`
//! and `/api/v1/status`, behind a request pipeline that every future route
//! inherits:
//!
//! - [`middleware::Recover`]: one recovery boundary per request. Panics and
//!   recorded failures become a JSON error envelope with a stable code.
//! - [`middleware::Trace`]: adopts or generates an `X-Trace-ID`, stamps it on
//!   every log line of the request and writes one summary record.
//!
//! Handlers report failure by returning `Err(AppError)` (or any error that
//! converts into a [`Failure`]). Unrecognized errors never reach the client;
//! they are logged with the trace id and answered with a generic 500.
//!
//! ```rust,no_run
//! use platform_api::{AppError, Config, Request, Response, Server};
//!
//! async fn widget(req: Request) -> Result<Response, AppError> {
//!     match req.param("id") {
//!         Some("1") => Ok(Response::text("one")),
//!         _ => Err(AppError::not_found("widget")),
//!     }
//! }
//!
//! # async fn run() -> Result<(), platform_api::Error> {
//! let config = Config::from_env()?;
//! let router = platform_api::app().get("/widgets/{id}", widget);
//! Server::bind(&config.server).await?.serve(router).await
//! # }
//! ```

mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod health;
pub mod middleware;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use context::{RequestContext, TraceId};
pub use error::{AppError, BoxError, Error, ErrorCode, ErrorResponse, Failure};
pub use handler::{BoxFuture, Handler};
pub use request::Request;
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::{GRACE_PERIOD, Server};

use middleware::{Recover, Trace};

/// The gateway's routes and middleware stack, ready to serve.
pub fn app() -> Router {
    Router::new()
        .get("/health", health::health)
        .get("/api/v1/status", health::status)
        .layer(Recover)
        .layer(Trace)
}
