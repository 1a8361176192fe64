//! Error interception.
//!
//! Every request gets exactly one well-formed response. This layer is the only
//! place where an internal failure becomes wire bytes:
//!
//! | Outcome of the rest of the chain | Response | Log |
//! |---|---|---|
//! | panic | `INTERNAL_ERROR` / 500 | `error`, with the panic payload |
//! | recorded [`AppError`] | its own code / status / message / details | `warn`; `Internal` also logs its cause at `error` |
//! | recorded error of any other type | `INTERNAL_ERROR` / 500, generic message | `error`, with the raw error text |
//! | nothing recorded | untouched | none |
//!
//! The panic boundary is a `catch_unwind` around the rest of the chain. It is
//! scoped to one request: the connection task and the process keep running.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::pin;

use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, StatusCode};
use tracing::{error, warn};

use super::trace::TRACE_HEADER;
use super::{Middleware, Next};
use crate::context::{RequestContext, TraceId};
use crate::error::{AppError, ErrorResponse, Failure};
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// The error-interception layer. Register it first.
#[derive(Clone, Copy, Debug, Default)]
pub struct Recover;

impl Middleware for Recover {
    fn call<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let context = req.context().clone();

            // Pinned in this scope: the chain, and any teardown it still owns,
            // is dropped only after the fault has been marked on the context.
            let mut chain = pin!(AssertUnwindSafe(next.run(req)).catch_unwind());
            let outcome = chain.as_mut().await;

            match outcome {
                Ok(response) => render(response, &context),
                Err(panic) => {
                    context.mark_faulted();
                    let trace_id = context.trace_id();
                    error!(
                        trace_id = trace_id.map(TraceId::as_str),
                        panic = panic_message(&*panic),
                        "panic recovered",
                    );
                    let envelope = ErrorResponse::unexpected(trace_id);
                    write_envelope(
                        Response::status(StatusCode::INTERNAL_SERVER_ERROR),
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &envelope,
                        trace_id,
                    )
                }
            }
        })
    }
}

/// Turns a recorded failure into the envelope. No failure, no change.
fn render(mut response: Response, context: &RequestContext) -> Response {
    let Some(failure) = response.take_failure() else {
        return response;
    };
    let trace_id = context.trace_id();
    let trace = trace_id.map(TraceId::as_str);

    let (status, envelope) = match failure {
        Failure::App(err) => {
            warn!(
                trace_id = trace,
                code = err.code().as_str(),
                client_message = %err,
                status_code = err.status().as_u16(),
                "application error",
            );
            if let AppError::Internal(cause) = &err {
                error!(trace_id = trace, cause = %cause, "internal error");
            }
            (err.status(), ErrorResponse::from_app_error(&err, trace_id))
        }
        Failure::Other(err) => {
            error!(trace_id = trace, error = %err, "unknown error");
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::unexpected(trace_id))
        }
    };

    write_envelope(response, status, &envelope, trace_id)
}

/// Replaces status and body; keeps headers already set downstream.
fn write_envelope(
    mut response: Response,
    status: StatusCode,
    envelope: &ErrorResponse,
    trace_id: Option<&TraceId>,
) -> Response {
    match serde_json::to_vec(envelope) {
        Ok(body) => {
            response.status = status;
            response.body = body.into();
        }
        Err(e) => {
            error!(error = %e, "failed to encode error envelope");
            response.status = StatusCode::INTERNAL_SERVER_ERROR;
            response.body = Default::default();
        }
    }
    response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(value) = trace_id.and_then(|id| HeaderValue::from_str(id.as_str()).ok()) {
        response.headers.insert(HeaderName::from_static(TRACE_HEADER), value);
    }
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
