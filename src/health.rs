//! Service-level handlers: liveness and identity.
//!
//! | Path | Body |
//! |---|---|
//! | `GET /health` | `{"service","status":"healthy","timestamp","version"}` |
//! | `GET /api/v1/status` | `{"service","version"}` |
//!
//! Neither consults a dependency. If the process can answer, it is healthy.

use serde::Serialize;

use crate::request::Request;
use crate::response::Json;

pub const SERVICE: &str = "platform-api";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct Health {
    pub service: &'static str,
    pub status: &'static str,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub service: &'static str,
    pub version: &'static str,
}

/// Liveness probe. Always `200 healthy`.
pub async fn health(_req: Request) -> Json<Health> {
    Json(Health {
        service: SERVICE,
        status: "healthy",
        timestamp: jiff::Timestamp::now().to_string(),
        version: VERSION,
    })
}

pub async fn status(_req: Request) -> Json<Status> {
    Json(Status { service: SERVICE, version: VERSION })
}
