//! Error mapper: turns an [`HttpError`] into a status and body, and logs it.

use std::error::Error as StdError;

use tracing::{error, warn};

use super::HttpError;
use crate::http::{Method, Response, StatusCode};

/// Maps `err` to the status and body the client will see.
///
/// The status is the error's declared one, or 500 when it carries none. The
/// body is empty unless the error has a structured payload, in which case the
/// payload is serialized as JSON.
pub fn map(err: &HttpError) -> (StatusCode, Vec<u8>) {
    let body = err
        .payload()
        .map(|payload| payload.to_string().into_bytes())
        .unwrap_or_default();
    (err.status(), body)
}

/// Logs `err` with the originating method and URL, then builds its response.
pub fn respond(err: &HttpError, method: &Method, url: &str) -> Response {
    let (status, body) = map(err);
    let trace = trace(err);

    if status.is_server_error() {
        error!(%method, url, status = status.as_u16(), kind = ?err.kind(), %trace, "request failed");
    } else {
        warn!(%method, url, status = status.as_u16(), kind = ?err.kind(), %trace, "request rejected");
    }

    let response = Response::new(status);
    if body.is_empty() {
        response
    } else {
        response
            .header("Content-Type", "application/json")
            .body_bytes(body)
    }
}

// Renders the error and each of its sources as `outer: cause: root cause`.
fn trace(err: &HttpError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
