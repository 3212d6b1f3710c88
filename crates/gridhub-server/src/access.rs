//! Path-based access gate.
//!
//! Requests outside the open prefixes are redirected to `/login` instead of
//! being served. The gate runs before routing, so even unknown paths get the
//! redirect rather than a 404.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

/// Prefixes served without redirection.
const OPEN_PREFIXES: &[&str] = &["/api", "/artifacts", "/login", "/health", "/ws"];

/// Where gated requests are sent.
const LOGIN_PATH: &str = "/login";

fn is_open(path: &str) -> bool {
    OPEN_PREFIXES.iter().any(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Middleware: pass open paths through, redirect everything else to the
/// login page.
pub async fn gate(request: Request, next: Next) -> Response {
    if is_open(request.uri().path()) {
        next.run(request).await
    } else {
        Redirect::temporary(LOGIN_PATH).into_response()
    }
}
