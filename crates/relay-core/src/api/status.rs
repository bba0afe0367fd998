//! Status-page dispatch (§6): renders whichever configured [`StatusHandler`]
//! matches the requested path using a point-in-time [`StatusReport`]
//! snapshot of the registry.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::handlers::{ActiveHandlers, StatusReport};
use crate::relay::ServerRegistry;

/// Renders the status handler configured at `path`, or `None` if `path`
/// isn't a configured status endpoint.
#[must_use]
pub fn render(handlers: &ActiveHandlers, registry: &ServerRegistry, path: &str) -> Option<Response> {
    let handler = handlers.status_handler(path)?;
    let report = StatusReport::snapshot(registry);
    let body = handler.render(&report);
    Some(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, handler.content_type())],
            body,
        )
            .into_response(),
    )
}
