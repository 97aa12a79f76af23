//! HTTP request/response tracing middleware.

use tower_http::LatencyUnit;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// One `INFO` span per request (method, URI, version) and one `INFO` event
/// per response with status and latency in milliseconds.
///
/// ```text
/// INFO request{method=GET uri=/aZ3x9Qk1 version=HTTP/1.1}: finished processing request latency=2 ms status=307
/// ```
///
/// 5xx responses are additionally reported as failures at `ERROR`.
pub fn layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
}
