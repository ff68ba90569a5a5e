//! Main axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET|POST /fetch`  - Normalized tar of `commit:tree` from a cached mirror
//! - `GET  /healthz`    - Health check
//! - `GET  /metrics`    - Prometheus metrics

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Form, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, Span, error, instrument, warn};

use crate::AppState;
use crate::archive::BodySender;
use crate::error::{FetchError, Outcome};
use crate::fetch::{FetchRequest, run_fetch};

/// Body chunks buffered between the export and the client.
const BODY_CHANNEL_DEPTH: usize = 16;

const TAR_CONTENT_TYPE: &str = "application/x-tar";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/fetch", get(handle_fetch).post(handle_fetch))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET|POST /fetch?repo=..&branch=..[&commit=..][&tree=..]&format=tar`
///
/// Parameters come from the query string for `GET` and from a
/// form-encoded body for `POST`.
///
/// The status line is held back until the pipeline has either produced its
/// first byte or finished.  Anything that fails before that gets a clean
/// error status; a failure after the body has started aborts the stream,
/// which is the only signal left at that point.
#[instrument(skip_all, fields(branch = %req.branch, commit = %req.commit))]
async fn handle_fetch(
    State(state): State<Arc<AppState>>,
    Form(req): Form<FetchRequest>,
) -> Response {
    let started = Instant::now();

    if let Err(e) = req.validate() {
        warn!(error = %e, "rejected fetch request");
        state
            .metrics
            .metrics
            .record_request(e.outcome(), started.elapsed());
        return e.into_response();
    }

    let (sink, mut rx) = BodySender::channel(BODY_CHANNEL_DEPTH);

    let pipeline = tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            let result = run_fetch(&state, &req, &sink).await;
            let outcome = match result {
                Ok(()) => Outcome::Ok,
                Err(e) => {
                    sink.abort(e.message()).await;
                    e.outcome()
                }
            };
            state
                .metrics
                .metrics
                .record_request(outcome, started.elapsed());
            result
        }
        .instrument(Span::current())
    });

    match rx.recv().await {
        Some(Ok(first)) => {
            let rest = ReceiverStream::new(rx);
            let body = Body::from_stream(tokio_stream::once(Ok(first)).chain(rest));
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, TAR_CONTENT_TYPE)],
                body,
            )
                .into_response()
        }
        // Finished before writing anything; the status is still ours.
        _ => match pipeline.await {
            Ok(Ok(())) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, TAR_CONTENT_TYPE)],
                Body::empty(),
            )
                .into_response(),
            Ok(Err(e)) => e.into_response(),
            Err(e) => {
                error!(error = %e, "fetch pipeline task failed");
                FetchError::Archive.into_response()
            }
        },
    }
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    crate::health::health_handler(&state).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the cache.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(buf) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            buf,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
