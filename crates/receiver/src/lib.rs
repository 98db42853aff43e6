use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::Router;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use privsweep_store::Store;
use prost::Message;
use tower_http::timeout::TimeoutLayer;

pub mod metrics;
pub mod parser;

/// Maximum accepted size for an OTLP request body (32 MiB).
const MAX_BODY_BYTES: usize = 32 << 20;

/// Whole-request deadline covering the slow-read, handling and write budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    store: Store,
}

/// Builds the OTLP/HTTP ingest router. Oversized bodies are rejected with 413
/// before decoding starts.
pub fn router(store: Store) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/traces", post(handle_traces))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(AppState { store })
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let request = match decode_request(&headers, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let records = parser::extract_records(&request.resource_spans);
    if records.is_empty() {
        return (StatusCode::OK, "");
    }

    if let Err(err) = state.store.batch_record_usage(&records).await {
        tracing::error!(error = %err, "failed to record privilege usage");
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }

    tracing::debug!(count = records.len(), "recorded privilege usage from spans");
    (StatusCode::OK, "")
}

/// Content-type dispatch: JSON for `application/json` and
/// `application/x-protobuf-json`, binary protobuf for everything else.
fn decode_request(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ExportTraceServiceRequest, (StatusCode, &'static str)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim())
        .unwrap_or("");

    if content_type == "application/json" || content_type == "application/x-protobuf-json" {
        serde_json::from_slice(body).map_err(|err| {
            tracing::debug!(error = %err, "failed to parse JSON trace request");
            (StatusCode::BAD_REQUEST, "invalid JSON body")
        })
    } else {
        ExportTraceServiceRequest::decode(body).map_err(|err| {
            tracing::debug!(error = %err, "failed to parse protobuf trace request");
            (StatusCode::BAD_REQUEST, "invalid protobuf body")
        })
    }
}
