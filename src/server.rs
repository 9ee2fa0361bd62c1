use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use lazy_static::lazy_static;
use serde::Serialize;
use tera::{Context, Tera};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::coordinator::ScanCoordinator;
use crate::error::{ScanError, ScanErrorKind};

/// Event name carried by every server-sent scan result.
pub const SCAN_RESULTS_EVENT: &str = "wifiScanResults";

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Template parsing error: {}", e);
                std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

pub struct ServerConfig {
    pub interface: String,
    pub port: u16,
}

struct AppState {
    config: ServerConfig,
    coordinator: Arc<ScanCoordinator>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

pub fn router(config: ServerConfig, coordinator: Arc<ScanCoordinator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/scan", get(scan_handler))
        .route("/events", get(events_handler))
        .layer(cors)
        .with_state(Arc::new(AppState {
            config,
            coordinator,
        }))
}

pub async fn run_server(config: ServerConfig, coordinator: Arc<ScanCoordinator>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting server at http://localhost:{}", config.port);
    info!("Scanning on interface: {}", config.interface);

    let app = router(config, coordinator);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut context = Context::new();
    context.insert("interface", &state.config.interface);
    context.insert("scan_url", "/scan");
    context.insert("events_url", "/events");
    context.insert("event_name", SCAN_RESULTS_EVENT);

    match TEMPLATES.render("index.html", &context) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template render error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

async fn scan_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.coordinator.scan().await {
        Ok(networks) => Json(networks).into_response(),
        Err(e) => {
            warn!(code = e.code(), "scan request failed: {}", e);
            error_response(&e)
        }
    }
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.coordinator.subscribe_results()).filter_map(|received| {
        // Lagged listeners skip missed batches rather than disconnecting.
        let networks = received.ok()?;
        match Event::default().event(SCAN_RESULTS_EVENT).json_data(&networks) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                error!("Failed to encode scan results event: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub(crate) fn status_for(kind: ScanErrorKind) -> StatusCode {
    match kind {
        ScanErrorKind::AlreadyInProgress => StatusCode::CONFLICT,
        ScanErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ScanErrorKind::RadioDisabled => StatusCode::SERVICE_UNAVAILABLE,
        ScanErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ScanErrorKind::RuntimeUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(error: &ScanError) -> Response {
    let body = ErrorBody {
        code: error.code(),
        message: error.to_string(),
    };
    (status_for(error.kind()), Json(body)).into_response()
}
