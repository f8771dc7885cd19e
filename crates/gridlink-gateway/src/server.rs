//! Axum-based grid server.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use gridlink_core::{Command, GridlinkError};

use crate::connection::handle_ws_connection;
use crate::events::{broadcast_grid, publish};
use crate::state::GatewayState;

/// Build the gateway router.
///
/// `/ws` and `/subscribe` upgrade to a subscriber socket. When a static
/// directory is configured it serves every path the gateway does not claim.
pub fn router(state: Arc<GatewayState>) -> Router {
    let gateway = state.config.gateway();

    let http = Router::new()
        .route("/health", get(health_handler))
        .route("/grid", get(grid_handler))
        .route("/publish", post(publish_handler))
        .route("/ledmap", post(ledmap_handler))
        .layer(DefaultBodyLimit::max(gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(gateway.request_timeout_secs),
        ));

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/subscribe", get(ws_handler))
        .merge(http);

    if let Some(dir) = gateway.static_dir.as_deref() {
        info!(dir, "Serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Bind the configured address and serve until shutdown.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.bind_addr());
    let listener = TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    serve(listener, state).await
}

/// Serve on an already bound listener.
///
/// Returns after Ctrl-C or once `state.shutdown` is cancelled. Subscribers
/// are closed with 1001 so their clients do not reconnect.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let subscribers = state.subscribers.read().await.len();
    let (columns, rows) = {
        let grid = state.grid.read().await;
        (grid.columns(), grid.rows())
    };
    let uptime = chrono::Utc::now() - state.started_at;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": subscribers,
        "columns": columns,
        "rows": rows,
        "grid_version": state.grid_version.load(std::sync::atomic::Ordering::SeqCst),
        "uptime_secs": uptime.num_seconds(),
    }))
}

async fn grid_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.grid_frame().await {
        Ok(frame) => ([(header::CONTENT_TYPE, "application/json")], frame).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn publish_handler(State(state): State<Arc<GatewayState>>, body: String) -> Response {
    let delivered = publish(&state, body).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "delivered": delivered })),
    )
        .into_response()
}

/// Empty body randomizes the grid; otherwise the body must carry levels.
async fn ledmap_handler(State(state): State<Arc<GatewayState>>, body: String) -> Response {
    let result = if body.trim().is_empty() {
        let mut grid = state.grid.write().await;
        grid.randomize(&mut rand::rng());
        Ok(())
    } else {
        match Command::parse(&body) {
            Ok(Command::LevelMap(levels) | Command::FromGridBuffer(levels)) => {
                state.grid.write().await.replace(&levels)
            }
            Ok(other) => Err(GridlinkError::MalformedFrame(format!(
                "expected levelMap, got {}",
                other.tag()
            ))),
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        warn!(%e, "Rejected ledmap");
        return error_response(StatusCode::BAD_REQUEST, &e);
    }

    let version = state.bump_grid_version();
    let delivered = match broadcast_grid(&state).await {
        Ok(n) => n,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    };

    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "version": version, "delivered": delivered })),
    )
        .into_response()
}

fn error_response(status: StatusCode, e: &GridlinkError) -> Response {
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received"),
        _ = token.cancelled() => info!("Shutdown requested"),
    }
    token.cancel();
}
