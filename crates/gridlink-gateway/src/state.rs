//! Gateway shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use gridlink_core::config::Config;
use gridlink_core::{Command, GridBuffer};

use crate::rate_limit::PublishLimiter;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    /// The authoritative grid.
    pub grid: RwLock<GridBuffer>,
    pub subscribers: RwLock<HashMap<String, Subscriber>>,
    pub publish_limiter: PublishLimiter,
    /// Cancelled once the server starts shutting down.
    pub shutdown: CancellationToken,
    pub grid_version: AtomicU64,
    pub started_at: DateTime<Utc>,
}

/// One WebSocket subscriber.
pub struct Subscriber {
    pub conn_id: String,
    /// Bounded queue drained by the connection's writer task.
    pub msgs: mpsc::Sender<String>,
    /// Cancelled when the subscriber falls behind; its writer then closes the socket.
    pub close_slow: CancellationToken,
}

impl GatewayState {
    pub fn new(config: Arc<Config>) -> gridlink_core::Result<Self> {
        let (columns, rows) = config.grid_dimensions();
        let publish = config.gateway().publish;

        Ok(Self {
            grid: RwLock::new(GridBuffer::new(columns, rows)?),
            subscribers: RwLock::new(HashMap::new()),
            publish_limiter: PublishLimiter::new(
                Duration::from_millis(publish.interval_ms),
                publish.burst,
            ),
            shutdown: CancellationToken::new(),
            grid_version: AtomicU64::new(0),
            started_at: Utc::now(),
            config,
        })
    }

    pub fn bump_grid_version(&self) -> u64 {
        self.grid_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current grid as a `fromGridBuffer` frame.
    pub async fn grid_frame(&self) -> gridlink_core::Result<String> {
        let snapshot = self.grid.read().await.snapshot();
        Command::FromGridBuffer(snapshot).to_frame()
    }
}
