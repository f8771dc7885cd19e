//! Fan-out of frames to every subscriber.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use gridlink_core::Command;

use crate::state::{GatewayState, Subscriber};

/// Publish `msg` to all subscribers, after waiting for the publish limiter.
///
/// Never blocks on a subscriber. One whose queue is full is kicked instead.
/// Returns how many subscribers got the message.
pub async fn publish(state: &GatewayState, msg: String) -> usize {
    state.publish_limiter.wait().await;
    let subscribers = state.subscribers.read().await;
    deliver(&subscribers, &msg)
}

/// Publish the current grid as `fromGridBuffer`.
///
/// The grid stays read-locked until delivery is done, so subscribers see
/// snapshots in the order the grid changed.
pub async fn broadcast_grid(state: &GatewayState) -> gridlink_core::Result<usize> {
    state.publish_limiter.wait().await;
    let grid = state.grid.read().await;
    let frame = Command::FromGridBuffer(grid.snapshot()).to_frame()?;
    let subscribers = state.subscribers.read().await;
    let sent = deliver(&subscribers, &frame);
    drop(subscribers);
    drop(grid);
    Ok(sent)
}

fn deliver(subscribers: &HashMap<String, Subscriber>, msg: &str) -> usize {
    let mut sent = 0;
    for sub in subscribers.values() {
        match sub.msgs.try_send(msg.to_string()) {
            Ok(()) => sent += 1,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %sub.conn_id, "Subscriber too slow, closing");
                sub.close_slow.cancel();
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
    debug!(sent, total = subscribers.len(), "Published frame");
    sent
}
