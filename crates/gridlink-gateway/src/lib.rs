//! WebSocket grid server.
//!
//! The gateway owns the authoritative grid. Subscribers receive a full
//! snapshot on join and after every change; their `setled` and `levelMap`
//! frames mutate the grid.

pub mod connection;
pub mod events;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
