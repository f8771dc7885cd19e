//! Client side of the Gridlink protocol.
//!
//! [`SyncEngine`] keeps a local grid in step with the server. It is written
//! against the [`TransportChannel`], [`ReconnectTimer`] and [`RenderAdapter`]
//! contracts; [`ws`] wires those to tokio-tungstenite and tokio timers.

pub mod engine;
pub mod render;
pub mod transport;
pub mod ws;

pub use engine::{FrameOutcome, LocalToggle, SyncEngine, SyncState};
pub use render::{RenderAdapter, Shade, TextSurface};
pub use transport::{Generation, ReconnectTimer, TimerId, TransportChannel};
pub use ws::{Client, ClientHandle, ClientOptions};
