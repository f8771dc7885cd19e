//! WebSocket driver for the sync engine.
//!
//! Socket reader tasks and reconnect timers never touch the engine directly.
//! They push [`ClientEvent`]s into one queue, and [`Client::run`] applies them
//! in arrival order.

use std::collections::HashMap;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use gridlink_core::config::{Config, OutboundMode};
use gridlink_core::protocol::close_code;
use gridlink_core::{GridBuffer, GridlinkError, Result};

use crate::engine::SyncEngine;
use crate::render::RenderAdapter;
use crate::transport::{Generation, ReconnectTimer, TimerId, TransportChannel};

/// Everything the engine reacts to.
#[derive(Debug)]
pub enum ClientEvent {
    Opened(Generation),
    Frame(Generation, String),
    Closed(Generation, u16),
    ReconnectTimer(TimerId),
    Toggle { x: usize, y: usize },
    Reconnect,
    Shutdown,
}

/// Client settings resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub columns: usize,
    pub rows: usize,
    pub mode: OutboundMode,
    pub reconnect_delay: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        let (columns, rows) = config.grid_dimensions();
        Self {
            url: config.client_url(),
            columns,
            rows,
            mode: config.outbound_mode(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// One socket per generation, driven by a spawned task.
pub struct WsTransport {
    url: String,
    events: mpsc::UnboundedSender<ClientEvent>,
    outbound: Option<(Generation, mpsc::UnboundedSender<Message>)>,
}

impl WsTransport {
    pub fn new(url: String, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            url,
            events,
            outbound: None,
        }
    }

    fn outbound_for(&self, generation: Generation) -> Option<&mpsc::UnboundedSender<Message>> {
        self.outbound
            .as_ref()
            .filter(|(g, _)| *g == generation)
            .map(|(_, tx)| tx)
    }
}

impl TransportChannel for WsTransport {
    fn connect(&mut self, generation: Generation) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some((generation, tx));
        tokio::spawn(run_connection(
            self.url.clone(),
            generation,
            rx,
            self.events.clone(),
        ));
    }

    fn send(&mut self, generation: Generation, frame: String) -> Result<()> {
        let tx = self
            .outbound_for(generation)
            .ok_or(GridlinkError::TransportUnavailable)?;
        tx.send(Message::Text(frame.into()))
            .map_err(|_| GridlinkError::TransportUnavailable)
    }

    fn close(&mut self, generation: Generation, code: u16) {
        if let Some(tx) = self.outbound_for(generation) {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: String::from("client closing").into(),
            })));
            self.outbound = None;
        }
    }
}

async fn run_connection(
    url: String,
    generation: Generation,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(%generation, %url, %e, "WebSocket connect failed");
            let _ = events.send(ClientEvent::Closed(generation, close_code::ABNORMAL));
            return;
        }
    };
    if events.send(ClientEvent::Opened(generation)).is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let mut code = close_code::ABNORMAL;
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if events
                    .send(ClientEvent::Frame(generation, text.to_string()))
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                code = frame
                    .map(|f| u16::from(f.code))
                    .unwrap_or(close_code::NO_STATUS);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%generation, %e, "WebSocket read error");
                break;
            }
        }
    }

    writer.abort();
    let _ = events.send(ClientEvent::Closed(generation, code));
}

/// Reconnect timers as sleeping tasks.
pub struct TokioTimer {
    events: mpsc::UnboundedSender<ClientEvent>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            events,
            tasks: HashMap::new(),
        }
    }
}

impl ReconnectTimer for TokioTimer {
    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        self.tasks.retain(|_, task| !task.is_finished());
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::ReconnectTimer(timer));
        });
        self.tasks.insert(timer, task);
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(task) = self.tasks.remove(&timer) {
            task.abort();
        }
    }
}

/// Cloneable handle for feeding user intent into a running [`Client`].
#[derive(Clone)]
pub struct ClientHandle {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientHandle {
    pub fn toggle(&self, x: usize, y: usize) -> anyhow::Result<()> {
        self.send(ClientEvent::Toggle { x, y })
    }

    pub fn reconnect(&self) -> anyhow::Result<()> {
        self.send(ClientEvent::Reconnect)
    }

    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.send(ClientEvent::Shutdown)
    }

    fn send(&self, event: ClientEvent) -> anyhow::Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow::anyhow!("Client is no longer running"))
    }
}

/// A sync engine wired to a real WebSocket and tokio timers.
pub struct Client<R: RenderAdapter> {
    engine: SyncEngine<WsTransport, TokioTimer, R>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl<R: RenderAdapter> Client<R> {
    pub fn new(options: ClientOptions, renderer: R) -> Result<(Self, ClientHandle)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let grid = GridBuffer::new(options.columns, options.rows)?;
        let engine = SyncEngine::new(
            grid,
            options.mode,
            options.reconnect_delay,
            WsTransport::new(options.url, tx.clone()),
            TokioTimer::new(tx.clone()),
            renderer,
        );
        Ok((Self { engine, events: rx }, ClientHandle { events: tx }))
    }

    /// Connect and process events until [`ClientHandle::shutdown`].
    ///
    /// Returns the grid as it stood at shutdown.
    pub async fn run(mut self) -> GridBuffer {
        info!(mode = %self.engine.mode(), "Starting grid client");
        self.engine.connect();

        while let Some(event) = self.events.recv().await {
            match event {
                ClientEvent::Opened(generation) => self.engine.on_transport_opened(generation),
                ClientEvent::Frame(generation, text) => {
                    self.engine.on_frame(generation, &text);
                }
                ClientEvent::Closed(generation, code) => {
                    self.engine.on_transport_closed(generation, code)
                }
                ClientEvent::ReconnectTimer(timer) => self.engine.on_reconnect_timer(timer),
                ClientEvent::Toggle { x, y } => {
                    if let Err(e) = self.engine.on_local_toggle(x, y) {
                        warn!(%e, x, y, "Rejected toggle");
                    }
                }
                ClientEvent::Reconnect => {
                    self.engine.connect();
                }
                ClientEvent::Shutdown => {
                    self.engine.shutdown();
                    break;
                }
            }
        }

        info!("Grid client stopped");
        self.engine.grid().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        timer.schedule(TimerId(1), Duration::from_millis(20));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::ReconnectTimer(TimerId(1))));
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        timer.schedule(TimerId(1), Duration::from_millis(20));
        timer.cancel(TimerId(1));
        timer.schedule(TimerId(2), Duration::from_millis(60));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::ReconnectTimer(TimerId(2))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_abnormal_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = WsTransport::new(format!("ws://127.0.0.1:{port}/ws"), tx);
        transport.connect(Generation(1));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            ClientEvent::Closed(Generation(1), close_code::ABNORMAL)
        ));
        assert!(transport.send(Generation(2), "x".into()).is_err());
    }
}
