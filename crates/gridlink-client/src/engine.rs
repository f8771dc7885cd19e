//! The grid sync state machine.
//!
//! [`SyncEngine`] is the only component that touches the client's grid or the
//! socket. Local toggles are applied and rendered at once, then reported to
//! the server. Inbound frames replace the grid. Unexpected closes schedule a
//! single fixed-delay reconnect.
//!
//! Events are expected one at a time from a single dispatcher, so nothing
//! here locks.

use std::time::Duration;

use tracing::{debug, info, warn};

use gridlink_core::config::OutboundMode;
use gridlink_core::protocol::{Command, close_code};
use gridlink_core::{GridBuffer, GridlinkError, Result};

use crate::render::RenderAdapter;
use crate::transport::{Generation, ReconnectTimer, TimerId, TransportChannel};

/// Where the engine is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Synced,
}

/// Lifecycle of a single connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
}

/// The engine's current connection. Replaced, never reused, on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub generation: Generation,
    pub state: ConnectionState,
}

/// What `on_frame` did with a frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// The grid was replaced and re-rendered.
    Applied,
    /// Valid but not for us: unknown tag, inbound `setled`, or a stale connection.
    Ignored,
    /// Rejected; the grid is unchanged.
    Dropped(GridlinkError),
}

/// Result of a local toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalToggle {
    pub level: u8,
    /// Whether a frame went out. False while not synced.
    pub sent: bool,
}

pub struct SyncEngine<T, S, R> {
    grid: GridBuffer,
    mode: OutboundMode,
    reconnect_delay: Duration,
    state: SyncState,
    connection: Option<Connection>,
    last_generation: u64,
    pending_reconnect: Option<TimerId>,
    last_timer: u64,
    shut_down: bool,
    transport: T,
    timer: S,
    renderer: R,
}

impl<T, S, R> SyncEngine<T, S, R>
where
    T: TransportChannel,
    S: ReconnectTimer,
    R: RenderAdapter,
{
    /// Build an engine around an all-off grid and paint the surface.
    pub fn new(
        grid: GridBuffer,
        mode: OutboundMode,
        reconnect_delay: Duration,
        transport: T,
        timer: S,
        mut renderer: R,
    ) -> Self {
        renderer.paint(grid.columns(), grid.rows());
        renderer.show();
        Self {
            grid,
            mode,
            reconnect_delay,
            state: SyncState::Disconnected,
            connection: None,
            last_generation: 0,
            pending_reconnect: None,
            last_timer: 0,
            shut_down: false,
            transport,
            timer,
            renderer,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn connection(&self) -> Option<Connection> {
        self.connection
    }

    pub fn mode(&self) -> OutboundMode {
        self.mode
    }

    pub fn grid(&self) -> &GridBuffer {
        &self.grid
    }

    pub fn pending_reconnect(&self) -> Option<TimerId> {
        self.pending_reconnect
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timer(&self) -> &S {
        &self.timer
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Open a fresh connection, replacing any current one.
    ///
    /// Cancels a pending reconnect so only one attempt is ever in flight.
    pub fn connect(&mut self) -> Generation {
        self.cancel_reconnect();
        if let Some(old) = self.connection.take() {
            debug!(generation = %old.generation, "Superseding connection");
            self.transport.close(old.generation, close_code::NORMAL);
        }
        self.shut_down = false;

        self.last_generation += 1;
        let generation = Generation(self.last_generation);
        self.connection = Some(Connection {
            generation,
            state: ConnectionState::Connecting,
        });
        self.state = SyncState::Connecting;
        info!(%generation, "Connecting");
        self.transport.connect(generation);
        generation
    }

    /// End the session. No reconnect happens after this.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.cancel_reconnect();
        if let Some(conn) = self.connection.as_mut() {
            conn.state = ConnectionState::Closing;
            self.transport.close(conn.generation, close_code::NORMAL);
        }
    }

    pub fn on_transport_opened(&mut self, generation: Generation) {
        let shut_down = self.shut_down;
        let Some(conn) = self.current_mut(generation) else {
            debug!(%generation, "Ignoring open from stale connection");
            return;
        };
        if shut_down || conn.state == ConnectionState::Closing {
            debug!(%generation, "Ignoring open for closing connection");
            return;
        }
        conn.state = ConnectionState::Open;
        self.state = SyncState::Synced;
        self.cancel_reconnect();
        info!(%generation, "Connection open, synced");
    }

    pub fn on_transport_closed(&mut self, generation: Generation, code: u16) {
        if self.current_mut(generation).is_none() {
            debug!(%generation, code, "Ignoring close from stale connection");
            return;
        }
        self.connection = None;
        self.state = SyncState::Disconnected;

        if self.shut_down || code == close_code::GOING_AWAY {
            info!(%generation, code, "Connection closed, not reconnecting");
            return;
        }

        let err = GridlinkError::ConnectionLost { code };
        self.last_timer += 1;
        let timer = TimerId(self.last_timer);
        self.pending_reconnect = Some(timer);
        self.timer.schedule(timer, self.reconnect_delay);
        warn!(
            %generation,
            %err,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect"
        );
    }

    pub fn on_reconnect_timer(&mut self, timer: TimerId) {
        if self.pending_reconnect != Some(timer) {
            debug!(timer = timer.0, "Ignoring cancelled reconnect timer");
            return;
        }
        self.pending_reconnect = None;
        self.connect();
    }

    /// Apply a user toggle locally, render, then report it to the server.
    pub fn on_local_toggle(&mut self, x: usize, y: usize) -> Result<LocalToggle> {
        let level = self.grid.toggle(x, y)?;
        self.render();

        let command = match self.mode {
            OutboundMode::SetLed => Command::SetLed { x, y },
            OutboundMode::FullState => Command::LevelMap(self.grid.snapshot()),
        };
        let sent = match self.send(&command) {
            Ok(()) => true,
            Err(e) => {
                debug!(%e, x, y, "Toggle kept locally, frame dropped");
                false
            }
        };
        Ok(LocalToggle { level, sent })
    }

    /// Handle one inbound text frame.
    pub fn on_frame(&mut self, generation: Generation, text: &str) -> FrameOutcome {
        if self.current_mut(generation).is_none() {
            debug!(%generation, "Ignoring frame from stale connection");
            return FrameOutcome::Ignored;
        }

        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(%e, "Dropping undecodable frame");
                return FrameOutcome::Dropped(e);
            }
        };

        match command {
            Command::FromGridBuffer(levels) | Command::LevelMap(levels) => {
                if let Err(e) = self.grid.replace(&levels) {
                    warn!(%e, "Dropping grid frame");
                    return FrameOutcome::Dropped(e);
                }
                self.render();
                FrameOutcome::Applied
            }
            Command::SetLed { .. } => {
                debug!("Ignoring inbound setled");
                FrameOutcome::Ignored
            }
            Command::Unknown(tag) => {
                debug!(%tag, "Ignoring unknown command");
                FrameOutcome::Ignored
            }
        }
    }

    /// Draw the current grid.
    pub fn render(&mut self) {
        let snapshot = self.grid.snapshot();
        self.renderer.render(&snapshot);
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let generation = match (self.state, self.connection) {
            (SyncState::Synced, Some(conn)) if conn.state == ConnectionState::Open => {
                conn.generation
            }
            _ => return Err(GridlinkError::TransportUnavailable),
        };
        let frame = command.to_frame()?;
        self.transport.send(generation, frame)
    }

    fn current_mut(&mut self, generation: Generation) -> Option<&mut Connection> {
        self.connection
            .as_mut()
            .filter(|conn| conn.generation == generation)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.pending_reconnect.take() {
            self.timer.cancel(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        connects: Vec<Generation>,
        sent: Vec<(Generation, String)>,
        closed: Vec<(Generation, u16)>,
    }

    impl TransportChannel for RecordingTransport {
        fn connect(&mut self, generation: Generation) {
            self.connects.push(generation);
        }

        fn send(&mut self, generation: Generation, frame: String) -> Result<()> {
            self.sent.push((generation, frame));
            Ok(())
        }

        fn close(&mut self, generation: Generation, code: u16) {
            self.closed.push((generation, code));
        }
    }

    #[derive(Default)]
    struct ManualTimer {
        scheduled: Vec<(TimerId, Duration)>,
        cancelled: Vec<TimerId>,
    }

    impl ReconnectTimer for ManualTimer {
        fn schedule(&mut self, timer: TimerId, delay: Duration) {
            self.scheduled.push((timer, delay));
        }

        fn cancel(&mut self, timer: TimerId) {
            self.cancelled.push(timer);
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        painted: Option<(usize, usize)>,
        frames: Vec<Vec<u8>>,
    }

    impl RenderAdapter for RecordingRenderer {
        fn paint(&mut self, columns: usize, rows: usize) {
            self.painted = Some((columns, rows));
        }

        fn render(&mut self, levels: &[u8]) {
            self.frames.push(levels.to_vec());
        }
    }

    type TestEngine = SyncEngine<RecordingTransport, ManualTimer, RecordingRenderer>;

    fn engine(mode: OutboundMode) -> TestEngine {
        SyncEngine::new(
            GridBuffer::new(16, 8).unwrap(),
            mode,
            Duration::from_millis(1000),
            RecordingTransport::default(),
            ManualTimer::default(),
            RecordingRenderer::default(),
        )
    }

    fn synced(mode: OutboundMode) -> (TestEngine, Generation) {
        let mut e = engine(mode);
        let generation = e.connect();
        e.on_transport_opened(generation);
        (e, generation)
    }

    fn level_frame(cmd: &str, levels: &[u8]) -> String {
        serde_json::json!({ "Cmd": cmd, "Data": levels }).to_string()
    }

    #[test]
    fn test_new_paints_without_rendering() {
        let e = engine(OutboundMode::FullState);
        assert_eq!(e.renderer().painted, Some((16, 8)));
        assert!(e.renderer().frames.is_empty());
        assert_eq!(e.state(), SyncState::Disconnected);
    }

    #[test]
    fn test_connect_then_open_syncs() {
        let mut e = engine(OutboundMode::FullState);
        let generation = e.connect();
        assert_eq!(e.state(), SyncState::Connecting);
        assert_eq!(e.transport().connects, vec![generation]);

        e.on_transport_opened(generation);
        assert_eq!(e.state(), SyncState::Synced);
        assert_eq!(e.connection().unwrap().state, ConnectionState::Open);
    }

    #[test]
    fn test_from_grid_buffer_all_zero_renders_once() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        let outcome = e.on_frame(generation, &level_frame("fromGridBuffer", &[0; 128]));
        assert!(matches!(outcome, FrameOutcome::Applied));
        assert!(e.grid().snapshot().iter().all(|&l| l == 0));
        assert_eq!(e.renderer().frames.len(), 1);
    }

    #[test]
    fn test_full_state_toggle_sends_level_map() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        let toggle = e.on_local_toggle(3, 2).unwrap();
        assert_eq!(toggle, LocalToggle { level: 15, sent: true });

        let (sent_generation, frame) = &e.transport().sent[0];
        assert_eq!(*sent_generation, generation);
        let command = Command::parse(frame).unwrap();
        let Command::LevelMap(levels) = command else {
            panic!("expected levelMap, got {command:?}");
        };
        assert_eq!(levels.len(), 128);
        for (i, level) in levels.iter().enumerate() {
            assert_eq!(*level, if i == 35 { 15 } else { 0 }, "index {i}");
        }
    }

    #[test]
    fn test_set_led_toggle_sends_delta() {
        let (mut e, _) = synced(OutboundMode::SetLed);
        e.on_local_toggle(3, 2).unwrap();
        e.on_local_toggle(0, 0).unwrap();
        let frames: Vec<&str> = e.transport().sent.iter().map(|(_, f)| f.as_str()).collect();
        assert_eq!(
            frames,
            vec![
                r#"{"Cmd":"setled","Data":[3,2]}"#,
                r#"{"Cmd":"setled","Data":[0,0]}"#,
            ]
        );
    }

    #[test]
    fn test_toggle_renders_before_any_ack() {
        let (mut e, _) = synced(OutboundMode::SetLed);
        e.on_local_toggle(1, 0).unwrap();
        assert_eq!(e.renderer().frames.len(), 1);
        assert_eq!(e.renderer().frames[0][1], 15);
    }

    #[test]
    fn test_toggle_while_disconnected_is_local_only() {
        let mut e = engine(OutboundMode::FullState);
        let toggle = e.on_local_toggle(2, 2).unwrap();
        assert_eq!(toggle, LocalToggle { level: 15, sent: false });
        assert_eq!(e.grid().level(2, 2).unwrap(), 15);
        assert_eq!(e.renderer().frames.len(), 1);
        assert!(e.transport().sent.is_empty());

        // Still connecting: nothing goes out either.
        e.connect();
        assert!(!e.on_local_toggle(2, 2).unwrap().sent);
        assert!(e.transport().sent.is_empty());
    }

    #[test]
    fn test_toggle_out_of_range_changes_nothing() {
        let (mut e, _) = synced(OutboundMode::FullState);
        let err = e.on_local_toggle(16, 0).unwrap_err();
        assert!(matches!(err, GridlinkError::OutOfRange { .. }));
        assert!(e.renderer().frames.is_empty());
        assert!(e.transport().sent.is_empty());
    }

    #[test]
    fn test_unknown_command_ignored_then_valid_frame_applies() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        let outcome = e.on_frame(generation, r#"{"Cmd":"unknownThing","Data":[]}"#);
        assert!(matches!(outcome, FrameOutcome::Ignored));
        assert!(e.renderer().frames.is_empty());

        let mut levels = vec![0u8; 128];
        levels[7] = 9;
        let outcome = e.on_frame(generation, &level_frame("levelMap", &levels));
        assert!(matches!(outcome, FrameOutcome::Applied));
        assert_eq!(e.grid().snapshot(), levels);
    }

    #[test]
    fn test_missing_cmd_dropped() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.on_local_toggle(0, 0).unwrap();
        let before = e.grid().snapshot();
        let outcome = e.on_frame(generation, r#"{"Data":[1,2,3]}"#);
        assert!(matches!(outcome, FrameOutcome::Dropped(GridlinkError::MalformedFrame(_))));
        assert_eq!(e.grid().snapshot(), before);

        let outcome = e.on_frame(generation, "{not json");
        assert!(matches!(outcome, FrameOutcome::Dropped(GridlinkError::MalformedFrame(_))));
    }

    #[test]
    fn test_length_mismatch_dropped() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        let outcome = e.on_frame(generation, &level_frame("fromGridBuffer", &[15; 127]));
        assert!(matches!(
            outcome,
            FrameOutcome::Dropped(GridlinkError::LengthMismatch { expected: 128, actual: 127 })
        ));
        assert!(e.grid().snapshot().iter().all(|&l| l == 0));
        assert!(e.renderer().frames.is_empty());
    }

    #[test]
    fn test_level_above_fifteen_dropped() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        let mut levels = vec![0u8; 128];
        levels[3] = 16;
        let outcome = e.on_frame(generation, &level_frame("levelMap", &levels));
        assert!(matches!(
            outcome,
            FrameOutcome::Dropped(GridlinkError::LevelOutOfRange { index: 3, level: 16 })
        ));
    }

    #[test]
    fn test_inbound_setled_ignored() {
        let (mut e, generation) = synced(OutboundMode::SetLed);
        let outcome = e.on_frame(generation, r#"{"Cmd":"setled","Data":[1,1]}"#);
        assert!(matches!(outcome, FrameOutcome::Ignored));
        assert_eq!(e.grid().level(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_abnormal_close_schedules_reconnect() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.on_transport_closed(generation, close_code::ABNORMAL);
        assert_eq!(e.state(), SyncState::Disconnected);
        assert!(e.connection().is_none());

        let timer = e.pending_reconnect().expect("reconnect scheduled");
        assert_eq!(e.timer().scheduled, vec![(timer, Duration::from_millis(1000))]);

        e.on_reconnect_timer(timer);
        assert_eq!(e.transport().connects.len(), 2);
        assert_eq!(e.state(), SyncState::Connecting);
        assert!(e.pending_reconnect().is_none());
    }

    #[test]
    fn test_manual_reconnect_cancels_pending_timer() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.on_transport_closed(generation, 1006);
        let timer = e.pending_reconnect().unwrap();

        e.connect();
        assert_eq!(e.timer().cancelled, vec![timer]);
        assert!(e.pending_reconnect().is_none());

        // The cancelled timer firing late must not open a second connection.
        e.on_reconnect_timer(timer);
        assert_eq!(e.transport().connects.len(), 2);
    }

    #[test]
    fn test_going_away_does_not_reconnect() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.on_transport_closed(generation, close_code::GOING_AWAY);
        assert_eq!(e.state(), SyncState::Disconnected);
        assert!(e.pending_reconnect().is_none());
        assert!(e.timer().scheduled.is_empty());
    }

    #[test]
    fn test_shutdown_closes_without_reconnect() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.shutdown();
        assert_eq!(e.transport().closed, vec![(generation, close_code::NORMAL)]);
        e.on_transport_closed(generation, close_code::NORMAL);
        assert!(e.timer().scheduled.is_empty());
    }

    #[test]
    fn test_open_after_shutdown_stays_unsynced() {
        let mut e = engine(OutboundMode::FullState);
        let generation = e.connect();
        e.shutdown();

        e.on_transport_opened(generation);
        assert_ne!(e.state(), SyncState::Synced);
        assert_eq!(e.connection().unwrap().state, ConnectionState::Closing);

        let toggle = e.on_local_toggle(0, 0).unwrap();
        assert!(!toggle.sent);
        assert!(e.transport().sent.is_empty());
    }

    #[test]
    fn test_stale_events_ignored() {
        let (mut e, old) = synced(OutboundMode::FullState);
        let new = e.connect();
        assert_ne!(old, new);
        assert_eq!(e.transport().closed, vec![(old, close_code::NORMAL)]);

        let outcome = e.on_frame(old, &level_frame("fromGridBuffer", &[15; 128]));
        assert!(matches!(outcome, FrameOutcome::Ignored));
        assert!(e.grid().snapshot().iter().all(|&l| l == 0));

        e.on_transport_opened(old);
        assert_eq!(e.state(), SyncState::Connecting);

        e.on_transport_closed(old, close_code::ABNORMAL);
        assert!(e.pending_reconnect().is_none());
        assert_eq!(e.connection().unwrap().generation, new);
    }

    #[test]
    fn test_open_clears_pending_timer() {
        let (mut e, generation) = synced(OutboundMode::FullState);
        e.on_transport_closed(generation, close_code::ABNORMAL);
        let timer = e.pending_reconnect().unwrap();
        e.on_reconnect_timer(timer);
        let next = e.connection().unwrap().generation;
        e.on_transport_opened(next);
        assert_eq!(e.state(), SyncState::Synced);
        assert!(e.pending_reconnect().is_none());
    }
}
