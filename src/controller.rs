//! Session controller: the connection state machine and event dispatch.
//!
//! The controller is the only writer of the session state. It wires the
//! audio system, the live link, the turn assembler and the volume loop
//! together for each connection, and funnels every exit path (explicit
//! disconnect, remote error, device failure) through one idempotent
//! teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

use crate::artifact::{ArtifactId, ArtifactStore};
use crate::audio::{AudioSettings, AudioSystem, PlaybackStatus};
use crate::config::Config;
use crate::error::SessionError;
use crate::live_link::{LinkCommand, LiveLink};
use crate::protocol::ServerEvent;
use crate::state_machine::SessionState;
use crate::turn::TurnAssembler;

/// Events consumed by the UI collaborator.
#[derive(Debug)]
pub enum UiEvent {
    Status(SessionState),
    Transcript { text: String, local: bool },
    AudioArtifact(ArtifactId),
    Error(String),
    Volume(f32),
    Speaking(bool),
}

#[derive(Debug)]
pub enum SessionCommand {
    Connect,
    Disconnect,
}

/// Everything that lives for exactly one connection. Taken out of the
/// controller exactly once by `teardown`, whichever path ends the session.
struct Connection {
    audio: AudioSystem,
    link_tx: mpsc::Sender<LinkCommand>,
    server_rx: mpsc::Receiver<ServerEvent>,
    status_rx: mpsc::Receiver<PlaybackStatus>,
    volume_stop: Arc<AtomicBool>,
    link_task: JoinHandle<()>,
}

enum ConnEvent {
    Server(ServerEvent),
    Playback(PlaybackStatus),
    /// A connection channel closed without a final event.
    Gone,
}

pub struct SessionController {
    config: Config,
    api_key: String,
    ui_tx: mpsc::Sender<UiEvent>,
    artifacts: Arc<ArtifactStore>,
    state: SessionState,
    assembler: TurnAssembler,
    conn: Option<Connection>,
}

impl SessionController {
    pub fn new(
        config: Config,
        api_key: String,
        ui_tx: mpsc::Sender<UiEvent>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        let assembler = TurnAssembler::new(config.playback_sample_rate);
        Self {
            config,
            api_key,
            ui_tx,
            artifacts,
            state: SessionState::Disconnected,
            assembler,
            conn: None,
        }
    }

    /// Drive the session until the command channel closes.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Connect) => self.handle_connect().await,
                    Some(SessionCommand::Disconnect) => self.handle_disconnect().await,
                    None => {
                        self.handle_disconnect().await;
                        break;
                    }
                },
                ev = Self::next_conn_event(&mut self.conn) => self.handle_conn_event(ev).await,
            }
        }
    }

    /// Wait for the next event from the live connection, or forever when
    /// there is none.
    async fn next_conn_event(conn: &mut Option<Connection>) -> ConnEvent {
        match conn.as_mut() {
            Some(c) => tokio::select! {
                ev = c.server_rx.recv() => ev.map(ConnEvent::Server).unwrap_or(ConnEvent::Gone),
                st = c.status_rx.recv() => st.map(ConnEvent::Playback).unwrap_or(ConnEvent::Gone),
            },
            None => std::future::pending().await,
        }
    }

    // ======================== lifecycle ========================

    async fn handle_connect(&mut self) {
        if self.state != SessionState::Disconnected {
            log::warn!("connect ignored in state {:?}", self.state);
            return;
        }
        self.set_state(SessionState::Connecting).await;

        match self.open_connection().await {
            Ok(conn) => {
                // Remote is ready: begin the capture cadence and dispatch.
                conn.audio.set_streaming(true);
                self.assembler.clear();
                self.conn = Some(conn);
                self.set_state(SessionState::Connected).await;
            }
            Err(e) => self.fail(e.to_string()).await,
        }
    }

    async fn open_connection(&mut self) -> Result<Connection, SessionError> {
        let (frame_tx, frame_rx) = mpsc::channel::<LinkCommand>(64);
        let (status_tx, status_rx) = mpsc::channel::<PlaybackStatus>(16);

        // Devices first: a denied microphone or speaker aborts the connect
        // before any channel is opened. The system is dropped (and the
        // devices released) if the channel handshake fails below.
        let audio =
            AudioSystem::start(AudioSettings::from(&self.config), frame_tx.clone(), status_tx)
                .await?;

        let link = LiveLink::connect(&self.config, &self.api_key).await?;

        let (event_tx, server_rx) = mpsc::channel::<ServerEvent>(64);
        let link_task = tokio::spawn(link.run(event_tx, frame_rx));

        // Volume loop at UI refresh rate, cancelled cooperatively.
        let volume_stop = Arc::new(AtomicBool::new(false));
        tokio::spawn(volume_loop(
            audio.volume_handle(),
            self.ui_tx.clone(),
            Duration::from_millis(self.config.volume_interval_ms),
            volume_stop.clone(),
        ));

        Ok(Connection {
            audio,
            link_tx: frame_tx,
            server_rx,
            status_rx,
            volume_stop,
            link_task,
        })
    }

    async fn handle_disconnect(&mut self) {
        if self.state != SessionState::Connected {
            if self.conn.is_some() || self.state != SessionState::Disconnected {
                log::warn!("disconnect in state {:?}, cleaning up", self.state);
                self.teardown();
                self.set_state(SessionState::Disconnected).await;
            }
            return;
        }

        self.set_state(SessionState::Closing).await;

        if let Some(conn) = self.conn.as_mut() {
            // Stop the capture cadence before closing the channel.
            conn.audio.set_streaming(false);
            let _ = conn.link_tx.send(LinkCommand::Close).await;

            // Await the close acknowledgement; frames still in flight are
            // discarded.
            let deadline = Duration::from_millis(self.config.close_timeout_ms);
            let acked = timeout(deadline, async {
                while let Some(ev) = conn.server_rx.recv().await {
                    if matches!(ev, ServerEvent::Closed | ServerEvent::Error(_)) {
                        break;
                    }
                }
            })
            .await;
            if acked.is_err() {
                log::warn!("close acknowledgement timed out");
            }
        }

        self.teardown();
        self.set_state(SessionState::Disconnected).await;
    }

    /// Terminal failure path: surface the error, clean up, return to
    /// Disconnected so the user can re-initiate.
    async fn fail(&mut self, message: String) {
        log::error!("session failed: {message}");
        self.set_state(SessionState::Failed).await;
        self.emit(UiEvent::Error(message)).await;
        self.teardown();
        self.set_state(SessionState::Disconnected).await;
    }

    /// Release every per-connection resource. Runs exactly once per
    /// connection no matter which path triggers it.
    fn teardown(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        conn.volume_stop.store(true, Ordering::Relaxed);
        conn.audio.stop();
        // Dropping `conn` drops the command sender; the link task then
        // closes the socket on its own and finishes.
        drop(conn.link_tx);
        conn.link_task.abort();
        self.assembler.clear();
    }

    // ======================== dispatch ========================

    async fn handle_conn_event(&mut self, ev: ConnEvent) {
        match ev {
            ConnEvent::Server(ev) => self.handle_server_event(ev).await,
            ConnEvent::Playback(status) => {
                self.emit(UiEvent::Speaking(status == PlaybackStatus::Speaking))
                    .await;
            }
            ConnEvent::Gone => {
                if matches!(
                    self.state,
                    SessionState::Connected | SessionState::Connecting
                ) {
                    self.fail("channel task ended unexpectedly".into()).await;
                }
            }
        }
    }

    async fn handle_server_event(&mut self, ev: ServerEvent) {
        match ev {
            // Consumed during the handshake; a late duplicate is harmless.
            ServerEvent::SetupComplete => {}

            ServerEvent::Audio(block) => {
                // Playback and assembly each receive every decoded block
                // exactly once.
                if let Some(conn) = &self.conn {
                    conn.audio.send_playback(block.clone());
                }
                self.assembler.push(block);
            }

            ServerEvent::Transcript { text, local } => {
                self.emit(UiEvent::Transcript { text, local }).await;
            }

            ServerEvent::TurnComplete => {
                if let Some(wav) = self.assembler.complete() {
                    let id = self.artifacts.insert(wav);
                    log::info!("turn artifact published: {id}");
                    self.emit(UiEvent::AudioArtifact(id)).await;
                }
            }

            ServerEvent::Closed => {
                if self.state != SessionState::Closing {
                    self.fail("server closed the connection".into()).await;
                }
            }

            ServerEvent::Error(message) => self.fail(message).await,
        }
    }

    // ======================== plumbing ========================

    async fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("session state: {} -> {}", self.state.as_str(), state.as_str());
        self.state = state;
        self.emit(UiEvent::Status(state)).await;
    }

    async fn emit(&self, event: UiEvent) {
        if self.ui_tx.send(event).await.is_err() {
            log::warn!("ui receiver dropped");
        }
    }
}

/// Samples the latest VolumeSample at UI refresh rate. The capture thread is
/// the only writer; this loop only observes the most recent value and exits
/// on the cooperative stop flag.
async fn volume_loop(
    volume: Arc<AtomicU32>,
    ui_tx: mpsc::Sender<UiEvent>,
    period: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(period);
    while !stop.load(Ordering::Relaxed) {
        ticker.tick().await;
        let level = f32::from_bits(volume.load(Ordering::Relaxed));
        if ui_tx.send(UiEvent::Volume(level)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::SampleBlock;

    fn test_controller() -> (SessionController, mpsc::Receiver<UiEvent>, Arc<ArtifactStore>) {
        let artifacts = Arc::new(ArtifactStore::new());
        let (ui_tx, ui_rx) = mpsc::channel(64);
        let controller = SessionController::new(
            Config::new().unwrap(),
            "test-key".into(),
            ui_tx,
            artifacts.clone(),
        );
        (controller, ui_rx, artifacts)
    }

    fn drain(ui_rx: &mut mpsc::Receiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = ui_rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn block(len: usize) -> SampleBlock {
        SampleBlock::new(vec![0.25; len], 24000)
    }

    #[tokio::test]
    async fn audio_and_transcripts_do_not_change_state() {
        let (mut controller, mut ui_rx, _) = test_controller();

        controller
            .handle_server_event(ServerEvent::Audio(block(1000)))
            .await;
        controller
            .handle_server_event(ServerEvent::Transcript {
                text: "hello".into(),
                local: false,
            })
            .await;

        assert_eq!(controller.state, SessionState::Disconnected);
        let events = drain(&mut ui_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], UiEvent::Transcript { local: false, .. }));
    }

    #[tokio::test]
    async fn turn_complete_publishes_one_artifact() {
        let (mut controller, mut ui_rx, artifacts) = test_controller();

        for len in [1000, 1000, 2000] {
            controller
                .handle_server_event(ServerEvent::Audio(block(len)))
                .await;
        }
        controller.handle_server_event(ServerEvent::TurnComplete).await;

        let events = drain(&mut ui_rx);
        let [UiEvent::AudioArtifact(id)] = events.as_slice() else {
            panic!("expected exactly one artifact event, got {events:?}");
        };
        let wav = artifacts.resolve(*id).unwrap();
        // 4000 samples of PCM16 behind the 44-byte header
        assert_eq!(wav.len(), 44 + 8000);
        assert!(controller.assembler.is_empty());
    }

    #[tokio::test]
    async fn empty_turn_publishes_nothing() {
        let (mut controller, mut ui_rx, artifacts) = test_controller();
        controller.handle_server_event(ServerEvent::TurnComplete).await;
        assert!(drain(&mut ui_rx).is_empty());
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn channel_error_fails_then_returns_to_disconnected() {
        let (mut controller, mut ui_rx, _) = test_controller();
        controller.state = SessionState::Connected;
        controller.assembler.push(block(500));

        controller
            .handle_server_event(ServerEvent::Error("remote fault".into()))
            .await;

        assert_eq!(controller.state, SessionState::Disconnected);
        assert!(controller.assembler.is_empty());
        let events = drain(&mut ui_rx);
        assert!(matches!(events[0], UiEvent::Status(SessionState::Failed)));
        assert!(matches!(&events[1], UiEvent::Error(m) if m == "remote fault"));
        assert!(
            matches!(events[2], UiEvent::Status(SessionState::Disconnected)),
            "cleanup must land back in Disconnected"
        );
    }

    #[tokio::test]
    async fn unexpected_close_is_a_failure() {
        let (mut controller, mut ui_rx, _) = test_controller();
        controller.state = SessionState::Connected;

        controller.handle_server_event(ServerEvent::Closed).await;

        assert_eq!(controller.state, SessionState::Disconnected);
        let events = drain(&mut ui_rx);
        assert!(matches!(events[0], UiEvent::Status(SessionState::Failed)));
    }

    #[tokio::test]
    async fn disconnect_always_lands_in_disconnected() {
        let (mut controller, mut ui_rx, _) = test_controller();
        controller.state = SessionState::Connected;
        controller.assembler.push(block(500));

        controller.handle_disconnect().await;

        assert_eq!(controller.state, SessionState::Disconnected);
        assert!(controller.assembler.is_empty());
        let events = drain(&mut ui_rx);
        assert!(matches!(events[0], UiEvent::Status(SessionState::Closing)));
        assert!(matches!(
            events.last(),
            Some(UiEvent::Status(SessionState::Disconnected))
        ));
    }

    #[tokio::test]
    async fn connect_is_ignored_outside_disconnected() {
        let (mut controller, mut ui_rx, _) = test_controller();
        controller.state = SessionState::Connected;
        controller.handle_connect().await;
        assert_eq!(controller.state, SessionState::Connected);
        assert!(drain(&mut ui_rx).is_empty());
    }
}
