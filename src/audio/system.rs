//! Supervisor for the capture and playback threads.
//!
//! Real-time audio I/O runs on dedicated OS threads (not tokio tasks) so the
//! device cadence never contends with async network work. Both threads check
//! one cancellation flag per iteration and are never preempted mid-block;
//! `stop` is idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};

use super::capture;
use super::codec::SampleBlock;
use super::playback::{self, PlaybackStatus};
use crate::config::Config;
use crate::error::SessionError;
use crate::live_link::LinkCommand;

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub capture_device: String,
    pub playback_device: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub block_frames: usize,
}

impl From<&Config> for AudioSettings {
    fn from(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.to_string(),
            playback_device: config.playback_device.to_string(),
            capture_sample_rate: config.capture_sample_rate,
            playback_sample_rate: config.playback_sample_rate,
            block_frames: config.capture_block_frames,
        }
    }
}

/// Owns both audio threads for the lifetime of one connection.
///
/// - Capture thread: device reads → volume estimate → frame codec → channel
/// - Playback thread: decoded blocks → cursor scheduling → device writes
pub struct AudioSystem {
    running: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    play_tx: Option<std_mpsc::Sender<SampleBlock>>,
    capture_handle: Option<JoinHandle<()>>,
    play_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Acquire both devices and start the audio threads.
    ///
    /// Returns once both devices have reported readiness; either failure
    /// tears the other endpoint down and fails the connect with
    /// `DeviceUnavailable`. Capture blocks are not transmitted until
    /// [`set_streaming`](Self::set_streaming) enables the cadence.
    pub async fn start(
        settings: AudioSettings,
        frame_tx: mpsc::Sender<LinkCommand>,
        status_tx: mpsc::Sender<PlaybackStatus>,
    ) -> Result<Self, SessionError> {
        let running = Arc::new(AtomicBool::new(true));
        let streaming = Arc::new(AtomicBool::new(false));
        let volume = Arc::new(AtomicU32::new(0));
        let (capture_ready_tx, capture_ready_rx) = oneshot::channel();
        let (play_ready_tx, play_ready_rx) = oneshot::channel();
        let (play_tx, play_rx) = std_mpsc::channel();

        let capture_handle = {
            let settings = settings.clone();
            let running = running.clone();
            let streaming = streaming.clone();
            let volume = volume.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    capture::capture_thread(
                        settings,
                        frame_tx,
                        volume,
                        capture_ready_tx,
                        streaming,
                        running,
                    )
                })
                .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?
        };

        let mut system = Self {
            running: running.clone(),
            streaming,
            volume,
            play_tx: Some(play_tx),
            capture_handle: Some(capture_handle),
            play_handle: None,
        };

        let play_handle = {
            let settings = settings.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    playback::playback_thread(settings, play_rx, status_tx, play_ready_tx, running)
                })
        };
        match play_handle {
            Ok(h) => system.play_handle = Some(h),
            Err(e) => {
                system.stop();
                return Err(SessionError::DeviceUnavailable(e.to_string()));
            }
        }

        let capture_ready = ready(capture_ready_rx.await);
        let play_ready = ready(play_ready_rx.await);
        if let Err(e) = capture_ready.and(play_ready) {
            system.stop();
            return Err(e);
        }
        Ok(system)
    }

    /// Enable or disable frame transmission. The capture thread keeps the
    /// device drained and the volume estimate live either way.
    pub fn set_streaming(&self, on: bool) {
        self.streaming.store(on, Ordering::Relaxed);
    }

    /// Hand a decoded block to the playback scheduler.
    pub fn send_playback(&self, block: SampleBlock) {
        if let Some(tx) = &self.play_tx
            && tx.send(block).is_err()
        {
            log::warn!("playback thread gone, dropping block");
        }
    }

    /// Shared cell holding the latest capture-block volume estimate.
    pub fn volume_handle(&self) -> Arc<AtomicU32> {
        self.volume.clone()
    }

    /// Signal both threads to stop and wait for them to release the devices.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        // Dropping the sender lets the playback thread exit even if it is
        // blocked waiting for a block.
        self.play_tx.take();
        if let Some(h) = self.capture_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.play_handle.take() {
            let _ = h.join();
        }
        self.volume.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ready(
    result: Result<Result<(), SessionError>, oneshot::error::RecvError>,
) -> Result<(), SessionError> {
    result.unwrap_or_else(|_| {
        Err(SessionError::DeviceUnavailable(
            "audio thread exited before reporting readiness".into(),
        ))
    })
}
