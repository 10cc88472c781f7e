//! Speaker playback thread and scheduling cursor.
//!
//! Decoded blocks are scheduled back-to-back against the playback device's
//! own timeline: each block starts at `max(now, cursor)` and advances the
//! cursor by its duration, which plays blocks in receipt order with no
//! overlap and no gap while arrival keeps pace. Speaking status is derived
//! from the cursor, never pushed by the remote service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use alsa::pcm::PCM;
use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};

use super::alsa_device;
use super::codec::{self, SampleBlock};
use super::system::AudioSettings;
use crate::error::SessionError;

/// "Next available start time" on the playback device timeline, in seconds.
///
/// Monotonically non-decreasing for the lifetime of one connection; reset to
/// the device's current position when a connection starts.
#[derive(Debug)]
pub struct PlaybackCursor {
    next_start: f64,
}

impl PlaybackCursor {
    pub fn new(now: f64) -> Self {
        Self { next_start: now }
    }

    /// Schedule a block of `duration` seconds, returning its start time and
    /// advancing the cursor past it.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        self.next_start = start + duration;
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Whether the device has played everything scheduled so far.
    pub fn idle_at(&self, now: f64) -> bool {
        now >= self.next_start
    }
}

/// Derived playback state transitions reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Speaking,
    Idle,
}

/// How often the idle check runs while no blocks are arriving.
const IDLE_POLL: Duration = Duration::from_millis(50);

pub(super) fn playback_thread(
    settings: AudioSettings,
    block_rx: std_mpsc::Receiver<SampleBlock>,
    status_tx: mpsc::Sender<PlaybackStatus>,
    ready_tx: oneshot::Sender<Result<(), SessionError>>,
    running: Arc<AtomicBool>,
) {
    let (pcm, params) = match alsa_device::open_playback(
        &settings.playback_device,
        settings.playback_sample_rate,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(format!("{e:#}"))));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    if let Err(e) = run_playback(&pcm, params.sample_rate, block_rx, status_tx, &running) {
        log::error!("playback thread error: {e}");
    }
    log::info!("playback stopped");
}

fn run_playback(
    pcm: &PCM,
    rate: u32,
    block_rx: std_mpsc::Receiver<SampleBlock>,
    status_tx: mpsc::Sender<PlaybackStatus>,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut frames_written: u64 = 0;
    let mut cursor = PlaybackCursor::new(device_clock(pcm, rate, frames_written));
    let mut speaking = false;

    log::info!("playback started: rate={rate}");

    while running.load(Ordering::Relaxed) {
        match block_rx.recv_timeout(IDLE_POLL) {
            Ok(block) => {
                let now = device_clock(pcm, rate, frames_written);
                let start = cursor.schedule(now, block.duration_secs());
                log::trace!(
                    "block of {} samples: start={start:.3}, cursor={:.3}",
                    block.len(),
                    cursor.next_start(),
                );

                if !speaking {
                    speaking = true;
                    let _ = status_tx.blocking_send(PlaybackStatus::Speaking);
                }

                let pcm16: Vec<i16> = block.samples.iter().map(|&s| codec::quantize(s)).collect();
                frames_written += write_all(pcm, &io, &pcm16)? as u64;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                // Nothing pending; speaking ends once the device clock
                // reaches the cursor.
                if speaking && cursor.idle_at(device_clock(pcm, rate, frames_written)) {
                    speaking = false;
                    let _ = status_tx.blocking_send(PlaybackStatus::Idle);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

/// Position of the playback head on the device's own timeline, in seconds:
/// frames written minus frames still queued in the ring buffer. Immune to
/// wall-clock adjustments.
fn device_clock(pcm: &PCM, rate: u32, frames_written: u64) -> f64 {
    let queued = pcm.delay().unwrap_or(0).max(0) as u64;
    frames_written.saturating_sub(queued) as f64 / rate as f64
}

/// Write a whole block, recovering from underruns without losing frames.
fn write_all(pcm: &PCM, io: &alsa::pcm::IO<'_, i16>, pcm16: &[i16]) -> Result<usize> {
    let mut written = 0;
    while written < pcm16.len() {
        match io.writei(&pcm16[written..]) {
            Ok(n) => written += n,
            Err(e) => {
                log::warn!("playback write error: {e}, recovering");
                pcm.prepare().context("failed to recover playback device")?;
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paced_arrival_is_gap_free_and_ordered() {
        let mut cursor = PlaybackCursor::new(0.0);
        let (d_a, d_b, d_c) = (0.4, 0.3, 0.5);

        // Arrivals keep pace: each block shows up while its predecessor is
        // still playing.
        let start_a = cursor.schedule(0.0, d_a);
        let start_b = cursor.schedule(0.2, d_b);
        let start_c = cursor.schedule(0.6, d_c);

        assert!(start_a <= start_b && start_b <= start_c);
        // No overlap
        assert!(start_b >= start_a + d_a);
        assert!(start_c >= start_b + d_b);
        // No unintended gap
        assert_eq!(start_b, start_a + d_a);
        assert_eq!(start_c, start_b + d_b);
    }

    #[test]
    fn late_arrival_snaps_to_now() {
        let mut cursor = PlaybackCursor::new(0.0);
        cursor.schedule(0.0, 0.1);
        // The queue drained long ago; the next block starts immediately.
        let start = cursor.schedule(5.0, 0.2);
        assert_eq!(start, 5.0);
        assert_eq!(cursor.next_start(), 5.2);
    }

    #[test]
    fn cursor_never_regresses() {
        let mut cursor = PlaybackCursor::new(1.0);
        let mut last = cursor.next_start();
        for (now, dur) in [(0.5, 0.2), (3.0, 0.1), (2.0, 0.4), (3.05, 0.05)] {
            cursor.schedule(now, dur);
            assert!(cursor.next_start() >= last);
            last = cursor.next_start();
        }
    }

    #[test]
    fn idle_when_clock_reaches_cursor() {
        let mut cursor = PlaybackCursor::new(0.0);
        cursor.schedule(0.0, 1.0);
        assert!(!cursor.idle_at(0.5));
        assert!(cursor.idle_at(1.0));
        assert!(cursor.idle_at(1.5));
    }
}
