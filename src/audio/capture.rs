//! Microphone capture thread.
//!
//! Pulls fixed-size blocks from the capture device on the hardware cadence,
//! derives the running volume estimate for UI feedback, and hands encoded
//! frames to the session channel. Transmission is fire-and-forget: the
//! channel task owns failure accounting, and a full or closed channel never
//! stalls the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use super::alsa_device;
use super::codec;
use super::system::AudioSettings;
use crate::error::SessionError;
use crate::live_link::LinkCommand;

pub(super) fn capture_thread(
    settings: AudioSettings,
    frame_tx: mpsc::Sender<LinkCommand>,
    volume: Arc<AtomicU32>,
    ready_tx: oneshot::Sender<Result<(), SessionError>>,
    streaming: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    // Acquire the device and report readiness before the cadence starts; a
    // denied or missing microphone must abort connect before any channel
    // traffic.
    let (pcm, params) = match alsa_device::open_capture(
        &settings.capture_device,
        settings.capture_sample_rate,
        settings.block_frames,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(format!("{e:#}"))));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    if let Err(e) = run_capture(
        &pcm,
        params.period_size,
        settings.block_frames,
        frame_tx,
        &volume,
        &streaming,
        &running,
    ) {
        log::error!("capture thread error: {e}");
    }

    volume.store(0f32.to_bits(), Ordering::Relaxed);
    log::info!("capture stopped");
}

fn run_capture(
    pcm: &alsa::pcm::PCM,
    period_size: usize,
    block_frames: usize,
    frame_tx: mpsc::Sender<LinkCommand>,
    volume: &AtomicU32,
    streaming: &AtomicBool,
    running: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;

    let mut read_buf = vec![0i16; period_size];
    // The negotiated period rarely matches the block size exactly;
    // accumulate until a whole block is available.
    let mut accum: Vec<i16> = Vec::with_capacity(block_frames * 2);

    log::info!("capture started: period={period_size}, block={block_frames}");

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                accum.extend_from_slice(&read_buf[..frames]);

                while accum.len() >= block_frames {
                    // The float block is the canonical form: the volume
                    // estimate and the wire frame both derive from it.
                    let samples: Vec<f32> = accum[..block_frames]
                        .iter()
                        .map(|&s| s as f32 / codec::PCM16_SCALE)
                        .collect();
                    accum.drain(..block_frames);

                    volume.store(block_rms(&samples).to_bits(), Ordering::Relaxed);

                    // Blocks captured before the session reaches Connected
                    // feed the meter but are not transmitted.
                    if !streaming.load(Ordering::Relaxed) {
                        continue;
                    }

                    let frame = codec::to_transport(&codec::encode16(&samples));
                    if frame_tx.blocking_send(LinkCommand::Frame(frame)).is_err() {
                        log::warn!("frame channel closed, stopping capture");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("capture read error: {e}, recovering");
                if let Err(e2) = pcm.prepare() {
                    log::error!("failed to recover capture device: {e2}");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Root-mean-square of one block, clamped to [0, 1].
pub fn block_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum();
    (energy / samples.len() as f32).sqrt().min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(block_rms(&[0.0; 128]), 0.0);
        assert_eq!(block_rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_wave_is_one() {
        let wave: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((block_rms(&wave) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rms_tracks_amplitude() {
        let quiet: Vec<f32> = (0..128).map(|i| 0.1 * (i as f32 * 0.3).sin()).collect();
        let loud: Vec<f32> = quiet.iter().map(|s| s * 5.0).collect();
        assert!(block_rms(&loud) > block_rms(&quiet));
    }
}
