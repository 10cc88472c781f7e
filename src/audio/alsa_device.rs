//! ALSA PCM wrappers for the capture and playback endpoints.
//!
//! Both endpoints open mono S16LE; the float blocks used everywhere else in
//! the crate are converted at the codec boundary. Echo cancellation and gain
//! normalization are requested from the device layer by pointing the
//! configured device name at a processed PCM (e.g. a PulseAudio or PipeWire
//! echo-cancel source); raw hardware devices deliver the stream as-is.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

const CHANNELS: u32 = 1;

/// Parameters negotiated with the hardware.
#[derive(Debug, Clone, Copy)]
pub struct PcmParams {
    pub sample_rate: u32,
    pub period_size: usize,
}

/// Open the capture device. The period is requested near the session block
/// size so one hardware read roughly matches one transmitted frame.
pub fn open_capture(device: &str, sample_rate: u32, period_size: usize) -> Result<(PCM, PcmParams)> {
    open(device, Direction::Capture, sample_rate, Some(period_size))
}

/// Open the playback device with the device's preferred period.
pub fn open_playback(device: &str, sample_rate: u32) -> Result<(PCM, PcmParams)> {
    open(device, Direction::Playback, sample_rate, None)
}

fn open(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: Option<usize>,
) -> Result<(PCM, PcmParams)> {
    let label = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };

    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("failed to open {label} device '{device}'"))?;

    {
        let hwp = HwParams::any(&pcm)
            .with_context(|| format!("failed to initialize {label} HwParams"))?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(CHANNELS)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        PcmParams {
            sample_rate: hwp.get_rate()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if params.sample_rate != sample_rate {
        // The session rates are fixed by the service contract; "default"
        // routes through the plug layer and always honors them, but a raw
        // hw:N device may not.
        log::warn!(
            "{label} rate negotiated to {} (requested {sample_rate})",
            params.sample_rate
        );
    }

    log::info!(
        "ALSA {label}: device={device}, rate={}, period={}",
        params.sample_rate,
        params.period_size,
    );

    Ok((pcm, params))
}
