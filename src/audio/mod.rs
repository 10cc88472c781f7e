//! Audio capture, playback, codec and container layer.
//!
//! ALSA handles device I/O on dedicated threads; the frame codec and the WAV
//! container encoder are pure and shared by every consumer of sample data.

mod alsa_device;
mod capture;
mod playback;
mod system;

pub mod codec;
pub mod wav;

pub use playback::PlaybackStatus;
pub use system::{AudioSettings, AudioSystem};
