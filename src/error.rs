use thiserror::Error;

/// Session-level failures surfaced to the UI collaborator.
///
/// `MalformedFrame` is the only recoverable case: the offending frame is
/// dropped and the session continues. Everything else terminates the
/// connection through the controller's single cleanup path.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Capture or playback device denied or missing. Fatal to connect.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A single inbound frame failed to decode.
    #[error("malformed audio frame: {0}")]
    MalformedFrame(String),

    /// The remote channel failed or closed unexpectedly.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// The remote service rejected the connection parameters.
    #[error("connection configuration rejected: {0}")]
    ConfigurationRejected(String),
}
