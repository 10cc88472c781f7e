//! WebSocket link to the remote speech service.
//!
//! Owns the channel lifecycle: connect and configuration handshake, frame
//! transmission, and inbound dispatch. Inbound messages are decoded once
//! into [`ServerEvent`]s at this boundary. A dropped connection is always
//! surfaced to the controller and never retried here; re-initiating a
//! session is the user's decision.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::Config;
use crate::error::SessionError;
use crate::protocol::{self, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum LinkCommand {
    /// One transport-encoded capture frame.
    Frame(String),
    /// Begin the close handshake with the service.
    Close,
}

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LiveLink {
    ws: WsStream,
    input_rate: u32,
    output_rate: u32,
    send_failure_limit: u32,
}

impl LiveLink {
    /// Open the channel and complete the setup handshake: audio responses,
    /// transcripts for both directions, and the instruction preset. The
    /// service must acknowledge the configuration before any audio flows.
    pub async fn connect(config: &Config, api_key: &str) -> Result<Self, SessionError> {
        let mut url = Url::parse(config.ws_url)
            .map_err(|e| SessionError::ConfigurationRejected(format!("bad endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("key", api_key);

        log::info!("connecting to {}", config.ws_url);
        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        let setup = protocol::setup_message(config.model, config.system_instruction)
            .map_err(|e| SessionError::ConfigurationRejected(e.to_string()))?;
        ws.send(Message::Text(setup.into()))
            .await
            .map_err(|e| SessionError::ChannelError(e.to_string()))?;

        match timeout(
            HANDSHAKE_TIMEOUT,
            await_setup_ack(&mut ws, config.playback_sample_rate),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SessionError::ConfigurationRejected(
                    "setup acknowledgement timed out".into(),
                ));
            }
        }
        log::info!("setup acknowledged");

        Ok(Self {
            ws,
            input_rate: config.capture_sample_rate,
            output_rate: config.playback_sample_rate,
            send_failure_limit: config.send_failure_limit,
        })
    }

    /// Drive the channel until it closes. Inbound events go to `event_tx`;
    /// capture frames and the close request arrive on `cmd_rx`.
    ///
    /// Frame transmission is fire-and-forget: one failed send is logged and
    /// the next frame proceeds, but `send_failure_limit` consecutive
    /// failures end the session with an error event.
    pub async fn run(self, event_tx: mpsc::Sender<ServerEvent>, mut cmd_rx: mpsc::Receiver<LinkCommand>) {
        let output_rate = self.output_rate;
        let (mut write, mut read) = self.ws.split();
        let mut consecutive_failures: u32 = 0;
        let mut cmds_done = false;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&event_tx, text.as_str(), output_rate).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // The service also delivers JSON in binary frames.
                        dispatch(&event_tx, &String::from_utf8_lossy(&data), output_rate).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("server closed the channel: {frame:?}");
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        break;
                    }
                },
                cmd = cmd_rx.recv(), if !cmds_done => match cmd {
                    Some(LinkCommand::Frame(data)) => {
                        let frame = protocol::audio_frame(self.input_rate, &data);
                        match write.send(Message::Text(frame.into())).await {
                            Ok(()) => consecutive_failures = 0,
                            Err(e) => {
                                consecutive_failures += 1;
                                log::warn!("frame send failed ({consecutive_failures}): {e}");
                                if consecutive_failures >= self.send_failure_limit {
                                    let _ = event_tx
                                        .send(ServerEvent::Error(format!(
                                            "{consecutive_failures} consecutive send failures: {e}"
                                        )))
                                        .await;
                                    break;
                                }
                            }
                        }
                    }
                    Some(LinkCommand::Close) => {
                        // Keep reading afterwards so the server's close
                        // acknowledgement still reaches the controller.
                        if let Err(e) = write.send(Message::Close(None)).await {
                            log::warn!("close request failed: {e}");
                            let _ = event_tx.send(ServerEvent::Closed).await;
                            break;
                        }
                        cmds_done = true;
                    }
                    None => {
                        // Controller dropped the connection; close and wait
                        // for the acknowledgement on the read side.
                        let _ = write.send(Message::Close(None)).await;
                        cmds_done = true;
                    }
                },
            }
        }
        log::debug!("link task finished");
    }
}

async fn dispatch(event_tx: &mpsc::Sender<ServerEvent>, raw: &str, output_rate: u32) {
    for event in protocol::parse_server_message(raw, output_rate) {
        if event_tx.send(event).await.is_err() {
            return;
        }
    }
}

/// Read until the service acknowledges the session configuration. A close
/// or an end-of-stream before the acknowledgement is a configuration
/// rejection.
async fn await_setup_ack(ws: &mut WsStream, output_rate: u32) -> Result<(), SessionError> {
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| SessionError::ChannelError(e.to_string()))?;
        let raw = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            Message::Close(frame) => {
                return Err(SessionError::ConfigurationRejected(format!(
                    "closed during setup: {frame:?}"
                )));
            }
            _ => continue,
        };
        for event in protocol::parse_server_message(&raw, output_rate) {
            if matches!(event, ServerEvent::SetupComplete) {
                return Ok(());
            }
        }
    }
    Err(SessionError::ConfigurationRejected(
        "connection ended during setup".into(),
    ))
}
