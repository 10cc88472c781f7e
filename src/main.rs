mod artifact;
mod audio;
mod config;
mod controller;
mod error;
mod live_link;
mod protocol;
mod state_machine;
mod turn;

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;

use artifact::ArtifactStore;
use config::Config;
use controller::{SessionCommand, SessionController, UiEvent};
use state_machine::SessionState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().map_err(anyhow::Error::msg)?;

    // The API key is the one runtime secret; everything else is baked in
    // from config.toml.
    let api_key = std::env::var(config.api_key_env)
        .with_context(|| format!("{} is not set", config.api_key_env))?;

    let artifacts = Arc::new(ArtifactStore::new());

    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(8);
    let (ui_tx, mut ui_rx) = mpsc::channel::<UiEvent>(256);

    let controller = SessionController::new(config.clone(), api_key, ui_tx, artifacts.clone());
    tokio::spawn(controller.run(cmd_rx));

    cmd_tx.send(SessionCommand::Connect).await?;
    println!("{} started, press Ctrl+C to hang up", config.app_name);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                let _ = cmd_tx.send(SessionCommand::Disconnect).await;
            }

            ev = ui_rx.recv() => match ev {
                Some(UiEvent::Status(state)) => {
                    println!("[session] {}", state.as_str());
                    // Whether this was a hang-up or a failure, the session is
                    // over; re-initiating is the user's call.
                    if state == SessionState::Disconnected {
                        break;
                    }
                }
                Some(UiEvent::Transcript { text, local }) => {
                    let speaker = if local { "you" } else { "assistant" };
                    println!("[{speaker}] {text}");
                }
                Some(UiEvent::AudioArtifact(id)) => {
                    if let Some(bytes) = artifacts.resolve(id) {
                        let path = format!("turn-{id}.wav");
                        match std::fs::write(&path, &bytes[..]) {
                            Ok(()) => println!("[audio] saved {path}"),
                            Err(e) => log::error!("failed to save {path}: {e}"),
                        }
                    }
                }
                Some(UiEvent::Error(message)) => eprintln!("[error] {message}"),
                Some(UiEvent::Volume(level)) => log::trace!("mic level: {level:.3}"),
                Some(UiEvent::Speaking(speaking)) => log::debug!("assistant speaking: {speaking}"),
                None => break,
            },
        }
    }

    Ok(())
}
