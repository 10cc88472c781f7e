use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    audio: Audio,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    model: String,
    api_key_env: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    playback_sample_rate: u32,
    capture_block_frames: usize,
}

#[derive(Deserialize)]
struct Session {
    system_instruction: String,
    send_failure_limit: u32,
    close_timeout_ms: u64,
    volume_interval_ms: u64,
}

// Read config.toml at build time and bake the values into the binary as
// environment variables. The API key is the one value resolved at runtime.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=MODEL_ID={}", config.network.model);
    println!("cargo:rustc-env=API_KEY_ENV={}", config.network.api_key_env);

    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!(
        "cargo:rustc-env=CAPTURE_SAMPLE_RATE={}",
        config.audio.capture_sample_rate
    );
    println!(
        "cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}",
        config.audio.playback_sample_rate
    );
    println!(
        "cargo:rustc-env=CAPTURE_BLOCK_FRAMES={}",
        config.audio.capture_block_frames
    );

    println!(
        "cargo:rustc-env=SYSTEM_INSTRUCTION={}",
        config.session.system_instruction
    );
    println!(
        "cargo:rustc-env=SEND_FAILURE_LIMIT={}",
        config.session.send_failure_limit
    );
    println!(
        "cargo:rustc-env=CLOSE_TIMEOUT_MS={}",
        config.session.close_timeout_ms
    );
    println!(
        "cargo:rustc-env=VOLUME_INTERVAL_MS={}",
        config.session.volume_interval_ms
    );
}
