#[derive(Debug, Clone)]
pub struct Config {
    // Application identity baked in from config.toml
    pub app_name: &'static str,

    // Remote service endpoint and model preset
    pub ws_url: &'static str,
    pub model: &'static str,
    /// Name of the environment variable holding the API key. The key itself
    /// is never baked into the binary.
    pub api_key_env: &'static str,

    // Audio endpoints. Capture and playback run at different fixed rates:
    // the service expects 16 kHz input and answers with 24 kHz output.
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_block_frames: usize,

    // Session behavior
    pub system_instruction: &'static str,
    pub send_failure_limit: u32,
    pub close_timeout_ms: u64,
    pub volume_interval_ms: u64,
}

impl Config {
    /// All values are set at compile time from config.toml via build.rs.
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),

            ws_url: env!("WS_URL"),
            model: env!("MODEL_ID"),
            api_key_env: env!("API_KEY_ENV"),

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            capture_block_frames: env!("CAPTURE_BLOCK_FRAMES")
                .parse()
                .map_err(|_| "Failed to parse CAPTURE_BLOCK_FRAMES")?,

            system_instruction: env!("SYSTEM_INSTRUCTION"),
            send_failure_limit: env!("SEND_FAILURE_LIMIT")
                .parse()
                .map_err(|_| "Failed to parse SEND_FAILURE_LIMIT")?,
            close_timeout_ms: env!("CLOSE_TIMEOUT_MS")
                .parse()
                .map_err(|_| "Failed to parse CLOSE_TIMEOUT_MS")?,
            volume_interval_ms: env!("VOLUME_INTERVAL_MS")
                .parse()
                .map_err(|_| "Failed to parse VOLUME_INTERVAL_MS")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
