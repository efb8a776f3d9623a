//! Configuration model and shared value types

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

pub type Color = palette::rgb::LinSrgb<u8>;

/// Errors raised when loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    6742
}

fn default_client_name() -> String {
    "ledmux".to_owned()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_initial_delay_ms() -> u64 {
    5000
}

fn default_reconnect_interval_ms() -> u64 {
    10000
}

fn default_idle_color() -> Color {
    Color::new(0x26, 0x32, 0x38)
}

fn default_render_interval_ms() -> u64 {
    33
}

fn default_effect_duration_ms() -> u64 {
    3000
}

/// Settings for reaching the RGB controller server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(length(min = 1))]
    pub client_name: String,
    /// Upper bound on any single request/response round-trip
    #[validate(range(min = 100))]
    pub request_timeout_ms: u64,
    pub auto_connect: bool,
    pub auto_reconnect: bool,
    pub reconnect_initial_delay_ms: u64,
    #[validate(range(min = 100))]
    pub reconnect_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_name: default_client_name(),
            request_timeout_ms: default_request_timeout_ms(),
            auto_connect: default_true(),
            auto_reconnect: default_true(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

/// Settings for the effect compositor and its render loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct CompositorConfig {
    pub enabled: bool,
    /// Index of the device frames are rendered to
    pub device_index: u32,
    /// Color written to LEDs not claimed by any effect
    #[serde(
        serialize_with = "crate::serde::serialize_color_as_hex",
        deserialize_with = "crate::serde::deserialize_color_from_hex"
    )]
    pub idle_color: Color,
    #[validate(range(min = 10, max = 1000))]
    pub render_interval_ms: u64,
    /// Default lifetime for temporary effects
    #[validate(range(min = 1))]
    pub effect_duration_ms: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            device_index: 0,
            idle_color: default_idle_color(),
            render_interval_ms: default_render_interval_ms(),
            effect_duration_ms: default_effect_duration_ms(),
        }
    }
}

/// One mirrored device slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSlot {
    pub device_index: u32,
    #[serde(default = "String::new")]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Settings for mirroring frames to additional devices
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiDeviceConfig {
    pub enabled: bool,
    #[validate(nested)]
    pub devices: Vec<DeviceSlot>,
}

/// Full configuration for a ledmux instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub compositor: CompositorConfig,
    #[validate(nested)]
    pub multi_device: MultiDeviceConfig,
}

impl Config {
    pub async fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        use tokio::io::AsyncReadExt;

        let mut file = tokio::fs::File::open(path).await?;
        let mut full = String::new();
        file.read_to_string(&mut full).await?;

        let config: Config = toml::from_str(&full)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
