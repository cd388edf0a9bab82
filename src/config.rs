//! Runtime configuration (spec §6.2, SPEC_FULL.md §A.3): a TOML file
//! overlaid by a small set of CLI flags, grounded on the pack's
//! `clap`-derive CLI idiom (`mmogr-gglib`, `SleepingPills-bushhammer`).

use crate::video::ascii::{ColorMode, LuminanceWeights};
use crate::video::resize::ResizeMode;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_addrs: Vec<IpAddr>,
    pub tcp_port: u16,
    pub ws_port: u16,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub identity_key: Option<PathBuf>,
    pub client_whitelist: Option<PathBuf>,
    pub password: Option<String>,
    pub target_fps: u32,
    pub max_clients: usize,
    pub palette: String,
    pub color_mode: ColorModeConfig,
    pub audio_enabled: bool,
    pub compression_level: i32,

    pub grid_resize_mode: ResizeModeConfig,
    pub luminance_weights: (f32, f32, f32),
    pub compression_ratio_threshold: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColorModeConfig {
    None,
    Foreground,
    HalfBlock,
}

impl From<ColorModeConfig> for ColorMode {
    fn from(value: ColorModeConfig) -> Self {
        match value {
            ColorModeConfig::None => ColorMode::None,
            ColorModeConfig::Foreground => ColorMode::Foreground,
            ColorModeConfig::HalfBlock => ColorMode::HalfBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeModeConfig {
    Nearest,
    Bilinear,
}

impl From<ResizeModeConfig> for ResizeMode {
    fn from(value: ResizeModeConfig) -> Self {
        match value {
            ResizeModeConfig::Nearest => ResizeMode::Nearest,
            ResizeModeConfig::Bilinear => ResizeMode::Bilinear,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addrs: vec!["0.0.0.0".parse().unwrap()],
            tcp_port: 9696,
            ws_port: 9697,
            tls_cert: None,
            tls_key: None,
            identity_key: None,
            client_whitelist: None,
            password: None,
            target_fps: 15,
            max_clients: 32,
            palette: " .:-=+*#%@".to_string(),
            color_mode: ColorModeConfig::Foreground,
            audio_enabled: true,
            compression_level: 3,
            grid_resize_mode: ResizeModeConfig::Nearest,
            luminance_weights: {
                let w = LuminanceWeights::default();
                (w.r, w.g, w.b)
            },
            compression_ratio_threshold: 0.20,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_clients must be <= 4096, got {0}")]
    MaxClientsTooLarge(usize),
    #[error("target_fps must be in 15..=30, got {0}")]
    TargetFpsOutOfRange(u32),
    #[error("palette length must be in 10..=256, got {0}")]
    PaletteLengthOutOfRange(usize),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients > 4096 {
            return Err(ConfigError::MaxClientsTooLarge(self.max_clients));
        }
        if !(15..=30).contains(&self.target_fps) {
            return Err(ConfigError::TargetFpsOutOfRange(self.target_fps));
        }
        let palette_len = self.palette.chars().count();
        if !(10..=256).contains(&palette_len) {
            return Err(ConfigError::PaletteLengthOutOfRange(palette_len));
        }
        Ok(())
    }

    /// Load from an optional TOML file, then overlay CLI flags, then
    /// validate (spec §6.2 exit code `2` on failure).
    pub fn load(path: Option<&Path>, cli: &CliArgs) -> anyhow::Result<Config> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            None => Config::default(),
        };

        if let Some(port) = cli.tcp_port {
            config.tcp_port = port;
        }
        if let Some(port) = cli.ws_port {
            config.ws_port = port;
        }
        if let Some(max_clients) = cli.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(fps) = cli.target_fps {
            config.target_fps = fps;
        }
        if let Some(identity_key) = &cli.identity_key {
            config.identity_key = Some(identity_key.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

/// CLI surface overlaid on top of the TOML config (spec §6.2).
#[derive(Debug, Parser)]
#[command(name = "ascii-chat-server")]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub tcp_port: Option<u16>,

    #[arg(long)]
    pub ws_port: Option<u16>,

    #[arg(long)]
    pub max_clients: Option<usize>,

    #[arg(long)]
    pub target_fps: Option<u32>,

    #[arg(long)]
    pub identity_key: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_fps_out_of_range() {
        let mut config = Config::default();
        config.target_fps = 60;
        assert!(matches!(config.validate(), Err(ConfigError::TargetFpsOutOfRange(60))));
    }

    #[test]
    fn rejects_undersized_palette() {
        let mut config = Config::default();
        config.palette = "ab".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::PaletteLengthOutOfRange(2))));
    }

    #[test]
    fn rejects_oversized_client_cap() {
        let mut config = Config::default();
        config.max_clients = 5000;
        assert!(matches!(config.validate(), Err(ConfigError::MaxClientsTooLarge(5000))));
    }
}
