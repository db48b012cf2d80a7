//! Configuration management
//!
//! TOML file with one table per concern. Every table carries
//! `#[serde(default)]`, so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::dynamics::DynamicsParameters;
use crate::audio::gain::{GAIN_RANGE, VOLUME_RANGE};
use crate::audio::platform::BackendPreference;
use crate::constants::*;
use crate::error::{Error, Result};

/// PCM sample format declared for a stream.
///
/// Processing always runs on 16-bit integers; `Float32` only takes part in
/// the device support lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    Int16,
    Float32,
}

/// Shape of a stream as handed to a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Driver period in frames
    pub buffer_size: u32,
    pub format: SampleFormat,
}

impl StreamParams {
    /// Bytes needed to hold one driver period of 16-bit PCM
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_size as usize * self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub system: SystemConfig,
}

/// Audio stream and processing settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub processing: ProcessingConfig,
    pub dynamics: DynamicsParameters,
}

/// Capture stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Device name; absent or empty selects the default input
    pub device_name: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Driver period in frames
    pub buffer_size: u32,
    pub gain: f64,
    pub format: SampleFormat,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            gain: DEFAULT_GAIN,
            format: SampleFormat::Int16,
        }
    }
}

impl InputConfig {
    pub fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffer_size: self.buffer_size,
            format: self.format,
        }
    }

    /// Explicitly requested device, ignoring blank names
    pub fn requested_device(&self) -> Option<&str> {
        non_blank(self.device_name.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        validate_shape("input", self.sample_rate, self.channels, self.buffer_size)?;
        GAIN_RANGE
            .validate(self.gain)
            .map_err(|e| Error::Config(format!("input: {}", e)))?;
        Ok(())
    }
}

/// Playback stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name; absent or empty selects the default output
    pub device_name: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Driver period in frames
    pub buffer_size: u32,
    pub volume: f64,
    pub format: SampleFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            volume: DEFAULT_VOLUME,
            format: SampleFormat::Int16,
        }
    }
}

impl OutputConfig {
    pub fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            buffer_size: self.buffer_size,
            format: self.format,
        }
    }

    /// Explicitly requested device, ignoring blank names
    pub fn requested_device(&self) -> Option<&str> {
        non_blank(self.device_name.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        validate_shape("output", self.sample_rate, self.channels, self.buffer_size)?;
        VOLUME_RANGE
            .validate(self.volume)
            .map_err(|e| Error::Config(format!("output: {}", e)))?;
        Ok(())
    }
}

/// Processing switches.
///
/// The three filter flags are carried so existing configuration files keep
/// parsing and round-tripping; no pipeline stage reads them yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub format: SampleFormat,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: true,
            auto_gain_control: true,
            format: SampleFormat::Int16,
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_level: String,
    pub list_devices_on_startup: bool,
    /// Upper bound on the native driver open handshake
    pub stream_timeout_ms: u64,
    /// Run captured audio through the dynamics chain
    pub aprs_mode: bool,
    /// Period of the binary's level log line
    pub level_monitor_interval_ms: u64,
    pub backend: BackendPreference,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            list_devices_on_startup: true,
            stream_timeout_ms: 2000,
            aprs_mode: true,
            level_monitor_interval_ms: 100,
            backend: BackendPreference::Auto,
        }
    }
}

impl AppConfig {
    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// `config.toml` in the per-user configuration directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "aprs", "aprs-audio-agent")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.input.validate()?;
        self.audio.output.validate()?;
        self.audio
            .dynamics
            .validate()
            .map_err(|e| Error::Config(format!("dynamics: {}", e)))?;
        if self.system.stream_timeout_ms == 0 {
            return Err(Error::Config("system: stream_timeout_ms must be positive".into()));
        }
        if self.system.level_monitor_interval_ms == 0 {
            return Err(Error::Config("system: level_monitor_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

fn validate_shape(section: &str, sample_rate: u32, channels: u16, buffer_size: u32) -> Result<()> {
    if sample_rate == 0 {
        return Err(Error::Config(format!("{}: sample_rate must be positive", section)));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(Error::Config(format!(
            "{}: channels must be between 1 and {}, got {}",
            section, MAX_CHANNELS, channels
        )));
    }
    if buffer_size == 0 {
        return Err(Error::Config(format!("{}: buffer_size must be positive", section)));
    }
    Ok(())
}

fn non_blank(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.audio.input.sample_rate, 8000);
        assert_eq!(config.audio.input.channels, 1);
        assert_eq!(config.audio.input.buffer_size, 256);
        assert_eq!(config.audio.input.gain, 1.2);
        assert_eq!(config.audio.output.volume, 0.8);
        assert!(config.system.aprs_mode);
        assert_eq!(config.system.backend, BackendPreference::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [audio.input]
            device_name = "USB Audio"
            gain = 1.5

            [audio.dynamics]
            compressor_enabled = false

            [system]
            backend = "synthetic"
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.input.requested_device(), Some("USB Audio"));
        assert_eq!(config.audio.input.gain, 1.5);
        assert_eq!(config.audio.input.sample_rate, 8000);
        assert!(!config.audio.dynamics.compressor_enabled);
        assert!(config.audio.dynamics.limiter_enabled);
        assert_eq!(config.system.backend, BackendPreference::Synthetic);
        assert_eq!(config.system.stream_timeout_ms, 2000);
    }

    #[test]
    fn test_processing_flags_parse_and_default() {
        let defaults = ProcessingConfig::default();
        assert!(!defaults.echo_cancellation);
        assert!(defaults.noise_suppression);
        assert!(defaults.auto_gain_control);

        let config = AppConfig::from_toml_str(
            "[audio.processing]\necho_cancellation = true\nauto_gain_control = false\n",
        )
        .unwrap();
        assert!(config.audio.processing.echo_cancellation);
        assert!(config.audio.processing.noise_suppression);
        assert!(!config.audio.processing.auto_gain_control);
        assert_eq!(config.audio.processing.format, SampleFormat::Int16);

        let reparsed = AppConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed.audio.processing, config.audio.processing);
    }

    #[test]
    fn test_float32_format_parses() {
        let config = AppConfig::from_toml_str("[audio.output]\nformat = \"float32\"\n").unwrap();
        assert_eq!(config.audio.output.format, SampleFormat::Float32);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(AppConfig::from_toml_str("[audio.input]\ngain = 2.5\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.output]\nvolume = 1.5\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.input]\nchannels = 9\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.input]\nchannels = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.output]\nsample_rate = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.output]\nbuffer_size = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[audio.dynamics]\ncompression_ratio = 0.5\n").is_err());
    }

    #[test]
    fn test_blank_device_name_means_default() {
        let mut input = InputConfig::default();
        input.device_name = Some("   ".into());
        assert_eq!(input.requested_device(), None);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.audio.output.device_name = Some("Speakers".into());
        config.audio.dynamics.noise_gate_threshold_db = -50.0;

        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("aprs-audio-config-{}", std::process::id()))
            .join("config.toml");
        let mut config = AppConfig::default();
        config.system.log_level = "debug".into();

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_buffer_bytes() {
        let mut input = InputConfig::default();
        input.channels = 2;
        input.buffer_size = 512;
        assert_eq!(input.params().buffer_bytes(), 2048);
    }
}
