//! Platform detection and backend selection
//!
//! The backend and device catalog are chosen once, when a manager is built.
//! Linux, macOS and Windows get cpal; anything else gets a stub whose
//! streams refuse to start. The synthetic tone source is never a fallback:
//! it is used only when the configuration asks for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::backend::{AudioBackend, NativeBackend, SyntheticBackend, UnsupportedBackend};
use crate::audio::device::{CpalCatalog, DeviceCatalog, StaticCatalog};
use crate::config::SystemConfig;

/// Host operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other(String),
}

impl Platform {
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            other => Platform::Other(other.to_string()),
        }
    }

    /// Whether cpal provides a native host here
    pub fn has_native_audio(&self) -> bool {
        !matches!(self, Platform::Other(_))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
            Platform::Other(os) => write!(f, "{}", os),
        }
    }
}

/// Backend requested by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Native where available, otherwise the unsupported stub
    #[default]
    Auto,
    Native,
    /// Generated test tone; never chosen implicitly
    Synthetic,
}

/// Pick the driver backend for a platform
pub fn select_backend(platform: &Platform, preference: BackendPreference, system: &SystemConfig) -> Arc<dyn AudioBackend> {
    match preference {
        BackendPreference::Synthetic => Arc::new(SyntheticBackend::new()),
        BackendPreference::Auto | BackendPreference::Native if platform.has_native_audio() => {
            Arc::new(NativeBackend::new(Duration::from_millis(system.stream_timeout_ms)))
        }
        _ => {
            tracing::warn!("No native audio support on {}; streams will not start", platform);
            Arc::new(UnsupportedBackend::new(platform.to_string()))
        }
    }
}

/// Open the device catalog matching [`select_backend`]'s choice.
///
/// A native host that fails to initialise leaves an empty catalog, so every
/// start fails with `DeviceUnavailable` rather than construction failing.
pub fn open_catalog(platform: &Platform, preference: BackendPreference) -> Arc<dyn DeviceCatalog> {
    match preference {
        BackendPreference::Synthetic => Arc::new(StaticCatalog::synthetic()),
        _ if platform.has_native_audio() => match CpalCatalog::new() {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                tracing::error!("Failed to open audio host: {}", e);
                Arc::new(StaticCatalog::empty())
            }
        },
        _ => Arc::new(StaticCatalog::empty()),
    }
}
