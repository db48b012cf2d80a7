//! Stub backend for platforms without a native audio host

use std::sync::Arc;

use super::{AudioBackend, BackendKind, DriverStream};
use crate::audio::capture::CaptureShared;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor};
use crate::audio::playback::PlaybackShared;
use crate::config::StreamParams;
use crate::error::AudioError;

/// Every open fails with `DeviceUnavailable`
pub struct UnsupportedBackend {
    platform: String,
}

impl UnsupportedBackend {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    fn refuse(&self, device: &DeviceDescriptor) -> AudioError {
        AudioError::DeviceUnavailable(format!(
            "audio streaming is not supported on {} (device {})",
            self.platform, device.name
        ))
    }
}

impl AudioBackend for UnsupportedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Unsupported
    }

    fn open_capture(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        _params: &StreamParams,
        _sink: Arc<CaptureShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        Err(self.refuse(device))
    }

    fn open_playback(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        _params: &StreamParams,
        _source: Arc<PlaybackShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        Err(self.refuse(device))
    }
}
