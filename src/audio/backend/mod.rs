//! Driver backends
//!
//! A backend turns a resolved device into a running [`DriverStream`] that
//! feeds an endpoint's callback core. One backend is chosen per manager by
//! [`crate::audio::platform`]; every endpoint contract holds regardless of
//! which one is behind it.

pub mod native;
pub mod synthetic;
pub mod unsupported;

use serde::Serialize;
use std::sync::Arc;

use crate::audio::capture::CaptureShared;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor};
use crate::audio::playback::PlaybackShared;
use crate::config::StreamParams;
use crate::error::AudioError;

pub use native::NativeBackend;
pub use synthetic::SyntheticBackend;
pub use unsupported::UnsupportedBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Real transfer through cpal
    Native,
    /// Generated test tone; not real capture
    Synthetic,
    /// Refuses to open any stream
    Unsupported,
}

/// Opens driver streams for endpoints
pub trait AudioBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open a capture stream delivering frames to `sink`
    fn open_capture(
        &self,
        catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        sink: Arc<CaptureShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError>;

    /// Open a playback stream pulling frames from `source`
    fn open_playback(
        &self,
        catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        source: Arc<PlaybackShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError>;
}

/// Handle to an open driver stream, owned by the endpoint
pub trait DriverStream: Send {
    /// Called from the endpoint's maintenance task every period
    fn tick(&mut self) {}

    /// Release the stream. Must be safe to call more than once.
    fn close(&mut self);
}
