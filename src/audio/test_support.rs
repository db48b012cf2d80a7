//! Hand-driven backend for endpoint and manager tests
//!
//! Streams opened here never deliver frames on their own; tests call the
//! callback cores directly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::backend::{AudioBackend, BackendKind, DriverStream};
use crate::audio::capture::CaptureShared;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor};
use crate::audio::playback::PlaybackShared;
use crate::config::StreamParams;
use crate::error::AudioError;

#[derive(Default)]
pub(crate) struct ManualBackend {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fail_next: AtomicBool,
}

impl ManualBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub(crate) fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DriverStream>, AudioError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable(format!("{} refused to open", device.name)));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualStream {
            closed: self.closed.clone(),
            done: false,
        }))
    }
}

impl AudioBackend for ManualBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn open_capture(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        _params: &StreamParams,
        _sink: Arc<CaptureShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        self.open(device)
    }

    fn open_playback(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        _params: &StreamParams,
        _source: Arc<PlaybackShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        self.open(device)
    }
}

struct ManualStream {
    closed: Arc<AtomicUsize>,
    done: bool,
}

impl DriverStream for ManualStream {
    fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
