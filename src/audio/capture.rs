//! Audio capture endpoint
//!
//! The driver delivers frames to [`CaptureShared::on_capture_frames`] on its
//! own thread. Each block is metered before gain, scaled, optionally run
//! through the dynamics chain, copied into the resident buffer and finally
//! handed to the registered consumer.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::backend::AudioBackend;
use crate::audio::buffer::SampleBlock;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor, Direction};
use crate::audio::dynamics::DynamicsChain;
use crate::audio::endpoint::{resolve_device, ActiveStream, EndpointState, StreamEndpoint};
use crate::audio::gain::{apply_gain, GAIN_RANGE};
use crate::audio::level::{rms_db, AtomicF64};
use crate::config::InputConfig;
use crate::constants::SILENCE_FLOOR_DB;
use crate::error::AudioError;

/// Consumer of captured audio: little-endian PCM bytes and the frame count
pub type CaptureCallback = Arc<dyn Fn(&[u8], usize) + Send + Sync>;

/// Capture-specific operations on top of [`StreamEndpoint`]
pub trait CaptureEndpoint: StreamEndpoint {
    /// Set input gain; rejected outside `[0.0, 2.0]`
    fn set_gain(&self, gain: f64) -> Result<(), AudioError>;

    fn gain(&self) -> f64;

    /// Register (or clear) the consumer of processed blocks
    fn set_callback(&self, callback: Option<CaptureCallback>);

    /// Attach (or detach) a dynamics chain to the capture path
    fn set_dynamics(&self, chain: Option<Arc<DynamicsChain>>);

    /// Replace the stream configuration. Only allowed while stopped.
    fn update_config(&self, config: InputConfig) -> Result<(), AudioError>;

    fn config(&self) -> InputConfig;

    fn stats(&self) -> CaptureStats;
}

/// Capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub dropped_blocks: u64,
}

/// State reachable from the driver callback
pub struct CaptureShared {
    running: AtomicBool,
    gain: AtomicF64,
    level: AtomicF64,
    sample_rate: AtomicU32,
    channels: AtomicU16,
    /// Last processed block as LE bytes; the callback never waits for it
    buffer: Mutex<Vec<u8>>,
    callback: RwLock<Option<CaptureCallback>>,
    dynamics: RwLock<Option<Arc<DynamicsChain>>>,
    frames_captured: AtomicU64,
    dropped_blocks: AtomicU64,
}

impl CaptureShared {
    fn new(config: &InputConfig) -> Self {
        Self {
            running: AtomicBool::new(false),
            gain: AtomicF64::new(config.gain),
            level: AtomicF64::new(SILENCE_FLOOR_DB),
            sample_rate: AtomicU32::new(config.sample_rate),
            channels: AtomicU16::new(config.channels),
            buffer: Mutex::new(vec![0; config.params().buffer_bytes()]),
            callback: RwLock::new(None),
            dynamics: RwLock::new(None),
            frames_captured: AtomicU64::new(0),
            dropped_blocks: AtomicU64::new(0),
        }
    }

    /// Reshape for a new configuration
    fn configure(&self, config: &InputConfig) {
        self.gain.store(config.gain);
        self.sample_rate.store(config.sample_rate, Ordering::Relaxed);
        self.channels.store(config.channels, Ordering::Relaxed);
        *self.buffer.lock() = vec![0; config.params().buffer_bytes()];
    }

    /// Driver entry point: one hardware period of interleaved samples.
    ///
    /// Malformed blocks are logged and dropped; nothing here returns an
    /// error to the driver.
    pub fn on_capture_frames(&self, samples: &[i16], frame_count: usize) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        let channels = self.channels.load(Ordering::Relaxed);
        if samples.len() != frame_count * channels as usize {
            tracing::warn!(
                "Dropping capture block: {} samples for {} frames of {} channels",
                samples.len(),
                frame_count,
                channels
            );
            self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Metered before gain
        self.level.store(rms_db(samples));

        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        let mut block = match SampleBlock::new(samples.to_vec(), sample_rate, channels) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("Dropping capture block: {}", e);
                self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        apply_gain(&mut block, self.gain.load());

        let chain = self.dynamics.read().clone();
        if let Some(chain) = chain {
            block = chain.process(&block);
        }

        if let Some(mut buffer) = self.buffer.try_lock() {
            block.write_le_bytes(&mut buffer);
        }

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&block.to_le_bytes(), frame_count);
        }

        self.frames_captured.fetch_add(frame_count as u64, Ordering::Relaxed);
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            dropped_blocks: self.dropped_blocks.load(Ordering::Relaxed),
        }
    }
}

struct CaptureInner {
    config: InputConfig,
    state: EndpointState,
    device: Option<DeviceDescriptor>,
    stream: Option<ActiveStream>,
}

/// Capture endpoint over any [`AudioBackend`]
pub struct AudioCapture {
    backend: Arc<dyn AudioBackend>,
    catalog: Arc<dyn DeviceCatalog>,
    shared: Arc<CaptureShared>,
    /// Serialises start/stop/update_config so teardown can run outside `inner`
    lifecycle: Mutex<()>,
    inner: RwLock<CaptureInner>,
}

impl AudioCapture {
    /// Endpoint in the stopped state; the configuration is validated first
    pub fn new(
        config: InputConfig,
        catalog: Arc<dyn DeviceCatalog>,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self, AudioError> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidParameter(e.to_string()))?;

        Ok(Self {
            backend,
            catalog,
            shared: Arc::new(CaptureShared::new(&config)),
            lifecycle: Mutex::new(()),
            inner: RwLock::new(CaptureInner {
                config,
                state: EndpointState::Stopped,
                device: None,
                stream: None,
            }),
        })
    }

    /// Whether the maintenance task has exited (after cancellation)
    pub fn maintenance_finished(&self) -> bool {
        self.inner
            .read()
            .stream
            .as_ref()
            .map_or(true, |s| s.maintenance_finished())
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<CaptureShared> {
        self.shared.clone()
    }
}

impl StreamEndpoint for AudioCapture {
    fn start(&self, cancel: &CancellationToken) -> Result<(), AudioError> {
        let _lifecycle = self.lifecycle.lock();

        let config = {
            let inner = self.inner.read();
            if inner.state == EndpointState::Running {
                return Err(AudioError::AlreadyRunning);
            }
            inner.config.clone()
        };

        let params = config.params();
        let device = resolve_device(self.catalog.as_ref(), config.requested_device(), Direction::Input, &params)?;

        self.shared.running.store(true, Ordering::Release);
        let stream = self
            .backend
            .open_capture(self.catalog.as_ref(), &device, &params, self.shared.clone())
            .and_then(|driver| ActiveStream::launch("capture", driver, cancel));
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                tracing::error!("Failed to start audio input on {}: {}", device.name, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Audio input started: {} ({} Hz, {} ch, {} frames, gain {:.2})",
            device.name,
            params.sample_rate,
            params.channels,
            params.buffer_size,
            self.shared.gain.load()
        );

        let mut inner = self.inner.write();
        inner.state = EndpointState::Running;
        inner.device = Some(device);
        inner.stream = Some(stream);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        let _lifecycle = self.lifecycle.lock();

        let stream = {
            let mut inner = self.inner.write();
            if inner.state == EndpointState::Stopped {
                return Ok(());
            }
            inner.state = EndpointState::Stopped;
            inner.device = None;
            self.shared.running.store(false, Ordering::Release);
            inner.stream.take()
        };

        if let Some(stream) = stream {
            stream.shutdown();
        }

        tracing::info!("Audio input stopped");
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stop()?;
        *self.shared.callback.write() = None;
        tracing::debug!("Audio input closed");
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.inner.read().state
    }

    fn level(&self) -> f64 {
        self.shared.level.load()
    }

    fn buffer(&self) -> Vec<u8> {
        self.shared.buffer.lock().clone()
    }

    fn device_name(&self) -> Option<String> {
        self.inner.read().device.as_ref().map(|d| d.name.clone())
    }
}

impl CaptureEndpoint for AudioCapture {
    fn set_gain(&self, gain: f64) -> Result<(), AudioError> {
        let gain = GAIN_RANGE.validate(gain)?;
        self.shared.gain.store(gain);
        tracing::debug!("Input gain set to {:.2}", gain);
        Ok(())
    }

    fn gain(&self) -> f64 {
        self.shared.gain.load()
    }

    fn set_callback(&self, callback: Option<CaptureCallback>) {
        *self.shared.callback.write() = callback;
    }

    fn set_dynamics(&self, chain: Option<Arc<DynamicsChain>>) {
        *self.shared.dynamics.write() = chain;
    }

    fn update_config(&self, config: InputConfig) -> Result<(), AudioError> {
        let _lifecycle = self.lifecycle.lock();
        let mut inner = self.inner.write();

        if inner.state == EndpointState::Running {
            return Err(AudioError::InvalidOperation(
                "cannot change input configuration while running".into(),
            ));
        }
        config
            .validate()
            .map_err(|e| AudioError::InvalidParameter(e.to_string()))?;

        self.shared.configure(&config);
        inner.config = config;
        Ok(())
    }

    fn config(&self) -> InputConfig {
        self.inner.read().config.clone()
    }

    fn stats(&self) -> CaptureStats {
        self.shared.stats()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
