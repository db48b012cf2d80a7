//! Audio playback endpoint
//!
//! Callers enqueue blocks with `play_audio`; the driver pulls one block per
//! period through [`PlaybackShared::on_request_frames`]. Volume is applied
//! on dequeue and the level is metered after volume. An empty queue yields
//! silence.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::backend::AudioBackend;
use crate::audio::buffer::{PlaybackQueue, SampleBlock};
use crate::audio::device::{DeviceCatalog, DeviceDescriptor, Direction};
use crate::audio::endpoint::{resolve_device, ActiveStream, EndpointState, StreamEndpoint};
use crate::audio::gain::{apply_gain, VOLUME_RANGE};
use crate::audio::level::{compute_level, AtomicF64};
use crate::config::OutputConfig;
use crate::constants::{PLAYBACK_QUEUE_CAPACITY, SILENCE_FLOOR_DB};
use crate::error::AudioError;

/// Playback-specific operations on top of [`StreamEndpoint`]
pub trait PlaybackEndpoint: StreamEndpoint {
    /// Queue a block without blocking.
    ///
    /// Fails with `NotRunning` while stopped and `QueueFull` when the queue
    /// is at capacity; the block is dropped in both cases.
    fn play_audio(&self, block: SampleBlock) -> Result<(), AudioError>;

    fn queue_size(&self) -> usize;

    /// Blocks the queue holds before `play_audio` starts failing
    fn queue_capacity(&self) -> usize;

    /// Discard queued blocks without playing them
    fn clear_queue(&self) -> usize;

    /// Set output volume; rejected outside `[0.0, 1.0]`
    fn set_volume(&self, volume: f64) -> Result<(), AudioError>;

    fn volume(&self) -> f64;

    /// Replace the stream configuration. Only allowed while stopped.
    fn update_config(&self, config: OutputConfig) -> Result<(), AudioError>;

    fn config(&self) -> OutputConfig;

    fn stats(&self) -> PlaybackStats;
}

/// Playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlaybackStats {
    pub frames_played: u64,
    /// Periods filled with silence because the queue was empty
    pub underruns: u64,
    /// Blocks rejected with `QueueFull`
    pub queue_overflows: u64,
}

/// State reachable from the driver callback
pub struct PlaybackShared {
    running: AtomicBool,
    volume: AtomicF64,
    level: AtomicF64,
    queue: PlaybackQueue,
    /// Last played block as LE bytes; the callback never waits for it
    buffer: Mutex<Vec<u8>>,
    frames_played: AtomicU64,
    underruns: AtomicU64,
}

impl PlaybackShared {
    fn new(config: &OutputConfig) -> Self {
        Self {
            running: AtomicBool::new(false),
            volume: AtomicF64::new(config.volume),
            level: AtomicF64::new(SILENCE_FLOOR_DB),
            queue: PlaybackQueue::new(PLAYBACK_QUEUE_CAPACITY),
            buffer: Mutex::new(vec![0; config.params().buffer_bytes()]),
            frames_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    fn configure(&self, config: &OutputConfig) {
        self.volume.store(config.volume);
        *self.buffer.lock() = vec![0; config.params().buffer_bytes()];
    }

    /// Driver entry point: fill `out` with the next period of audio.
    ///
    /// A queued block is scaled by the volume and copied in, padded with
    /// silence if short and truncated if long. With nothing queued the
    /// period is silent and the level drops to the floor.
    pub fn on_request_frames(&self, out: &mut [i16], frame_count: usize) {
        if !self.running.load(Ordering::Acquire) {
            out.fill(0);
            return;
        }

        match self.queue.pop() {
            Some(mut block) => {
                apply_gain(&mut block, self.volume.load());

                let n = block.len().min(out.len());
                out[..n].copy_from_slice(&block.samples()[..n]);
                out[n..].fill(0);

                // Metered after volume
                self.level.store(compute_level(&block));

                if let Some(mut buffer) = self.buffer.try_lock() {
                    block.write_le_bytes(&mut buffer);
                }
                self.frames_played.fetch_add(frame_count as u64, Ordering::Relaxed);
            }
            None => {
                out.fill(0);
                self.level.store(SILENCE_FLOOR_DB);
                self.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            frames_played: self.frames_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            queue_overflows: self.queue.overflow_count() as u64,
        }
    }
}

struct PlaybackInner {
    config: OutputConfig,
    state: EndpointState,
    device: Option<DeviceDescriptor>,
    stream: Option<ActiveStream>,
}

/// Playback endpoint over any [`AudioBackend`]
pub struct AudioPlayback {
    backend: Arc<dyn AudioBackend>,
    catalog: Arc<dyn DeviceCatalog>,
    shared: Arc<PlaybackShared>,
    lifecycle: Mutex<()>,
    inner: RwLock<PlaybackInner>,
}

impl AudioPlayback {
    /// Endpoint in the stopped state; the configuration is validated first
    pub fn new(
        config: OutputConfig,
        catalog: Arc<dyn DeviceCatalog>,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self, AudioError> {
        config
            .validate()
            .map_err(|e| AudioError::InvalidParameter(e.to_string()))?;

        Ok(Self {
            backend,
            catalog,
            shared: Arc::new(PlaybackShared::new(&config)),
            lifecycle: Mutex::new(()),
            inner: RwLock::new(PlaybackInner {
                config,
                state: EndpointState::Stopped,
                device: None,
                stream: None,
            }),
        })
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<PlaybackShared> {
        self.shared.clone()
    }
}

impl StreamEndpoint for AudioPlayback {
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
        let device = resolve_device(self.catalog.as_ref(), config.requested_device(), Direction::Output, &params)?;

        self.shared.running.store(true, Ordering::Release);
        let stream = self
            .backend
            .open_playback(self.catalog.as_ref(), &device, &params, self.shared.clone())
            .and_then(|driver| ActiveStream::launch("playback", driver, cancel));
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                tracing::error!("Failed to start audio output on {}: {}", device.name, e);
                return Err(e);
            }
        };

        tracing::info!(
            "Audio output started: {} ({} Hz, {} ch, {} frames, volume {:.2})",
            device.name,
            params.sample_rate,
            params.channels,
            params.buffer_size,
            self.shared.volume.load()
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

        tracing::info!("Audio output stopped");
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.stop()?;
        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            tracing::debug!("Discarded {} queued blocks on close", dropped);
        }
        tracing::debug!("Audio output closed");
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

impl PlaybackEndpoint for AudioPlayback {
    fn play_audio(&self, block: SampleBlock) -> Result<(), AudioError> {
        if self.inner.read().state != EndpointState::Running {
            return Err(AudioError::NotRunning);
        }

        self.shared.queue.push(block).map_err(|_| {
            tracing::warn!("Playback queue full, dropping block");
            AudioError::QueueFull
        })
    }

    fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    fn clear_queue(&self) -> usize {
        self.shared.queue.clear()
    }

    fn set_volume(&self, volume: f64) -> Result<(), AudioError> {
        let volume = VOLUME_RANGE.validate(volume)?;
        self.shared.volume.store(volume);
        tracing::debug!("Output volume set to {:.2}", volume);
        Ok(())
    }

    fn volume(&self) -> f64 {
        self.shared.volume.load()
    }

    fn update_config(&self, config: OutputConfig) -> Result<(), AudioError> {
        let _lifecycle = self.lifecycle.lock();
        let mut inner = self.inner.write();

        if inner.state == EndpointState::Running {
            return Err(AudioError::InvalidOperation(
                "cannot change output configuration while running".into(),
            ));
        }
        config
            .validate()
            .map_err(|e| AudioError::InvalidParameter(e.to_string()))?;

        self.shared.configure(&config);
        inner.config = config;
        Ok(())
    }

    fn config(&self) -> OutputConfig {
        self.inner.read().config.clone()
    }

    fn stats(&self) -> PlaybackStats {
        self.shared.stats()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
