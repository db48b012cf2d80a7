//! Synthetic tone backend
//!
//! Not real capture. Each maintenance tick produces one driver period of a
//! 440 Hz sine for capture, and drains one queued block for playback, so
//! metering and the dynamics chain can be exercised without hardware. It is
//! only used when explicitly configured and warns every time a stream opens.

use std::f64::consts::PI;
use std::sync::Arc;

use super::{AudioBackend, BackendKind, DriverStream};
use crate::audio::capture::CaptureShared;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor};
use crate::audio::playback::PlaybackShared;
use crate::config::StreamParams;
use crate::constants::FULL_SCALE;
use crate::error::AudioError;

/// Frequency of the generated tone
pub const TONE_FREQUENCY_HZ: f64 = 440.0;

/// Tone amplitude relative to full scale
pub const TONE_AMPLITUDE: f64 = 0.5;

#[derive(Debug, Default)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        tracing::warn!("Synthetic audio backend selected: input is a generated test tone, not real capture");
        Self
    }
}

impl AudioBackend for SyntheticBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Synthetic
    }

    fn open_capture(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        sink: Arc<CaptureShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        tracing::warn!(
            "Synthetic input on {}: {} Hz tone at {} Hz sample rate, not real capture",
            device.name,
            TONE_FREQUENCY_HZ,
            params.sample_rate
        );
        Ok(Box::new(ToneSource::new(*params, sink)))
    }

    fn open_playback(
        &self,
        _catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        source: Arc<PlaybackShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        tracing::warn!(
            "Synthetic output on {}: queued audio is consumed but not played",
            device.name
        );
        Ok(Box::new(QueueDrain::new(*params, source)))
    }
}

/// Generate `frame_count` frames of the test tone starting at `first_frame`.
///
/// Every channel carries the same sample.
pub fn tone_block(first_frame: u64, frame_count: usize, sample_rate: u32, channels: u16) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    let rate = sample_rate.max(1) as f64;
    let mut samples = Vec::with_capacity(frame_count * channels);

    for frame in 0..frame_count as u64 {
        let t = (first_frame + frame) as f64 / rate;
        let value = (2.0 * PI * TONE_FREQUENCY_HZ * t).sin() * TONE_AMPLITUDE * FULL_SCALE;
        let sample = value.round() as i16;
        samples.extend(std::iter::repeat(sample).take(channels));
    }

    samples
}

struct ToneSource {
    params: StreamParams,
    sink: Arc<CaptureShared>,
    /// Frames generated so far, keeps the phase continuous across ticks
    cursor: u64,
    closed: bool,
}

impl ToneSource {
    fn new(params: StreamParams, sink: Arc<CaptureShared>) -> Self {
        Self {
            params,
            sink,
            cursor: 0,
            closed: false,
        }
    }
}

impl DriverStream for ToneSource {
    fn tick(&mut self) {
        if self.closed {
            return;
        }
        let frames = self.params.buffer_size as usize;
        let samples = tone_block(self.cursor, frames, self.params.sample_rate, self.params.channels);
        self.sink.on_capture_frames(&samples, frames);
        self.cursor += frames as u64;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

struct QueueDrain {
    out: Vec<i16>,
    frames: usize,
    source: Arc<PlaybackShared>,
    closed: bool,
}

impl QueueDrain {
    fn new(params: StreamParams, source: Arc<PlaybackShared>) -> Self {
        let frames = params.buffer_size as usize;
        Self {
            out: vec![0; frames * params.channels.max(1) as usize],
            frames,
            source,
            closed: false,
        }
    }
}

impl DriverStream for QueueDrain {
    fn tick(&mut self) {
        if self.closed {
            return;
        }
        self.source.on_request_frames(&mut self.out, self.frames);
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
