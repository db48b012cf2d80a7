//! cpal driver backend
//!
//! cpal streams are not `Send`, so each stream is built, played and dropped
//! on a dedicated thread. The opening thread waits for that thread to report
//! readiness, bounded by the configured stream timeout.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{AudioBackend, BackendKind, DriverStream};
use crate::audio::capture::CaptureShared;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor, Direction, HostHandle};
use crate::audio::playback::PlaybackShared;
use crate::config::StreamParams;
use crate::error::AudioError;

/// Stream errors buffered between maintenance ticks; extras are dropped
const ERROR_CHANNEL_CAPACITY: usize = 16;

pub struct NativeBackend {
    open_timeout: Duration,
}

impl NativeBackend {
    pub fn new(open_timeout: Duration) -> Self {
        Self { open_timeout }
    }
}

impl AudioBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn open_capture(
        &self,
        catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        sink: Arc<CaptureShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        let host = host_handle(catalog)?;
        let name = device.name.clone();
        let config = stream_config(params);
        let channels = config.channels.max(1) as usize;

        let stream = NativeStream::spawn(
            format!("capture-{}", name),
            self.open_timeout,
            move |error_tx| {
                let device = host.find_device(&name, Direction::Input)?;
                device
                    .build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            sink.on_capture_frames(data, data.len() / channels);
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    )
                    .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
            },
        )?;

        Ok(Box::new(stream))
    }

    fn open_playback(
        &self,
        catalog: &dyn DeviceCatalog,
        device: &DeviceDescriptor,
        params: &StreamParams,
        source: Arc<PlaybackShared>,
    ) -> Result<Box<dyn DriverStream>, AudioError> {
        let host = host_handle(catalog)?;
        let name = device.name.clone();
        let config = stream_config(params);
        let channels = config.channels.max(1) as usize;

        let stream = NativeStream::spawn(
            format!("playback-{}", name),
            self.open_timeout,
            move |error_tx| {
                let device = host.find_device(&name, Direction::Output)?;
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels;
                            source.on_request_frames(data, frames);
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    )
                    .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
            },
        )?;

        Ok(Box::new(stream))
    }
}

fn host_handle(catalog: &dyn DeviceCatalog) -> Result<HostHandle, AudioError> {
    catalog
        .host_handle()
        .ok_or_else(|| AudioError::DeviceUnavailable("device catalog has no native audio host".into()))
}

fn stream_config(params: &StreamParams) -> StreamConfig {
    StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(params.buffer_size),
    }
}

/// A cpal stream living on its own thread
struct NativeStream {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl NativeStream {
    /// Build and play a stream on a new thread, waiting up to `timeout`
    /// for it to come up
    fn spawn<F>(thread_name: String, timeout: Duration, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce(Sender<AudioError>) -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (error_tx, error_rx) = bounded::<AudioError>(ERROR_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let stream = match build(error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stopped or the handle is gone
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut stream = Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            error_rx,
        };

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.close();
                Err(e)
            }
            Err(_) => {
                // The thread may still be blocked in the driver; detach it.
                // It exits on its own once it sees the stop sender is gone.
                stream.stop_tx.take();
                stream.handle.take();
                Err(AudioError::DeviceUnavailable(format!(
                    "audio driver did not start within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    fn drain_errors(&self) {
        while let Ok(err) = self.error_rx.try_recv() {
            tracing::error!("Audio stream error: {}", err);
        }
    }
}

impl DriverStream for NativeStream {
    fn tick(&mut self) {
        self.drain_errors();
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.drain_errors();
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        self.close();
    }
}
