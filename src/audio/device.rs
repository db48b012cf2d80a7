//! Audio device catalog
//!
//! Endpoints only ever see devices through the [`DeviceCatalog`] contract.
//! Support checks are exact lookups against the rates, channel counts and
//! formats a descriptor advertises; nothing is negotiated or resampled.
//!
//! The native catalog owns the platform audio host. Endpoints reach it
//! through an opaque [`HostHandle`] handed out by the catalog; a handle stops
//! resolving the host once its catalog is closed.

use cpal::traits::{DeviceTrait, HostTrait};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SampleFormat;
use crate::error::AudioError;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Device as advertised by a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
    pub formats: Vec<SampleFormat>,
    pub is_default: bool,
}

impl DeviceDescriptor {
    /// Exact-match lookup of a rate/channels/format triple
    pub fn supports(&self, sample_rate: u32, channels: u16, format: SampleFormat) -> bool {
        self.sample_rates.contains(&sample_rate)
            && self.channels.contains(&channels)
            && self.formats.contains(&format)
    }
}

/// Sample rates probed against each device's supported ranges
const PROBE_SAMPLE_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 44100, 48000, 88200, 96000];

/// Source of device descriptors for endpoints.
///
/// Only `list_devices`, `refresh` and `close` are required; the lookups are
/// derived from the listing.
pub trait DeviceCatalog: Send + Sync {
    /// Every known device, both directions
    fn list_devices(&self) -> Vec<DeviceDescriptor>;

    /// Re-enumerate devices
    fn refresh(&self) -> Result<(), AudioError>;

    /// Release the catalog and any native context it owns
    fn close(&self) -> Result<(), AudioError>;

    /// Handle to the native host, when this catalog owns one
    fn host_handle(&self) -> Option<HostHandle> {
        None
    }

    fn get_default_device(&self, direction: Direction) -> Result<DeviceDescriptor, AudioError> {
        self.list_devices()
            .into_iter()
            .find(|d| d.direction == direction && d.is_default)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("no default {} device", direction)))
    }

    fn get_device_by_name(&self, name: &str, direction: Direction) -> Result<DeviceDescriptor, AudioError> {
        self.list_devices()
            .into_iter()
            .find(|d| d.direction == direction && d.name == name)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("{} [{}]", name, direction)))
    }

    fn devices_by_direction(&self, direction: Direction) -> Vec<DeviceDescriptor> {
        self.list_devices()
            .into_iter()
            .filter(|d| d.direction == direction)
            .collect()
    }

    fn device_count(&self) -> usize {
        self.list_devices().len()
    }

    fn is_device_supported(
        &self,
        name: &str,
        direction: Direction,
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
    ) -> bool {
        self.get_device_by_name(name, direction)
            .map(|d| d.supports(sample_rate, channels, format))
            .unwrap_or(false)
    }
}

/// Log every device in a catalog
pub fn log_devices(catalog: &dyn DeviceCatalog) {
    let devices = catalog.list_devices();
    if devices.is_empty() {
        tracing::info!("No audio devices found");
        return;
    }

    tracing::info!("=== Available Audio Devices ===");
    for (i, device) in devices.iter().enumerate() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        tracing::info!("{}. {}{} ({})", i + 1, device.name, default_marker, device.direction);
        tracing::info!("    ID: {}", device.id);
        tracing::info!("    Sample rates: {:?}", device.sample_rates);
        tracing::info!("    Channels: {:?}", device.channels);
        tracing::info!("    Formats: {:?}", device.formats);
    }
}

/// In-memory catalog with a fixed device table.
///
/// Used for the synthetic backend, on platforms without a native host, and
/// in tests.
pub struct StaticCatalog {
    devices: RwLock<Vec<DeviceDescriptor>>,
    closed: AtomicBool,
}

impl StaticCatalog {
    /// Name of the devices advertised by [`StaticCatalog::synthetic`]
    pub const SYNTHETIC_DEVICE: &'static str = "Synthetic Tone";

    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices: RwLock::new(devices),
            closed: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// One default input and one default output accepting every probed
    /// rate, 1..=8 channels and both formats
    pub fn synthetic() -> Self {
        Self::new(vec![
            Self::synthetic_descriptor(Direction::Input),
            Self::synthetic_descriptor(Direction::Output),
        ])
    }

    fn synthetic_descriptor(direction: Direction) -> DeviceDescriptor {
        DeviceDescriptor {
            id: format!("{}:{}", direction, Self::SYNTHETIC_DEVICE),
            name: Self::SYNTHETIC_DEVICE.to_string(),
            direction,
            sample_rates: PROBE_SAMPLE_RATES.to_vec(),
            channels: (1..=8).collect(),
            formats: vec![SampleFormat::Int16, SampleFormat::Float32],
            is_default: true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DeviceCatalog for StaticCatalog {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        if self.is_closed() {
            return Vec::new();
        }
        self.devices.read().clone()
    }

    fn refresh(&self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opaque reference to the native audio host owned by a [`CpalCatalog`].
///
/// Holds the host id rather than a `cpal::Host`. The ALSA, CoreAudio and
/// WASAPI hosts are stateless selectors over the system audio service, so
/// resolving the id again yields the same host without a second context.
/// The catalog's closed flag is shared, so a handle kept past `close` fails.
#[derive(Debug, Clone)]
pub struct HostHandle {
    id: cpal::HostId,
    closed: Arc<AtomicBool>,
}

impl HostHandle {
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub(crate) fn host(&self) -> Result<cpal::Host, AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable(format!("{} host is closed", self.name())));
        }
        cpal::host_from_id(self.id).map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
    }

    /// Look up the native device matching a catalog name
    pub(crate) fn find_device(&self, name: &str, direction: Direction) -> Result<cpal::Device, AudioError> {
        let host = self.host()?;
        let devices = match direction {
            Direction::Input => host.input_devices(),
            Direction::Output => host.output_devices(),
        };
        let devices = devices.map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        for device in devices {
            if let Ok(device_name) = device.name() {
                if device_name.trim() == name {
                    return Ok(device);
                }
            }
        }

        Err(AudioError::DeviceUnavailable(format!("{} [{}]", name, direction)))
    }
}

/// Catalog backed by the platform's default cpal host
pub struct CpalCatalog {
    handle: HostHandle,
    devices: RwLock<Vec<DeviceDescriptor>>,
    closed: Arc<AtomicBool>,
}

impl CpalCatalog {
    /// Open the default host and enumerate its devices
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let closed = Arc::new(AtomicBool::new(false));
        let handle = HostHandle {
            id: host.id(),
            closed: closed.clone(),
        };
        let devices = enumerate_devices(&host)?;

        tracing::debug!("{} host: {} devices", handle.name(), devices.len());

        Ok(Self {
            handle,
            devices: RwLock::new(devices),
            closed,
        })
    }
}

impl DeviceCatalog for CpalCatalog {
    fn list_devices(&self) -> Vec<DeviceDescriptor> {
        if self.closed.load(Ordering::SeqCst) {
            return Vec::new();
        }
        self.devices.read().clone()
    }

    fn refresh(&self) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidOperation("device catalog is closed".into()));
        }
        let devices = enumerate_devices(&self.handle.host()?)?;
        *self.devices.write() = devices;
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.devices.write().clear();
            tracing::debug!("{} device catalog closed", self.handle.name());
        }
        Ok(())
    }

    fn host_handle(&self) -> Option<HostHandle> {
        if self.closed.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.handle.clone())
        }
    }
}

/// Build descriptors for every input and output device of `host`
fn enumerate_devices(host: &cpal::Host) -> Result<Vec<DeviceDescriptor>, AudioError> {
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    let inputs = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    for device in inputs {
        if let Ok(name) = device.name() {
            let is_default = default_input_name.as_ref() == Some(&name);
            devices.push(describe(&device, name, Direction::Input, is_default));
        }
    }

    let outputs = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    for device in outputs {
        if let Ok(name) = device.name() {
            let is_default = default_output_name.as_ref() == Some(&name);
            devices.push(describe(&device, name, Direction::Output, is_default));
        }
    }

    Ok(devices)
}

fn describe(device: &cpal::Device, name: String, direction: Direction, is_default: bool) -> DeviceDescriptor {
    let name = name.trim().to_string();
    let (sample_rates, channels, formats) = device_capabilities(device, direction);
    DeviceDescriptor {
        id: format!("{}:{}", direction, name),
        name,
        direction,
        sample_rates,
        channels,
        formats,
        is_default,
    }
}

/// Probe the discrete rates, channel counts and sample formats a device
/// advertises
fn device_capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>, Vec<SampleFormat>) {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    let mut formats = Vec::new();

    for range in &ranges {
        for rate_val in PROBE_SAMPLE_RATES {
            let rate = cpal::SampleRate(rate_val);
            if rate >= range.min_sample_rate() && rate <= range.max_sample_rate() && !sample_rates.contains(&rate_val) {
                sample_rates.push(rate_val);
            }
        }

        let ch = range.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }

        let format = match range.sample_format() {
            cpal::SampleFormat::I16 => Some(SampleFormat::Int16),
            cpal::SampleFormat::F32 => Some(SampleFormat::Float32),
            _ => None,
        };
        if let Some(format) = format {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }

    sample_rates.sort();
    channels.sort();

    (sample_rates, channels, formats)
}
