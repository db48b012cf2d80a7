//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod dynamics;
pub mod endpoint;
pub mod gain;
pub mod level;
pub mod manager;
pub mod platform;
pub mod playback;

#[cfg(test)]
pub(crate) mod test_support;

pub use buffer::{PlaybackQueue, SampleBlock};
pub use capture::{AudioCapture, CaptureCallback, CaptureEndpoint};
pub use device::{DeviceCatalog, DeviceDescriptor, Direction};
pub use dynamics::{DynamicsChain, DynamicsParameters};
pub use endpoint::{EndpointState, StreamEndpoint};
pub use level::compute_level;
pub use manager::StreamManager;
pub use playback::{AudioPlayback, PlaybackEndpoint};
