//! # APRS Audio Agent
//!
//! Sound-card audio pipeline for APRS packet radio. Captures microphone
//! audio, applies gain and a dynamics chain tuned for reliable packet
//! decoding, and plays processed audio back through an output device while
//! exposing live level metering.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          StreamManager                               │
//! │                                                                      │
//! │   driver thread                         maintenance thread (100 ms)  │
//! │        │                                        │                    │
//! │        ▼                                        ▼                    │
//! │  ┌─────────────────────────── Capture ─────────────────────────────┐ │
//! │  │ on_capture_frames ─► LevelMeter (pre-gain) ─► GainStage         │ │
//! │  │        ─► DynamicsChain (gate ─► compressor ─► limiter)         │ │
//! │  │        ─► resident buffer ─► consumer callback                  │ │
//! │  └────────────────────────────────┬────────────────────────────────┘ │
//! │                                   │  [packet encoder, external]      │
//! │                                   ▼                                  │
//! │  ┌─────────────────────────── Playback ────────────────────────────┐ │
//! │  │ play_audio ─► PlaybackQueue (10 blocks, drop on full)           │ │
//! │  │        ─► on_request_frames ─► volume ─► LevelMeter (post-vol)  │ │
//! │  └────────────────────────────────┬────────────────────────────────┘ │
//! │                                   ▼                                  │
//! │                          driver (cpal / synthetic)                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The concrete driver behind each endpoint is picked once per manager by
//! [`audio::platform`]: cpal on Linux, macOS and Windows, a stub that refuses
//! to start elsewhere, and an explicitly requested synthetic tone source for
//! running the pipeline without hardware.

pub mod audio;
pub mod config;
pub mod error;

pub use error::{AudioError, Error, Result};

/// Application-wide constants
pub mod constants {
    /// Level reported for digital silence, in dBFS
    pub const SILENCE_FLOOR_DB: f64 = -96.0;

    /// Full-scale magnitude of a signed 16-bit sample
    pub const FULL_SCALE: f64 = 32767.0;

    /// Fixed compressor knee in dBFS
    pub const COMPRESSOR_KNEE_DB: f64 = -20.0;

    /// Default noise gate threshold in dBFS
    pub const DEFAULT_NOISE_GATE_DB: f64 = -40.0;

    /// Default compression ratio (N:1 above the knee)
    pub const DEFAULT_COMPRESSION_RATIO: f64 = 4.0;

    /// Default limiter ceiling in dBFS
    pub const DEFAULT_LIMITER_CEILING_DB: f64 = -3.0;

    /// Playback queue capacity in blocks
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 10;

    /// Period of the per-endpoint maintenance task in milliseconds
    pub const MAINTENANCE_PERIOD_MS: u64 = 100;

    /// Default sample rate for APRS audio (narrowband)
    pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default driver period in frames
    pub const DEFAULT_BUFFER_SIZE: u32 = 256;

    /// Default input gain
    pub const DEFAULT_GAIN: f64 = 1.2;

    /// Default output volume
    pub const DEFAULT_VOLUME: f64 = 0.8;

    /// Upper bound for input gain
    pub const MAX_GAIN: f64 = 2.0;

    /// Upper bound for output volume
    pub const MAX_VOLUME: f64 = 1.0;

    /// Maximum channel count accepted by the configuration
    pub const MAX_CHANNELS: u16 = 8;

    /// Bytes per sample (16-bit PCM)
    pub const BYTES_PER_SAMPLE: usize = 2;
}
