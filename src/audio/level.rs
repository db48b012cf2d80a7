//! Level metering
//!
//! RMS and peak magnitudes of interleaved 16-bit PCM mapped to dBFS.
//! Channels are not separated: a multi-channel block yields one combined
//! level.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffer::SampleBlock;
use crate::constants::{FULL_SCALE, SILENCE_FLOOR_DB};

/// Convert a linear magnitude to dBFS.
///
/// Zero (or anything not strictly positive) maps to the silence floor so
/// `log10(0)` is never taken. Values above full scale are not clamped.
pub fn magnitude_to_db(magnitude: f64) -> f64 {
    if magnitude > 0.0 {
        20.0 * (magnitude / FULL_SCALE).log10()
    } else {
        SILENCE_FLOOR_DB
    }
}

/// Convert dBFS to a linear 16-bit magnitude
pub fn db_to_magnitude(db: f64) -> f64 {
    10f64.powf(db / 20.0) * FULL_SCALE
}

/// Root-mean-square magnitude over all interleaved samples
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();
    (sum / samples.len() as f64).sqrt()
}

/// Largest absolute sample value
pub fn peak(samples: &[i16]) -> f64 {
    samples
        .iter()
        .map(|&s| (s as f64).abs())
        .fold(0.0, f64::max)
}

/// RMS level in dBFS
pub fn rms_db(samples: &[i16]) -> f64 {
    magnitude_to_db(rms(samples))
}

/// Peak level in dBFS
pub fn peak_db(samples: &[i16]) -> f64 {
    magnitude_to_db(peak(samples))
}

/// RMS level of a block in dBFS; the silence floor for empty or all-zero
/// blocks.
pub fn compute_level(block: &SampleBlock) -> f64 {
    rms_db(block.samples())
}

/// Last computed levels of a stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub rms_db: f64,
    pub peak_db: f64,
}

impl LevelSnapshot {
    /// Snapshot reporting digital silence
    pub const SILENCE: Self = Self {
        rms_db: SILENCE_FLOOR_DB,
        peak_db: SILENCE_FLOOR_DB,
    };

    /// Measure both levels in one pass over the samples
    pub fn measure(samples: &[i16]) -> Self {
        if samples.is_empty() {
            return Self::SILENCE;
        }

        let mut sum = 0.0;
        let mut peak = 0.0f64;
        for &s in samples {
            let s = s as f64;
            sum += s * s;
            peak = peak.max(s.abs());
        }

        Self {
            rms_db: magnitude_to_db((sum / samples.len() as f64).sqrt()),
            peak_db: magnitude_to_db(peak),
        }
    }
}

impl Default for LevelSnapshot {
    fn default() -> Self {
        Self::SILENCE
    }
}

/// `f64` cell shared between a driver callback and readers.
///
/// Stored as raw bits in an `AtomicU64` so the audio thread never takes a
/// lock to publish a level or read a gain.
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
