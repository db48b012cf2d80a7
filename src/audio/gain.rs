//! Gain stage
//!
//! Scales samples by a bounded scalar with a hard clamp to the 16-bit range.
//! The clamp is the only overflow protection on the gain path.

use crate::audio::buffer::SampleBlock;
use crate::constants::{MAX_GAIN, MAX_VOLUME};
use crate::error::AudioError;

/// Closed range a scalar parameter must fall in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarRange {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Input gain: `[0.0, 2.0]`
pub const GAIN_RANGE: ScalarRange = ScalarRange {
    name: "gain",
    min: 0.0,
    max: MAX_GAIN,
};

/// Output volume: `[0.0, 1.0]`
pub const VOLUME_RANGE: ScalarRange = ScalarRange {
    name: "volume",
    min: 0.0,
    max: MAX_VOLUME,
};

impl ScalarRange {
    /// Accept `value` if it lies in the range, otherwise `InvalidParameter`
    pub fn validate(&self, value: f64) -> Result<f64, AudioError> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(value)
        } else {
            Err(AudioError::InvalidParameter(format!(
                "{} must be between {:.1} and {:.1}, got {}",
                self.name, self.min, self.max, value
            )))
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.validate(value).is_ok()
    }
}

/// Scale one sample, clamping before truncation to 16 bits
#[inline]
pub fn scale_sample(sample: i16, scalar: f64) -> i16 {
    (sample as f64 * scalar).clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Apply `scalar` to interleaved samples in place.
///
/// A unity scalar is skipped; the output would be identical either way.
pub fn apply_gain_samples(samples: &mut [i16], scalar: f64) {
    if scalar == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample = scale_sample(*sample, scalar);
    }
}

/// Apply `scalar` to a block in place
pub fn apply_gain(block: &mut SampleBlock, scalar: f64) {
    apply_gain_samples(block.samples_mut(), scalar);
}
