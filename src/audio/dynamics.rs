//! Dynamics chain for APRS audio
//!
//! Three hard-edged stages applied in a fixed order:
//!
//! 1. **Noise gate**: zeroes every sample whose magnitude is below the
//!    threshold. No attack, release or hysteresis; a sample exactly at the
//!    threshold passes.
//! 2. **Compressor**: above a fixed −20 dBFS knee, the excess magnitude is
//!    divided by the ratio. There is no soft knee, so the transfer curve has
//!    a slope discontinuity at the knee.
//! 3. **Limiter**: hard-clips anything above the ceiling and counts every
//!    clipped sample.
//!
//! Each stage can be switched off independently, which makes it an identity
//! transform. Stage order and the knee position are part of the contract.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::audio::buffer::SampleBlock;
use crate::audio::level::{db_to_magnitude, LevelSnapshot};
use crate::constants::{
    COMPRESSOR_KNEE_DB, DEFAULT_COMPRESSION_RATIO, DEFAULT_LIMITER_CEILING_DB,
    DEFAULT_NOISE_GATE_DB, SILENCE_FLOOR_DB,
};
use crate::error::AudioError;

/// Tunable parameters of the chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsParameters {
    pub noise_gate_enabled: bool,
    /// Gate threshold in dBFS
    pub noise_gate_threshold_db: f64,
    pub compressor_enabled: bool,
    /// N:1 ratio applied above the fixed knee
    pub compression_ratio: f64,
    pub limiter_enabled: bool,
    /// Limiter ceiling in dBFS
    pub limiter_ceiling_db: f64,
}

impl Default for DynamicsParameters {
    fn default() -> Self {
        Self {
            noise_gate_enabled: true,
            noise_gate_threshold_db: DEFAULT_NOISE_GATE_DB,
            compressor_enabled: true,
            compression_ratio: DEFAULT_COMPRESSION_RATIO,
            limiter_enabled: true,
            limiter_ceiling_db: DEFAULT_LIMITER_CEILING_DB,
        }
    }
}

impl DynamicsParameters {
    /// Check every parameter against its accepted range
    pub fn validate(&self) -> Result<(), AudioError> {
        validate_threshold("noise gate threshold", self.noise_gate_threshold_db)?;
        validate_ratio(self.compression_ratio)?;
        validate_threshold("limiter ceiling", self.limiter_ceiling_db)?;
        Ok(())
    }
}

fn validate_threshold(name: &str, db: f64) -> Result<f64, AudioError> {
    if db.is_finite() && (SILENCE_FLOOR_DB..=0.0).contains(&db) {
        Ok(db)
    } else {
        Err(AudioError::InvalidParameter(format!(
            "{} must be between {} and 0 dB, got {}",
            name, SILENCE_FLOOR_DB, db
        )))
    }
}

fn validate_ratio(ratio: f64) -> Result<f64, AudioError> {
    if ratio.is_finite() && ratio >= 1.0 {
        Ok(ratio)
    } else {
        Err(AudioError::InvalidParameter(format!(
            "compression ratio must be at least 1.0, got {}",
            ratio
        )))
    }
}

/// Zero every sample whose magnitude is below `threshold_db`
pub fn noise_gate(samples: &mut [i16], threshold_db: f64) {
    let threshold = db_to_magnitude(threshold_db);
    for sample in samples.iter_mut() {
        if (*sample as f64).abs() < threshold {
            *sample = 0;
        }
    }
}

/// Compress the magnitude above the fixed −20 dBFS knee by `ratio`
pub fn compress(samples: &mut [i16], ratio: f64) {
    let knee = db_to_magnitude(COMPRESSOR_KNEE_DB);
    for sample in samples.iter_mut() {
        let magnitude = (*sample as f64).abs();
        if magnitude > knee {
            let compressed = knee + (magnitude - knee) / ratio;
            let signed = if *sample < 0 { -compressed } else { compressed };
            *sample = signed.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
}

/// Hard-clip everything above `ceiling_db`, keeping the sign.
///
/// Returns how many samples were clipped.
pub fn limit(samples: &mut [i16], ceiling_db: f64) -> u64 {
    let ceiling = db_to_magnitude(ceiling_db);
    let clip = ceiling.min(i16::MAX as f64) as i16;
    let mut clipped = 0;
    for sample in samples.iter_mut() {
        if (*sample as f64).abs() > ceiling {
            *sample = if *sample > 0 { clip } else { -clip };
            clipped += 1;
        }
    }
    clipped
}

/// Serialisable view of the chain's parameters and statistics
#[derive(Debug, Clone, Serialize)]
pub struct DynamicsStatus {
    pub noise_gate_enabled: bool,
    pub compressor_enabled: bool,
    pub limiter_enabled: bool,
    pub noise_gate_threshold_db: f64,
    pub compression_ratio: f64,
    pub limiter_ceiling_db: f64,
    pub peak_level_db: f64,
    pub rms_level_db: f64,
    pub clipping_count: u64,
    pub blocks_processed: u64,
}

/// Gate → compressor → limiter, shareable across threads.
///
/// Parameters may change at any time, including while a stream is feeding
/// blocks through [`DynamicsChain::process`]; each call works on a copy of
/// the parameters taken at its start.
pub struct DynamicsChain {
    params: RwLock<DynamicsParameters>,
    /// Levels of the most recent input block
    levels: RwLock<LevelSnapshot>,
    /// Never reset automatically
    clipping_count: AtomicU64,
    blocks_processed: AtomicU64,
}

impl DynamicsChain {
    /// Chain with the APRS defaults (−40 dB gate, 4:1, −3 dB ceiling)
    pub fn new() -> Self {
        Self::from_valid(DynamicsParameters::default())
    }

    /// Chain with custom parameters; rejected if any is out of range
    pub fn with_parameters(params: DynamicsParameters) -> Result<Self, AudioError> {
        params.validate()?;
        Ok(Self::from_valid(params))
    }

    fn from_valid(params: DynamicsParameters) -> Self {
        Self {
            params: RwLock::new(params),
            levels: RwLock::new(LevelSnapshot::SILENCE),
            clipping_count: AtomicU64::new(0),
            blocks_processed: AtomicU64::new(0),
        }
    }

    /// Run the enabled stages over a copy of `block`.
    ///
    /// The input is not mutated and the output always has the same shape.
    /// Peak and RMS statistics are refreshed from the input block.
    pub fn process(&self, block: &SampleBlock) -> SampleBlock {
        let params = *self.params.read();
        let mut output = block.clone();

        *self.levels.write() = LevelSnapshot::measure(block.samples());

        let samples = output.samples_mut();
        if params.noise_gate_enabled {
            noise_gate(samples, params.noise_gate_threshold_db);
        }
        if params.compressor_enabled {
            compress(samples, params.compression_ratio);
        }
        if params.limiter_enabled {
            let clipped = limit(samples, params.limiter_ceiling_db);
            if clipped > 0 {
                self.clipping_count.fetch_add(clipped, Ordering::Relaxed);
            }
        }

        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        output
    }

    pub fn parameters(&self) -> DynamicsParameters {
        *self.params.read()
    }

    /// Replace all parameters at once
    pub fn set_parameters(&self, params: DynamicsParameters) -> Result<(), AudioError> {
        params.validate()?;
        *self.params.write() = params;
        Ok(())
    }

    pub fn set_noise_gate_threshold(&self, threshold_db: f64) -> Result<(), AudioError> {
        let threshold_db = validate_threshold("noise gate threshold", threshold_db)?;
        self.params.write().noise_gate_threshold_db = threshold_db;
        Ok(())
    }

    pub fn set_compression_ratio(&self, ratio: f64) -> Result<(), AudioError> {
        let ratio = validate_ratio(ratio)?;
        self.params.write().compression_ratio = ratio;
        Ok(())
    }

    pub fn set_limiter_ceiling(&self, ceiling_db: f64) -> Result<(), AudioError> {
        let ceiling_db = validate_threshold("limiter ceiling", ceiling_db)?;
        self.params.write().limiter_ceiling_db = ceiling_db;
        Ok(())
    }

    pub fn enable_noise_gate(&self, enabled: bool) {
        self.params.write().noise_gate_enabled = enabled;
    }

    pub fn enable_compressor(&self, enabled: bool) {
        self.params.write().compressor_enabled = enabled;
    }

    pub fn enable_limiter(&self, enabled: bool) {
        self.params.write().limiter_enabled = enabled;
    }

    /// Peak level of the last processed input block, in dBFS
    pub fn peak_level(&self) -> f64 {
        self.levels.read().peak_db
    }

    /// RMS level of the last processed input block, in dBFS
    pub fn rms_level(&self) -> f64 {
        self.levels.read().rms_db
    }

    pub fn levels(&self) -> LevelSnapshot {
        *self.levels.read()
    }

    /// Total samples clipped by the limiter since creation or the last reset
    pub fn clipping_count(&self) -> u64 {
        self.clipping_count.load(Ordering::Relaxed)
    }

    pub fn reset_clipping_count(&self) {
        self.clipping_count.store(0, Ordering::Relaxed);
    }

    pub fn status(&self) -> DynamicsStatus {
        let params = self.parameters();
        let levels = self.levels();
        DynamicsStatus {
            noise_gate_enabled: params.noise_gate_enabled,
            compressor_enabled: params.compressor_enabled,
            limiter_enabled: params.limiter_enabled,
            noise_gate_threshold_db: params.noise_gate_threshold_db,
            compression_ratio: params.compression_ratio,
            limiter_ceiling_db: params.limiter_ceiling_db,
            peak_level_db: levels.peak_db,
            rms_level_db: levels.rms_db,
            clipping_count: self.clipping_count(),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
        }
    }
}

impl Default for DynamicsChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::level::peak_db;
    use proptest::prelude::*;

    fn knee() -> f64 {
        db_to_magnitude(COMPRESSOR_KNEE_DB)
    }

    fn sine_block(frames: usize, sample_rate: u32, freq: f64, amplitude: f64) -> SampleBlock {
        let samples = (0..frames)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                ((2.0 * std::f64::consts::PI * freq * t).sin() * amplitude) as i16
            })
            .collect();
        SampleBlock::new(samples, sample_rate, 1).unwrap()
    }

    #[test]
    fn test_noise_gate_boundary() {
        let threshold = db_to_magnitude(-40.0);
        let below = threshold.floor() as i16;
        let above = threshold.ceil() as i16;

        let mut samples = [below, -below, above, -above];
        noise_gate(&mut samples, -40.0);
        assert_eq!(samples, [0, 0, above, -above]);
    }

    #[test]
    fn test_noise_gate_passes_sample_at_threshold() {
        // 0 dBFS maps exactly to 32767
        let mut samples = [32767, -32767, 32766, -32768];
        noise_gate(&mut samples, 0.0);
        assert_eq!(samples, [32767, -32767, 0, -32768]);
    }

    #[test]
    fn test_compressor_leaves_knee_untouched() {
        let at_knee = knee().floor() as i16;
        let mut samples = [at_knee, -at_knee, 100, 0];
        compress(&mut samples, 4.0);
        assert_eq!(samples, [at_knee, -at_knee, 100, 0]);
    }

    #[test]
    fn test_compressor_twice_knee() {
        let knee = knee();
        let input = (2.0 * knee).round() as i16;
        let expected = knee + knee / 4.0;

        let mut samples = [input, -input];
        compress(&mut samples, 4.0);
        assert!((samples[0] as f64 - expected).abs() <= 1.0, "got {}", samples[0]);
        assert!((samples[1] as f64 + expected).abs() <= 1.0, "got {}", samples[1]);
    }

    #[test]
    fn test_compressor_full_scale() {
        let mut samples = [i16::MAX, i16::MIN];
        compress(&mut samples, 4.0);
        let knee = knee();
        assert_eq!(samples[0], (knee + (32767.0 - knee) / 4.0) as i16);
        assert_eq!(samples[1], -((knee + (32768.0 - knee) / 4.0) as i16));
    }

    #[test]
    fn test_limiter_counts_clipped_samples() {
        let ceiling = db_to_magnitude(-3.0);
        let mut samples = [32767, -32768, 100, ceiling as i16, -(ceiling as i16) - 5];
        let clipped = limit(&mut samples, -3.0);
        assert_eq!(clipped, 3);
        assert_eq!(samples[0], ceiling as i16);
        assert_eq!(samples[1], -(ceiling as i16));
        assert_eq!(samples[2], 100);
        assert_eq!(samples[4], -(ceiling as i16));
    }

    #[test]
    fn test_disabled_chain_is_identity() {
        let chain = DynamicsChain::new();
        chain.enable_noise_gate(false);
        chain.enable_compressor(false);
        chain.enable_limiter(false);

        let block = sine_block(256, 8000, 440.0, 32767.0);
        assert_eq!(chain.process(&block), block);
        assert_eq!(chain.clipping_count(), 0);
    }

    #[test]
    fn test_process_does_not_mutate_input() {
        let chain = DynamicsChain::new();
        let block = sine_block(256, 8000, 440.0, 32767.0);
        let copy = block.clone();
        let _ = chain.process(&block);
        assert_eq!(block, copy);
    }

    #[test]
    fn test_empty_block_is_identity() {
        let chain = DynamicsChain::new();
        let block = SampleBlock::new(Vec::new(), 8000, 1).unwrap();
        let out = chain.process(&block);
        assert!(out.is_empty());
        assert_eq!(chain.peak_level(), SILENCE_FLOOR_DB);
        assert_eq!(chain.rms_level(), SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_limiter_engages_on_full_scale_sine() {
        // The 4:1 compressor alone brings a full-scale peak down to about
        // -9.8 dB, below the ceiling, so measure the limiter without it.
        let chain = DynamicsChain::new();
        chain.enable_compressor(false);

        let block = sine_block(8000, 8000, 440.0, 32767.0);
        let out = chain.process(&block);

        assert!((peak_db(out.samples()) - (-3.0)).abs() < 0.1);
        assert!(chain.clipping_count() > 0);
        assert!(chain.peak_level().abs() < 0.1);
    }

    #[test]
    fn test_default_chain_on_full_scale_sine() {
        let chain = DynamicsChain::new();
        let block = sine_block(8000, 8000, 440.0, 32767.0);
        let out = chain.process(&block);

        let knee = knee();
        let expected_peak = knee + (32767.0 - knee) / 4.0;
        let peak = out.samples().iter().map(|s| (*s as f64).abs()).fold(0.0, f64::max);
        assert!((peak - expected_peak).abs() <= 2.0, "peak {}", peak);
        assert_eq!(chain.clipping_count(), 0);
    }

    #[test]
    fn test_clipping_counter_reset() {
        let chain = DynamicsChain::new();
        chain.enable_compressor(false);
        let block = SampleBlock::new(vec![32767; 16], 8000, 1).unwrap();

        chain.process(&block);
        chain.process(&block);
        assert_eq!(chain.clipping_count(), 32);

        chain.reset_clipping_count();
        assert_eq!(chain.clipping_count(), 0);
    }

    #[test]
    fn test_parameter_validation() {
        let chain = DynamicsChain::new();
        assert!(chain.set_compression_ratio(0.5).is_err());
        assert!(chain.set_compression_ratio(f64::INFINITY).is_err());
        assert!(chain.set_noise_gate_threshold(3.0).is_err());
        assert!(chain.set_limiter_ceiling(-120.0).is_err());
        assert_eq!(chain.parameters(), DynamicsParameters::default());

        chain.set_compression_ratio(8.0).unwrap();
        chain.set_noise_gate_threshold(-50.0).unwrap();
        chain.set_limiter_ceiling(-1.0).unwrap();
        let params = chain.parameters();
        assert_eq!(params.compression_ratio, 8.0);
        assert_eq!(params.noise_gate_threshold_db, -50.0);
        assert_eq!(params.limiter_ceiling_db, -1.0);
    }

    #[test]
    fn test_with_parameters_rejects_invalid() {
        let nan_ratio = DynamicsParameters {
            compression_ratio: f64::NAN,
            ..DynamicsParameters::default()
        };
        assert!(matches!(
            DynamicsChain::with_parameters(nan_ratio),
            Err(AudioError::InvalidParameter(_))
        ));

        let loud_gate = DynamicsParameters {
            noise_gate_threshold_db: 6.0,
            ..DynamicsParameters::default()
        };
        assert!(DynamicsChain::with_parameters(loud_gate).is_err());

        let chain = DynamicsChain::with_parameters(DynamicsParameters {
            compression_ratio: 2.0,
            ..DynamicsParameters::default()
        })
        .unwrap();
        assert_eq!(chain.parameters().compression_ratio, 2.0);
    }

    #[test]
    fn test_status_reflects_state() {
        let chain = DynamicsChain::new();
        chain.enable_limiter(false);
        chain.process(&SampleBlock::new(vec![16384; 8], 8000, 1).unwrap());

        let status = chain.status();
        assert!(!status.limiter_enabled);
        assert_eq!(status.blocks_processed, 1);
        assert!((status.peak_level_db + 6.02).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_shape_preserved(samples in prop::collection::vec(any::<i16>(), 0..512)) {
            let chain = DynamicsChain::new();
            let block = SampleBlock::new(samples, 8000, 1).unwrap();
            let out = chain.process(&block);
            prop_assert_eq!(out.len(), block.len());
            prop_assert_eq!(out.channels(), block.channels());
            prop_assert_eq!(out.sample_rate(), block.sample_rate());
        }

        #[test]
        fn prop_gate_silences_quiet_block(samples in prop::collection::vec(-327i16..=327, 1..256)) {
            // -40 dBFS is ~327.67, so every sample here is below it
            let mut samples = samples;
            noise_gate(&mut samples, -40.0);
            prop_assert!(samples.iter().all(|&s| s == 0));
        }

        #[test]
        fn prop_limiter_bounds_output(
            samples in prop::collection::vec(any::<i16>(), 0..512),
            ceiling_db in -40.0f64..0.0,
        ) {
            let ceiling = db_to_magnitude(ceiling_db);
            let over = samples.iter().filter(|&&s| (s as f64).abs() > ceiling).count() as u64;

            let mut samples = samples;
            let clipped = limit(&mut samples, ceiling_db);

            prop_assert_eq!(clipped, over);
            prop_assert!(samples.iter().all(|&s| (s as f64).abs() <= ceiling));
        }

        #[test]
        fn prop_chain_counter_matches_overs(samples in prop::collection::vec(any::<i16>(), 1..256)) {
            let chain = DynamicsChain::new();
            chain.enable_noise_gate(false);
            chain.enable_compressor(false);

            let ceiling = db_to_magnitude(-3.0);
            let over = samples.iter().filter(|&&s| (s as f64).abs() > ceiling).count() as u64;
            let block = SampleBlock::new(samples, 8000, 1).unwrap();
            let out = chain.process(&block);

            prop_assert_eq!(chain.clipping_count(), over);
            prop_assert!(out.samples().iter().all(|&s| (s as f64).abs() <= ceiling));
        }

        #[test]
        fn prop_compressor_never_grows_magnitude(
            samples in prop::collection::vec(any::<i16>(), 0..256),
            ratio in 1.0f64..20.0,
        ) {
            let mut out = samples.clone();
            compress(&mut out, ratio);
            for (before, after) in samples.iter().zip(&out) {
                prop_assert!((*after as i32).abs() <= (*before as i32).abs());
                prop_assert!(*before == 0 || after.signum() == before.signum() || *after == 0);
            }
        }
    }
}
