//! Stream manager
//!
//! Facade over one capture endpoint, one playback endpoint and the shared
//! dynamics chain. Input must be running before output may start. Teardown
//! never fails: sub-errors are logged and the remaining steps still run.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audio::backend::{AudioBackend, BackendKind};
use crate::audio::buffer::SampleBlock;
use crate::audio::capture::{AudioCapture, CaptureCallback, CaptureEndpoint, CaptureStats};
use crate::audio::device::{log_devices, DeviceCatalog, DeviceDescriptor};
use crate::audio::dynamics::{DynamicsChain, DynamicsParameters, DynamicsStatus};
use crate::audio::endpoint::EndpointState;
use crate::audio::platform::{open_catalog, select_backend, Platform};
use crate::audio::playback::{AudioPlayback, PlaybackEndpoint, PlaybackStats};
use crate::config::AppConfig;
use crate::constants::SILENCE_FLOOR_DB;
use crate::error::AudioError;

#[derive(Debug, Clone, Serialize)]
pub struct InputStatus {
    pub state: EndpointState,
    pub device: Option<String>,
    pub level_db: f64,
    pub gain: f64,
    pub stats: CaptureStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputStatus {
    pub state: EndpointState,
    pub device: Option<String>,
    pub level_db: f64,
    pub volume: f64,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub stats: PlaybackStats,
}

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub platform: String,
    pub backend: BackendKind,
    pub running: bool,
    pub aprs_mode: bool,
    pub input: Option<InputStatus>,
    pub output: Option<OutputStatus>,
    pub dynamics: Option<DynamicsStatus>,
}

pub struct StreamManager {
    input: Option<Box<dyn CaptureEndpoint>>,
    output: Option<Box<dyn PlaybackEndpoint>>,
    dynamics: Option<Arc<DynamicsChain>>,
    catalog: Arc<dyn DeviceCatalog>,
    platform: Platform,
    backend_kind: BackendKind,
    config: RwLock<AppConfig>,
}

fn validate_config(config: &AppConfig) -> Result<(), AudioError> {
    config
        .validate()
        .map_err(|e| AudioError::InvalidParameter(e.to_string()))
}

impl StreamManager {
    /// Build a manager for the host platform; the configuration is validated
    /// before any host or device is touched
    pub fn new(config: AppConfig) -> Result<Self, AudioError> {
        validate_config(&config)?;

        let platform = Platform::detect();
        let preference = config.system.backend;
        let catalog = open_catalog(&platform, preference);
        let backend = select_backend(&platform, preference, &config.system);

        tracing::info!("Audio platform: {} ({:?} backend)", platform, backend.kind());

        Self::with_backend(config, catalog, backend)
    }

    /// Build a manager over an explicit catalog and backend
    pub fn with_backend(
        config: AppConfig,
        catalog: Arc<dyn DeviceCatalog>,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self, AudioError> {
        validate_config(&config)?;

        let dynamics = Arc::new(DynamicsChain::with_parameters(config.audio.dynamics)?);

        let input = AudioCapture::new(config.audio.input.clone(), catalog.clone(), backend.clone())?;
        if config.system.aprs_mode {
            input.set_dynamics(Some(dynamics.clone()));
        }
        let output = AudioPlayback::new(config.audio.output.clone(), catalog.clone(), backend.clone())?;

        Ok(Self {
            input: Some(Box::new(input)),
            output: Some(Box::new(output)),
            dynamics: Some(dynamics),
            catalog,
            platform: Platform::detect(),
            backend_kind: backend.kind(),
            config: RwLock::new(config),
        })
    }

    /// Assemble a manager from individual parts; any of them may be absent
    pub fn from_parts(
        config: AppConfig,
        catalog: Arc<dyn DeviceCatalog>,
        backend_kind: BackendKind,
        input: Option<Box<dyn CaptureEndpoint>>,
        output: Option<Box<dyn PlaybackEndpoint>>,
        dynamics: Option<Arc<DynamicsChain>>,
    ) -> Self {
        Self {
            input,
            output,
            dynamics,
            catalog,
            platform: Platform::detect(),
            backend_kind,
            config: RwLock::new(config),
        }
    }

    fn input(&self) -> Result<&dyn CaptureEndpoint, AudioError> {
        self.input.as_deref().ok_or(AudioError::NotInitialized("audio input"))
    }

    fn output(&self) -> Result<&dyn PlaybackEndpoint, AudioError> {
        self.output.as_deref().ok_or(AudioError::NotInitialized("audio output"))
    }

    fn chain(&self) -> Result<&Arc<DynamicsChain>, AudioError> {
        self.dynamics.as_ref().ok_or(AudioError::NotInitialized("dynamics processor"))
    }

    pub fn start_input(&self, cancel: &CancellationToken) -> Result<(), AudioError> {
        self.input()?.start(cancel)?;
        tracing::info!("Audio input stream started");
        Ok(())
    }

    /// Start playback; input has to be running first
    pub fn start_output(&self, cancel: &CancellationToken) -> Result<(), AudioError> {
        let input_running = self.input.as_ref().map_or(false, |i| i.is_running());
        if !input_running {
            return Err(AudioError::InputNotStarted);
        }
        self.output()?.start(cancel)?;
        tracing::info!("Audio output stream started");
        Ok(())
    }

    /// Stop both streams, logging rather than returning failures
    pub fn stop(&self) {
        if let Some(input) = &self.input {
            if let Err(e) = input.stop() {
                tracing::error!("Failed to stop audio input: {}", e);
            }
        }
        if let Some(output) = &self.output {
            if let Err(e) = output.stop() {
                tracing::error!("Failed to stop audio output: {}", e);
            }
        }
        tracing::info!("Audio streams stopped");
    }

    /// Stop, then close both endpoints and the device catalog
    pub fn close(&self) {
        self.stop();

        if let Some(input) = &self.input {
            if let Err(e) = input.close() {
                tracing::error!("Failed to close audio input: {}", e);
            }
        }
        if let Some(output) = &self.output {
            if let Err(e) = output.close() {
                tracing::error!("Failed to close audio output: {}", e);
            }
        }
        if let Err(e) = self.catalog.close() {
            tracing::error!("Failed to close device catalog: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.input.as_ref().map_or(false, |i| i.is_running())
    }

    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        log_devices(self.catalog.as_ref());
        self.catalog.list_devices()
    }

    /// Input level in dBFS; the silence floor when there is no input
    pub fn input_level(&self) -> f64 {
        self.input.as_ref().map_or(SILENCE_FLOOR_DB, |i| i.level())
    }

    /// Output level in dBFS; the silence floor when there is no output
    pub fn output_level(&self) -> f64 {
        self.output.as_ref().map_or(SILENCE_FLOOR_DB, |o| o.level())
    }

    pub fn set_input_gain(&self, gain: f64) -> Result<(), AudioError> {
        self.input()?.set_gain(gain)
    }

    pub fn set_output_volume(&self, volume: f64) -> Result<(), AudioError> {
        self.output()?.set_volume(volume)
    }

    pub fn set_input_callback(&self, callback: Option<CaptureCallback>) -> Result<(), AudioError> {
        self.input()?.set_callback(callback);
        Ok(())
    }

    pub fn play_audio(&self, block: SampleBlock) -> Result<(), AudioError> {
        self.output()?.play_audio(block)
    }

    pub fn set_noise_gate_threshold(&self, threshold_db: f64) -> Result<(), AudioError> {
        self.chain()?.set_noise_gate_threshold(threshold_db)
    }

    pub fn set_compression_ratio(&self, ratio: f64) -> Result<(), AudioError> {
        self.chain()?.set_compression_ratio(ratio)
    }

    pub fn set_limiter_ceiling(&self, ceiling_db: f64) -> Result<(), AudioError> {
        self.chain()?.set_limiter_ceiling(ceiling_db)
    }

    pub fn set_dynamics_parameters(&self, params: DynamicsParameters) -> Result<(), AudioError> {
        self.chain()?.set_parameters(params)
    }

    pub fn enable_noise_gate(&self, enabled: bool) -> Result<(), AudioError> {
        self.chain()?.enable_noise_gate(enabled);
        Ok(())
    }

    pub fn enable_compressor(&self, enabled: bool) -> Result<(), AudioError> {
        self.chain()?.enable_compressor(enabled);
        Ok(())
    }

    pub fn enable_limiter(&self, enabled: bool) -> Result<(), AudioError> {
        self.chain()?.enable_limiter(enabled);
        Ok(())
    }

    /// Run a block through the dynamics chain directly
    pub fn process(&self, block: &SampleBlock) -> Result<SampleBlock, AudioError> {
        Ok(self.chain()?.process(block))
    }

    pub fn dynamics(&self) -> Option<Arc<DynamicsChain>> {
        self.dynamics.clone()
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration of both endpoints and the chain.
    ///
    /// Only allowed while both streams are stopped.
    pub fn update_config(&self, config: AppConfig) -> Result<(), AudioError> {
        let mut current = self.config.write();

        let output_running = self.output.as_ref().map_or(false, |o| o.is_running());
        if self.is_running() || output_running {
            return Err(AudioError::InvalidOperation(
                "cannot update configuration while streams are running".into(),
            ));
        }
        validate_config(&config)?;

        if let Some(input) = &self.input {
            input.update_config(config.audio.input.clone())?;
        }
        if let Some(output) = &self.output {
            output.update_config(config.audio.output.clone())?;
        }
        if let Some(chain) = &self.dynamics {
            chain.set_parameters(config.audio.dynamics)?;
            if let Some(input) = &self.input {
                let attached = config.system.aprs_mode.then(|| chain.clone());
                input.set_dynamics(attached);
            }
        }

        *current = config;
        tracing::info!("Audio configuration updated");
        Ok(())
    }

    pub fn status(&self) -> ManagerStatus {
        let input = self.input.as_ref().map(|i| InputStatus {
            state: i.state(),
            device: i.device_name(),
            level_db: i.level(),
            gain: i.gain(),
            stats: i.stats(),
        });
        let output = self.output.as_ref().map(|o| OutputStatus {
            state: o.state(),
            device: o.device_name(),
            level_db: o.level(),
            volume: o.volume(),
            queue_size: o.queue_size(),
            queue_capacity: o.queue_capacity(),
            stats: o.stats(),
        });

        ManagerStatus {
            platform: self.platform.to_string(),
            backend: self.backend_kind,
            running: self.is_running(),
            aprs_mode: self.config.read().system.aprs_mode,
            input,
            output,
            dynamics: self.dynamics.as_ref().map(|d| d.status()),
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::SyntheticBackend;
    use crate::audio::device::StaticCatalog;
    use crate::audio::test_support::ManualBackend;
    use crate::constants::PLAYBACK_QUEUE_CAPACITY;
    use std::time::Duration;

    fn manual_manager(config: AppConfig) -> (StreamManager, Arc<StaticCatalog>) {
        let catalog = Arc::new(StaticCatalog::synthetic());
        let manager =
            StreamManager::with_backend(config, catalog.clone(), Arc::new(ManualBackend::new())).unwrap();
        (manager, catalog)
    }

    fn empty_manager() -> StreamManager {
        StreamManager::from_parts(
            AppConfig::default(),
            Arc::new(StaticCatalog::empty()),
            BackendKind::Unsupported,
            None,
            None,
            None,
        )
    }

    #[test]
    fn test_output_requires_input() {
        let (manager, _) = manual_manager(AppConfig::default());
        let cancel = CancellationToken::new();

        assert_eq!(manager.start_output(&cancel), Err(AudioError::InputNotStarted));

        manager.start_input(&cancel).unwrap();
        manager.start_output(&cancel).unwrap();
        assert!(manager.is_running());

        manager.stop();
        assert!(!manager.is_running());
        assert_eq!(manager.status().output.unwrap().state, EndpointState::Stopped);
    }

    #[test]
    fn test_close_closes_catalog_and_is_repeatable() {
        let (manager, catalog) = manual_manager(AppConfig::default());
        let cancel = CancellationToken::new();
        manager.start_input(&cancel).unwrap();

        manager.close();
        manager.close();
        assert!(catalog.is_closed());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_missing_parts_are_not_initialized() {
        let manager = empty_manager();
        assert_eq!(manager.set_input_gain(1.0), Err(AudioError::NotInitialized("audio input")));
        assert_eq!(manager.set_output_volume(0.5), Err(AudioError::NotInitialized("audio output")));
        assert_eq!(
            manager.set_noise_gate_threshold(-30.0),
            Err(AudioError::NotInitialized("dynamics processor"))
        );
        assert!(manager.set_compression_ratio(2.0).is_err());
        assert!(manager.set_limiter_ceiling(-1.0).is_err());
        assert!(manager.enable_limiter(false).is_err());
        assert!(manager.start_input(&CancellationToken::new()).is_err());
        assert_eq!(manager.input_level(), SILENCE_FLOOR_DB);
        assert_eq!(manager.output_level(), SILENCE_FLOOR_DB);

        // Teardown still completes
        manager.close();
    }

    #[test]
    fn test_pass_through_setters() {
        let (manager, _) = manual_manager(AppConfig::default());

        manager.set_input_gain(1.5).unwrap();
        assert!(manager.set_input_gain(2.5).is_err());
        manager.set_output_volume(0.5).unwrap();
        manager.set_noise_gate_threshold(-50.0).unwrap();
        manager.set_compression_ratio(2.0).unwrap();
        manager.set_limiter_ceiling(-1.0).unwrap();
        assert!(manager.set_limiter_ceiling(3.0).is_err());

        let status = manager.status();
        assert_eq!(status.input.unwrap().gain, 1.5);
        assert_eq!(status.output.unwrap().volume, 0.5);
        let dynamics = status.dynamics.unwrap();
        assert_eq!(dynamics.noise_gate_threshold_db, -50.0);
        assert_eq!(dynamics.compression_ratio, 2.0);
        assert_eq!(dynamics.limiter_ceiling_db, -1.0);
    }

    #[test]
    fn test_play_audio_pass_through() {
        let (manager, _) = manual_manager(AppConfig::default());
        let block = SampleBlock::silence(256, 8000, 1);

        assert_eq!(manager.play_audio(block.clone()), Err(AudioError::NotRunning));

        let cancel = CancellationToken::new();
        manager.start_input(&cancel).unwrap();
        manager.start_output(&cancel).unwrap();
        manager.play_audio(block).unwrap();
        assert_eq!(manager.status().output.unwrap().queue_size, 1);
    }

    #[test]
    fn test_update_config_only_when_stopped() {
        let (manager, _) = manual_manager(AppConfig::default());
        let cancel = CancellationToken::new();
        manager.start_input(&cancel).unwrap();

        let mut config = AppConfig::default();
        config.audio.input.buffer_size = 128;
        config.audio.dynamics.compression_ratio = 8.0;
        assert!(matches!(
            manager.update_config(config.clone()),
            Err(AudioError::InvalidOperation(_))
        ));

        manager.stop();
        manager.update_config(config).unwrap();
        assert_eq!(manager.config().audio.input.buffer_size, 128);
        assert_eq!(manager.dynamics().unwrap().parameters().compression_ratio, 8.0);
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let (manager, _) = manual_manager(AppConfig::default());
        let mut config = AppConfig::default();
        config.audio.output.volume = 3.0;
        assert!(matches!(
            manager.update_config(config),
            Err(AudioError::InvalidParameter(_))
        ));
        assert_eq!(manager.config(), AppConfig::default());
    }

    #[test]
    fn test_process_uses_chain() {
        let (manager, _) = manual_manager(AppConfig::default());
        let block = SampleBlock::new(vec![100, -100, 0, 5], 8000, 1).unwrap();
        let processed = manager.process(&block).unwrap();
        assert_eq!(processed.samples(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_status_serializes() {
        let (manager, _) = manual_manager(AppConfig::default());
        let json = serde_json::to_value(manager.status()).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["input"]["state"], "stopped");
        assert_eq!(json["backend"], "native");
        assert_eq!(json["output"]["queue_size"], 0);
        assert_eq!(json["output"]["queue_capacity"], PLAYBACK_QUEUE_CAPACITY);
    }

    #[test]
    fn test_construction_rejects_out_of_range_config() {
        let backend = Arc::new(ManualBackend::new());

        let mut config = AppConfig::default();
        config.audio.input.gain = 5.0;
        let result = StreamManager::with_backend(config, Arc::new(StaticCatalog::synthetic()), backend.clone());
        assert!(matches!(result, Err(AudioError::InvalidParameter(_))));

        let mut config = AppConfig::default();
        config.audio.dynamics.compression_ratio = f64::NAN;
        let result = StreamManager::with_backend(config, Arc::new(StaticCatalog::synthetic()), backend.clone());
        assert!(matches!(result, Err(AudioError::InvalidParameter(_))));

        assert_eq!(backend.opened_count(), 0);
    }

    #[test]
    fn test_synthetic_pipeline_end_to_end() {
        let mut config = AppConfig::default();
        config.system.backend = crate::audio::platform::BackendPreference::Synthetic;
        let manager = StreamManager::with_backend(
            config,
            Arc::new(StaticCatalog::synthetic()),
            Arc::new(SyntheticBackend::new()),
        )
        .unwrap();

        let captured = Arc::new(parking_lot::Mutex::new(0usize));
        let counter = captured.clone();
        manager
            .set_input_callback(Some(Arc::new(move |bytes: &[u8], frames: usize| {
                assert_eq!(bytes.len(), frames * 2);
                *counter.lock() += frames;
            })))
            .unwrap();

        let cancel = CancellationToken::new();
        manager.start_input(&cancel).unwrap();
        manager.start_output(&cancel).unwrap();

        for _ in 0..100 {
            if *captured.lock() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        manager.close();

        assert!(*captured.lock() >= 256);
        assert!(manager.input_level() > SILENCE_FLOOR_DB);
        let dynamics = manager.dynamics().unwrap().status();
        assert!(dynamics.blocks_processed > 0);
    }
}
