//! Shared stream endpoint machinery
//!
//! Both endpoint variants follow the same lifecycle: resolve a device from
//! the catalog, open a driver stream through the backend, then run a
//! 100 ms maintenance task next to the driver until `stop`.

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audio::backend::DriverStream;
use crate::audio::device::{DeviceCatalog, DeviceDescriptor, Direction};
use crate::config::StreamParams;
use crate::constants::MAINTENANCE_PERIOD_MS;
use crate::error::AudioError;

/// Lifecycle state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointState {
    Stopped,
    Running,
}

/// Contract shared by capture and playback endpoints.
///
/// All methods take `&self`; endpoints are shared between the control
/// thread, the driver callback and the maintenance task.
pub trait StreamEndpoint: Send + Sync {
    /// Resolve the device, open the driver and start the maintenance task.
    ///
    /// `cancel` only governs the maintenance task; the driver keeps running
    /// until [`StreamEndpoint::stop`].
    fn start(&self, cancel: &CancellationToken) -> Result<(), AudioError>;

    /// Stop the maintenance task and release the driver. Idempotent and
    /// never fails.
    fn stop(&self) -> Result<(), AudioError>;

    /// Stop, then release everything else the endpoint holds. Idempotent.
    fn close(&self) -> Result<(), AudioError>;

    fn state(&self) -> EndpointState;

    fn is_running(&self) -> bool {
        self.state() == EndpointState::Running
    }

    /// Most recent level in dBFS
    fn level(&self) -> f64;

    /// Copy of the resident buffer (`buffer_size * channels * 2` bytes)
    fn buffer(&self) -> Vec<u8>;

    /// Name of the device in use, while running
    fn device_name(&self) -> Option<String>;
}

/// Pick the device an endpoint should open.
///
/// An explicit name is looked up as-is, otherwise the catalog's default for
/// `direction` is used. Missing devices and unsupported stream shapes both
/// surface as `DeviceUnavailable`.
pub fn resolve_device(
    catalog: &dyn DeviceCatalog,
    requested: Option<&str>,
    direction: Direction,
    params: &StreamParams,
) -> Result<DeviceDescriptor, AudioError> {
    let lookup = match requested {
        Some(name) => catalog.get_device_by_name(name, direction),
        None => catalog.get_default_device(direction),
    };
    let device = lookup.map_err(|e| match e {
        AudioError::DeviceNotFound(what) => AudioError::DeviceUnavailable(what),
        other => other,
    })?;

    if !catalog.is_device_supported(
        &device.name,
        direction,
        params.sample_rate,
        params.channels,
        params.format,
    ) {
        return Err(AudioError::DeviceUnavailable(format!(
            "{} does not support {} Hz, {} ch, {:?}",
            device.name, params.sample_rate, params.channels, params.format
        )));
    }

    tracing::debug!("Resolved {} device: {}", direction, device.name);
    Ok(device)
}

/// Periodic task on its own thread.
///
/// Observes the cancellation token once per period and exits when it is
/// cancelled. `stop` tears it down synchronously, except when called from
/// the task's own thread: the task is then signalled and left to exit after
/// the current tick.
pub(crate) struct MaintenanceTask {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub(crate) fn spawn<F>(
        name: String,
        period: Duration,
        cancel: CancellationToken,
        mut on_tick: F,
    ) -> Result<Self, AudioError>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let ticker = tick(period);
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            // A pending stop wins over a tick that is ready too
                            if !stop_rx.is_empty() {
                                break;
                            }
                            if cancel.is_cancelled() {
                                tracing::debug!("Maintenance task cancelled");
                                break;
                            }
                            on_tick();
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// True when called from inside `on_tick`
    pub(crate) fn is_current_thread(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |h| h.thread().id() == thread::current().id())
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!("Maintenance task stopped from its own thread; not joining");
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An open driver stream together with its maintenance task
pub(crate) struct ActiveStream {
    driver: Arc<Mutex<Box<dyn DriverStream>>>,
    /// Set when shutdown runs inside a tick; the tick closes the driver
    close_pending: Arc<AtomicBool>,
    task: MaintenanceTask,
}

impl ActiveStream {
    /// Start the maintenance task for an opened driver. The driver is
    /// closed again if the task cannot be spawned.
    pub(crate) fn launch(
        name: &str,
        driver: Box<dyn DriverStream>,
        cancel: &CancellationToken,
    ) -> Result<Self, AudioError> {
        let driver = Arc::new(Mutex::new(driver));
        let close_pending = Arc::new(AtomicBool::new(false));
        let ticking = driver.clone();
        let pending = close_pending.clone();

        let task = MaintenanceTask::spawn(
            format!("{}-maintenance", name),
            Duration::from_millis(MAINTENANCE_PERIOD_MS),
            cancel.clone(),
            move || {
                let mut driver = ticking.lock();
                driver.tick();
                if pending.swap(false, Ordering::AcqRel) {
                    driver.close();
                }
            },
        );

        match task {
            Ok(task) => Ok(Self {
                driver,
                close_pending,
                task,
            }),
            Err(e) => {
                driver.lock().close();
                Err(e)
            }
        }
    }

    pub(crate) fn maintenance_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task first so no tick races the driver teardown.
    ///
    /// From inside a tick (a consumer callback stopping its own endpoint)
    /// the driver lock is already held on this thread, so the close is
    /// deferred to the end of that tick.
    pub(crate) fn shutdown(self) {
        if self.task.is_current_thread() {
            self.close_pending.store(true, Ordering::Release);
            self.task.stop();
            return;
        }
        self.task.stop();
        self.driver.lock().close();
    }
}
