//! Accelerator reservation and per-device locking.
//!
//! A [`DeviceReservation`] names the accelerators an invocation may see; it is
//! rendered into `CUDA_VISIBLE_DEVICES` for the child process. [`DeviceLocks`]
//! turns the reservation into mutual exclusion so that invocations running
//! concurrently in one process never share a device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{PrecomputeError, Result};

/// Environment variable restricting which accelerators the child can see.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

/// Accelerator devices reserved for an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DeviceReservation {
    devices: Vec<u32>,
}

impl DeviceReservation {
    /// Reserve exactly one device.
    pub fn single(index: u32) -> Self {
        Self {
            devices: vec![index],
        }
    }

    /// Reserve a list of devices. Duplicates are dropped, order is kept.
    pub fn new(devices: Vec<u32>) -> Result<Self> {
        let mut seen = Vec::with_capacity(devices.len());
        for d in devices {
            if !seen.contains(&d) {
                seen.push(d);
            }
        }
        let reservation = Self { devices: seen };
        reservation.validate()?;
        Ok(reservation)
    }

    pub fn devices(&self) -> &[u32] {
        &self.devices
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(PrecomputeError::EmptyDeviceReservation);
        }
        Ok(())
    }

    /// Value for [`VISIBLE_DEVICES_ENV`], e.g. `"0"` or `"0,2"`.
    pub fn visible_devices(&self) -> String {
        self.devices
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for DeviceReservation {
    fn default() -> Self {
        Self::single(0)
    }
}

/// Registry of per-device async locks.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<u32, Arc<AsyncMutex<()>>>>,
}

/// Holds every device of a reservation until dropped.
#[derive(Debug)]
pub struct DeviceGuard {
    devices: Vec<u32>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DeviceGuard {
    pub fn devices(&self) -> &[u32] {
        &self.devices
    }
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every batch runner.
    pub fn global() -> &'static DeviceLocks {
        static GLOBAL: OnceLock<DeviceLocks> = OnceLock::new();
        GLOBAL.get_or_init(DeviceLocks::new)
    }

    fn lock_for(&self, device: u32) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(device)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait until every reserved device is free and lock them.
    ///
    /// Devices are locked in ascending index order so two overlapping
    /// reservations cannot deadlock each other.
    pub async fn acquire(&self, reservation: &DeviceReservation) -> Result<DeviceGuard> {
        reservation.validate()?;

        let mut ordered = reservation.devices().to_vec();
        ordered.sort_unstable();

        let mut guards = Vec::with_capacity(ordered.len());
        for device in &ordered {
            debug!(device, "Waiting for device");
            guards.push(self.lock_for(*device).lock_owned().await);
        }

        Ok(DeviceGuard {
            devices: ordered,
            _guards: guards,
        })
    }
}
