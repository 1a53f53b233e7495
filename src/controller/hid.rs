//! Raw HID device access.
//!
//! Thin wrapper over `hidapi` used by the DualShock and Switch Pro drivers:
//! opens a device by vendor/product id, switches it to non-blocking mode and
//! drains fixed-size input reports. A stalled or failed read is reported as
//! data loss, never blocks the poll loop.

use hidapi::HidApi;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Input report buffer size; both supported pad families use 64-byte reports.
pub const REPORT_LEN: usize = 64;

/// Safety valve: maximum reports drained per poll so a chatty device cannot
/// starve the rest of the input path.
pub const MAX_REPORTS_PER_TICK: usize = 32;

#[derive(Debug, Error)]
pub enum HidError {
    #[error("HID backend unavailable: {0}")]
    Backend(String),

    #[error("HID read failed: {0}")]
    Read(String),

    #[error("HID write failed: {0}")]
    Write(String),
}

/// Shared `hidapi` context.
///
/// The backend allows a single context per process; every HID driver holds a
/// clone of this handle and locks it only for enumeration and opening.
pub type SharedHidApi = Arc<Mutex<HidApi>>;

pub fn init_hid_api() -> Result<SharedHidApi, HidError> {
    let api = HidApi::new().map_err(|e| HidError::Backend(e.to_string()))?;
    Ok(Arc::new(Mutex::new(api)))
}

/// An open HID input device plus its report buffer.
pub struct HidDevice {
    device: hidapi::HidDevice,
    buf: [u8; REPORT_LEN],
    pub vendor_id: u16,
    pub product_id: u16,
}

impl HidDevice {
    /// Open the first present device matching `vendor_id` and one of `product_ids`.
    ///
    /// Returns `Ok(None)` when no matching device is attached - absence is a
    /// normal presence-scan outcome, not an error.
    pub fn open_matching(
        api: &SharedHidApi,
        vendor_id: u16,
        product_ids: &[u16],
    ) -> Result<Option<HidDevice>, HidError> {
        let mut api = api.lock().map_err(|e| HidError::Backend(e.to_string()))?;
        if let Err(e) = api.refresh_devices() {
            return Err(HidError::Backend(e.to_string()));
        }

        let info = api.device_list().find(|info| {
            info.vendor_id() == vendor_id && product_ids.contains(&info.product_id())
        });
        let Some(info) = info else {
            return Ok(None);
        };

        let product_id = info.product_id();
        let device = match info.open_device(&api) {
            Ok(d) => d,
            Err(e) => {
                // Present but unopenable (permissions, exclusive capture):
                // treat as absent and let the next scan retry.
                warn!(
                    "Found HID device {:04x}:{:04x} but could not open it: {}",
                    vendor_id, product_id, e
                );
                return Ok(None);
            }
        };
        let _ = device.set_blocking_mode(false);

        debug!("Opened HID device {:04x}:{:04x}", vendor_id, product_id);
        Ok(Some(HidDevice {
            device,
            buf: [0u8; REPORT_LEN],
            vendor_id,
            product_id,
        }))
    }

    /// Drain one input report. `Ok(None)` means no report was pending.
    pub fn read_report(&mut self) -> Result<Option<&[u8]>, HidError> {
        match self.device.read(&mut self.buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(&self.buf[..n])),
            Err(e) => Err(HidError::Read(e.to_string())),
        }
    }

    /// Send a feature/output command (controller init sequences).
    pub fn write(&self, data: &[u8]) -> Result<(), HidError> {
        self.device
            .write(data)
            .map(|_| ())
            .map_err(|e| HidError::Write(e.to_string()))
    }
}
