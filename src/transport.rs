//! HID transport seam.
//!
//! The polling loop and feature-report framing talk to the device only
//! through [`HidTransport`], so they can run against `hidapi` in production
//! and against a scripted transport in tests.

use hidapi::{HidApi, HidDevice};

use crate::error::{TrackerError, TrackerResult};

/// Vendor id of the reference head tracker
pub const SENSOR_VENDOR_ID: u16 = 0x2833;
/// Product id of the reference head tracker
pub const SENSOR_PRODUCT_ID: u16 = 0x0001;

/// Operations the tracker needs from a HID device
pub trait HidTransport {
    /// Blocking read of one input report; returns 0 when the timeout elapsed
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> TrackerResult<usize>;

    /// Fill `buf` with the feature report whose id is in `buf[0]`
    fn get_feature_report(&mut self, buf: &mut [u8]) -> TrackerResult<usize>;

    /// Send a feature report; `data[0]` carries the report id
    fn send_feature_report(&mut self, data: &[u8]) -> TrackerResult<()>;
}

impl HidTransport for HidDevice {
    #[inline]
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> TrackerResult<usize> {
        Ok(HidDevice::read_timeout(self, buf, timeout_ms)?)
    }

    #[inline]
    fn get_feature_report(&mut self, buf: &mut [u8]) -> TrackerResult<usize> {
        Ok(HidDevice::get_feature_report(self, buf)?)
    }

    #[inline]
    fn send_feature_report(&mut self, data: &[u8]) -> TrackerResult<()> {
        Ok(HidDevice::send_feature_report(self, data)?)
    }
}

impl<T: HidTransport + ?Sized> HidTransport for Box<T> {
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> TrackerResult<usize> {
        (**self).read_timeout(buf, timeout_ms)
    }

    fn get_feature_report(&mut self, buf: &mut [u8]) -> TrackerResult<usize> {
        (**self).get_feature_report(buf)
    }

    fn send_feature_report(&mut self, data: &[u8]) -> TrackerResult<()> {
        (**self).send_feature_report(data)
    }
}

/// Enumerate HID devices and open the first one matching `vendor_id`/`product_id`.
///
/// The device is switched to blocking mode so `read_timeout` waits for data.
pub fn open_device(vendor_id: u16, product_id: u16) -> TrackerResult<HidDevice> {
    let api = HidApi::new()?;

    let info = api
        .device_list()
        .find(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
        .ok_or(TrackerError::DeviceNotFound {
            vendor_id,
            product_id,
        })?;

    tracing::info!(
        vendor = format!("{:04x}", vendor_id),
        product = format!("{:04x}", product_id),
        path = %info.path().to_string_lossy(),
        product_string = ?info.product_string(),
        "Opening head tracker"
    );

    let device = info.open_device(&api)?;
    device.set_blocking_mode(true)?;
    Ok(device)
}
