#![cfg(target_os = "linux")]

pub mod controls;
pub mod device;
mod ioctl;
pub mod mmap;
pub mod pixel_map;

use framequeue_core::error::Result;
use framequeue_core::traits::{DeviceInfo, Driver};

pub use controls::{PauseControl, VendorControls};
pub use device::V4l2Device;

/// V4L2 驱动入口
///
/// 本身无状态，只携带打开设备时使用的私有控制项配置。
#[derive(Debug, Clone, Default)]
pub struct V4l2Driver {
    vendor: VendorControls,
}

impl V4l2Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用驱动私有控制项 (例如 `VendorControls::fimc()`)
    pub fn with_vendor_controls(vendor: VendorControls) -> Self {
        Self { vendor }
    }

    pub fn vendor_controls(&self) -> &VendorControls {
        &self.vendor
    }
}

impl Driver for V4l2Driver {
    type Device = V4l2Device;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        device::list_devices()
    }

    fn open(&self, id: &str) -> Result<V4l2Device> {
        device::open(id, self.vendor)
    }
}

// 为了方便直接使用，提供一个默认实例
pub fn default_driver() -> V4l2Driver {
    V4l2Driver::new()
}
