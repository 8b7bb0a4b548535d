// 开启一些 Clippy 检查，保证代码质量
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod builder;
pub mod capture;
pub mod device;
pub mod error;
pub mod frame;
pub mod pixel_format;
pub mod pool;
pub mod session;
pub mod stats;
pub mod traits;

#[cfg(any(test, feature = "simulation"))]
pub mod simulation;

// 方便用户使用的 Prelude
pub mod prelude {
    pub use crate::builder::{CaptureConfig, CaptureMode, SensorReset};
    pub use crate::capture::{CaptureLoop, LoopState};
    pub use crate::device::DeviceHandle;
    pub use crate::error::{CaptureError, Result};
    pub use crate::frame::{BufferId, Frame, FrameDescriptor};
    pub use crate::pixel_format::{FourCC, PixelFormat};
    pub use crate::pool::{BufferPool, BufferState};
    pub use crate::session::Session;
    pub use crate::traits::{BufferMemory, CaptureDevice, DeviceInfo, Driver};
}

// 版本与构建信息常量
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
