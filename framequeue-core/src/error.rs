use std::time::Duration;

use thiserror::Error;

use crate::pixel_format::PixelFormat;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device unavailable: {id}: {reason}")]
    DeviceUnavailable { id: String, reason: String },

    #[error("Format not supported by device: {width}x{height} {format}")]
    UnsupportedFormat {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("Buffer allocation failed: requested {requested}, granted {granted}: {reason}")]
    AllocationFailed {
        requested: u32,
        granted: u32,
        reason: String,
    },

    #[error("No frame ready within {0:?}")]
    CaptureTimeout(Duration),

    #[error("All {held} buffers are held by the consumer, none queued for capture")]
    BuffersExhausted { held: usize },

    #[error("Invalid capture state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    DeviceError(#[from] std::io::Error),
}

impl CaptureError {
    /// 该错误是否意味着需要完整复位 (close → reopen → set_format → start)
    pub fn needs_reset(&self) -> bool {
        matches!(self, Self::DeviceError(_) | Self::DeviceUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
