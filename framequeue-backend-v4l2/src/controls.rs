use std::io;

use v4l::control::{Control, Value};
use v4l::Device;

// --- 手动定义 V4L2 控制项常量 (Linux ABI) ---
// 来源: /usr/include/linux/v4l2-controls.h 与 Samsung FIMC 私有头文件

const V4L2_CID_PRIVATE_BASE: u32 = 0x0800_0000;

const CID_FIMC_JPEG_MAIN_SIZE: u32 = V4L2_CID_PRIVATE_BASE + 32;
const CID_FIMC_JPEG_MAIN_OFFSET: u32 = V4L2_CID_PRIVATE_BASE + 33;
const CID_FIMC_STREAM_PAUSE: u32 = V4L2_CID_PRIVATE_BASE + 53;

/// 暂停/恢复出帧的私有控制项及其取值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseControl {
    pub id: u32,
    pub paused_value: i64,
    pub running_value: i64,
}

/// 驱动私有控制项
///
/// 标准 V4L2 没有 "暂停出帧" 与 "JPEG 主图位置" 的概念，
/// 各家 ISP 用私有 CID 实现，这里只记录 ID，由设备在需要时读写。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VendorControls {
    /// 未设置时 pause()/resume() 返回 Unsupported
    pub stream_pause: Option<PauseControl>,

    /// 压缩帧中主 JPEG 的字节偏移
    pub jpeg_main_offset: Option<u32>,

    /// 压缩帧中主 JPEG 的字节数
    pub jpeg_main_size: Option<u32>,
}

impl VendorControls {
    /// 无私有控制项 (标准 UVC 等设备)
    pub fn none() -> Self {
        Self::default()
    }

    /// Samsung S5PC11x FIMC 的控制项
    pub fn fimc() -> Self {
        Self {
            stream_pause: Some(PauseControl {
                id: CID_FIMC_STREAM_PAUSE,
                paused_value: 0,
                running_value: 1,
            }),
            jpeg_main_offset: Some(CID_FIMC_JPEG_MAIN_OFFSET),
            jpeg_main_size: Some(CID_FIMC_JPEG_MAIN_SIZE),
        }
    }

    pub(crate) fn set_paused(&self, dev: &Device, paused: bool) -> io::Result<()> {
        let ctrl = self.stream_pause.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "device has no stream pause control",
            )
        })?;

        let value = if paused {
            ctrl.paused_value
        } else {
            ctrl.running_value
        };

        dev.set_control(Control {
            id: ctrl.id,
            value: Value::Integer(value),
        })
    }

    /// 读取主 JPEG 偏移；未配置时返回 `None`
    pub(crate) fn jpeg_offset(&self, dev: &Device) -> io::Result<Option<u32>> {
        match self.jpeg_main_offset {
            Some(id) => read_integer(dev, id).map(Some),
            None => Ok(None),
        }
    }

    /// 读取主 JPEG 大小；未配置时返回 `None`
    pub(crate) fn jpeg_size(&self, dev: &Device) -> io::Result<Option<u32>> {
        match self.jpeg_main_size {
            Some(id) => read_integer(dev, id).map(Some),
            None => Ok(None),
        }
    }
}

fn read_integer(dev: &Device, id: u32) -> io::Result<u32> {
    let ctrl = dev.control(id)?;
    match ctrl.value {
        Value::Integer(v) if v >= 0 => Ok(v as u32),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("control {:#x} returned {:?}", id, ctrl.value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fimc_pause_polarity() {
        let fimc = VendorControls::fimc();
        let pause = fimc.stream_pause.unwrap();
        assert_eq!(pause.id, 0x0800_0035);
        assert_eq!(pause.paused_value, 0);
        assert_eq!(pause.running_value, 1);
        assert_eq!(fimc.jpeg_main_offset, Some(0x0800_0021));
        assert_eq!(fimc.jpeg_main_size, Some(0x0800_0020));
    }

    #[test]
    fn none_has_no_controls() {
        assert_eq!(VendorControls::none(), VendorControls::default());
        assert!(VendorControls::none().stream_pause.is_none());
    }
}
