use std::io;
use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;
use crate::pixel_format::PixelFormat;

/// 设备基本信息，仅用于标记输出元数据，不参与控制流
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// 对用户友好的显示名称 (e.g. "s5k4ecgx")
    pub name: String,

    /// 唯一设备 ID (e.g. "/dev/video0")，用于 Driver::open 的参数
    pub id: String,

    /// 内核驱动名 (e.g. "s3c-fimc")
    pub driver: String,

    /// 硬件总线信息 (可选)
    pub bus_info: Option<String>,

    pub capabilities: Capabilities,
}

bitflags! {
    /// 设备能力 (VIDIOC_QUERYCAP 的子集)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const STREAMING = 0x0400_0000;
    }
}

/// 驱动实际应用的格式 (VIDIOC_S_FMT 返回值)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedFormat {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// 每行字节数，压缩格式为 0
    pub bytes_per_line: u32,
    /// 单帧最大字节数，0 表示驱动未给出
    pub size_image: u32,
}

/// VIDIOC_DQBUF 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    /// 驱动时间戳 (CLOCK_MONOTONIC)
    pub timestamp: Duration,
    /// 压缩容器中主 payload 的偏移 (例如 ISP 直出 JPEG)
    pub payload_offset: Option<u32>,
}

/// 一块映射到进程空间的帧内存
///
/// Drop 即解除映射，Pool 以此保证失败路径不泄漏映射。
pub trait BufferMemory: Send {
    fn as_slice(&self) -> &[u8];

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 采集设备的 ioctl 级别抽象
///
/// 各方法与 V4L2 调用一一对应，上层状态机只通过这里驱动硬件。
pub trait CaptureDevice: Send {
    type Memory: BufferMemory;

    fn info(&self) -> &DeviceInfo;

    /// VIDIOC_ENUM_FMT
    fn supported_formats(&mut self) -> io::Result<Vec<PixelFormat>>;

    /// VIDIOC_S_FMT，返回驱动调整后的格式
    fn apply_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat>;

    /// VIDIOC_TRY_FMT：只询问驱动会如何调整，不改变设备状态
    fn try_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat>;

    /// VIDIOC_REQBUFS，返回实际分配的数量；`count == 0` 释放驱动侧缓冲
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// VIDIOC_QUERYBUF + mmap
    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Memory>;

    /// VIDIOC_QBUF
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// VIDIOC_DQBUF
    fn dequeue(&mut self) -> io::Result<Dequeued>;

    /// poll(POLLIN | POLLERR)，超时返回 `Ok(false)`
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// VIDIOC_STREAMON
    fn stream_on(&mut self) -> io::Result<()>;

    /// VIDIOC_STREAMOFF，驱动侧所有缓冲回到用户态
    fn stream_off(&mut self) -> io::Result<()>;

    /// 暂停/恢复出帧，不影响缓冲归属
    fn set_paused(&mut self, paused: bool) -> io::Result<()>;

    /// VIDIOC_S_INPUT
    fn select_input(&mut self, index: u32) -> io::Result<()>;
}

/// 驱动入口：设备枚举与打开
pub trait Driver: Send + Sync {
    type Device: CaptureDevice;

    /// 扫描系统，返回支持采集的设备
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// 打开设备；无法打开或不支持采集时返回 `DeviceUnavailable`
    fn open(&self, id: &str) -> Result<Self::Device>;
}
