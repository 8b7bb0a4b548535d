use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use v4l::capability::Flags;
use v4l::format::fourcc::FourCC;
use v4l::video::Capture;

use framequeue_core::error::{CaptureError, Result};
use framequeue_core::pixel_format::PixelFormat;
use framequeue_core::traits::{AppliedFormat, Capabilities, CaptureDevice, DeviceInfo, Dequeued};

use crate::controls::VendorControls;
use crate::ioctl;
use crate::mmap::MmapRegion;
use crate::pixel_map;

/// 枚举系统中的采集设备
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    // 遍历 /dev/video* 节点
    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let dev = match v4l::Device::with_path(&path) {
            Ok(dev) => dev,
            Err(e) => {
                tracing::debug!(target: "framequeue::v4l2", "skip {}: {}", path, e);
                continue;
            }
        };

        // 过滤：忽略 Metadata 设备或 Output 设备
        if let Ok(info) = query_info(&dev, &path) {
            if info.capabilities.contains(Capabilities::VIDEO_CAPTURE) {
                devices.push(info);
            }
        }
    }

    Ok(devices)
}

fn query_info(dev: &v4l::Device, path: &str) -> io::Result<DeviceInfo> {
    let caps = dev.query_caps()?;

    let mut capabilities = Capabilities::empty();
    if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        capabilities |= Capabilities::VIDEO_CAPTURE;
    }
    if caps.capabilities.contains(Flags::STREAMING) {
        capabilities |= Capabilities::STREAMING;
    }

    Ok(DeviceInfo {
        name: caps.card,
        id: path.to_string(),
        driver: caps.driver,
        bus_info: Some(caps.bus).filter(|b| !b.is_empty()),
        capabilities,
    })
}

/// 打开一个 V4L2 采集节点
pub(crate) fn open(id: &str, vendor: VendorControls) -> Result<V4l2Device> {
    let unavailable = |reason: String| CaptureError::DeviceUnavailable {
        id: id.to_string(),
        reason,
    };

    let dev = v4l::Device::with_path(id).map_err(|e| unavailable(e.to_string()))?;
    let info = query_info(&dev, id).map_err(|e| unavailable(format!("VIDIOC_QUERYCAP: {}", e)))?;

    if !info.capabilities.contains(Capabilities::VIDEO_CAPTURE) {
        return Err(unavailable("not a video capture node".to_string()));
    }
    if !info.capabilities.contains(Capabilities::STREAMING) {
        return Err(unavailable("device does not support streaming I/O".to_string()));
    }

    let fd = dev.handle().fd();
    Ok(V4l2Device {
        dev,
        fd,
        info,
        vendor,
        compressed: false,
    })
}

/// V4L2 设备，实现 `CaptureDevice`
///
/// 能力查询、格式协商、控制项走 v4l crate；缓冲队列走 `ioctl` 模块。
pub struct V4l2Device {
    dev: v4l::Device,
    fd: RawFd,
    info: DeviceInfo,
    vendor: VendorControls,
    /// 当前格式是否为压缩格式，决定出队后是否读取 JPEG 偏移
    compressed: bool,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("id", &self.info.id)
            .field("fd", &self.fd)
            .field("vendor", &self.vendor)
            .finish()
    }
}

impl V4l2Device {
    pub fn vendor(&self) -> &VendorControls {
        &self.vendor
    }

    /// 读取压缩帧中主 JPEG 的大小 (驱动私有控制项)
    pub fn jpeg_main_size(&self) -> io::Result<Option<u32>> {
        self.vendor.jpeg_size(&self.dev)
    }
}

impl CaptureDevice for V4l2Device {
    type Memory = MmapRegion;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supported_formats(&mut self) -> io::Result<Vec<PixelFormat>> {
        let descriptions = self.dev.enum_formats()?;
        Ok(descriptions
            .into_iter()
            .map(|d| pixel_map::from_v4l_fourcc(d.fourcc))
            .collect())
    }

    fn apply_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat> {
        let fourcc = pixel_map::to_v4l_fourcc(format).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot request unknown format")
        })?;

        // 1. VIDIOC_G_FMT 取当前值，只改动三个字段
        let mut fmt = self.dev.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = fourcc;

        // 2. VIDIOC_S_FMT
        let applied = self.dev.set_format(&fmt)?;
        let applied_format = pixel_map::from_v4l_fourcc(applied.fourcc);
        self.compressed = applied_format.is_compressed();

        tracing::debug!(
            target: "framequeue::v4l2",
            "S_FMT {}x{} {} -> {}x{} {} (stride {}, size {})",
            width,
            height,
            format,
            applied.width,
            applied.height,
            applied_format,
            applied.stride,
            applied.size
        );

        Ok(AppliedFormat {
            width: applied.width,
            height: applied.height,
            format: applied_format,
            bytes_per_line: applied.stride,
            size_image: applied.size,
        })
    }

    fn try_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat> {
        let fourcc = pixel_map::to_v4l_fourcc(format).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot request unknown format")
        })?;

        let pix = match ioctl::try_fmt(self.fd, width, height, u32::from_le_bytes(fourcc.repr)) {
            Ok(pix) => pix,
            // TRY_FMT 是可选 ioctl，不支持时只能相信 ENUM_FMT 的结果
            Err(e) if e.raw_os_error() == Some(libc::ENOTTY) => {
                tracing::debug!(target: "framequeue::v4l2", "VIDIOC_TRY_FMT not implemented");
                return Ok(AppliedFormat {
                    width,
                    height,
                    format,
                    bytes_per_line: 0,
                    size_image: 0,
                });
            }
            Err(e) => return Err(e),
        };

        Ok(AppliedFormat {
            width: pix.width,
            height: pix.height,
            format: pixel_map::from_v4l_fourcc(FourCC::new(&pix.pixelformat.to_le_bytes())),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        ioctl::reqbufs(self.fd, count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapRegion> {
        let (offset, length) = ioctl::querybuf(self.fd, index)?;
        tracing::debug!(
            target: "framequeue::v4l2",
            index,
            offset,
            length,
            "mapping buffer"
        );
        MmapRegion::map(self.fd, offset, length)
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        ioctl::qbuf(self.fd, index)
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let buf = ioctl::dqbuf(self.fd)?;

        let payload_offset = if self.compressed {
            match self.vendor.jpeg_offset(&self.dev) {
                Ok(offset) => offset,
                Err(e) => {
                    tracing::warn!(target: "framequeue::v4l2", "reading JPEG offset failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            timestamp: buf.timestamp(),
            payload_offset,
        })
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        ioctl::poll_readable(self.fd, timeout)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        ioctl::streamon(self.fd)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        ioctl::streamoff(self.fd)
    }

    fn set_paused(&mut self, paused: bool) -> io::Result<()> {
        self.vendor.set_paused(&self.dev, paused)
    }

    fn select_input(&mut self, index: u32) -> io::Result<()> {
        // 私有复位输入 (例如 1000) 不在 ENUMINPUT 列表中，只用于日志
        match ioctl::enuminput(self.fd, index) {
            Ok(name) => tracing::debug!(target: "framequeue::v4l2", index, "input: {}", name),
            Err(_) => tracing::debug!(target: "framequeue::v4l2", index, "input not enumerable"),
        }
        ioctl::s_input(self.fd, index)
    }
}
