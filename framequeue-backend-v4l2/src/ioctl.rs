//! 缓冲队列相关的 VIDIOC_* 裸调用
//!
//! v4l crate 的 mmap::Stream 在 next() 里自动 QBUF 上一帧，无法表达
//! "消费者持有" 状态，所以队列操作在这里直接对 fd 发 ioctl。
//! 结构体布局来自 /usr/include/linux/videodev2.h (64 位)。

use std::io;
use std::mem;
use std::os::raw::c_int;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub(crate) const V4L2_MEMORY_MMAP: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct V4l2RequestBuffers {
    pub(crate) count: u32,
    pub(crate) type_: u32,
    pub(crate) memory: u32,
    pub(crate) capabilities: u32,
    pub(crate) flags: u8,
    pub(crate) reserved: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct V4l2Timecode {
    pub(crate) type_: u32,
    pub(crate) flags: u32,
    pub(crate) frames: u8,
    pub(crate) seconds: u8,
    pub(crate) minutes: u8,
    pub(crate) hours: u8,
    pub(crate) userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union V4l2BufferM {
    pub(crate) offset: u32,
    pub(crate) userptr: libc::c_ulong,
    pub(crate) planes: *mut libc::c_void,
    pub(crate) fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct V4l2Buffer {
    pub(crate) index: u32,
    pub(crate) type_: u32,
    pub(crate) bytesused: u32,
    pub(crate) flags: u32,
    pub(crate) field: u32,
    pub(crate) timestamp: libc::timeval,
    pub(crate) timecode: V4l2Timecode,
    pub(crate) sequence: u32,
    pub(crate) memory: u32,
    pub(crate) m: V4l2BufferM,
    pub(crate) length: u32,
    pub(crate) reserved2: u32,
    pub(crate) request_fd: i32,
}

impl V4l2Buffer {
    /// 一个 MMAP 采集缓冲的请求体
    pub(crate) fn capture(index: u32) -> Self {
        // SAFETY: 纯 POD 结构，全零是合法值 (指针成员为 null)
        let mut buf: Self = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = V4L2_MEMORY_MMAP;
        buf
    }

    pub(crate) fn offset(&self) -> u32 {
        // SAFETY: memory == MMAP 时驱动填写的是 offset 成员
        unsafe { self.m.offset }
    }

    pub(crate) fn timestamp(&self) -> Duration {
        let secs = self.timestamp.tv_sec.max(0) as u64;
        let micros = self.timestamp.tv_usec.max(0) as u64;
        Duration::from_secs(secs) + Duration::from_micros(micros)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct V4l2Input {
    pub(crate) index: u32,
    pub(crate) name: [u8; 32],
    pub(crate) type_: u32,
    pub(crate) audioset: u32,
    pub(crate) tuner: u32,
    pub(crate) std: u64,
    pub(crate) status: u32,
    pub(crate) capabilities: u32,
    pub(crate) reserved: [u32; 3],
}

impl V4l2Input {
    pub(crate) fn name(&self) -> String {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct V4l2PixFormat {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixelformat: u32,
    pub(crate) field: u32,
    pub(crate) bytesperline: u32,
    pub(crate) sizeimage: u32,
    pub(crate) colorspace: u32,
    pub(crate) priv_: u32,
    pub(crate) flags: u32,
    pub(crate) ycbcr_enc: u32,
    pub(crate) quantization: u32,
    pub(crate) xfer_func: u32,
}

/// `v4l2_format.fmt`，内核中含指针成员 (v4l2_window)，按 unsigned long 对齐
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union V4l2FormatUnion {
    pub(crate) pix: V4l2PixFormat,
    _raw: [libc::c_ulong; 200 / mem::size_of::<libc::c_ulong>()],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct V4l2Format {
    pub(crate) type_: u32,
    pub(crate) fmt: V4l2FormatUnion,
}

mod raw {
    use super::{V4l2Buffer, V4l2Format, V4l2Input, V4l2RequestBuffers};
    use std::os::raw::c_int;

    nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, V4l2RequestBuffers);
    nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, V4l2Buffer);
    nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, V4l2Buffer);
    nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, V4l2Buffer);
    nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, c_int);
    nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, c_int);
    nix::ioctl_readwrite!(vidioc_enuminput, b'V', 26, V4l2Input);
    nix::ioctl_readwrite!(vidioc_s_input, b'V', 39, c_int);
    nix::ioctl_readwrite!(vidioc_try_fmt, b'V', 64, V4l2Format);
}

/// VIDIOC_REQBUFS，返回驱动实际分配的数量
pub(crate) fn reqbufs(fd: RawFd, count: u32) -> io::Result<u32> {
    let mut req = V4l2RequestBuffers {
        count,
        type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
        memory: V4L2_MEMORY_MMAP,
        ..Default::default()
    };
    // SAFETY: req 在调用期间有效，布局与内核一致
    unsafe { raw::vidioc_reqbufs(fd, &mut req) }?;
    Ok(req.count)
}

/// VIDIOC_QUERYBUF，返回 (mmap offset, length)
pub(crate) fn querybuf(fd: RawFd, index: u32) -> io::Result<(u32, u32)> {
    let mut buf = V4l2Buffer::capture(index);
    // SAFETY: 同上
    unsafe { raw::vidioc_querybuf(fd, &mut buf) }?;
    Ok((buf.offset(), buf.length))
}

pub(crate) fn qbuf(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = V4l2Buffer::capture(index);
    // SAFETY: 同上
    unsafe { raw::vidioc_qbuf(fd, &mut buf) }?;
    Ok(())
}

pub(crate) fn dqbuf(fd: RawFd) -> io::Result<V4l2Buffer> {
    let mut buf = V4l2Buffer::capture(0);
    // SAFETY: 同上
    unsafe { raw::vidioc_dqbuf(fd, &mut buf) }?;
    Ok(buf)
}

pub(crate) fn streamon(fd: RawFd) -> io::Result<()> {
    let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
    // SAFETY: 内核只读取这个 int
    unsafe { raw::vidioc_streamon(fd, &kind) }?;
    Ok(())
}

pub(crate) fn streamoff(fd: RawFd) -> io::Result<()> {
    let kind = V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
    // SAFETY: 同上
    unsafe { raw::vidioc_streamoff(fd, &kind) }?;
    Ok(())
}

/// VIDIOC_ENUMINPUT，返回输入通道名
pub(crate) fn enuminput(fd: RawFd, index: u32) -> io::Result<String> {
    // SAFETY: POD，全零合法
    let mut input: V4l2Input = unsafe { mem::zeroed() };
    input.index = index;
    // SAFETY: input 在调用期间有效
    unsafe { raw::vidioc_enuminput(fd, &mut input) }?;
    Ok(input.name())
}

pub(crate) fn s_input(fd: RawFd, index: u32) -> io::Result<()> {
    let mut value = index as c_int;
    // SAFETY: 同上
    unsafe { raw::vidioc_s_input(fd, &mut value) }?;
    Ok(())
}

/// VIDIOC_TRY_FMT，返回驱动调整后的 pix 格式，不改变设备状态
pub(crate) fn try_fmt(fd: RawFd, width: u32, height: u32, fourcc: u32) -> io::Result<V4l2PixFormat> {
    // SAFETY: POD，全零合法
    let mut fmt: V4l2Format = unsafe { mem::zeroed() };
    fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
    fmt.fmt.pix = V4l2PixFormat {
        width,
        height,
        pixelformat: fourcc,
        ..Default::default()
    };
    // SAFETY: fmt 在调用期间有效，布局与内核一致
    unsafe { raw::vidioc_try_fmt(fd, &mut fmt) }?;
    // SAFETY: type_ 为 VIDEO_CAPTURE 时驱动填写的是 pix 成员
    Ok(unsafe { fmt.fmt.pix })
}

/// poll(POLLIN | POLLERR)，超时返回 `Ok(false)`
pub(crate) fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN | libc::POLLERR,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;

    // SAFETY: pfd 是单元素数组
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if ret == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLERR != 0 {
        return Err(io::Error::other("POLLERR on capture device"));
    }
    Ok(true)
}
