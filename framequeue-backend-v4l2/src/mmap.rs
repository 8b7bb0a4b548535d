use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use framequeue_core::traits::BufferMemory;

/// 一段 mmap 到用户空间的驱动缓冲
///
/// Drop 时 munmap。区域只读映射，生命周期由 BufferPool 管理。
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: 映射区域不与任何线程局部状态绑定，读写同步由 BufferPool 的状态机保证
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// 映射 QUERYBUF 给出的 (offset, length)
    pub(crate) fn map(fd: RawFd, offset: u32, len: u32) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "driver reported zero-length buffer",
            ));
        }

        // SAFETY: 参数来自 VIDIOC_QUERYBUF，失败时返回 MAP_FAILED
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::other("mmap returned null"))?;

        Ok(Self {
            ptr,
            len: len as usize,
        })
    }
}

impl BufferMemory for MmapRegion {
    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len 来自成功的 mmap，且在 Drop 之前一直有效
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: 与 map() 中的映射一一对应
        let ret = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if ret != 0 {
            tracing::warn!(
                target: "framequeue::v4l2",
                "munmap failed: {}",
                io::Error::last_os_error()
            );
        }
    }
}
