use std::time::Duration;

use crate::pixel_format::PixelFormat;

/// Pool 的进程内唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub(crate) u64);

/// 缓冲句柄：下标 + 所属 Pool + 代数
///
/// 下标同时是硬件队列号，只有三者都吻合时句柄才有效，
/// 旧 Session 或重复释放的句柄因此自然失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub pool: PoolId,
    pub index: u32,
    pub generation: u64,
}

/// 出队后交给消费者的帧描述符
///
/// 不借用任何内存；取数据走 `CaptureLoop::frame`，归还走 `release_frame`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a dequeued frame must be released or its buffer stays held"]
pub struct FrameDescriptor {
    pub id: BufferId,
    /// 驱动帧序号
    pub sequence: u32,
    /// 采集时间戳
    pub timestamp: Duration,
    /// 本帧有效字节数
    pub bytes_used: u32,
    /// 压缩容器中主 payload 在缓冲内的偏移
    pub payload_offset: Option<u32>,
}

impl FrameDescriptor {
    pub fn index(&self) -> u32 {
        self.id.index
    }
}

/// 借用 Pool 内存的帧视图 (零拷贝)
#[derive(Debug)]
pub struct Frame<'a> {
    /// 本帧有效数据 (已裁剪到 bytes_used)
    pub data: &'a [u8],

    pub width: u32,

    pub height: u32,

    /// 每行字节数，压缩格式为 0
    pub stride: usize,

    pub format: PixelFormat,

    pub sequence: u32,

    pub timestamp: Duration,

    pub payload_offset: Option<u32>,
}

impl<'a> Frame<'a> {
    /// 压缩容器的主 payload；非压缩格式即整帧
    pub fn payload(&self) -> &'a [u8] {
        let offset = self.payload_offset.unwrap_or(0) as usize;
        self.data.get(offset..).unwrap_or(&[])
    }
}
