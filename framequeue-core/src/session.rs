use crate::pixel_format::PixelFormat;
use crate::traits::AppliedFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

/// 一次生效的格式协商结果
///
/// 每个 DeviceHandle 同一时刻只有一个有效 Session；再次 `set_format`
/// 成功后旧 Session 失效，基于它的分配请求会被拒绝。
#[derive(Debug, PartialEq, Eq)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) format: AppliedFormat,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.format
    }

    pub fn applied_format(&self) -> &AppliedFormat {
        &self.format
    }

    /// 单帧字节数：优先取驱动返回的 sizeimage，否则按位深估算
    pub fn frame_size(&self) -> Option<usize> {
        if self.format.size_image > 0 {
            Some(self.format.size_image as usize)
        } else {
            self.format
                .format
                .frame_size(self.format.width, self.format.height)
        }
    }
}
