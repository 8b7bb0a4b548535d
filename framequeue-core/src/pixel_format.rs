use std::fmt::{self, Display};

/// 四字符代码 (Four Character Code)，V4L2 像素格式标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    /// 从 ASCII 字符创建 FourCC
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    pub const fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();

        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// 常用像素格式定义 (linux/videodev2.h)
impl FourCC {
    // --- YUV 4:2:0 ---
    /// NV12 - Y 平面 + 交错 CbCr
    pub const NV12: Self = Self::new(b'N', b'V', b'1', b'2');
    /// NV12 64x32 tiled (Samsung FIMC 私有)
    pub const NV12T: Self = Self::new(b'T', b'M', b'1', b'2');
    /// NV21 - Y 平面 + 交错 CrCb (Android 预览默认格式)
    pub const NV21: Self = Self::new(b'N', b'V', b'2', b'1');
    /// YUV420 三平面
    pub const YUV420: Self = Self::new(b'Y', b'U', b'1', b'2');

    // --- YUV 4:2:2 ---
    pub const YUYV: Self = Self::new(b'Y', b'U', b'Y', b'V');
    pub const YVYU: Self = Self::new(b'Y', b'V', b'Y', b'U');
    pub const UYVY: Self = Self::new(b'U', b'Y', b'V', b'Y');
    pub const VYUY: Self = Self::new(b'V', b'Y', b'U', b'Y');
    pub const NV16: Self = Self::new(b'N', b'V', b'1', b'6');
    pub const NV61: Self = Self::new(b'N', b'V', b'6', b'1');
    pub const YUV422P: Self = Self::new(b'4', b'2', b'2', b'P');

    // --- RGB ---
    /// RGB565 (16-bit)
    pub const RGB565: Self = Self::new(b'R', b'G', b'B', b'P');
    /// RGB32 (32-bit)
    pub const RGB32: Self = Self::new(b'R', b'G', b'B', b'4');

    // --- 压缩格式 ---
    /// ISP 直出的 JPEG 容器 (Snapshot)
    pub const JPEG: Self = Self::new(b'J', b'P', b'E', b'G');
    /// Motion-JPEG
    pub const MJPEG: Self = Self::new(b'M', b'J', b'P', b'G');
}

/// 像素格式的高级枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelFormat {
    /// 已知的标准格式
    Known(#[cfg_attr(feature = "serialize", serde(with = "fourcc_serde"))] FourCC),
    /// 驱动返回了库不认识的私有格式
    Unknown(u32),
}

impl PixelFormat {
    /// 原始 32 位编码，用于 ioctl
    pub fn code(&self) -> u32 {
        match self {
            Self::Known(cc) => cc.0,
            Self::Unknown(code) => *code,
        }
    }

    /// 判断是否为压缩容器 (payload 可能带偏移)
    pub fn is_compressed(&self) -> bool {
        match self {
            Self::Known(cc) => matches!(*cc, FourCC::JPEG | FourCC::MJPEG),
            _ => false,
        }
    }

    /// 每像素比特数 (Bits Per Pixel)
    ///
    /// 压缩格式与未知格式返回 `None`。
    pub fn bits_per_pixel(&self) -> Option<u32> {
        match self {
            Self::Known(cc) => match *cc {
                FourCC::NV12 | FourCC::NV12T | FourCC::NV21 | FourCC::YUV420 => Some(12),
                FourCC::RGB565
                | FourCC::YUYV
                | FourCC::YVYU
                | FourCC::UYVY
                | FourCC::VYUY
                | FourCC::NV16
                | FourCC::NV61
                | FourCC::YUV422P => Some(16),
                FourCC::RGB32 => Some(32),
                _ => None,
            },
            _ => None,
        }
    }

    /// 估算单帧字节数 (驱动未返回 sizeimage 时的兜底)
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        self.bits_per_pixel()
            .map(|bpp| (width as usize * height as usize * bpp as usize) / 8)
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(cc) => write!(f, "{}", cc),
            Self::Unknown(code) => write!(f, "unknown({:#010x})", code),
        }
    }
}

impl From<u32> for PixelFormat {
    fn from(val: u32) -> Self {
        let cc = FourCC(val);
        // 只要每个字节都是可打印 ASCII，就视为合法 FourCC
        if cc.to_bytes().iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            Self::Known(cc)
        } else {
            Self::Unknown(val)
        }
    }
}

impl From<FourCC> for PixelFormat {
    fn from(cc: FourCC) -> Self {
        Self::Known(cc)
    }
}

impl PartialEq<PixelFormat> for FourCC {
    fn eq(&self, other: &PixelFormat) -> bool {
        match other {
            PixelFormat::Known(cc) => self == cc,
            PixelFormat::Unknown(val) => self.0 == *val,
        }
    }
}

impl PartialEq<FourCC> for PixelFormat {
    fn eq(&self, other: &FourCC) -> bool {
        other == self
    }
}

#[cfg(feature = "serialize")]
mod fourcc_serde {
    use super::FourCC;
    use serde::{de, Deserialize, Deserializer, Serializer};

    // 配置文件里写 "YUYV" 比写 0x56595559 友好得多
    pub(super) fn serialize<S: Serializer>(cc: &FourCC, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&cc.to_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FourCC, D::Error> {
        let text = String::deserialize(d)?;
        let bytes: [u8; 4] = text
            .as_bytes()
            .try_into()
            .map_err(|_| de::Error::custom(format!("FourCC must be 4 bytes, got {:?}", text)))?;
        Ok(FourCC::from_bytes(&bytes))
    }
}
