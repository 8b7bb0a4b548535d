use framequeue_core::pixel_format::{FourCC, PixelFormat};
use v4l::format::fourcc::FourCC as V4lFourCC;

/// 将 v4l crate 的 FourCC 转换为 framequeue-core 的 PixelFormat
pub fn from_v4l_fourcc(cc: V4lFourCC) -> PixelFormat {
    let core_cc = FourCC::from_bytes(&cc.repr);

    match core_cc {
        // --- 1. YUV 4:2:0 ---
        FourCC::NV12 | FourCC::NV12T | FourCC::NV21 | FourCC::YUV420 => {
            PixelFormat::Known(core_cc)
        }

        // --- 2. YUV 4:2:2 ---
        FourCC::YUYV
        | FourCC::YVYU
        | FourCC::UYVY
        | FourCC::VYUY
        | FourCC::NV16
        | FourCC::NV61
        | FourCC::YUV422P => PixelFormat::Known(core_cc),

        // --- 3. RGB ---
        FourCC::RGB565 | FourCC::RGB32 => PixelFormat::Known(core_cc),

        // --- 4. 压缩格式 ---
        FourCC::JPEG | FourCC::MJPEG => PixelFormat::Known(core_cc),

        // --- 5. 未知/私有格式 ---
        _ => {
            tracing::warn!(target: "framequeue::v4l2", "Unknown V4L2 pixel format: {}", core_cc);
            PixelFormat::Unknown(core_cc.0)
        }
    }
}

/// 将 PixelFormat 转换为 v4l 的 FourCC，用于 VIDIOC_S_FMT
pub fn to_v4l_fourcc(fmt: PixelFormat) -> Option<V4lFourCC> {
    match fmt {
        PixelFormat::Known(cc) => Some(V4lFourCC::new(&cc.to_bytes())),
        PixelFormat::Unknown(_) => None,
    }
}
