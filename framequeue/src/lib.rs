pub mod camera;

// 内部模块，不对外暴露
pub(crate) mod internal {
    pub(crate) mod runtime;
}

/// 预置模块，用户可以通过 `use framequeue::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::camera::{Camera, CameraInfo, CameraOptions, CameraStats, OwnedFrame};
    pub use framequeue_core::prelude::*;
}
