/// 当前平台的默认驱动
#[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
pub type DefaultDriver = framequeue_backend_v4l2::V4l2Driver;

/// 后端枚举，用于标记当前使用的是哪个驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    V4L2,
    /// 不支持的系统，或未开启后端 feature
    Unavailable,
}

/// 创建默认驱动实例
#[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
pub fn create_driver() -> DefaultDriver {
    framequeue_backend_v4l2::default_driver()
}

/// 辅助：获取首选后端类型
pub fn default_backend() -> BackendType {
    if cfg!(all(feature = "linux-v4l2", target_os = "linux")) {
        BackendType::V4L2
    } else {
        BackendType::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_matches_platform() {
        let expected = if cfg!(all(feature = "linux-v4l2", target_os = "linux")) {
            BackendType::V4L2
        } else {
            BackendType::Unavailable
        };
        assert_eq!(default_backend(), expected);
    }
}
