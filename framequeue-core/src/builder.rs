use std::time::Duration;

/// 采集参数
///
/// 由上层 (设置界面 / 配置文件) 在 `set_format` 之前选定。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CaptureConfig {
    /// Buffer Pool 大小
    pub buffer_count: u32,
    /// `start()` 等待首帧的上限。自动对焦或暗光下 Sensor 可能要好几秒才出第一帧
    pub first_frame_timeout: Duration,
    /// 上层未指定时 `next_frame` 使用的默认超时
    pub frame_timeout: Duration,
    pub mode: CaptureMode,
    /// 打开设备后选择的输入通道 (VIDIOC_S_INPUT)
    pub input: Option<u32>,
    /// 连续无数据时的 Sensor 复位策略，默认关闭
    pub sensor_reset: Option<SensorReset>,
}

/// 帧释放后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum CaptureMode {
    /// 预览/录像：释放即重新入队
    #[default]
    Continuous,
    /// 拍照：释放后置为 Free，不再入队
    OneShot,
}

/// 通过特殊输入号让驱动重启 Sensor
///
/// 这是驱动私有行为，并非通用 V4L2 语义，只应对已知驱动开启。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReset {
    /// 写入 VIDIOC_S_INPUT 的输入号
    pub input: u32,
    /// 连续多少次等待超时后触发复位
    pub after_stalls: u32,
}

impl SensorReset {
    /// Samsung FIMC 驱动：S_INPUT(1000) 触发 Sensor 重启，单次 1 秒无数据即复位
    pub const FIMC: Self = Self {
        input: 1000,
        after_stalls: 1,
    };
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        Self {
            buffer_count: 4,
            first_frame_timeout: Duration::from_secs(10),
            frame_timeout: Duration::from_secs(1),
            mode: CaptureMode::Continuous,
            input: None,
            sensor_reset: None,
        }
    }

    /// 设置缓冲区数量 (默认 4)
    pub fn buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }

    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn input(mut self, index: u32) -> Self {
        self.input = Some(index);
        self
    }

    /// 开启 Sensor 复位逃生舱
    pub fn sensor_reset(mut self, reset: SensorReset) -> Self {
        self.sensor_reset = Some(reset);
        self
    }

    /// 从 JSON 恢复持久化的采集参数，缺省字段取默认值
    #[cfg(feature = "serialize")]
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    #[cfg(feature = "serialize")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
