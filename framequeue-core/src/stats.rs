use std::fmt;

/// 采集循环的运行统计
///
/// 随每次出队/超时更新，由上层定期读取用于健康判断。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// 已交付的帧数
    pub frames: u64,

    /// 驱动序号跳变推算出的丢帧数
    pub dropped: u64,

    /// 等待超时次数
    pub timeouts: u64,

    /// Sensor 复位次数
    pub resets: u64,

    /// STREAMOFF 时从消费者手中收回的缓冲数
    pub reclaimed: u64,

    pub last_sequence: Option<u32>,
}

impl fmt::Debug for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStats")
            .field("frames", &self.frames)
            .field("dropped", &self.dropped)
            .field("timeouts", &self.timeouts)
            .field("resets", &self.resets)
            .finish()
    }
}

/// 简单的状态指示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureHealth {
    Healthy,
    Warning(HealthIssue),
    Critical(HealthIssue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIssue {
    FrameLoss,
    SensorStalls,
}

impl CaptureStats {
    /// 基于统计数据的粗略健康评估
    pub fn assess_health(&self) -> CaptureHealth {
        if self.resets > 3 {
            return CaptureHealth::Critical(HealthIssue::SensorStalls);
        }
        if self.resets > 0 || self.timeouts > 10 {
            return CaptureHealth::Warning(HealthIssue::SensorStalls);
        }

        // 丢帧超过 10%
        if self.frames > 0 && self.dropped * 10 > self.frames {
            return CaptureHealth::Warning(HealthIssue::FrameLoss);
        }

        CaptureHealth::Healthy
    }
}
