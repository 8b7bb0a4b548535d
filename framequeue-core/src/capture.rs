use std::fmt;
use std::time::Duration;

use crate::builder::{CaptureConfig, CaptureMode, SensorReset};
use crate::device::DeviceHandle;
use crate::error::{CaptureError, Result};
use crate::frame::{Frame, FrameDescriptor};
use crate::pool::{BufferPool, BufferState};
use crate::stats::CaptureStats;
use crate::traits::CaptureDevice;

/// 采集状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// 无缓冲在队列中，未出流
    Idle,
    /// 已 STREAMON，缓冲在设备与消费者之间循环
    Streaming,
    /// 暂停出帧，缓冲归属不变
    Paused,
}

/// 驱动 enqueue → poll → dequeue → release 循环
///
/// 借用 [`DeviceHandle`] 直到结束，Drop 时自动 stop。
pub struct CaptureLoop<'h, D: CaptureDevice> {
    handle: &'h mut DeviceHandle<D>,
    state: LoopState,
    mode: CaptureMode,
    first_frame_timeout: Duration,
    frame_timeout: Duration,
    sensor_reset: Option<SensorReset>,
    stalls: u32,
    stats: CaptureStats,
}

impl<'h, D: CaptureDevice> CaptureLoop<'h, D> {
    pub fn new(handle: &'h mut DeviceHandle<D>, config: &CaptureConfig) -> Self {
        Self {
            handle,
            state: LoopState::Idle,
            mode: config.mode,
            first_frame_timeout: config.first_frame_timeout,
            frame_timeout: config.frame_timeout,
            sensor_reset: config.sensor_reset,
            stalls: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn pool(&self) -> Option<&BufferPool<D::Memory>> {
        self.handle.pool()
    }

    pub fn handle(&self) -> &DeviceHandle<D> {
        &*self.handle
    }

    /// Idle → Streaming
    ///
    /// 全部缓冲入队后 STREAMON，并等到首帧就绪才算成功。
    /// 首帧超时返回 `CaptureTimeout` 并回到 Idle，可直接重试。
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LoopState::Streaming => {
                tracing::warn!("capture already started");
                return Ok(());
            }
            LoopState::Paused => {
                return Err(CaptureError::InvalidState(
                    "capture is paused, resume it instead of starting",
                ))
            }
            LoopState::Idle => {}
        }

        let first_frame_timeout = self.first_frame_timeout;
        let (device, pool) = self
            .handle
            .parts_mut()
            .ok_or(CaptureError::InvalidState("no buffer pool allocated"))?;

        // 1. 全部缓冲入队
        let count = pool.len() as u32;
        for index in 0..count {
            if let Err(e) = device.queue(index) {
                tracing::error!(index, "VIDIOC_QBUF failed: {}", e);
                abort_stream(device, pool);
                return Err(e.into());
            }
            pool.mark_queued(index);
        }

        // 2. STREAMON
        if let Err(e) = device.stream_on() {
            tracing::error!("VIDIOC_STREAMON failed: {}", e);
            abort_stream(device, pool);
            return Err(e.into());
        }

        // 3. 等首帧，避免把上一次的残帧交给消费者
        match device.wait_ready(first_frame_timeout) {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!("no data within {:?} after STREAMON", first_frame_timeout);
                abort_stream(device, pool);
                return Err(CaptureError::CaptureTimeout(first_frame_timeout));
            }
            Err(e) => {
                tracing::error!("poll failed waiting for first frame: {}", e);
                abort_stream(device, pool);
                return Err(e.into());
            }
        }

        self.state = LoopState::Streaming;
        self.stalls = 0;
        tracing::info!(buffers = count, "capture started, first frame ready");
        Ok(())
    }

    /// → Idle，不释放 Pool
    ///
    /// 返回后不会再有帧出队；未归还的描述符全部失效，缓冲留在 Queued。
    pub fn stop(&mut self) -> Result<()> {
        let was_paused = match self.state {
            LoopState::Idle => return Ok(()),
            LoopState::Paused => true,
            LoopState::Streaming => false,
        };
        self.state = LoopState::Idle;

        let Some((device, pool)) = self.handle.parts_mut() else {
            return Ok(());
        };

        // 暂停控制项不随 STREAMOFF 复位，不清掉的话下次 start 收不到首帧
        if was_paused {
            if let Err(e) = device.set_paused(false) {
                tracing::warn!("clearing stream pause before STREAMOFF failed: {}", e);
            }
        }

        let result = device.stream_off();
        let reclaimed = pool.reclaim_held();
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "held buffers reclaimed by STREAMOFF");
            self.stats.reclaimed += reclaimed as u64;
        }

        match result {
            Ok(()) => {
                tracing::info!("capture stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!("VIDIOC_STREAMOFF failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Streaming → Paused
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            LoopState::Paused => Ok(()),
            LoopState::Idle => Err(CaptureError::InvalidState("capture is not started")),
            LoopState::Streaming => {
                self.handle.device_mut()?.set_paused(true)?;
                self.state = LoopState::Paused;
                tracing::debug!("capture paused");
                Ok(())
            }
        }
    }

    /// Paused → Streaming
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            LoopState::Streaming => Ok(()),
            LoopState::Idle => Err(CaptureError::InvalidState("capture is not started")),
            LoopState::Paused => {
                self.handle.device_mut()?.set_paused(false)?;
                self.state = LoopState::Streaming;
                tracing::debug!("capture resumed");
                Ok(())
            }
        }
    }

    /// 按配置的默认超时取下一帧
    pub fn next(&mut self) -> Result<FrameDescriptor> {
        self.next_frame(self.frame_timeout)
    }

    /// 等待下一帧就绪并出队 (Queued → Held)
    ///
    /// 没有任何缓冲在队列中时立即返回 `BuffersExhausted`。
    /// 超时返回 `CaptureTimeout`；若开启了 Sensor 复位且连续超时达到阈值，
    /// 先执行一次复位 (stop → S_INPUT → start) 再出队。
    pub fn next_frame(&mut self, timeout: Duration) -> Result<FrameDescriptor> {
        match self.state {
            LoopState::Streaming => {}
            LoopState::Paused => return Err(CaptureError::InvalidState("capture is paused")),
            LoopState::Idle => return Err(CaptureError::InvalidState("capture is not started")),
        }

        let (device, pool) = self
            .handle
            .parts_mut()
            .ok_or(CaptureError::InvalidState("no buffer pool allocated"))?;

        if pool.count_in(BufferState::Queued) == 0 {
            let held = pool.count_in(BufferState::Held);
            tracing::debug!(held, "no buffer queued, consumer must release frames first");
            return Err(CaptureError::BuffersExhausted { held });
        }

        let ready = device.wait_ready(timeout).map_err(|e| {
            tracing::error!("poll error: {}", e);
            CaptureError::DeviceError(e)
        })?;

        if !ready {
            self.stalls += 1;
            self.stats.timeouts += 1;
            tracing::error!(stalls = self.stalls, "no data in {:?}", timeout);

            match self.sensor_reset {
                Some(reset) if self.stalls >= reset.after_stalls => self.reset_sensor(reset)?,
                _ => return Err(CaptureError::CaptureTimeout(timeout)),
            }
        }

        self.dequeue()
    }

    fn dequeue(&mut self) -> Result<FrameDescriptor> {
        let (device, pool) = self
            .handle
            .parts_mut()
            .ok_or(CaptureError::InvalidState("no buffer pool allocated"))?;

        let dq = device.dequeue().map_err(|e| {
            tracing::error!("VIDIOC_DQBUF failed, dropped frame: {}", e);
            CaptureError::DeviceError(e)
        })?;

        let id = pool.mark_held(dq.index).ok_or_else(|| {
            tracing::error!(index = dq.index, "driver returned a buffer that was not queued");
            CaptureError::DeviceError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("wrong buffer index {}", dq.index),
            ))
        })?;

        self.stalls = 0;
        self.stats.frames += 1;
        if let Some(last) = self.stats.last_sequence {
            // 驱动序号跳变即丢帧
            self.stats.dropped += u64::from(dq.sequence.saturating_sub(last).saturating_sub(1));
        }
        self.stats.last_sequence = Some(dq.sequence);

        Ok(FrameDescriptor {
            id,
            sequence: dq.sequence,
            timestamp: dq.timestamp,
            bytes_used: dq.bytes_used,
            payload_offset: dq.payload_offset,
        })
    }

    /// 通过驱动私有输入号重启 Sensor，然后重新开始采集
    fn reset_sensor(&mut self, reset: SensorReset) -> Result<()> {
        tracing::warn!(
            input = reset.input,
            stalls = self.stalls,
            "no data from sensor, resetting camera device"
        );

        self.stop()?;
        self.handle.select_input(reset.input)?;
        self.stats.resets += 1;
        self.stalls = 0;
        self.start()
    }

    /// 归还一帧 (Held → Queued，OneShot 模式下 → Free)
    ///
    /// 失效的描述符 (已归还、已 stop、Pool 已释放、其他 Pool) 静默忽略。
    pub fn release_frame(&mut self, frame: &FrameDescriptor) -> Result<()> {
        let mode = self.mode;
        let Some((device, pool)) = self.handle.parts_mut() else {
            tracing::debug!(index = frame.id.index, "pool torn down, ignoring release");
            return Ok(());
        };

        if !pool.is_live(&frame.id) {
            tracing::debug!(index = frame.id.index, "stale frame descriptor, ignoring release");
            return Ok(());
        }

        match mode {
            CaptureMode::Continuous => {
                device.queue(frame.id.index).map_err(|e| {
                    tracing::error!(index = frame.id.index, "VIDIOC_QBUF failed: {}", e);
                    CaptureError::DeviceError(e)
                })?;
                pool.mark_queued(frame.id.index);
            }
            CaptureMode::OneShot => pool.mark_free(frame.id.index),
        }
        Ok(())
    }

    /// 借用一帧的数据；描述符失效时返回 `None`
    pub fn frame(&self, desc: &FrameDescriptor) -> Option<Frame<'_>> {
        let pool = self.handle.pool()?;
        if !pool.is_live(&desc.id) {
            return None;
        }

        let buffer = pool.buffer(desc.id.index)?;
        let format = pool.format();
        let data = buffer.data();
        let used = (desc.bytes_used as usize).min(data.len());

        Some(Frame {
            data: &data[..used],
            width: format.width,
            height: format.height,
            stride: format.bytes_per_line as usize,
            format: format.format,
            sequence: desc.sequence,
            timestamp: desc.timestamp,
            payload_offset: desc.payload_offset,
        })
    }

    /// 停止采集并释放 Pool；之后的 `release_frame` 都是空操作
    pub fn release_pool(&mut self) -> Result<()> {
        let stopped = self.stop();
        self.handle.release_pool();
        stopped
    }
}

/// 启动失败：关流并把已入队的缓冲记回 Free
fn abort_stream<D: CaptureDevice>(device: &mut D, pool: &mut BufferPool<D::Memory>) {
    if let Err(e) = device.stream_off() {
        tracing::warn!("VIDIOC_STREAMOFF during abort failed: {}", e);
    }
    for index in 0..pool.len() as u32 {
        if pool.state_of(index) == Some(BufferState::Queued) {
            pool.mark_free(index);
        }
    }
}

impl<D: CaptureDevice> fmt::Debug for CaptureLoop<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureLoop")
            .field("device", &self.handle.id())
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D: CaptureDevice> Drop for CaptureLoop<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("stopping capture on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::FourCC;
    use crate::simulation::{SimulatedDevice, SimulatedDriver, SIM_CAPTURE_ID};

    const WAIT: Duration = Duration::from_millis(1000);

    fn prepared(driver: &SimulatedDriver, count: u32) -> DeviceHandle<SimulatedDevice> {
        let mut handle = DeviceHandle::open(driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();
        handle.allocate(&session, count).unwrap();
        handle
    }

    fn states(capture: &CaptureLoop<'_, SimulatedDevice>) -> Vec<BufferState> {
        capture
            .pool()
            .unwrap()
            .buffers()
            .iter()
            .map(|b| b.state())
            .collect()
    }

    #[test]
    fn start_requires_a_pool() {
        let driver = SimulatedDriver::new();
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        assert!(matches!(
            capture.start().unwrap_err(),
            CaptureError::InvalidState(_)
        ));
        assert_eq!(capture.state(), LoopState::Idle);
    }

    #[test]
    fn start_queues_every_buffer() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 4);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());

        capture.start().unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
        assert_eq!(states(&capture), vec![BufferState::Queued; 4]);

        let snap = driver.snapshot();
        assert!(snap.streaming);
        assert_eq!(snap.queued, vec![0, 1, 2, 3]);

        // 已启动时再次 start 不做任何事
        capture.start().unwrap();
        assert_eq!(driver.snapshot().stream_on_count, 1);
    }

    #[test]
    fn buffers_never_free_while_streaming() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 3);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        for _ in 0..10 {
            let frame = capture.next_frame(WAIT).unwrap();
            assert!(!states(&capture).contains(&BufferState::Free));
            capture.release_frame(&frame).unwrap();
            assert!(!states(&capture).contains(&BufferState::Free));
        }
        assert_eq!(capture.stats().frames, 10);
    }

    #[test]
    fn fifth_frame_fails_until_a_release() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 4);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        let frames: Vec<_> = (0..4).map(|_| capture.next_frame(WAIT).unwrap()).collect();
        assert_eq!(states(&capture), vec![BufferState::Held; 4]);

        let err = capture.next_frame(WAIT).unwrap_err();
        assert!(matches!(err, CaptureError::BuffersExhausted { held: 4 }));

        capture.release_frame(&frames[2]).unwrap();
        let next = capture.next_frame(WAIT).unwrap();
        assert_eq!(next.index(), 2);
    }

    #[test]
    fn double_release_after_teardown_is_a_no_op() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 2);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        let frame = capture.next_frame(WAIT).unwrap();
        capture.release_pool().unwrap();
        assert!(capture.pool().is_none());

        capture.release_frame(&frame).unwrap();
        capture.release_frame(&frame).unwrap();
        assert!(capture.frame(&frame).is_none());
        assert_eq!(driver.snapshot().live_mappings, 0);
    }

    #[test]
    fn stale_descriptor_after_stop_is_ignored() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 2);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        let frame = capture.next_frame(WAIT).unwrap();
        capture.stop().unwrap();
        assert_eq!(states(&capture), vec![BufferState::Queued; 2]);
        assert_eq!(capture.stats().reclaimed, 1);

        capture.release_frame(&frame).unwrap();
        capture.release_frame(&frame).unwrap();
        assert_eq!(states(&capture), vec![BufferState::Queued; 2]);
        assert!(driver.snapshot().queued.is_empty());

        // 重新开始后旧描述符仍然无效，哪怕同一下标又被出队
        capture.start().unwrap();
        let again = capture.next_frame(WAIT).unwrap();
        assert_eq!(again.index(), frame.index());
        assert_ne!(again.id, frame.id);
        capture.release_frame(&frame).unwrap();
        assert_eq!(
            capture.pool().unwrap().state_of(again.index()),
            Some(BufferState::Held)
        );
    }

    #[test]
    fn stop_then_start_matches_first_start() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 4);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());

        capture.start().unwrap();
        let first_states = states(&capture);
        let first_queue = driver.snapshot().queued;

        let a = capture.next_frame(WAIT).unwrap();
        let _b = capture.next_frame(WAIT).unwrap();
        capture.release_frame(&a).unwrap();

        capture.stop().unwrap();
        assert_eq!(capture.state(), LoopState::Idle);
        assert!(!driver.snapshot().streaming);

        capture.start().unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
        assert_eq!(states(&capture), first_states);
        assert_eq!(driver.snapshot().queued, first_queue);
    }

    #[test]
    fn first_frame_timeout_leaves_loop_idle_and_retryable() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 4);
        let cfg = CaptureConfig::new().first_frame_timeout(Duration::from_millis(50));
        let mut capture = CaptureLoop::new(&mut handle, &cfg);

        driver.stall(1);
        let err = capture.start().unwrap_err();
        assert!(matches!(err, CaptureError::CaptureTimeout(t) if t == Duration::from_millis(50)));
        assert_eq!(capture.state(), LoopState::Idle);
        assert_eq!(states(&capture), vec![BufferState::Free; 4]);
        assert!(!driver.snapshot().streaming);

        // 无需 stop 即可重试
        capture.start().unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
    }

    #[test]
    fn timeout_without_reset_policy_propagates() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 4);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        driver.hang();
        let err = capture.next_frame(WAIT).unwrap_err();
        assert!(matches!(err, CaptureError::CaptureTimeout(_)));
        assert_eq!(capture.stats().timeouts, 1);
        assert_eq!(capture.stats().resets, 0);
        assert!(driver.snapshot().inputs.is_empty());
    }

    #[test]
    fn sensor_reset_recovers_a_hung_sensor() {
        let driver = SimulatedDriver::new().with_reset_input(1000);
        let mut handle = prepared(&driver, 4);
        let cfg = CaptureConfig::new().sensor_reset(SensorReset::FIMC);
        let mut capture = CaptureLoop::new(&mut handle, &cfg);
        capture.start().unwrap();

        let held = capture.next_frame(WAIT).unwrap();
        driver.hang();

        let frame = capture.next_frame(WAIT).unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
        assert_eq!(capture.stats().resets, 1);

        let snap = driver.snapshot();
        assert_eq!(snap.inputs, vec![1000]);
        assert_eq!(snap.stream_on_count, 2);

        // 复位前持有的帧已随 STREAMOFF 失效
        assert!(capture.frame(&held).is_none());
        assert!(capture.frame(&frame).is_some());
    }

    #[test]
    fn reset_threshold_counts_consecutive_stalls() {
        let driver = SimulatedDriver::new().with_reset_input(7);
        let mut handle = prepared(&driver, 4);
        let cfg = CaptureConfig::new().sensor_reset(SensorReset {
            input: 7,
            after_stalls: 3,
        });
        let mut capture = CaptureLoop::new(&mut handle, &cfg);
        capture.start().unwrap();

        driver.hang();
        for _ in 0..2 {
            assert!(matches!(
                capture.next_frame(WAIT).unwrap_err(),
                CaptureError::CaptureTimeout(_)
            ));
        }
        let frame = capture.next_frame(WAIT).unwrap();
        capture.release_frame(&frame).unwrap();
        assert_eq!(capture.stats().resets, 1);
        assert_eq!(driver.snapshot().inputs, vec![7]);
    }

    #[test]
    fn wait_error_surfaces_as_device_error() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 2);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        driver.fail_next_wait();
        let err = capture.next_frame(WAIT).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceError(_)));
        assert!(err.needs_reset());
    }

    #[test]
    fn pause_and_resume_keep_ownership() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 3);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        assert!(capture.pause().is_err());

        capture.start().unwrap();
        let frame = capture.next_frame(WAIT).unwrap();
        let before = states(&capture);

        capture.pause().unwrap();
        assert_eq!(capture.state(), LoopState::Paused);
        assert!(driver.snapshot().paused);
        assert_eq!(states(&capture), before);
        assert!(matches!(
            capture.next_frame(WAIT).unwrap_err(),
            CaptureError::InvalidState(_)
        ));

        // 暂停期间仍可归还
        capture.release_frame(&frame).unwrap();

        capture.resume().unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
        assert!(!driver.snapshot().paused);
        capture.next_frame(WAIT).unwrap();
    }

    #[test]
    fn stop_while_paused_clears_pause_for_restart() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 3);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());

        capture.start().unwrap();
        capture.pause().unwrap();
        capture.stop().unwrap();
        assert_eq!(capture.state(), LoopState::Idle);
        assert!(!driver.snapshot().paused);

        capture.start().unwrap();
        assert_eq!(capture.state(), LoopState::Streaming);
        capture.next_frame(WAIT).unwrap();
    }

    #[test]
    fn one_shot_release_frees_the_buffer() {
        let driver = SimulatedDriver::new().with_payload_offset(0x200);
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(2560, 1920, FourCC::JPEG.into()).unwrap();
        handle.allocate(&session, 1).unwrap();

        let cfg = CaptureConfig::new().mode(CaptureMode::OneShot);
        let mut capture = CaptureLoop::new(&mut handle, &cfg);
        capture.start().unwrap();

        let shot = capture.next_frame(WAIT).unwrap();
        assert_eq!(shot.payload_offset, Some(0x200));
        let frame = capture.frame(&shot).unwrap();
        assert_eq!(frame.payload().len(), frame.data.len() - 0x200);

        capture.release_frame(&shot).unwrap();
        assert_eq!(states(&capture), vec![BufferState::Free]);
        assert!(driver.snapshot().queued.is_empty());
    }

    #[test]
    fn frame_view_exposes_buffer_bytes() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 2);
        let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
        capture.start().unwrap();

        let desc = capture.next_frame(WAIT).unwrap();
        let frame = capture.frame(&desc).unwrap();
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.data.len(), 640 * 480 * 3 / 2);
        assert!(frame.data.iter().all(|b| *b == desc.index() as u8));

        capture.release_frame(&desc).unwrap();
        assert!(capture.frame(&desc).is_none());
    }

    #[test]
    fn drop_stops_streaming() {
        let driver = SimulatedDriver::new();
        let mut handle = prepared(&driver, 2);
        {
            let mut capture = CaptureLoop::new(&mut handle, &CaptureConfig::new());
            capture.start().unwrap();
            let _ = capture.next_frame(WAIT).unwrap();
        }
        assert!(!driver.snapshot().streaming);
        assert_eq!(handle.pool().map(|p| p.count_in(BufferState::Held)), Some(0));
    }
}
