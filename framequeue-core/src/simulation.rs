//! 进程内仿真采集设备
//!
//! 行为模仿 V4L2 mmap 流：REQBUFS 可能少给，映射可能失败，poll 可能超时，
//! STREAMOFF 会回收驱动侧所有缓冲。所有状态放在共享的 [`SimulatedDriver`] 中，
//! 设备被 DeviceHandle 拿走后测试仍能观察。

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{CaptureError, Result};
use crate::pixel_format::{FourCC, PixelFormat};
use crate::traits::{
    AppliedFormat, BufferMemory, Capabilities, CaptureDevice, Dequeued, DeviceInfo, Driver,
};

/// 仿真设备 ID
pub const SIM_CAPTURE_ID: &str = "sim:capture";
/// 只有输出能力的仿真节点，打开时应被拒绝
pub const SIM_OUTPUT_ID: &str = "sim:output";

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug)]
struct SimState {
    formats: Vec<PixelFormat>,
    max_width: u32,
    max_height: u32,
    grant_limit: Option<u32>,
    fail_map_at: Option<u32>,
    reset_input: Option<u32>,
    payload_offset: u32,
    substitutions: Vec<(PixelFormat, PixelFormat)>,
    unplugged: bool,

    current: Option<PixelFormat>,
    buffer_len: usize,
    allocated: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    paused: bool,
    hung: bool,
    pending_stalls: u32,
    fail_next_wait: bool,
    sequence: u32,
    inputs: Vec<u32>,
    stream_on_count: u32,
    reqbufs_log: Vec<u32>,
}

/// 仿真驱动，克隆后共享同一份设备状态
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimState>>,
    live: Arc<AtomicUsize>,
}

/// 某一时刻的设备状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSnapshot {
    pub live_mappings: usize,
    pub allocated: u32,
    pub queued: Vec<u32>,
    pub streaming: bool,
    pub paused: bool,
    pub inputs: Vec<u32>,
    pub stream_on_count: u32,
    pub reqbufs_log: Vec<u32>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    /// 默认支持 NV21 / YUYV / JPEG，最大 2560x1920
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                formats: vec![FourCC::NV21.into(), FourCC::YUYV.into(), FourCC::JPEG.into()],
                max_width: 2560,
                max_height: 1920,
                grant_limit: None,
                fail_map_at: None,
                reset_input: None,
                payload_offset: 0,
                substitutions: Vec::new(),
                unplugged: false,
                current: None,
                buffer_len: 0,
                allocated: 0,
                queued: VecDeque::new(),
                streaming: false,
                paused: false,
                hung: false,
                pending_stalls: 0,
                fail_next_wait: false,
                sequence: 0,
                inputs: Vec::new(),
                stream_on_count: 0,
                reqbufs_log: Vec::new(),
            })),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_formats(self, formats: Vec<PixelFormat>) -> Self {
        self.state().formats = formats;
        self
    }

    /// REQBUFS 最多给出 `limit` 个缓冲
    pub fn with_grant_limit(self, limit: u32) -> Self {
        self.state().grant_limit = Some(limit);
        self
    }

    /// 第 `index` 个缓冲 mmap 失败
    pub fn with_map_failure_at(self, index: u32) -> Self {
        self.state().fail_map_at = Some(index);
        self
    }

    /// 选择该输入号会让挂死的 Sensor 恢复
    pub fn with_reset_input(self, input: u32) -> Self {
        self.state().reset_input = Some(input);
        self
    }

    /// 枚举中列出 `advertised`，S_FMT/TRY_FMT 时却换成 `applied`
    pub fn with_substitution(
        self,
        advertised: impl Into<PixelFormat>,
        applied: impl Into<PixelFormat>,
    ) -> Self {
        {
            let mut st = self.state();
            let advertised = advertised.into();
            if !st.formats.contains(&advertised) {
                st.formats.push(advertised);
            }
            st.substitutions.push((advertised, applied.into()));
        }
        self
    }

    /// 压缩格式帧的主 payload 偏移
    pub fn with_payload_offset(self, offset: u32) -> Self {
        self.state().payload_offset = offset;
        self
    }

    /// 接下来 `count` 次 poll 超时
    pub fn stall(&self, count: u32) {
        self.state().pending_stalls += count;
    }

    /// Sensor 挂死，直到选择复位输入前都不出帧
    pub fn hang(&self) {
        self.state().hung = true;
    }

    /// 设备节点消失，之后的 open 返回 `DeviceUnavailable`
    pub fn unplug(&self) {
        self.state().unplugged = true;
    }

    pub fn plug_in(&self) {
        self.state().unplugged = false;
    }

    /// 下一次 poll 返回 POLLERR
    pub fn fail_next_wait(&self) {
        self.state().fail_next_wait = true;
    }

    pub fn snapshot(&self) -> SimSnapshot {
        let st = self.state();
        SimSnapshot {
            live_mappings: self.live.load(Ordering::SeqCst),
            allocated: st.allocated,
            queued: st.queued.iter().copied().collect(),
            streaming: st.streaming,
            paused: st.paused,
            inputs: st.inputs.clone(),
            stream_on_count: st.stream_on_count,
            reqbufs_log: st.reqbufs_log.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn info(id: &str, capabilities: Capabilities) -> DeviceInfo {
        DeviceInfo {
            name: "Simulated Sensor".to_string(),
            id: id.to_string(),
            driver: "framequeue-sim".to_string(),
            bus_info: Some("platform:sim".to_string()),
            capabilities,
        }
    }
}

impl Driver for SimulatedDriver {
    type Device = SimulatedDevice;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![Self::info(
            SIM_CAPTURE_ID,
            Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING,
        )])
    }

    fn open(&self, id: &str) -> Result<SimulatedDevice> {
        if self.state().unplugged {
            return Err(CaptureError::DeviceUnavailable {
                id: id.to_string(),
                reason: "device node disappeared".to_string(),
            });
        }
        match id {
            SIM_CAPTURE_ID => Ok(SimulatedDevice {
                info: Self::info(id, Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING),
                driver: self.clone(),
            }),
            SIM_OUTPUT_ID => Err(CaptureError::DeviceUnavailable {
                id: id.to_string(),
                reason: "no capture capability".to_string(),
            }),
            _ => Err(CaptureError::DeviceUnavailable {
                id: id.to_string(),
                reason: "no such device".to_string(),
            }),
        }
    }
}

/// 仿真设备句柄
#[derive(Debug)]
pub struct SimulatedDevice {
    info: DeviceInfo,
    driver: SimulatedDriver,
}

/// 仿真映射，Drop 时计数减一
#[derive(Debug)]
pub struct SimulatedMemory {
    data: Box<[u8]>,
    live: Arc<AtomicUsize>,
}

impl BufferMemory for SimulatedMemory {
    fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for SimulatedMemory {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

fn einval(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl SimState {
    /// S_FMT/TRY_FMT 共用的协商逻辑，不修改状态
    fn negotiate(&self, width: u32, height: u32, format: PixelFormat) -> io::Result<AppliedFormat> {
        let substituted = self
            .substitutions
            .iter()
            .find(|(advertised, _)| *advertised == format)
            .map(|(_, applied)| *applied);

        // 与真实驱动一样：不认识的格式被替换成第一个支持的格式
        let format = match substituted {
            Some(applied) => applied,
            None if self.formats.contains(&format) => format,
            None => *self.formats.first().ok_or_else(|| einval("no formats"))?,
        };
        let width = width.min(self.max_width);
        let height = height.min(self.max_height);

        let size_image = format
            .frame_size(width, height)
            .unwrap_or(width as usize * height as usize);
        let bytes_per_line = format
            .bits_per_pixel()
            .filter(|bpp| *bpp == 16 || *bpp == 32)
            .map(|bpp| width * bpp / 8)
            .unwrap_or(if format.is_compressed() { 0 } else { width });

        Ok(AppliedFormat {
            width,
            height,
            format,
            bytes_per_line,
            size_image: size_image as u32,
        })
    }
}

impl CaptureDevice for SimulatedDevice {
    type Memory = SimulatedMemory;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supported_formats(&mut self) -> io::Result<Vec<PixelFormat>> {
        Ok(self.driver.state().formats.clone())
    }

    fn apply_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat> {
        let mut st = self.driver.state();
        if st.allocated > 0 {
            return Err(io::Error::other("device busy: buffers still allocated"));
        }

        let applied = st.negotiate(width, height, format)?;
        st.buffer_len = applied.size_image as usize;
        st.current = Some(applied.format);
        Ok(applied)
    }

    fn try_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> io::Result<AppliedFormat> {
        self.driver.state().negotiate(width, height, format)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut st = self.driver.state();
        st.reqbufs_log.push(count);
        if st.streaming {
            return Err(io::Error::other("device busy: streaming"));
        }
        if count > 0 && self.driver.live.load(Ordering::SeqCst) > 0 {
            return Err(io::Error::other("device busy: buffers still mapped"));
        }

        let granted = st.grant_limit.map_or(count, |limit| count.min(limit));
        st.allocated = granted;
        st.queued.clear();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<SimulatedMemory> {
        let st = self.driver.state();
        if index >= st.allocated {
            return Err(einval("buffer index out of range"));
        }
        if st.fail_map_at == Some(index) {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "mmap failed"));
        }

        let data = vec![index as u8; st.buffer_len.max(1)].into_boxed_slice();
        self.driver.live.fetch_add(1, Ordering::SeqCst);
        Ok(SimulatedMemory {
            data,
            live: self.driver.live.clone(),
        })
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut st = self.driver.state();
        if index >= st.allocated {
            return Err(einval("buffer index out of range"));
        }
        if st.queued.contains(&index) {
            return Err(einval("buffer already queued"));
        }
        st.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let mut st = self.driver.state();
        if !st.streaming {
            return Err(einval("not streaming"));
        }
        let index = st
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no buffer ready"))?;

        st.sequence += 1;
        let compressed =
            st.current.is_some_and(|f| f.is_compressed()) && st.payload_offset > 0;
        Ok(Dequeued {
            index,
            bytes_used: st.buffer_len as u32,
            sequence: st.sequence,
            timestamp: FRAME_INTERVAL * st.sequence,
            payload_offset: compressed.then_some(st.payload_offset),
        })
    }

    fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
        let mut st = self.driver.state();
        if st.fail_next_wait {
            st.fail_next_wait = false;
            return Err(io::Error::other("POLLERR"));
        }
        if !st.streaming {
            return Err(einval("not streaming"));
        }
        if st.paused || st.hung || st.queued.is_empty() {
            return Ok(false);
        }
        if st.pending_stalls > 0 {
            st.pending_stalls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut st = self.driver.state();
        st.streaming = true;
        st.stream_on_count += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut st = self.driver.state();
        // 与 FIMC 一样，暂停控制项独立于 STREAMOFF/STREAMON
        st.streaming = false;
        st.queued.clear();
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> io::Result<()> {
        let mut st = self.driver.state();
        if !st.streaming {
            return Err(einval("not streaming"));
        }
        st.paused = paused;
        Ok(())
    }

    fn select_input(&mut self, index: u32) -> io::Result<()> {
        let mut st = self.driver.state();
        st.inputs.push(index);
        if st.reset_input == Some(index) {
            st.hung = false;
            st.pending_stalls = 0;
        }
        Ok(())
    }
}
