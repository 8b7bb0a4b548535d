pub mod backend;
mod worker;

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};

use framequeue_core::builder::CaptureConfig;
use framequeue_core::pixel_format::{FourCC, PixelFormat};
use framequeue_core::stats::CaptureStats;
use framequeue_core::traits::Driver;

use crate::internal::runtime;
use worker::{Command, Response, Settings};

/// 拷贝出来的一帧，不再借用驱动缓冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    pub sequence: u32,
    pub timestamp: Duration,
    pub payload_offset: Option<u32>,
}

impl OwnedFrame {
    /// 压缩容器的主 payload；非压缩格式即整帧
    pub fn payload(&self) -> &[u8] {
        let offset = self.payload_offset.unwrap_or(0) as usize;
        self.data.get(offset..).unwrap_or(&[])
    }
}

/// 启动成功后协商出的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: usize,
    pub buffer_count: usize,
}

/// 当前采集循环的统计，以及 Worker 执行过的完整复位次数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub capture: CaptureStats,
    pub pipeline_resets: u32,
}

/// `Camera` 的打开参数
#[derive(Debug, Clone)]
pub struct CameraOptions {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub config: CaptureConfig,
    /// 连续完整复位的上限，0 表示设备错误直接上报
    pub max_resets: u32,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: FourCC::YUYV.into(),
            config: CaptureConfig::default(),
            max_resets: 3,
        }
    }
}

impl CameraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: impl Into<PixelFormat>) -> Self {
        self.format = format.into();
        self
    }

    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_resets(mut self, max: u32) -> Self {
        self.max_resets = max;
        self
    }
}

/// 阻塞式的采集相机
///
/// 采集循环跑在后台 Worker 上，`read()` 返回拷贝好的帧；
/// 设备出错时 Worker 自动复位整条管线，调用方无感知。
#[derive(Debug)]
pub struct Camera {
    // 发送指令的通道
    cmd_tx: Sender<Command>,
    // 接收数据的通道
    res_rx: Receiver<Response>,
    info: CameraInfo,
    is_opened: bool,
}

impl Camera {
    /// 以默认参数打开第 `index` 个采集设备
    #[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
    pub fn new(index: usize) -> Result<Self> {
        let driver = backend::create_driver();

        let devices = driver
            .list_devices()
            .map_err(|e| anyhow!("Failed to list devices: {}", e))?;

        let device_id = devices
            .get(index)
            .ok_or_else(|| anyhow!("Camera index {} out of range", index))?
            .id
            .clone();

        Self::open(driver, &device_id, CameraOptions::default())
    }

    /// 用指定驱动打开设备 `id` 并开始采集
    ///
    /// 返回时首帧已就绪；打开、协商、分配或首帧等待失败都会在这里报告。
    pub fn open<Drv>(driver: Drv, id: &str, options: CameraOptions) -> Result<Self>
    where
        Drv: Driver + 'static,
    {
        let settings = Settings {
            id: id.to_string(),
            width: options.width,
            height: options.height,
            format: options.format,
            config: options.config,
            max_resets: options.max_resets,
        };

        // 容量为 1，保证背压
        let (cmd_tx, cmd_rx) = bounded::<Command>(1);
        let (res_tx, res_rx) = bounded::<Response>(1);

        let rt = runtime::get_runtime().context("Failed to create background runtime")?;
        rt.spawn_blocking(move || worker::run(driver, settings, cmd_rx, res_tx));

        let response = res_rx
            .recv()
            .map_err(|_| anyhow!("Capture worker exited during open"))?;

        match response {
            Response::Opened(info) => {
                tracing::info!(
                    "Camera {} streaming {}x{} @ {}",
                    info.id,
                    info.width,
                    info.height,
                    info.format
                );
                Ok(Self {
                    cmd_tx,
                    res_rx,
                    info,
                    is_opened: true,
                })
            }
            Response::Error(e) => {
                Err(anyhow::Error::new(e).context(format!("Failed to open camera {}", id)))
            }
            other => Err(anyhow!("Unexpected worker response: {:?}", other)),
        }
    }

    fn request(&mut self, cmd: Command) -> Result<Response> {
        if !self.is_opened {
            return Err(anyhow!("Camera is closed"));
        }

        if self.cmd_tx.send(cmd).is_err() {
            self.is_opened = false;
            return Err(anyhow!("Capture worker is dead"));
        }

        match self.res_rx.recv() {
            Ok(Response::Error(e)) => Err(anyhow::Error::new(e)),
            Ok(response) => Ok(response),
            Err(_) => {
                self.is_opened = false;
                Err(anyhow!("Capture worker exited, device could not be recovered"))
            }
        }
    }

    /// 读取下一帧
    ///
    /// 超时、缓冲耗尽等错误以 `CaptureError` 返回 (可 downcast)，相机仍可继续使用。
    pub fn read(&mut self) -> Result<OwnedFrame> {
        match self.request(Command::Read)? {
            Response::Frame(frame) => Ok(frame),
            other => Err(anyhow!("Unexpected worker response: {:?}", other)),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.request(Command::Pause)? {
            Response::Done => Ok(()),
            other => Err(anyhow!("Unexpected worker response: {:?}", other)),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.request(Command::Resume)? {
            Response::Done => Ok(()),
            other => Err(anyhow!("Unexpected worker response: {:?}", other)),
        }
    }

    pub fn stats(&mut self) -> Result<CameraStats> {
        match self.request(Command::Stats)? {
            Response::Stats(stats) => Ok(stats),
            other => Err(anyhow!("Unexpected worker response: {:?}", other)),
        }
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    /// 检查相机是否仍可用
    pub fn is_opened(&self) -> bool {
        self.is_opened
    }

    /// 停止采集并等待 Worker 关闭设备，可重复调用
    pub fn close(&mut self) {
        if !self.is_opened {
            return;
        }
        self.is_opened = false;

        // 忽略错误 (Worker 可能已经退出)
        let _ = self.cmd_tx.send(Command::Stop);
        // Worker 退出时丢弃发送端，recv 随之返回 Err
        while self.res_rx.recv().is_ok() {}
        tracing::info!("Camera {} closed", self.info.id);
    }
}

// 析构函数：通知后台线程退出
impl Drop for Camera {
    fn drop(&mut self) {
        self.close();
    }
}
