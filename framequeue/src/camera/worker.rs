//! 后台采集 Worker
//!
//! 独占 DeviceHandle 与 CaptureLoop，按主线程的指令逐帧出队、拷贝、归还。
//! 循环报告设备错误时执行完整复位：close → open → set_format → allocate → start。

use crossbeam_channel::{Receiver, Sender};

use framequeue_core::builder::CaptureConfig;
use framequeue_core::capture::{CaptureLoop, LoopState};
use framequeue_core::device::DeviceHandle;
use framequeue_core::error::{CaptureError, Result};
use framequeue_core::pixel_format::PixelFormat;
use framequeue_core::traits::{CaptureDevice, Driver};

use super::{CameraInfo, CameraStats, OwnedFrame};

/// 指令：主线程发送给后台 Worker 的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// 请求下一帧
    Read,
    Pause,
    Resume,
    Stats,
    Stop,
}

/// 响应：后台 Worker 发回的数据
#[derive(Debug)]
pub(crate) enum Response {
    /// 首次启动成功
    Opened(CameraInfo),
    Frame(OwnedFrame),
    /// Pause / Resume 完成
    Done,
    Stats(CameraStats),
    Error(CaptureError),
}

/// 打开与复位时使用的全部参数
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) id: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) config: CaptureConfig,
    pub(crate) max_resets: u32,
}

/// 需要复位的失败，以及复位后要重放的指令
struct Failure {
    error: CaptureError,
    pending: Option<Command>,
    delivered: u64,
}

fn open_pipeline<Drv: Driver>(driver: &Drv, settings: &Settings) -> Result<DeviceHandle<Drv::Device>> {
    let mut handle = DeviceHandle::open_with(driver, &settings.id, &settings.config)?;
    let session = handle.set_format(settings.width, settings.height, settings.format)?;
    handle.allocate(&session, settings.config.buffer_count)?;
    Ok(handle)
}

/// Worker 主函数，在阻塞线程上运行直到收到 Stop 或通道断开
pub(crate) fn run<Drv: Driver>(
    driver: Drv,
    settings: Settings,
    cmd_rx: Receiver<Command>,
    res_tx: Sender<Response>,
) {
    let mut handle = match open_pipeline(&driver, &settings) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = res_tx.send(Response::Error(e));
            return;
        }
    };

    let mut announced = false;
    let mut pending = None;
    // 重新打开失败的原因，下一轮 start() 在关闭的句柄上失败时以它为准
    let mut reopen_error: Option<CaptureError> = None;
    let mut resets: u32 = 0;
    let mut consecutive: u32 = 0;

    loop {
        let failure = {
            let mut capture = CaptureLoop::new(&mut handle, &settings.config);
            match capture.start() {
                Ok(()) => {
                    if !announced {
                        announced = true;
                        if res_tx.send(Response::Opened(describe(&capture))).is_err() {
                            return;
                        }
                    }
                    match serve(&mut capture, &cmd_rx, &res_tx, pending.take(), resets) {
                        Some(failure) => failure,
                        None => return,
                    }
                }
                Err(error) => Failure {
                    error: reopen_error.take().unwrap_or(error),
                    pending: pending.take(),
                    delivered: 0,
                },
            }
        };

        // 首次启动失败直接报告给 open()
        if !announced {
            let _ = res_tx.send(Response::Error(failure.error));
            return;
        }

        if failure.delivered > 0 {
            consecutive = 0;
        }
        if consecutive >= settings.max_resets {
            tracing::error!(
                "capture pipeline failed after {} consecutive resets: {}",
                consecutive,
                failure.error
            );
            if failure.pending.is_some() {
                let _ = res_tx.send(Response::Error(failure.error));
            }
            return;
        }

        consecutive += 1;
        resets += 1;
        tracing::warn!(attempt = consecutive, "{}; resetting capture pipeline", failure.error);

        pending = failure.pending;
        handle.close();
        // 重新打开失败时 handle 保持关闭，下一轮 start() 失败会再次进入这里
        match open_pipeline(&driver, &settings) {
            Ok(reopened) => handle = reopened,
            Err(e) => {
                tracing::error!("reopening {} failed: {}", settings.id, e);
                reopen_error = Some(e);
            }
        }
    }
}

/// 服务指令直到 Stop (返回 `None`) 或出现需要复位的错误
fn serve<D: CaptureDevice>(
    capture: &mut CaptureLoop<'_, D>,
    cmd_rx: &Receiver<Command>,
    res_tx: &Sender<Response>,
    mut pending: Option<Command>,
    resets: u32,
) -> Option<Failure> {
    let mut delivered = 0u64;

    loop {
        let cmd = match pending.take() {
            Some(cmd) => cmd,
            // 主线程已断开，等同 Stop
            None => cmd_rx.recv().unwrap_or(Command::Stop),
        };

        let response = match cmd {
            Command::Read => match read_owned(capture) {
                Ok(frame) => {
                    delivered += 1;
                    Response::Frame(frame)
                }
                // Sensor 复位后的 start() 失败会把循环留在 Idle，同样需要完整复位
                Err(error) if error.needs_reset() || capture.state() == LoopState::Idle => {
                    return Some(Failure {
                        error,
                        pending: Some(cmd),
                        delivered,
                    })
                }
                Err(error) => Response::Error(error),
            },
            // 设备可能没有暂停控制项，失败只上报不复位
            Command::Pause | Command::Resume => {
                let result = if cmd == Command::Pause {
                    capture.pause()
                } else {
                    capture.resume()
                };
                match result {
                    Ok(()) => Response::Done,
                    Err(error) => Response::Error(error),
                }
            }
            Command::Stats => Response::Stats(CameraStats {
                capture: capture.stats().clone(),
                pipeline_resets: resets,
            }),
            Command::Stop => {
                if let Err(e) = capture.stop() {
                    tracing::warn!("stopping capture failed: {}", e);
                }
                return None;
            }
        };

        if res_tx.send(response).is_err() {
            return None;
        }
    }
}

/// 出队一帧，拷贝到堆上后立即归还缓冲
fn read_owned<D: CaptureDevice>(capture: &mut CaptureLoop<'_, D>) -> Result<OwnedFrame> {
    let desc = capture.next()?;

    // 必须在这里把借用 Pool 的数据拷贝出来，缓冲随后就会归还给驱动
    let owned = capture.frame(&desc).map(|frame| OwnedFrame {
        data: frame.data.to_vec(),
        width: frame.width,
        height: frame.height,
        stride: frame.stride,
        format: frame.format,
        sequence: frame.sequence,
        timestamp: frame.timestamp,
        payload_offset: frame.payload_offset,
    });

    capture.release_frame(&desc)?;
    owned.ok_or(CaptureError::InvalidState("dequeued frame is no longer live"))
}

fn describe<D: CaptureDevice>(capture: &CaptureLoop<'_, D>) -> CameraInfo {
    let handle = capture.handle();
    let (name, driver) = handle
        .info()
        .map(|info| (info.name.clone(), info.driver.clone()))
        .unwrap_or_default();

    match capture.pool() {
        Some(pool) => {
            let format = pool.format();
            CameraInfo {
                id: handle.id().to_string(),
                name,
                driver,
                width: format.width,
                height: format.height,
                format: format.format,
                stride: format.bytes_per_line as usize,
                buffer_count: pool.len(),
            }
        }
        None => CameraInfo {
            id: handle.id().to_string(),
            name,
            driver,
            width: 0,
            height: 0,
            format: PixelFormat::Unknown(0),
            stride: 0,
            buffer_count: 0,
        },
    }
}
