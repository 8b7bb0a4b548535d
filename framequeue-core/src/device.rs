use std::fmt;
use std::io;

use crate::builder::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::pixel_format::PixelFormat;
use crate::pool::BufferPool;
use crate::session::{Session, SessionId};
use crate::traits::{AppliedFormat, Capabilities, CaptureDevice, DeviceInfo, Driver};

/// 一个打开的采集设备
///
/// 独占持有设备连接、当前唯一有效的 Session 以及该 Session 的 Buffer Pool。
/// 格式变化会先拆掉旧 Pool；`CaptureLoop` 以 `&mut` 借用本结构，
/// 因此采集进行中无法改格式。
pub struct DeviceHandle<D: CaptureDevice> {
    id: String,
    device: Option<D>,
    session: Option<ActiveSession>,
    pool: Option<BufferPool<D::Memory>>,
    next_session: u64,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    id: SessionId,
    format: AppliedFormat,
}

impl<D: CaptureDevice> DeviceHandle<D> {
    /// 打开设备；不存在或不具备采集能力时返回 `DeviceUnavailable`
    pub fn open<Drv>(driver: &Drv, id: &str) -> Result<Self>
    where
        Drv: Driver<Device = D>,
    {
        let device = driver.open(id)?;
        Self::from_device(device)
    }

    /// 打开设备并按配置选择输入通道
    pub fn open_with<Drv>(driver: &Drv, id: &str, config: &CaptureConfig) -> Result<Self>
    where
        Drv: Driver<Device = D>,
    {
        let mut handle = Self::open(driver, id)?;
        if let Some(input) = config.input {
            handle
                .select_input(input)
                .map_err(|e| CaptureError::DeviceUnavailable {
                    id: id.to_string(),
                    reason: format!("cannot select input {}: {}", input, e),
                })?;
        }
        Ok(handle)
    }

    pub fn from_device(device: D) -> Result<Self> {
        let info = device.info();
        if !info.capabilities.contains(Capabilities::VIDEO_CAPTURE) {
            return Err(CaptureError::DeviceUnavailable {
                id: info.id.clone(),
                reason: "device does not support video capture".to_string(),
            });
        }

        tracing::info!(
            "Capture device opened: {} ({}, {})",
            info.id,
            info.name,
            info.driver
        );

        Ok(Self {
            id: info.id.clone(),
            device: Some(device),
            session: None,
            pool: None,
            next_session: 1,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref().map(|d| d.info())
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_mut(&mut self) -> Result<&mut D> {
        let id = &self.id;
        self.device
            .as_mut()
            .ok_or_else(|| CaptureError::DeviceUnavailable {
                id: id.clone(),
                reason: "device handle is closed".to_string(),
            })
    }

    /// VIDIOC_S_INPUT
    pub fn select_input(&mut self, index: u32) -> Result<()> {
        self.device_mut()?.select_input(index)?;
        tracing::debug!(index, "input selected");
        Ok(())
    }

    /// 协商帧格式
    ///
    /// 设备不支持时返回 `UnsupportedFormat`，且不动当前 Session 与 Pool；
    /// 成功后旧 Session 失效，其 Pool 被释放。
    pub fn set_format(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<Session> {
        let unsupported = CaptureError::UnsupportedFormat {
            width,
            height,
            format,
        };

        // 1. VIDIOC_ENUM_FMT：先确认格式存在，此时尚未改动任何状态
        let supported = self.device_mut()?.supported_formats()?;
        if !supported.contains(&format) {
            tracing::error!("unsupported pixel format {} (device offers {:?})", format, supported);
            return Err(unsupported);
        }

        // 2. VIDIOC_TRY_FMT：驱动会替换格式时在这里拒绝，旧 Pool 仍然完好
        let tried = match self.device_mut()?.try_format(width, height, format) {
            Ok(tried) => tried,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => return Err(unsupported),
            Err(e) => return Err(CaptureError::DeviceError(e)),
        };
        if tried.format != format {
            tracing::error!(
                "driver would substitute {} for requested {}",
                tried.format,
                format
            );
            return Err(unsupported);
        }

        // 3. 驱动在缓冲已分配时拒绝 S_FMT，先拆掉旧 Pool
        self.release_pool();

        // 4. VIDIOC_S_FMT
        let applied = match self.device_mut()?.apply_format(width, height, format) {
            Ok(applied) => applied,
            Err(e) => {
                // TRY_FMT 已通过却仍失败，旧 Pool 已释放，旧 Session 随之失效
                tracing::error!("VIDIOC_S_FMT failed after TRY_FMT accepted it: {}", e);
                self.session = None;
                return Err(if e.kind() == io::ErrorKind::InvalidInput {
                    unsupported
                } else {
                    CaptureError::DeviceError(e)
                });
            }
        };

        if applied.format != format {
            tracing::error!(
                "driver substituted {} for requested {}",
                applied.format,
                format
            );
            self.session = None;
            return Err(unsupported);
        }

        if applied.width != width || applied.height != height {
            tracing::warn!(
                "driver adjusted resolution {}x{} -> {}x{}",
                width,
                height,
                applied.width,
                applied.height
            );
        }

        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.session = Some(ActiveSession {
            id,
            format: applied,
        });

        tracing::info!(
            "Format applied: {}x{} @ {} (session {})",
            applied.width,
            applied.height,
            applied.format,
            id.0
        );

        Ok(Session {
            id,
            format: applied,
        })
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.map(|s| s.id)
    }

    pub fn current_format(&self) -> Option<&AppliedFormat> {
        self.session.as_ref().map(|s| &s.format)
    }

    /// 为当前 Session 分配 Buffer Pool，已有的 Pool 先被释放
    pub fn allocate(&mut self, session: &Session, count: u32) -> Result<&BufferPool<D::Memory>> {
        if self.active_session() != Some(session.id) {
            return Err(CaptureError::InvalidState(
                "session was superseded by a later set_format",
            ));
        }

        self.release_pool();
        let device = self.device_mut()?;
        let pool = BufferPool::allocate(device, session, count)?;
        Ok(self.pool.insert(pool))
    }

    pub fn pool(&self) -> Option<&BufferPool<D::Memory>> {
        self.pool.as_ref()
    }

    /// 释放当前 Pool (若有)
    pub fn release_pool(&mut self) {
        if let (Some(pool), Some(device)) = (self.pool.take(), self.device.as_mut()) {
            pool.release(device);
        }
    }

    pub(crate) fn parts_mut(&mut self) -> Option<(&mut D, &mut BufferPool<D::Memory>)> {
        match (self.device.as_mut(), self.pool.as_mut()) {
            (Some(device), Some(pool)) => Some((device, pool)),
            _ => None,
        }
    }

    /// 关闭设备，可重复调用
    pub fn close(&mut self) {
        if self.device.is_none() {
            return;
        }

        self.release_pool();
        self.session = None;
        self.device = None;
        tracing::info!("Capture device closed: {}", self.id);
    }
}

impl<D: CaptureDevice> fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("open", &self.device.is_some())
            .field("session", &self.session)
            .field("pool", &self.pool.as_ref().map(|p| (p.id(), p.len())))
            .finish()
    }
}

impl<D: CaptureDevice> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::FourCC;
    use crate::simulation::{SimulatedDriver, SIM_CAPTURE_ID, SIM_OUTPUT_ID};

    #[test]
    fn open_rejects_missing_and_non_capture_nodes() {
        let driver = SimulatedDriver::new();
        let missing = DeviceHandle::open(&driver, "/dev/video42").unwrap_err();
        assert!(matches!(missing, CaptureError::DeviceUnavailable { .. }));

        let output = DeviceHandle::open(&driver, SIM_OUTPUT_ID).unwrap_err();
        assert!(matches!(output, CaptureError::DeviceUnavailable { .. }));
    }

    #[test]
    fn open_with_selects_configured_input() {
        let driver = SimulatedDriver::new();
        let cfg = CaptureConfig::new().input(1);
        let handle = DeviceHandle::open_with(&driver, SIM_CAPTURE_ID, &cfg).unwrap();
        assert!(handle.is_open());
        assert_eq!(driver.snapshot().inputs, vec![1]);
    }

    #[test]
    fn unsupported_format_leaves_session_and_pool_untouched() {
        let driver = SimulatedDriver::new();
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();
        handle.allocate(&session, 4).unwrap();

        for _ in 0..3 {
            let err = handle
                .set_format(640, 480, FourCC::RGB565.into())
                .unwrap_err();
            assert!(matches!(err, CaptureError::UnsupportedFormat { .. }));
        }

        assert_eq!(handle.active_session(), Some(session.id()));
        assert_eq!(handle.pool().map(|p| p.len()), Some(4));
        assert_eq!(driver.snapshot().live_mappings, 4);
        assert_eq!(
            handle.current_format().map(|f| f.format),
            Some(FourCC::NV21.into())
        );
    }

    #[test]
    fn substituted_format_is_rejected_before_pool_teardown() {
        // 枚举里有 RGB565，S_FMT/TRY_FMT 却会换成 NV21
        let driver = SimulatedDriver::new().with_substitution(FourCC::RGB565, FourCC::NV21);
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(640, 480, FourCC::YUYV.into()).unwrap();
        handle.allocate(&session, 4).unwrap();

        let err = handle
            .set_format(640, 480, FourCC::RGB565.into())
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat { .. }));

        assert_eq!(handle.active_session(), Some(session.id()));
        assert_eq!(handle.pool().map(|p| p.len()), Some(4));
        assert_eq!(driver.snapshot().live_mappings, 4);
        assert_eq!(driver.snapshot().reqbufs_log, vec![4]);
        assert_eq!(
            handle.current_format().map(|f| f.format),
            Some(FourCC::YUYV.into())
        );
    }

    #[test]
    fn new_format_invalidates_previous_session_and_pool() {
        let driver = SimulatedDriver::new();
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let first = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();
        handle.allocate(&first, 4).unwrap();

        let second = handle.set_format(1280, 720, FourCC::YUYV.into()).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(handle.pool().is_none());
        assert_eq!(driver.snapshot().live_mappings, 0);

        let err = handle.allocate(&first, 4).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState(_)));

        let pool = handle.allocate(&second, 3).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.session(), second.id());
    }

    #[test]
    fn session_reports_frame_size() {
        let driver = SimulatedDriver::new();
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(800, 480, FourCC::YUYV.into()).unwrap();
        assert_eq!(session.width(), 800);
        assert_eq!(session.height(), 480);
        assert_eq!(session.frame_size(), Some(800 * 480 * 2));
    }

    #[test]
    fn close_is_idempotent_and_unmaps() {
        let driver = SimulatedDriver::new();
        let mut handle = DeviceHandle::open(&driver, SIM_CAPTURE_ID).unwrap();
        let session = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();
        handle.allocate(&session, 4).unwrap();

        handle.close();
        handle.close();

        assert!(!handle.is_open());
        assert!(handle.active_session().is_none());
        assert_eq!(driver.snapshot().live_mappings, 0);

        let err = handle
            .set_format(640, 480, FourCC::NV21.into())
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable { .. }));
    }
}
