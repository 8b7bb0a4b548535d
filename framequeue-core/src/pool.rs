use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CaptureError, Result};
use crate::frame::{BufferId, PoolId};
use crate::session::{Session, SessionId};
use crate::traits::{AppliedFormat, BufferMemory, CaptureDevice};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// 单个缓冲的归属
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// 已映射，不在任何队列中
    Free,
    /// 交给设备等待填充
    Queued,
    /// 已出队，由消费者持有
    Held,
}

/// 一块硬件帧缓冲
///
/// 映射后地址与长度不变，只有状态和内容会变化。
#[derive(Debug)]
pub struct Buffer<M> {
    index: u32,
    memory: M,
    state: BufferState,
    generation: u64,
}

impl<M: BufferMemory> Buffer<M> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_slice().as_ptr()
    }

    pub fn data(&self) -> &[u8] {
        self.memory.as_slice()
    }
}

/// 某个 Session 下固定数量的映射缓冲
#[derive(Debug)]
pub struct BufferPool<M> {
    id: PoolId,
    session: SessionId,
    format: AppliedFormat,
    buffers: Vec<Buffer<M>>,
}

impl<M: BufferMemory> BufferPool<M> {
    /// 向设备申请 `count` 个缓冲并逐个映射
    ///
    /// 设备少给或任何一次映射失败都返回 `AllocationFailed`，
    /// 此时已映射的缓冲全部解除映射，驱动侧缓冲也一并释放。
    pub fn allocate<D>(device: &mut D, session: &Session, count: u32) -> Result<Self>
    where
        D: CaptureDevice<Memory = M>,
    {
        if count == 0 {
            return Err(CaptureError::AllocationFailed {
                requested: 0,
                granted: 0,
                reason: "buffer count must be at least 1".to_string(),
            });
        }

        // 1. VIDIOC_REQBUFS
        let granted = device
            .request_buffers(count)
            .map_err(|e| CaptureError::AllocationFailed {
                requested: count,
                granted: 0,
                reason: e.to_string(),
            })?;

        if granted < count {
            tracing::error!(requested = count, granted, "device granted fewer buffers");
            free_device_buffers(device);
            return Err(CaptureError::AllocationFailed {
                requested: count,
                granted,
                reason: "device granted fewer buffers than requested".to_string(),
            });
        }

        // 2. QUERYBUF + mmap，出错时 `buffers` 被 drop，已映射部分随之解除
        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            match device.map_buffer(index) {
                Ok(memory) => {
                    tracing::debug!(index, len = memory.len(), "buffer mapped");
                    buffers.push(Buffer {
                        index,
                        memory,
                        state: BufferState::Free,
                        generation: 0,
                    });
                }
                Err(e) => {
                    tracing::error!(index, "mmap failed: {}", e);
                    drop(buffers);
                    free_device_buffers(device);
                    return Err(CaptureError::AllocationFailed {
                        requested: count,
                        granted,
                        reason: format!("mapping buffer {} failed: {}", index, e),
                    });
                }
            }
        }

        let id = PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed));
        tracing::info!(pool = id.0, count, "buffer pool allocated");

        Ok(Self {
            id,
            session: session.id,
            format: session.format,
            buffers,
        })
    }

    /// 解除全部映射并归还驱动侧缓冲
    ///
    /// 调用方需保证没有未归还的帧；仍有 Held 缓冲时只记录日志。
    pub fn release<D>(self, device: &mut D)
    where
        D: CaptureDevice<Memory = M>,
    {
        let held = self.count_in(BufferState::Held);
        if held > 0 {
            tracing::warn!(pool = self.id.0, held, "releasing pool with frames still held");
        }

        let id = self.id;
        drop(self.buffers);
        free_device_buffers(device);
        tracing::info!(pool = id.0, "buffer pool released");
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn format(&self) -> &AppliedFormat {
        &self.format
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[Buffer<M>] {
        &self.buffers
    }

    pub fn buffer(&self, index: u32) -> Option<&Buffer<M>> {
        self.buffers.get(index as usize)
    }

    pub fn state_of(&self, index: u32) -> Option<BufferState> {
        self.buffer(index).map(|b| b.state)
    }

    pub fn count_in(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|b| b.state == state).count()
    }

    /// 句柄仍指向当前被持有的那一次出队
    pub fn is_live(&self, id: &BufferId) -> bool {
        id.pool == self.id
            && self
                .buffer(id.index)
                .is_some_and(|b| b.state == BufferState::Held && b.generation == id.generation)
    }

    pub(crate) fn mark_queued(&mut self, index: u32) {
        if let Some(buf) = self.buffers.get_mut(index as usize) {
            buf.state = BufferState::Queued;
        }
    }

    pub(crate) fn mark_free(&mut self, index: u32) {
        if let Some(buf) = self.buffers.get_mut(index as usize) {
            buf.state = BufferState::Free;
        }
    }

    /// Queued → Held，代数加一并返回新句柄
    pub(crate) fn mark_held(&mut self, index: u32) -> Option<BufferId> {
        let pool = self.id;
        let buf = self.buffers.get_mut(index as usize)?;
        if buf.state != BufferState::Queued {
            return None;
        }
        buf.state = BufferState::Held;
        buf.generation += 1;
        Some(BufferId {
            pool,
            index,
            generation: buf.generation,
        })
    }

    /// STREAMOFF 之后驱动已收回全部缓冲：Held 一律视为 Queued，返回回收数
    pub(crate) fn reclaim_held(&mut self) -> usize {
        let mut reclaimed = 0;
        for buf in self.buffers.iter_mut() {
            if buf.state == BufferState::Held {
                buf.state = BufferState::Queued;
                reclaimed += 1;
            }
        }
        reclaimed
    }
}

fn free_device_buffers<D: CaptureDevice>(device: &mut D) {
    if let Err(e) = device.request_buffers(0) {
        tracing::warn!("VIDIOC_REQBUFS(0) failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandle;
    use crate::pixel_format::FourCC;
    use crate::simulation::{SimulatedDriver, SIM_CAPTURE_ID};

    fn open(driver: &SimulatedDriver) -> DeviceHandle<crate::simulation::SimulatedDevice> {
        DeviceHandle::open(driver, SIM_CAPTURE_ID).unwrap()
    }

    #[test]
    fn allocate_maps_exactly_n_free_buffers() {
        for n in 1..=6 {
            let driver = SimulatedDriver::new();
            let mut handle = open(&driver);
            let session = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();

            let pool = BufferPool::allocate(handle.device_mut().unwrap(), &session, n).unwrap();
            assert_eq!(pool.len(), n as usize);
            assert_eq!(pool.count_in(BufferState::Free), n as usize);
            assert_eq!(driver.snapshot().live_mappings, n as usize);

            let indices: Vec<u32> = pool.buffers().iter().map(|b| b.index()).collect();
            assert_eq!(indices, (0..n).collect::<Vec<_>>());
            assert!(pool.buffers().iter().all(|b| b.len() == 640 * 480 * 3 / 2));

            pool.release(handle.device_mut().unwrap());
            assert_eq!(driver.snapshot().live_mappings, 0);
        }
    }

    #[test]
    fn short_grant_fails_without_mappings() {
        let driver = SimulatedDriver::new().with_grant_limit(2);
        let mut handle = open(&driver);
        let session = handle.set_format(640, 480, FourCC::NV21.into()).unwrap();

        let err = BufferPool::allocate(handle.device_mut().unwrap(), &session, 4).unwrap_err();
        match err {
            CaptureError::AllocationFailed {
                requested, granted, ..
            } => {
                assert_eq!(requested, 4);
                assert_eq!(granted, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let snap = driver.snapshot();
        assert_eq!(snap.live_mappings, 0);
        assert_eq!(snap.allocated, 0);
        assert_eq!(snap.reqbufs_log, vec![4, 0]);
    }

    #[test]
    fn mapping_failure_unwinds_partial_pool() {
        let driver = SimulatedDriver::new().with_map_failure_at(2);
        let mut handle = open(&driver);
        let session = handle.set_format(640, 480, FourCC::YUYV.into()).unwrap();

        let err = BufferPool::allocate(handle.device_mut().unwrap(), &session, 4).unwrap_err();
        assert!(matches!(err, CaptureError::AllocationFailed { .. }));

        let snap = driver.snapshot();
        assert_eq!(snap.live_mappings, 0);
        assert_eq!(snap.allocated, 0);
    }

    #[test]
    fn zero_buffers_is_rejected() {
        let driver = SimulatedDriver::new();
        let mut handle = open(&driver);
        let session = handle.set_format(640, 480, FourCC::YUYV.into()).unwrap();

        let err = BufferPool::allocate(handle.device_mut().unwrap(), &session, 0).unwrap_err();
        assert!(matches!(err, CaptureError::AllocationFailed { requested: 0, .. }));
        assert!(driver.snapshot().reqbufs_log.is_empty());
    }

    #[test]
    fn generation_advances_on_each_hold() {
        let driver = SimulatedDriver::new();
        let mut handle = open(&driver);
        let session = handle.set_format(320, 240, FourCC::YUYV.into()).unwrap();
        let mut pool = BufferPool::allocate(handle.device_mut().unwrap(), &session, 2).unwrap();

        // Free 状态不能直接出队
        assert!(pool.mark_held(0).is_none());

        pool.mark_queued(0);
        let first = pool.mark_held(0).unwrap();
        assert!(pool.is_live(&first));

        pool.mark_queued(0);
        assert!(!pool.is_live(&first));
        let second = pool.mark_held(0).unwrap();
        assert_eq!(second.generation, first.generation + 1);
        assert!(!pool.is_live(&first));

        assert_eq!(pool.reclaim_held(), 1);
        assert_eq!(pool.state_of(0), Some(BufferState::Queued));

        pool.release(handle.device_mut().unwrap());
    }
}
