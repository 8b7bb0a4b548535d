use framequeue::prelude::*;
use framequeue_core::simulation::{SimulatedDriver, SIM_CAPTURE_ID};

fn open(driver: &SimulatedDriver, options: CameraOptions) -> Camera {
    Camera::open(driver.clone(), SIM_CAPTURE_ID, options).expect("camera should open")
}

fn capture_error(err: &anyhow::Error) -> &CaptureError {
    err.downcast_ref::<CaptureError>()
        .expect("error should carry a CaptureError")
}

#[test]
fn reads_owned_frames_in_sequence() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new().format(FourCC::NV21));

    let info = cam.info().clone();
    assert_eq!((info.width, info.height), (640, 480));
    assert_eq!(info.format, FourCC::NV21);
    assert_eq!(info.buffer_count, 4);

    let first = cam.read().unwrap();
    let second = cam.read().unwrap();
    assert_eq!(first.data.len(), 640 * 480 * 3 / 2);
    assert!(second.sequence > first.sequence);
    assert!(second.timestamp > first.timestamp);

    // 拷贝后立即归还，驱动侧始终满队列
    for _ in 0..10 {
        cam.read().unwrap();
    }
    let stats = cam.stats().unwrap();
    assert_eq!(stats.capture.frames, 12);
    assert_eq!(stats.pipeline_resets, 0);
}

#[test]
fn open_reports_unsupported_format() {
    let driver = SimulatedDriver::new();
    let err = Camera::open(
        driver.clone(),
        SIM_CAPTURE_ID,
        CameraOptions::new().format(FourCC::RGB565),
    )
    .unwrap_err();

    assert!(matches!(
        capture_error(&err),
        CaptureError::UnsupportedFormat { .. }
    ));
}

#[test]
fn open_reports_missing_device() {
    let driver = SimulatedDriver::new();
    let err = Camera::open(driver, "/dev/video9", CameraOptions::new()).unwrap_err();
    assert!(matches!(
        capture_error(&err),
        CaptureError::DeviceUnavailable { .. }
    ));
}

#[test]
fn device_error_triggers_full_reset() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new());
    cam.read().unwrap();

    driver.fail_next_wait();
    let frame = cam.read().expect("read should survive a device error");
    assert_eq!(frame.width, 640);

    let stats = cam.stats().unwrap();
    assert_eq!(stats.pipeline_resets, 1);

    let snap = driver.snapshot();
    assert_eq!(snap.stream_on_count, 2);
    assert_eq!(snap.reqbufs_log, vec![4, 0, 4]);
    assert_eq!(snap.live_mappings, 4);
}

#[test]
fn device_error_without_resets_closes_camera() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new().max_resets(0));

    driver.fail_next_wait();
    let err = cam.read().unwrap_err();
    assert!(matches!(capture_error(&err), CaptureError::DeviceError(_)));

    // Worker 已退出
    assert!(cam.read().is_err());
    assert!(!cam.is_opened());
    assert_eq!(driver.snapshot().live_mappings, 0);
}

#[test]
fn timeout_is_reported_without_reset() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new());

    driver.stall(1);
    let err = cam.read().unwrap_err();
    assert!(matches!(capture_error(&err), CaptureError::CaptureTimeout(_)));

    cam.read().expect("stream should recover after a single stall");
    let stats = cam.stats().unwrap();
    assert_eq!(stats.capture.timeouts, 1);
    assert_eq!(stats.pipeline_resets, 0);
}

#[test]
fn sensor_reset_recovers_hung_sensor() {
    let driver = SimulatedDriver::new().with_reset_input(1000);
    let config = CaptureConfig::new().sensor_reset(SensorReset::FIMC);
    let mut cam = open(&driver, CameraOptions::new().config(config));

    driver.hang();
    cam.read().expect("sensor reset should restart the stream");

    let stats = cam.stats().unwrap();
    assert_eq!(stats.capture.resets, 1);
    assert_eq!(stats.pipeline_resets, 0);
    assert_eq!(driver.snapshot().inputs, vec![1000]);
}

#[test]
fn failed_sensor_reset_falls_back_to_full_reset() {
    // 没有配置复位输入，S_INPUT(1000) 不会让 Sensor 恢复
    let driver = SimulatedDriver::new();
    let config = CaptureConfig::new().sensor_reset(SensorReset::FIMC);
    let mut cam = open(&driver, CameraOptions::new().config(config));

    // 第一次超时触发 Sensor 复位，第二次让复位后的首帧等待失败
    driver.stall(2);
    let frame = cam.read().expect("full reset should recover the stream");
    assert_eq!(frame.width, 640);

    let stats = cam.stats().unwrap();
    assert_eq!(stats.pipeline_resets, 1);

    let snap = driver.snapshot();
    assert_eq!(snap.inputs, vec![1000]);
    assert_eq!(snap.live_mappings, 4);
}

#[test]
fn failed_reopen_reports_device_unavailable() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new().max_resets(1));
    cam.read().unwrap();

    driver.unplug();
    driver.fail_next_wait();
    let err = cam.read().unwrap_err();
    assert!(matches!(
        capture_error(&err),
        CaptureError::DeviceUnavailable { .. }
    ));

    assert!(cam.read().is_err());
    assert!(!cam.is_opened());
    assert_eq!(driver.snapshot().live_mappings, 0);
}

#[test]
fn pause_blocks_reads_until_resume() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new());

    cam.pause().unwrap();
    assert!(driver.snapshot().paused);
    let err = cam.read().unwrap_err();
    assert!(matches!(capture_error(&err), CaptureError::InvalidState(_)));

    cam.resume().unwrap();
    assert!(!driver.snapshot().paused);
    cam.read().unwrap();
}

#[test]
fn jpeg_frames_carry_payload_offset() {
    let driver = SimulatedDriver::new().with_payload_offset(0x200);
    let mut cam = open(&driver, CameraOptions::new().format(FourCC::JPEG));

    let frame = cam.read().unwrap();
    assert_eq!(frame.payload_offset, Some(0x200));
    assert_eq!(frame.payload().len(), frame.data.len() - 0x200);
}

#[test]
fn close_stops_stream_and_unmaps() {
    let driver = SimulatedDriver::new();
    let mut cam = open(&driver, CameraOptions::new());
    cam.read().unwrap();

    cam.close();
    cam.close();

    let snap = driver.snapshot();
    assert!(!snap.streaming);
    assert_eq!(snap.live_mappings, 0);
    assert_eq!(snap.allocated, 0);
    assert!(cam.read().is_err());
}

#[test]
fn drop_releases_device() {
    let driver = SimulatedDriver::new();
    {
        let mut cam = open(&driver, CameraOptions::new());
        cam.read().unwrap();
    }
    assert_eq!(driver.snapshot().live_mappings, 0);
}
