#[cfg(target_os = "linux")]
use anyhow::{Context, Result};
#[cfg(target_os = "linux")]
use framequeue_backend_v4l2::{V4l2Driver, VendorControls};
#[cfg(target_os = "linux")]
use framequeue_core::prelude::*;
#[cfg(target_os = "linux")]
use std::time::Instant;

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    // 1. 初始化日志
    tracing_subscriber::fmt::init();

    println!("=== framequeue V4L2 capture demo ===");

    // 2. 实例化驱动；FRAMEQUEUE_FIMC=1 时启用 Samsung FIMC 私有控制项
    let fimc = std::env::var_os("FRAMEQUEUE_FIMC").is_some();
    let driver = if fimc {
        V4l2Driver::with_vendor_controls(VendorControls::fimc())
    } else {
        V4l2Driver::new()
    };

    // 3. 枚举设备
    let devices = driver.list_devices()?;
    if devices.is_empty() {
        anyhow::bail!("No capture devices found!");
    }

    println!("Found {} devices:", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        println!(
            "  [{}] {} ({}, {}) - {}",
            i,
            dev.name,
            dev.id,
            dev.driver,
            dev.bus_info.as_deref().unwrap_or("N/A")
        );
    }

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| devices[0].id.clone());

    // 4. 配置
    let mut config = CaptureConfig::new().buffer_count(4);
    if fimc {
        config = config.input(0).sensor_reset(SensorReset::FIMC);
    }

    // 5. 打开设备并协商格式
    let mut handle = DeviceHandle::open_with(&driver, &target, &config)
        .with_context(|| format!("opening {}", target))?;
    let session = handle
        .set_format(640, 480, FourCC::YUYV.into())
        .context("negotiating 640x480 YUYV")?;
    println!(
        "Session: {}x{} {} ({:?} bytes per frame)",
        session.width(),
        session.height(),
        session.pixel_format(),
        session.frame_size()
    );

    handle.allocate(&session, config.buffer_count)?;

    // 6. 采集循环
    let mut capture = CaptureLoop::new(&mut handle, &config);
    capture.start().context("starting capture")?;

    let started = Instant::now();
    for _ in 0..100 {
        let desc = capture.next()?;
        if let Some(frame) = capture.frame(&desc) {
            if frame.sequence % 30 == 0 {
                println!(
                    "frame #{} {} bytes @ {:?}",
                    frame.sequence,
                    frame.data.len(),
                    frame.timestamp
                );
            }
        }
        capture.release_frame(&desc)?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let stats = capture.stats().clone();
    println!(
        "{} frames in {:.2}s ({:.1} fps), {:?}",
        stats.frames,
        elapsed,
        stats.frames as f64 / elapsed,
        stats.assess_health()
    );

    capture.stop()?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    println!("This example only runs on Linux.");
}
