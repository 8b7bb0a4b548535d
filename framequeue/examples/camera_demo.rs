use anyhow::Result;
use framequeue::prelude::*;
use std::time::Instant;

#[cfg(all(feature = "linux-v4l2", target_os = "linux"))]
fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // 1. 打开摄像头 (索引 0)
    // 底层会自动启动后台 Worker，返回时首帧已就绪
    println!("Opening camera...");
    let mut cap = Camera::new(0)?;

    let info = cap.info().clone();
    println!(
        "Streaming {} ({}) {}x{} @ {}, {} buffers",
        info.name, info.id, info.width, info.height, info.format, info.buffer_count
    );

    // 2. 主循环
    let mut last_time = Instant::now();
    for i in 1..=300u32 {
        let frame = match cap.read() {
            Ok(frame) => frame,
            Err(e) => match e.downcast_ref::<CaptureError>() {
                // 超时不致命，继续等下一帧
                Some(CaptureError::CaptureTimeout(_)) => {
                    eprintln!("timeout: {}", e);
                    continue;
                }
                _ => return Err(e),
            },
        };

        if i % 30 == 0 {
            let fps = 30.0 / last_time.elapsed().as_secs_f64();
            last_time = Instant::now();
            println!(
                "frame #{} {} bytes, FPS: {:.1}",
                frame.sequence,
                frame.data.len(),
                fps
            );
        }
    }

    // 3. 清理 (Drop 会自动处理，但显式调用更规范)
    let stats = cap.stats()?;
    println!("{:?}, health {:?}", stats, stats.capture.assess_health());
    cap.close();

    Ok(())
}

#[cfg(not(all(feature = "linux-v4l2", target_os = "linux")))]
fn main() -> Result<()> {
    anyhow::bail!("No supported backend found for this OS. Please check Cargo features.")
}
