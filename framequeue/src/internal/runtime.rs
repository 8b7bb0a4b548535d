use std::io;
use std::sync::OnceLock;
use tokio::runtime::Runtime;

// 全局单例 Runtime
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// 获取全局 Runtime，如果不存在则创建
///
/// 采集 Worker 以 spawn_blocking 跑在这里，用户不需要自己的 tokio 环境。
pub(crate) fn get_runtime() -> io::Result<&'static Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1) // 只承载阻塞 Worker 的调度，1 个线程足矣
        .thread_name("framequeue-worker")
        .build()?;

    // 并发初始化时多建的那个直接丢弃
    Ok(RUNTIME.get_or_init(|| rt))
}
