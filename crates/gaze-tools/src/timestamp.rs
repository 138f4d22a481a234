//! 单调时钟
//!
//! 标记参考与会话截止时间（task_start/task_stop）用的时间域。
//! tracker 与呈现端在同一台机器上共用单调时钟；如需与 tracker 内部时钟
//! 对齐，用控制通道的时钟查询取偏移。

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 进程单调时钟（秒）
///
/// 第一次调用确定纪元；只保证单调与域内一致性，不对应墙上时钟。
pub fn monotonic_s() -> f64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64()
}
