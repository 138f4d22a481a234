//! # Gaze SDK
//!
//! 眼动会话 SDK 的统一入口，按层重新导出：
//!
//! - [`protocol`]: 线格式编解码与消息类型
//! - [`ipc`]: 控制/事件双通道抽象
//! - [`driver`]: 进程监督与事件 dispatch
//! - [`client`]: 校准/验证任务
//! - [`tools`]: 验证几何等纯算法
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gaze_sdk::driver::TrackerBuilder;
//! use gaze_sdk::client::{CalibrationConfig, CalibrationMode, CalibrationTask};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! gaze_sdk::init_logging();
//!
//! let client = Arc::new(
//!     TrackerBuilder::new()
//!         .program("/opt/tracker/main")
//!         .record_dir("/data/session-01")
//!         .session_base("sub-01_ses-001")
//!         .build()?,
//! );
//!
//! let task = CalibrationTask::new(
//!     client.clone(),
//!     CalibrationConfig::default(),
//!     CalibrationMode::Calibrate,
//! );
//! // 任务交给实验框架的外层帧循环驱动
//! # let _ = task;
//! # Ok(())
//! # }
//! ```

pub use gaze_client as client;
pub use gaze_driver as driver;
pub use gaze_ipc as ipc;
pub use gaze_protocol as protocol;
pub use gaze_tools as tools;

// 常用类型平铺导出
pub use gaze_client::{
    CalibrationConfig, CalibrationMode, CalibrationTask, SessionTask, SetupTask, Task, TaskStep,
};
pub use gaze_driver::{TrackerBuilder, TrackerClient, TrackerConfig};
pub use gaze_tools::{ValidationReport, VisualAngleConfig};

/// 初始化日志（env-filter + log 桥接）
///
/// 按 `RUST_LOG` 过滤；重复调用安全（后续调用是 no-op）。
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
