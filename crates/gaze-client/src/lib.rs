//! # Gaze Client
//!
//! 眼动会话的任务层：
//! - [`Task`] 能力接口与 [`SessionTask`] 闭集（实验框架外层循环驱动）
//! - [`CalibrationTask`]：标记呈现 + 样本收集 + 校准提交/验证几何
//! - [`SetupTask`]：视频源对接与重试
//! - [`CalibrationSession`]：会话产物持久化
//!
//! 渲染表面与操作员输入是外部协作方，以 [`Surface`]/[`InputSource`]
//! 接口接入；本 crate 不依赖任何图形栈。

pub mod calibration;
mod error;
pub mod session;
pub mod setup;
pub mod task;

#[cfg(any(feature = "mock", test))]
pub mod mock;

// 重新导出常用类型
pub use calibration::{
    CalibrationConfig, CalibrationMode, CalibrationTask, MarkerOrder, nine_point_grid,
};
pub use error::TaskError;
pub use session::{CalibrationSession, SessionBuffers};
pub use setup::SetupTask;
pub use task::{InputSource, OperatorKey, SessionTask, Surface, Task, TaskStep, run_task};
