//! # Gaze Tools - 共享数据结构和纯算法
//!
//! **依赖原则**: 只依赖 `gaze-protocol`，不依赖 driver/client 层
//!
//! ## 包含模块
//!
//! - `marker` - 校准标记参考样本与曝光区间分组（纯函数）
//! - `validation` - 视角几何与精度分级（纯函数）
//! - `timestamp` - 单调时钟（与呈现端共享的时间域）

pub mod marker;
pub mod timestamp;
pub mod validation;

// 重新导出常用类型
pub use marker::{MarkerInterval, MarkerReference, group_markers};
pub use timestamp::monotonic_s;
pub use validation::{
    AccuracyTier, FixationGroup, MarkerAccuracy, ValidationReport, VisualAngleConfig,
    angular_distance, assign_fixations, evaluate,
};
