//! 任务层错误类型定义

use gaze_driver::DriverError;
use thiserror::Error;

/// 任务层错误类型
///
/// 校准失败（tracker 报告拟合不成功、结果等待超时）不是错误值：它是可恢复
/// 状态，任务回到热键阶段等待操作员重启尝试。这里只表示不可在任务内恢复的
/// 失败。
#[derive(Error, Debug)]
pub enum TaskError {
    /// 驱动层错误（通道断开、生命周期违规）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 会话持久化 IO 失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 会话序列化失败
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
