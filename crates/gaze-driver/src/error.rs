//! 驱动层错误类型定义

use crate::supervisor::SupervisorState;
use gaze_ipc::ChannelError;
use gaze_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 通道错误（连接失败对会话是致命的，本层不重试）
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 进程/文件系统 IO 错误（spawn 失败、日志文件创建失败）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 在当前生命周期状态下不允许的操作（调用方编程错误）
    #[error("Operation `{operation}` not allowed in state {state:?}")]
    Lifecycle {
        operation: &'static str,
        state: SupervisorState,
    },

    /// dispatcher 命令通道已关闭（dispatcher 线程已退出）
    #[error("Dispatcher command channel closed")]
    ChannelClosed,

    /// 操作超时（teardown 宽限期内进程未退出、线程 join 超时）
    #[error("Operation timeout")]
    Timeout,

    /// 配置错误（缺少通道后端、SUB_PORT 不可解析等）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
