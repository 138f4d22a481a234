//! # Gaze IPC 通道层
//!
//! tracker 消息总线的 socket 抽象，提供两种角色：
//!
//! - **控制通道**（request/reply）：严格 lock-step，同一连接上任意时刻最多
//!   一个在途请求；回复是不透明的确认 payload。
//! - **事件通道**（subscribe-only）：连接时订阅固定 topic 集合，之后以带
//!   超时的非阻塞方式轮询接收；跨 topic 不保证顺序，单 topic 内按发布顺序
//!   到达。
//!
//! 连接失败/超时只如实上报，不在本层重试——重试策略属于 supervisor。
//! 两条通道必须使用物理上独立的连接，禁止跨线程共享同一 socket。

use std::time::Duration;

use gaze_protocol::{Notification, ProtocolError};
use thiserror::Error;

#[cfg(feature = "zmq-backend")]
pub mod zmq_channel;

#[cfg(feature = "zmq-backend")]
pub use zmq_channel::{ZmqControlChannel, ZmqEventChannel};

#[cfg(any(feature = "mock", test))]
pub mod mock;

#[cfg(any(feature = "mock", test))]
pub use mock::{MockControlChannel, MockEventChannel};

/// 通道层统一错误类型
#[derive(Error, Debug)]
pub enum ChannelError {
    /// 连接被拒绝/重置（对 supervisor 是致命错误，不自动重试）
    #[error("Connect failed: {0}")]
    Connect(String),

    /// socket 层错误
    #[error("Socket error: {0}")]
    Socket(String),

    /// 接收超时
    #[error("Receive timeout")]
    Timeout,

    /// 控制通道违反 lock-step 纪律：上一个请求的回复尚未收到
    #[error("Control channel busy: previous request still awaiting reply")]
    Busy,

    /// 通道已关闭（对端消失）
    #[error("Channel closed")]
    Closed,

    /// payload 解码失败（客户端/服务端版本不匹配）
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// 控制通道（request → reply，lock-step）
///
/// `&mut self` 使单个通道实例天然串行；多线程调用方必须用互斥量持有整个
/// 通道（见 `gaze-driver`），而不是各自克隆 socket。
pub trait ControlChannel: Send {
    /// 发送一条命令并等待回复
    ///
    /// # 错误
    /// - `ChannelError::Busy`: 上一个请求尚未完成（纪律违规，调用方错误）
    /// - `ChannelError::Timeout`: 等待回复超时（通道随后保持在途状态）
    /// - `ChannelError::Socket` / `Closed`: 传输失败
    fn send_command(&mut self, command: &Notification) -> Result<Vec<u8>, ChannelError>;

    /// 纯文本查询（SUB_PORT 发现、tracker 时钟查询）
    fn query(&mut self, request: &str) -> Result<String, ChannelError>;
}

/// 事件通道（subscribe-only）
pub trait EventChannel: Send {
    /// 带超时的非阻塞接收
    ///
    /// 超时返回 `Ok(None)`（正常情况，dispatcher 的轮询节拍）；
    /// 解码失败返回 `Err(Protocol)`，由调用方计数并继续。
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<Notification>, ChannelError>;
}
