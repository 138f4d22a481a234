//! # Gaze Protocol
//!
//! 眼动仪 IPC 协议定义（无 socket 依赖）
//!
//! ## 模块
//!
//! - `value`: 自描述二进制 map 的值模型
//! - `codec`: 紧凑二进制编码/解码（MessagePack 兼容子集）
//! - `notify`: 通知消息（topic + 字段 map）与 topic 常量
//! - `sample`: 样本类型（pupil/gaze/fixation）与 topic 分类
//! - `command`: 控制命令构建（`notify.<subject>` 请求）
//!
//! ## 消息格式
//!
//! 两条通道上的消息都是 `(topic, payload)` 二元组：topic 为 UTF-8 字符串，
//! payload 为二进制编码的字段 map。本 crate 只负责字节与类型之间的转换，
//! socket 收发在 `gaze-ipc` 层实现。

pub mod codec;
pub mod command;
pub mod notify;
pub mod sample;
pub mod value;

// 重新导出常用类型
pub use codec::{decode, encode};
pub use command::ControlCommand;
pub use notify::{Notification, topics};
pub use sample::{
    FixationSample, GazeSample, PupilSample, Sample, SampleKind, TopicClassifier,
};
pub use value::Value;

use thiserror::Error;

/// 协议层错误类型
///
/// 解码失败永远不会部分修改调用方状态：`decode` 是输入字节上的纯函数，
/// 出错时只返回错误值。
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated payload: expected {expected} more bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unsupported type marker: 0x{marker:02X}")]
    UnsupportedMarker { marker: u8 },

    #[error("Map key is not a string")]
    NonStringKey,

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Trailing bytes after value: {remaining} bytes remaining")]
    TrailingBytes { remaining: usize },

    #[error("Integer value out of representable range")]
    IntegerOverflow,

    #[error("Nesting depth exceeds limit ({0})")]
    DepthExceeded(usize),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for field {field}")]
    InvalidField { field: &'static str },
}
