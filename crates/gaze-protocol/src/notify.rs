//! 通知消息
//!
//! 两条通道上的消息统一表示为 `Notification { topic, payload }`。
//! 控制通道的请求 topic 固定为 `notify.<subject>`；事件通道的 topic
//! 由 tracker 侧决定（样本 topic 或 `notify.*` 通知 topic）。

use crate::ProtocolError;
use crate::codec::{decode, encode};
use crate::value::Value;

/// Topic 常量
pub mod topics {
    /// 瞳孔样本 topic 前缀（实际 topic 形如 `pupil.0`）
    pub const PUPIL: &str = "pupil";
    /// 注视点样本 topic 前缀
    pub const GAZE: &str = "gaze";
    /// 注视段（fixation）样本 topic 前缀
    pub const FIXATIONS: &str = "fixations";
    /// 所有通知 topic 的公共前缀
    pub const NOTIFY: &str = "notify.";
    /// 校准结果通知前缀
    pub const CALIBRATION: &str = "notify.calibration.";
    /// 校准成功
    pub const CALIBRATION_SUCCESSFUL: &str = "notify.calibration.successful";
    /// 校准失败
    pub const CALIBRATION_FAILED: &str = "notify.calibration.failed";
}

/// 由 subject 构建控制请求 topic
pub fn notify_topic(subject: &str) -> String {
    format!("{}{}", topics::NOTIFY, subject)
}

/// 通知消息（topic + 字段 map）
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub payload: Value,
}

impl Notification {
    /// 构建控制请求：topic = `notify.<subject>`，payload 带 `subject` 字段
    pub fn request<K: Into<String>>(
        subject: &str,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        let mut pairs: Vec<(String, Value)> =
            vec![("subject".to_string(), Value::from(subject))];
        pairs.extend(fields.into_iter().map(|(k, v)| (k.into(), v)));
        Self {
            topic: notify_topic(subject),
            payload: Value::Map(pairs),
        }
    }

    /// 由已解码的 payload 构建（事件通道接收路径）
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// payload 中的 subject 字段
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("subject").and_then(Value::as_str)
    }

    /// 是否是校准结果通知
    pub fn is_calibration_result(&self) -> bool {
        self.topic.starts_with(topics::CALIBRATION)
    }

    /// 校准结果：成功为 `Some(true)`，失败为 `Some(false)`，其他通知为 `None`
    pub fn calibration_succeeded(&self) -> Option<bool> {
        if self.topic.starts_with(topics::CALIBRATION_SUCCESSFUL) {
            Some(true)
        } else if self.topic.starts_with(topics::CALIBRATION_FAILED) {
            Some(false)
        } else {
            None
        }
    }

    /// 编码为线格式二元组 `(topic_bytes, payload_bytes)`
    pub fn to_wire(&self) -> (Vec<u8>, Vec<u8>) {
        (self.topic.as_bytes().to_vec(), encode(&self.payload))
    }

    /// 由线格式二元组解码
    pub fn from_wire(topic: &[u8], payload: &[u8]) -> Result<Self, ProtocolError> {
        let topic = std::str::from_utf8(topic)
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_string();
        Ok(Self {
            topic,
            payload: decode(payload)?,
        })
    }
}
