//! 样本类型与 topic 分类
//!
//! 事件通道上连续到达的三类样本：pupil（瞳孔检测）、gaze（映射后的注视点）、
//! fixation（注视段，带分组 id）。时间戳都在 tracker 与呈现端共享的单调时钟域。

use crate::ProtocolError;
use crate::notify::{Notification, topics};
use crate::value::{Value, as_vec2};

/// 样本/通知的分类结果
///
/// 每一类在 dispatcher 中对应一个 last-known 缓存槽和一个回调槽。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Pupil,
    Gaze,
    Fixation,
    /// 校准结果通知（`notify.calibration.*`）
    CalibrationResult,
    /// 视频源插件状态通知（`notify.<source>.*`）
    SourceStatus,
}

impl SampleKind {
    pub const ALL: [SampleKind; 5] = [
        SampleKind::Pupil,
        SampleKind::Gaze,
        SampleKind::Fixation,
        SampleKind::CalibrationResult,
        SampleKind::SourceStatus,
    ];

    /// 槽位下标（dispatcher 内部定长数组用）
    pub fn index(self) -> usize {
        match self {
            SampleKind::Pupil => 0,
            SampleKind::Gaze => 1,
            SampleKind::Fixation => 2,
            SampleKind::CalibrationResult => 3,
            SampleKind::SourceStatus => 4,
        }
    }
}

/// 按 topic 前缀分类
///
/// 视频源通知的前缀取决于所用的 source 插件名，因此分类器携带配置而不是
/// 写死常量。不认识的 topic 返回 `None`（dispatcher 记日志后忽略）。
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    /// 视频源通知前缀，如 `notify.aravis.`
    source_prefix: String,
}

impl TopicClassifier {
    pub fn new(source_prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: source_prefix.into(),
        }
    }

    pub fn classify(&self, topic: &str) -> Option<SampleKind> {
        if topic.starts_with(topics::PUPIL) {
            Some(SampleKind::Pupil)
        } else if topic.starts_with(topics::GAZE) {
            Some(SampleKind::Gaze)
        } else if topic.starts_with(topics::FIXATIONS) {
            Some(SampleKind::Fixation)
        } else if topic.starts_with(topics::CALIBRATION) {
            Some(SampleKind::CalibrationResult)
        } else if topic.starts_with(self.source_prefix.as_str()) {
            Some(SampleKind::SourceStatus)
        } else {
            None
        }
    }
}

/// 瞳孔样本（眼图坐标系）
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PupilSample {
    pub timestamp: f64,
    pub confidence: f64,
    /// 瞳孔直径（像素）
    pub diameter: f64,
    /// 眼图归一化坐标
    pub norm_pos: [f64; 2],
}

/// 注视点样本（屏幕归一化坐标）
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GazeSample {
    pub timestamp: f64,
    pub confidence: f64,
    pub norm_pos: [f64; 2],
}

/// 注视段样本
///
/// 同一 `id` 的样本属于同一段连续注视；随着段的延续，tracker 会以相同 id
/// 重发 duration/dispersion 被细化后的样本。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixationSample {
    pub id: u64,
    pub timestamp: f64,
    pub norm_pos: [f64; 2],
    /// 持续时长（毫秒）
    pub duration: f64,
    /// 离散度（度）
    pub dispersion: f64,
}

/// 带标签的样本
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Pupil(PupilSample),
    Gaze(GazeSample),
    Fixation(FixationSample),
}

impl Sample {
    pub fn timestamp(&self) -> f64 {
        match self {
            Sample::Pupil(s) => s.timestamp,
            Sample::Gaze(s) => s.timestamp,
            Sample::Fixation(s) => s.timestamp,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Pupil(_) => SampleKind::Pupil,
            Sample::Gaze(_) => SampleKind::Gaze,
            Sample::Fixation(_) => SampleKind::Fixation,
        }
    }
}

fn f64_field(payload: &Value, field: &'static str) -> Result<f64, ProtocolError> {
    payload
        .get(field)
        .ok_or(ProtocolError::MissingField(field))?
        .as_f64()
        .ok_or(ProtocolError::InvalidField { field })
}

fn vec2_field(payload: &Value, field: &'static str) -> Result<[f64; 2], ProtocolError> {
    let value = payload.get(field).ok_or(ProtocolError::MissingField(field))?;
    as_vec2(value).ok_or(ProtocolError::InvalidField { field })
}

impl PupilSample {
    pub fn from_payload(payload: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            timestamp: f64_field(payload, "timestamp")?,
            confidence: f64_field(payload, "confidence")?,
            diameter: f64_field(payload, "diameter")?,
            norm_pos: vec2_field(payload, "norm_pos")?,
        })
    }

    pub fn to_payload(&self) -> Value {
        Value::map([
            ("timestamp", Value::F64(self.timestamp)),
            ("confidence", Value::F64(self.confidence)),
            ("diameter", Value::F64(self.diameter)),
            ("norm_pos", Value::from(self.norm_pos)),
        ])
    }
}

impl GazeSample {
    pub fn from_payload(payload: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            timestamp: f64_field(payload, "timestamp")?,
            confidence: f64_field(payload, "confidence")?,
            norm_pos: vec2_field(payload, "norm_pos")?,
        })
    }

    pub fn to_payload(&self) -> Value {
        Value::map([
            ("timestamp", Value::F64(self.timestamp)),
            ("confidence", Value::F64(self.confidence)),
            ("norm_pos", Value::from(self.norm_pos)),
        ])
    }
}

impl FixationSample {
    pub fn from_payload(payload: &Value) -> Result<Self, ProtocolError> {
        let id = payload
            .get("id")
            .ok_or(ProtocolError::MissingField("id"))?
            .as_i64()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(ProtocolError::InvalidField { field: "id" })?;
        Ok(Self {
            id,
            timestamp: f64_field(payload, "timestamp")?,
            norm_pos: vec2_field(payload, "norm_pos")?,
            duration: f64_field(payload, "duration")?,
            dispersion: f64_field(payload, "dispersion")?,
        })
    }

    pub fn to_payload(&self) -> Value {
        Value::map([
            ("id", Value::Int(self.id as i64)),
            ("timestamp", Value::F64(self.timestamp)),
            ("norm_pos", Value::from(self.norm_pos)),
            ("duration", Value::F64(self.duration)),
            ("dispersion", Value::F64(self.dispersion)),
        ])
    }
}

impl Sample {
    /// 按分类结果解析通知 payload
    ///
    /// 仅对三种样本类返回 `Sample`；通知类（校准结果、源状态）不经过此路径。
    pub fn from_notification(
        kind: SampleKind,
        notification: &Notification,
    ) -> Result<Option<Self>, ProtocolError> {
        let sample = match kind {
            SampleKind::Pupil => {
                Some(Sample::Pupil(PupilSample::from_payload(&notification.payload)?))
            },
            SampleKind::Gaze => {
                Some(Sample::Gaze(GazeSample::from_payload(&notification.payload)?))
            },
            SampleKind::Fixation => Some(Sample::Fixation(FixationSample::from_payload(
                &notification.payload,
            )?)),
            SampleKind::CalibrationResult | SampleKind::SourceStatus => None,
        };
        Ok(sample)
    }
}
