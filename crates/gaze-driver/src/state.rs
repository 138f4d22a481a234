//! 共享状态上下文
//!
//! 所有跨线程状态（last-known 样本缓存、回调槽、校准/源状态通知缓存）都在
//! 一把互斥锁后面，唯一的写者是 dispatcher 线程。回调在持锁状态下同步执行，
//! 必须短小且不阻塞：追加到调用方自己的容器，或检查截止时间并自行注销。
//!
//! 读端的 getter 用 `try_lock`：锁被 dispatch 循环持有时直接返回 `None`，
//! 保新鲜不保完整。

use std::sync::atomic::{AtomicU64, Ordering};

use gaze_protocol::{FixationSample, GazeSample, Notification, PupilSample, Sample, SampleKind};
use parking_lot::Mutex;

/// 回调返回值：保留或注销自身
///
/// 截止时间检查型回调到点后返回 `Unregister`，由 dispatcher 在持锁状态下
/// 清槽，避免回调反向调用注销接口造成重入。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    Keep,
    Unregister,
}

/// dispatch 给回调的事件
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// 样本类（pupil/gaze/fixation）
    Sample(Sample),
    /// 通知类（校准结果、源状态）
    Note(Notification),
}

/// 回调类型
///
/// 每个样本类别至多一个回调；重复注册覆盖旧回调。
pub type EventCallback = Box<dyn FnMut(&TrackerEvent) -> CallbackFlow + Send>;

/// 锁内共享状态
#[derive(Default)]
pub struct SharedState {
    pub pupil: Option<PupilSample>,
    pub gaze: Option<GazeSample>,
    pub fixation: Option<FixationSample>,
    pub calibration_result: Option<Notification>,
    pub source_status: Option<Notification>,
    callbacks: [Option<EventCallback>; 5],
}

impl SharedState {
    pub fn set_callback(&mut self, kind: SampleKind, callback: EventCallback) {
        self.callbacks[kind.index()] = Some(callback);
    }

    pub fn clear_callback(&mut self, kind: SampleKind) {
        self.callbacks[kind.index()] = None;
    }

    pub fn has_callback(&self, kind: SampleKind) -> bool {
        self.callbacks[kind.index()].is_some()
    }

    /// 更新 last-known 缓存并触发回调（dispatcher 持锁调用）
    pub fn dispatch(&mut self, kind: SampleKind, event: &TrackerEvent) {
        match (kind, event) {
            (SampleKind::Pupil, TrackerEvent::Sample(Sample::Pupil(s))) => {
                self.pupil = Some(s.clone());
            },
            (SampleKind::Gaze, TrackerEvent::Sample(Sample::Gaze(s))) => {
                self.gaze = Some(s.clone());
            },
            (SampleKind::Fixation, TrackerEvent::Sample(Sample::Fixation(s))) => {
                self.fixation = Some(s.clone());
            },
            (SampleKind::CalibrationResult, TrackerEvent::Note(n)) => {
                self.calibration_result = Some(n.clone());
            },
            (SampleKind::SourceStatus, TrackerEvent::Note(n)) => {
                self.source_status = Some(n.clone());
            },
            // 分类与事件形状由 dispatcher 保证一致，不一致只能是内部 bug
            _ => debug_assert!(false, "kind/event mismatch in dispatch"),
        }

        let slot = &mut self.callbacks[kind.index()];
        if let Some(callback) = slot.as_mut()
            && callback(event) == CallbackFlow::Unregister
        {
            *slot = None;
        }
    }
}

/// dispatcher 性能指标（原子计数器）
#[derive(Default)]
pub struct DispatcherMetrics {
    /// 收到的事件总数
    pub received: AtomicU64,
    /// 轮询超时次数
    pub poll_timeouts: AtomicU64,
    /// 解码/解析失败次数
    pub decode_errors: AtomicU64,
    /// 未识别 topic 被忽略的次数
    pub unclassified: AtomicU64,
    /// 各类别 dispatch 次数（下标 = `SampleKind::index`）
    pub dispatched: [AtomicU64; 5],
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub poll_timeouts: u64,
    pub decode_errors: u64,
    pub unclassified: u64,
    pub dispatched: [u64; 5],
}

impl DispatcherMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            dispatched: [
                self.dispatched[0].load(Ordering::Relaxed),
                self.dispatched[1].load(Ordering::Relaxed),
                self.dispatched[2].load(Ordering::Relaxed),
                self.dispatched[3].load(Ordering::Relaxed),
                self.dispatched[4].load(Ordering::Relaxed),
            ],
        }
    }
}

/// 共享状态上下文（dispatcher 与调用方线程共同持有）
#[derive(Default)]
pub struct TrackerContext {
    pub shared: Mutex<SharedState>,
    pub metrics: DispatcherMetrics,
}

impl TrackerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一条瞳孔样本（非阻塞：锁被占用时返回 None）
    pub fn get_pupil(&self) -> Option<PupilSample> {
        self.shared.try_lock().and_then(|s| s.pupil.clone())
    }

    /// 最近一条注视点样本（非阻塞）
    pub fn get_gaze(&self) -> Option<GazeSample> {
        self.shared.try_lock().and_then(|s| s.gaze.clone())
    }

    /// 最近一条注视段样本（非阻塞）
    pub fn get_fixation(&self) -> Option<FixationSample> {
        self.shared.try_lock().and_then(|s| s.fixation.clone())
    }

    /// 最近一条校准结果通知（非阻塞）
    pub fn last_calibration_result(&self) -> Option<Notification> {
        self.shared.try_lock().and_then(|s| s.calibration_result.clone())
    }

    /// 最近一条源状态通知（非阻塞）
    pub fn last_source_status(&self) -> Option<Notification> {
        self.shared.try_lock().and_then(|s| s.source_status.clone())
    }

    /// 清掉缓存的校准结果（提交新一轮校准前调用）
    pub fn clear_calibration_result(&self) {
        self.shared.lock().calibration_result = None;
    }
}
