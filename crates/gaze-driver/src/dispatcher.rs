//! 事件 dispatch 循环
//!
//! 后台线程独占事件通道：轮询 → 解码 → 按 topic 分类 → 持锁更新
//! last-known 缓存并触发回调。回调槽的安装/移除通过命令队列流入本线程，
//! 共享状态始终只有 dispatcher 一个写者。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use gaze_ipc::{ChannelError, EventChannel};
use gaze_protocol::{Notification, Sample, SampleKind, TopicClassifier};
use tracing::{error, trace, warn};

use crate::state::{EventCallback, TrackerContext, TrackerEvent};

/// dispatcher 配置
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 事件通道轮询超时：停机标志每轮检查一次，这个值就是停机延迟上界
    pub poll_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1),
        }
    }
}

/// 回调槽控制命令（由调用方线程发给 dispatcher）
pub enum DispatcherCommand {
    SetCallback(SampleKind, EventCallback),
    ClearCallback(SampleKind),
}

/// dispatch 主循环
///
/// 退出条件：
/// - `is_running` 被置 false（正常停机）
/// - 命令通道断开（客户端已被 drop）
/// - 事件通道关闭（tracker 消失，致命）
pub fn dispatch_loop(
    mut events: impl EventChannel,
    ctx: Arc<TrackerContext>,
    cmd_rx: Receiver<DispatcherCommand>,
    classifier: TopicClassifier,
    config: DispatcherConfig,
    is_running: Arc<AtomicBool>,
) {
    loop {
        // Acquire: 看到 false 时必须同时看到停机前的全部写入
        if !is_running.load(Ordering::Acquire) {
            trace!("dispatcher: is_running flag is false, exiting");
            break;
        }

        // ============================================================
        // 1. 排空回调命令队列（在持锁区间外接收，持锁区间内应用）
        // ============================================================
        if drain_command_queue(&cmd_rx, &ctx) {
            trace!("dispatcher: command channel disconnected, exiting");
            break;
        }

        // ============================================================
        // 2. 轮询事件通道（带超时，超时是正常节拍）
        // ============================================================
        let notification = match events.try_receive(config.poll_timeout) {
            Ok(Some(n)) => {
                ctx.metrics.received.fetch_add(1, Ordering::Relaxed);
                n
            },
            Ok(None) => {
                ctx.metrics.poll_timeouts.fetch_add(1, Ordering::Relaxed);
                continue;
            },
            Err(ChannelError::Protocol(e)) => {
                // 坏消息只计数，不中断流（版本不匹配时日志里会刷屏）
                ctx.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("dispatcher: undecodable event dropped: {}", e);
                continue;
            },
            Err(ChannelError::Closed) => {
                error!("dispatcher: event channel closed, exiting");
                // Release: 退出前的写入对看到 false 的线程可见
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                error!("dispatcher: event receive error: {}", e);
                continue;
            },
        };

        // ============================================================
        // 3. 分类并 dispatch
        // ============================================================
        dispatch_one(&ctx, &classifier, notification);
    }

    trace!("dispatcher: loop exited");
}

/// 排空命令队列，返回是否检测到通道断开
fn drain_command_queue(cmd_rx: &Receiver<DispatcherCommand>, ctx: &TrackerContext) -> bool {
    loop {
        match cmd_rx.try_recv() {
            Ok(DispatcherCommand::SetCallback(kind, callback)) => {
                ctx.shared.lock().set_callback(kind, callback);
                trace!("dispatcher: callback installed for {:?}", kind);
            },
            Ok(DispatcherCommand::ClearCallback(kind)) => {
                ctx.shared.lock().clear_callback(kind);
                trace!("dispatcher: callback cleared for {:?}", kind);
            },
            Err(crossbeam_channel::TryRecvError::Empty) => return false,
            Err(crossbeam_channel::TryRecvError::Disconnected) => return true,
        }
    }
}

/// 单条消息的分类与 dispatch
fn dispatch_one(ctx: &TrackerContext, classifier: &TopicClassifier, notification: Notification) {
    let Some(kind) = classifier.classify(&notification.topic) else {
        ctx.metrics.unclassified.fetch_add(1, Ordering::Relaxed);
        trace!("dispatcher: unhandled topic {:?}", notification.topic);
        return;
    };

    let event = match Sample::from_notification(kind, &notification) {
        Ok(Some(sample)) => TrackerEvent::Sample(sample),
        Ok(None) => TrackerEvent::Note(notification),
        Err(e) => {
            ctx.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                "dispatcher: malformed {:?} sample dropped: {}",
                kind, e
            );
            return;
        },
    };

    // 唯一写者：缓存更新与回调在同一持锁区间内完成
    ctx.shared.lock().dispatch(kind, &event);
    ctx.metrics.dispatched[kind.index()].fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CallbackFlow;
    use gaze_ipc::MockEventChannel;
    use gaze_protocol::{FixationSample, GazeSample, PupilSample, Value};
    use parking_lot::Mutex;
    use std::thread;

    fn classifier() -> TopicClassifier {
        TopicClassifier::new("notify.aravis.")
    }

    fn pupil_note(timestamp: f64) -> Notification {
        Notification::new(
            "pupil.0",
            PupilSample {
                timestamp,
                confidence: 0.95,
                diameter: 25.0,
                norm_pos: [0.5, 0.5],
            }
            .to_payload(),
        )
    }

    fn gaze_note(timestamp: f64) -> Notification {
        Notification::new(
            "gaze.2d.0.",
            GazeSample {
                timestamp,
                confidence: 0.9,
                norm_pos: [0.3, 0.7],
            }
            .to_payload(),
        )
    }

    fn fixation_note(id: u64, timestamp: f64) -> Notification {
        Notification::new(
            "fixations",
            FixationSample {
                id,
                timestamp,
                norm_pos: [0.5, 0.5],
                duration: 120.0,
                dispersion: 0.6,
            }
            .to_payload(),
        )
    }

    /// 起一个 dispatcher 线程，返回 (事件注入口, ctx, 命令发送端, 停机闭包)
    fn spawn_dispatcher() -> (
        MockEventChannel,
        Arc<TrackerContext>,
        crossbeam_channel::Sender<DispatcherCommand>,
        impl FnOnce(),
    ) {
        let events = MockEventChannel::new();
        let ctx = Arc::new(TrackerContext::new());
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let is_running = Arc::new(AtomicBool::new(true));

        let thread_events = events.clone();
        let thread_ctx = ctx.clone();
        let thread_flag = is_running.clone();
        let handle = thread::spawn(move || {
            dispatch_loop(
                thread_events,
                thread_ctx,
                cmd_rx,
                classifier(),
                DispatcherConfig::default(),
                thread_flag,
            );
        });

        let stop = move || {
            is_running.store(false, Ordering::Release);
            handle.join().unwrap();
        };
        (events, ctx, cmd_tx, stop)
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_routing_and_order() {
        let (events, ctx, cmd_tx, stop) = spawn_dispatcher();

        let pupils: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let gazes: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = pupils.clone();
        cmd_tx
            .send(DispatcherCommand::SetCallback(
                SampleKind::Pupil,
                Box::new(move |event| {
                    if let TrackerEvent::Sample(Sample::Pupil(p)) = event {
                        sink.lock().push(p.timestamp);
                    }
                    CallbackFlow::Keep
                }),
            ))
            .unwrap();
        let sink = gazes.clone();
        cmd_tx
            .send(DispatcherCommand::SetCallback(
                SampleKind::Gaze,
                Box::new(move |event| {
                    if let TrackerEvent::Sample(Sample::Gaze(g)) = event {
                        sink.lock().push(g.timestamp);
                    }
                    CallbackFlow::Keep
                }),
            ))
            .unwrap();

        // 交错的三类样本流：每个回调只收到自己类别的消息，且按发布顺序
        events.push_all([
            pupil_note(1.0),
            gaze_note(1.1),
            fixation_note(1, 1.2),
            pupil_note(2.0),
            gaze_note(2.1),
            pupil_note(3.0),
        ]);

        assert!(wait_until(2000, || ctx.metrics.snapshot().received >= 6));
        stop();

        assert_eq!(*pupils.lock(), vec![1.0, 2.0, 3.0]);
        assert_eq!(*gazes.lock(), vec![1.1, 2.1]);
        // fixation 没注册回调，只进缓存
        assert_eq!(ctx.get_fixation().map(|f| f.id), Some(1));

        let metrics = ctx.metrics.snapshot();
        assert_eq!(metrics.dispatched[SampleKind::Pupil.index()], 3);
        assert_eq!(metrics.dispatched[SampleKind::Gaze.index()], 2);
        assert_eq!(metrics.dispatched[SampleKind::Fixation.index()], 1);
    }

    #[test]
    fn test_unregistered_callback_receives_nothing() {
        let (events, ctx, cmd_tx, stop) = spawn_dispatcher();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cmd_tx
            .send(DispatcherCommand::SetCallback(
                SampleKind::Pupil,
                Box::new(move |event| {
                    if let TrackerEvent::Sample(Sample::Pupil(p)) = event {
                        sink.lock().push(p.timestamp);
                    }
                    CallbackFlow::Keep
                }),
            ))
            .unwrap();

        events.push(pupil_note(1.0));
        assert!(wait_until(2000, || ctx.metrics.snapshot().received >= 1));

        // 注销后的样本不再进入回调
        cmd_tx
            .send(DispatcherCommand::ClearCallback(SampleKind::Pupil))
            .unwrap();
        assert!(wait_until(2000, || {
            !ctx.shared.lock().has_callback(SampleKind::Pupil)
        }));

        events.push(pupil_note(2.0));
        assert!(wait_until(2000, || ctx.metrics.snapshot().received >= 2));
        stop();

        assert_eq!(*seen.lock(), vec![1.0]);
        // 缓存仍然更新
        assert_eq!(ctx.get_pupil().map(|p| p.timestamp), Some(2.0));
    }

    #[test]
    fn test_calibration_note_cached() {
        let (events, ctx, _cmd_tx, stop) = spawn_dispatcher();

        events.push(Notification::new(
            "notify.calibration.failed",
            Value::map([("reason", Value::from("not enough data"))]),
        ));
        assert!(wait_until(2000, || ctx.last_calibration_result().is_some()));
        stop();

        assert_eq!(
            ctx.last_calibration_result().unwrap().calibration_succeeded(),
            Some(false)
        );
    }

    #[test]
    fn test_unknown_topic_and_malformed_sample_counted() {
        let (events, ctx, _cmd_tx, stop) = spawn_dispatcher();

        events.push(Notification::new("frame.eye.0", Value::Map(vec![])));
        // 缺字段的 pupil 消息
        events.push(Notification::new(
            "pupil.0",
            Value::map([("timestamp", Value::F64(1.0))]),
        ));

        assert!(wait_until(2000, || {
            let m = ctx.metrics.snapshot();
            m.unclassified >= 1 && m.decode_errors >= 1
        }));
        stop();

        assert!(ctx.get_pupil().is_none());
    }

    #[test]
    fn test_stop_flag_exits_loop() {
        let (_events, _ctx, _cmd_tx, stop) = spawn_dispatcher();
        // join 在停机闭包内：不挂起即通过
        stop();
    }
}
