//! Tracker 客户端（对外 API）
//!
//! 封装 supervisor、控制通道与后台 dispatcher 线程。控制通道整体放在
//! 互斥量后面：多线程调用方被串行化，单连接上的 lock-step 纪律由通道
//! 实现自身保证。事件通道归 dispatcher 线程独占，两条通道物理隔离。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use gaze_ipc::ControlChannel;
use gaze_protocol::{
    ControlCommand, FixationSample, GazeSample, Notification, PupilSample, Sample, SampleKind,
    Value,
};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::TrackerConfig;
use crate::dispatcher::DispatcherCommand;
use crate::error::DriverError;
use crate::state::{CallbackFlow, EventCallback, MetricsSnapshot, TrackerContext, TrackerEvent};
use crate::supervisor::{SupervisorState, TrackerSupervisor};

/// 带超时的线程 join 扩展
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // watchdog 线程执行真正的 join
        std::thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // 超时：watchdog 线程继续运行，进程退出时由 OS 清理
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Thread join timeout",
                )))
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// Tracker 客户端
///
/// 由 [`TrackerBuilder`](crate::TrackerBuilder) 构建；构建完成时外部进程
/// 已配置完毕、dispatcher 已在消费事件流。
pub struct TrackerClient {
    pub(crate) config: TrackerConfig,
    pub(crate) supervisor: Mutex<TrackerSupervisor>,
    pub(crate) control: Mutex<Box<dyn ControlChannel>>,
    pub(crate) ctx: Arc<TrackerContext>,
    pub(crate) cmd_tx: Sender<DispatcherCommand>,
    pub(crate) dispatcher_thread: Option<JoinHandle<()>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl TrackerClient {
    // ============================================================
    // 回调管理（经由 dispatcher 命令队列，保持单写者不变量）
    // ============================================================

    /// 安装回调（同类别旧回调被替换）
    ///
    /// 回调在 dispatcher 持锁状态下同步执行，必须短小且不阻塞：
    /// 追加到调用方自己的容器，或检查截止时间后返回
    /// [`CallbackFlow::Unregister`] 自行注销。
    pub fn set_callback(
        &self,
        kind: SampleKind,
        callback: EventCallback,
    ) -> Result<(), DriverError> {
        self.cmd_tx
            .send(DispatcherCommand::SetCallback(kind, callback))
            .map_err(|_| DriverError::ChannelClosed)
    }

    /// 注销回调（该类别的样本之后只更新 last-known 缓存）
    pub fn clear_callback(&self, kind: SampleKind) -> Result<(), DriverError> {
        self.cmd_tx
            .send(DispatcherCommand::ClearCallback(kind))
            .map_err(|_| DriverError::ChannelClosed)
    }

    /// 瞳孔样本回调
    pub fn set_pupil_callback(
        &self,
        mut callback: impl FnMut(&PupilSample) -> CallbackFlow + Send + 'static,
    ) -> Result<(), DriverError> {
        self.set_callback(
            SampleKind::Pupil,
            Box::new(move |event| match event {
                TrackerEvent::Sample(Sample::Pupil(sample)) => callback(sample),
                _ => CallbackFlow::Keep,
            }),
        )
    }

    /// 注视点样本回调
    pub fn set_gaze_callback(
        &self,
        mut callback: impl FnMut(&GazeSample) -> CallbackFlow + Send + 'static,
    ) -> Result<(), DriverError> {
        self.set_callback(
            SampleKind::Gaze,
            Box::new(move |event| match event {
                TrackerEvent::Sample(Sample::Gaze(sample)) => callback(sample),
                _ => CallbackFlow::Keep,
            }),
        )
    }

    /// 注视段样本回调
    pub fn set_fixation_callback(
        &self,
        mut callback: impl FnMut(&FixationSample) -> CallbackFlow + Send + 'static,
    ) -> Result<(), DriverError> {
        self.set_callback(
            SampleKind::Fixation,
            Box::new(move |event| match event {
                TrackerEvent::Sample(Sample::Fixation(sample)) => callback(sample),
                _ => CallbackFlow::Keep,
            }),
        )
    }

    // ============================================================
    // last-known 状态读取（非阻塞，保新鲜不保完整）
    // ============================================================

    pub fn get_pupil(&self) -> Option<PupilSample> {
        self.ctx.get_pupil()
    }

    pub fn get_gaze(&self) -> Option<GazeSample> {
        self.ctx.get_gaze()
    }

    pub fn get_fixation(&self) -> Option<FixationSample> {
        self.ctx.get_fixation()
    }

    pub fn last_calibration_result(&self) -> Option<Notification> {
        self.ctx.last_calibration_result()
    }

    pub fn last_source_status(&self) -> Option<Notification> {
        self.ctx.last_source_status()
    }

    /// dispatcher 指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// dispatcher 线程是否存活
    pub fn is_healthy(&self) -> bool {
        self.dispatcher_thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    // ============================================================
    // 控制通道命令
    // ============================================================

    /// 发送控制命令并等待确认
    pub fn send_command(&self, command: &ControlCommand) -> Result<Vec<u8>, DriverError> {
        let mut control = self.control.lock();
        Ok(control.send_command(&command.to_notification())?)
    }

    /// tracker 时钟查询（与呈现端共享的单调时钟域）
    pub fn tracker_clock(&self) -> Result<f64, DriverError> {
        let reply = self.control.lock().query("t")?;
        reply
            .trim()
            .parse::<f64>()
            .map_err(|_| DriverError::InvalidConfig(format!("unparsable clock reply: {reply:?}")))
    }

    /// 重试视频源启动（采集硬件未就绪时可反复调用）
    pub fn start_source(&self) -> Result<(), DriverError> {
        let mut control = self.control.lock();
        self.supervisor.lock().start_source(&mut **control)
    }

    /// 开始录制
    pub fn start_recording(&self, session_name: &str) -> Result<(), DriverError> {
        info!("starting eyetracking recording: {}", session_name);
        self.send_command(&ControlCommand::RecordingShouldStart {
            session_name: session_name.to_string(),
        })?;
        Ok(())
    }

    /// 停止录制
    pub fn stop_recording(&self) -> Result<(), DriverError> {
        info!("stopping eyetracking recording");
        self.send_command(&ControlCommand::RecordingShouldStop)?;
        Ok(())
    }

    /// 提交校准数据
    ///
    /// 样本不足只告警不阻止：是否可用最终由 tracker 判定，结果以
    /// `notify.calibration.*` 通知异步到达（读 [`last_calibration_result`]）。
    ///
    /// [`last_calibration_result`]: TrackerClient::last_calibration_result
    pub fn calibrate(
        &self,
        pupil_list: Vec<Value>,
        ref_list: Vec<Value>,
    ) -> Result<(), DriverError> {
        if pupil_list.len() < self.config.min_pupil_samples {
            warn!(
                "calibration: only {} pupil samples captured (minimum {})",
                pupil_list.len(),
                self.config.min_pupil_samples
            );
        }
        // 上一轮的结果通知作废
        self.ctx.clear_calibration_result();

        info!(
            "sending calibration data to tracker: {} pupils, {} refs",
            pupil_list.len(),
            ref_list.len()
        );
        self.send_command(&ControlCommand::Calibrate {
            plugin: self.config.gazer_plugin.clone(),
            pupil_list,
            ref_list,
        })?;
        Ok(())
    }

    /// 当前生命周期状态
    pub fn supervisor_state(&self) -> SupervisorState {
        self.supervisor.lock().state()
    }

    /// 配置（只读）
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ============================================================
    // 停机
    // ============================================================

    /// 停机：停 dispatcher，发 teardown 命令，等待外部进程退出
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 宽限期内进程未退出（已强制终止）或
    ///   dispatcher 线程 join 超时
    pub fn join(&mut self) -> Result<(), DriverError> {
        // Release: 停机前的写入对 dispatcher 可见
        self.is_running.store(false, Ordering::Release);

        let shutdown_result = {
            let mut control = self.control.lock();
            self.supervisor.lock().shutdown(&mut **control)
        };

        let mut join_timed_out = false;
        if let Some(handle) = self.dispatcher_thread.take()
            && handle.join_timeout(self.config.poll_timeout.max(Duration::from_secs(2))).is_err()
        {
            error!("dispatcher thread failed to shut down in time");
            join_timed_out = true;
        }

        shutdown_result?;
        if join_timed_out {
            return Err(DriverError::Timeout);
        }
        Ok(())
    }
}

impl Drop for TrackerClient {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.dispatcher_thread.take()
            && handle.join_timeout(Duration::from_secs(2)).is_err()
        {
            error!("dispatcher thread panicked or failed to shut down");
        }

        // 正常路径 join() 已走完 teardown；这里只兜底清理残留进程
        let mut supervisor = self.supervisor.lock();
        if supervisor.process_alive() {
            supervisor.kill();
        }
    }
}
