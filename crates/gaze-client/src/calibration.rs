//! 校准/验证任务
//!
//! 一次尝试的阶段机：
//! 说明屏 → 等热键（滚动眼球提示）→ 等首个瞳孔样本 → 逐标记呈现 →
//! 提交/验证 → 成功，或失败回到热键阶段等操作员重启。
//!
//! 时间基底是渲染帧（一次 `step` 一帧），样本接受窗口由单调时钟的
//! `task_start`/`task_stop` 截断，截断逻辑在回调自身内完成。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gaze_driver::{CallbackFlow, TrackerClient};
use gaze_protocol::{SampleKind, Value};
use gaze_tools::{MarkerReference, ValidationReport, VisualAngleConfig, evaluate, monotonic_s};
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::error::TaskError;
use crate::session::{CalibrationSession, SessionBuffers};
use crate::task::{InputSource, OperatorKey, Surface, Task, TaskStep};

/// 9 点校准网格（中心 + 边中点 + 四角）
pub fn nine_point_grid() -> Vec<[f64; 2]> {
    vec![
        [0.5, 0.5],
        [0.0, 0.5],
        [0.0, 1.0],
        [0.5, 1.0],
        [1.0, 1.0],
        [1.0, 0.5],
        [1.0, 0.0],
        [0.5, 0.0],
        [0.0, 0.0],
    ]
}

/// 标记呈现顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOrder {
    /// 按配置顺序
    Fixed,
    /// 均匀随机全排列
    Random,
}

/// 任务模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    /// 收集 pupil + 标记参考，提交给 tracker 拟合
    Calibrate,
    /// 收集 fixation + 标记参考，本地计算精度报告
    Validate,
}

/// 校准任务配置
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// 标记归一化位置
    pub markers: Vec<[f64; 2]>,
    pub markers_order: MarkerOrder,
    /// 每个标记的呈现帧数
    pub marker_duration_frames: u32,
    /// 呈现起始的丢弃帧数（扫视过渡期，注视未稳定）
    pub lead_in_frames: u32,
    /// 呈现末尾的丢弃帧数
    pub lead_out_frames: u32,
    /// 标记距屏幕边缘的保留像素
    pub edge_margin_px: f64,
    /// 说明屏帧数
    pub instruction_frames: u32,
    /// 校准结果通知的等待上限，超时按失败处理
    pub result_timeout: Duration,
    /// 验证几何配置
    pub visual_angle: VisualAngleConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            markers: nine_point_grid(),
            markers_order: MarkerOrder::Random,
            marker_duration_frames: 90,
            lead_in_frames: 10,
            lead_out_frames: 0,
            edge_margin_px: 50.0,
            // 60 fps 下 5 秒
            instruction_frames: 300,
            result_timeout: Duration::from_secs(10),
            visual_angle: VisualAngleConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// 本次尝试的标记顺序（Random 为均匀随机全排列）
    pub fn marker_order(&self, rng: &mut impl Rng) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.markers.len()).collect();
        if self.markers_order == MarkerOrder::Random {
            order.shuffle(rng);
        }
        order
    }

    /// 标记中心像素位置（中心原点；边缘保留 margin）
    pub fn marker_position_px(&self, norm: [f64; 2], surface_size: [f64; 2]) -> [f64; 2] {
        let frame = [
            surface_size[0] - 2.0 * self.edge_margin_px,
            surface_size[1] - 2.0 * self.edge_margin_px,
        ];
        [(norm[0] - 0.5) * frame[0], (norm[1] - 0.5) * frame[1]]
    }
}

/// 阶段机（`Copy`：step 按值匹配，转移时整体覆写）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Instructions { frames_left: u32 },
    AwaitingHotkey { failed: bool },
    WaitingFirstPupil,
    Presenting { order_index: usize, frame: u32 },
    Submitted { since: Instant },
    Succeeded,
}

/// 校准/验证任务
pub struct CalibrationTask {
    name: String,
    client: Arc<TrackerClient>,
    config: CalibrationConfig,
    mode: CalibrationMode,
    phase: Phase,
    /// 当前尝试的累积缓冲（回调共享）
    buffers: Option<Arc<Mutex<SessionBuffers>>>,
    /// 当前尝试的标记顺序
    order: Vec<usize>,
    /// 当前尝试的标记参考
    refs: Vec<MarkerReference>,
    /// 验证模式的输出
    report: Option<ValidationReport>,
}

impl CalibrationTask {
    pub fn new(client: Arc<TrackerClient>, config: CalibrationConfig, mode: CalibrationMode) -> Self {
        let name = match mode {
            CalibrationMode::Calibrate => "eyetracker-calibration",
            CalibrationMode::Validate => "eyetracker-validation",
        };
        Self::with_name(client, config, mode, name)
    }

    /// 指定任务名（同一会话里区分多次穿插的校准）
    pub fn with_name(
        client: Arc<TrackerClient>,
        config: CalibrationConfig,
        mode: CalibrationMode,
        name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            config,
            mode,
            phase: Phase::Instructions {
                frames_left: 0, // preload 时按配置展开
            },
            buffers: None,
            order: Vec::new(),
            refs: Vec::new(),
            report: None,
        }
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// 验证报告（验证模式完成后可用）
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    /// 当前尝试的会话快照
    pub fn session_snapshot(&self) -> Option<CalibrationSession> {
        self.buffers
            .as_ref()
            .map(|b| CalibrationSession::from_buffers(&b.lock(), self.refs.clone()))
    }

    /// 阶段标签（诊断/测试用）
    pub fn phase_label(&self) -> &'static str {
        match self.phase {
            Phase::Instructions { .. } => "instructions",
            Phase::AwaitingHotkey { .. } => "awaiting-hotkey",
            Phase::WaitingFirstPupil => "waiting-first-pupil",
            Phase::Presenting { .. } => "presenting",
            Phase::Submitted { .. } => "submitted",
            Phase::Succeeded => "succeeded",
        }
    }

    fn mode_label(&self) -> &'static str {
        match self.mode {
            CalibrationMode::Calibrate => "calibration",
            CalibrationMode::Validate => "validation",
        }
    }

    fn instruction_text(&self) -> &'static str {
        match self.mode {
            CalibrationMode::Calibrate => {
                "Eyetracker Calibration.\n\nYou'll be asked to roll your eyes, then fixate \
                 on the CENTER of the markers that appear on the screen."
            },
            CalibrationMode::Validate => {
                "Eyetracker Validation.\n\nOnce again, please fixate on the CENTER of the \
                 markers that appear on the screen."
            },
        }
    }

    fn priming_text(&self) -> &'static str {
        match self.mode {
            CalibrationMode::Calibrate => {
                "Please roll your eyes ~2-3 times in clockwise and counterclockwise directions"
            },
            // 验证紧跟校准，无需再滚动眼球
            CalibrationMode::Validate => "Get Ready",
        }
    }

    /// 开启一次尝试：打开接受窗口、安装截止窗回调、决定标记顺序
    fn begin_attempt(&mut self) -> Result<(), TaskError> {
        let buffers = Arc::new(Mutex::new(SessionBuffers::open(monotonic_s())));

        let sink = buffers.clone();
        self.client.set_pupil_callback(move |sample| {
            let mut b = sink.lock();
            if sample.timestamp > b.task_stop {
                return CallbackFlow::Unregister;
            }
            if sample.timestamp > b.task_start {
                b.pupils.push(sample.clone());
            }
            CallbackFlow::Keep
        })?;

        let sink = buffers.clone();
        self.client.set_gaze_callback(move |sample| {
            let mut b = sink.lock();
            if sample.timestamp > b.task_stop {
                return CallbackFlow::Unregister;
            }
            if sample.timestamp > b.task_start {
                b.gaze.push(sample.clone());
            }
            CallbackFlow::Keep
        })?;

        let sink = buffers.clone();
        self.client.set_fixation_callback(move |sample| {
            let mut b = sink.lock();
            if sample.timestamp > b.task_stop {
                return CallbackFlow::Unregister;
            }
            if sample.timestamp > b.task_start {
                b.fixations.push(sample.clone());
            }
            CallbackFlow::Keep
        })?;

        self.order = self.config.marker_order(&mut rand::thread_rng());
        self.refs.clear();
        self.report = None;
        self.buffers = Some(buffers);

        info!("{} started", self.mode_label());
        Ok(())
    }

    /// 收口接受窗口（之后到达的样本由回调丢弃并自行注销）
    fn close_window(&mut self) {
        if let Some(buffers) = &self.buffers {
            buffers.lock().task_stop = monotonic_s();
        }
    }

    fn submit_calibration(&mut self) -> Result<Phase, TaskError> {
        let pupil_payloads: Vec<Value> = match &self.buffers {
            Some(buffers) => buffers.lock().pupils.iter().map(|p| p.to_payload()).collect(),
            None => Vec::new(),
        };
        let ref_payloads: Vec<Value> = self.refs.iter().map(ref_to_payload).collect();

        info!(
            "calibrating on {} pupils and {} markers",
            pupil_payloads.len(),
            ref_payloads.len()
        );
        self.client.calibrate(pupil_payloads, ref_payloads)?;
        Ok(Phase::Submitted {
            since: Instant::now(),
        })
    }

    fn run_validation(&mut self) -> Phase {
        let fixations = match &self.buffers {
            Some(buffers) => buffers.lock().fixations.clone(),
            None => Vec::new(),
        };

        info!(
            "validating on {} fixations and {} markers",
            fixations.len(),
            self.refs.len()
        );
        let report = evaluate(&self.refs, &fixations, &self.config.visual_angle);

        for marker in &report.markers {
            if marker.fixations.is_empty() {
                info!(
                    "validation marker ({:.2}, {:.2}): no fixations",
                    marker.norm_pos[0], marker.norm_pos[1]
                );
                continue;
            }
            for fixation in &marker.fixations {
                info!(
                    "validation marker ({:.2}, {:.2}) fixation {}: {} samples, \
                     good {:.0}%, fair {:.0}%, poor {:.0}%",
                    marker.norm_pos[0],
                    marker.norm_pos[1],
                    fixation.id,
                    fixation.distances_deg.len(),
                    fixation.good_ratio * 100.0,
                    fixation.fair_ratio * 100.0,
                    fixation.poor_ratio * 100.0,
                );
            }
        }

        self.report = Some(report);
        // 验证没有外部确认回路：几何计算完成即成功
        Phase::Succeeded
    }
}

fn ref_to_payload(reference: &MarkerReference) -> Value {
    Value::map([
        ("norm_pos", Value::from(reference.norm_pos)),
        ("screen_pos", Value::from(reference.screen_pos)),
        ("timestamp", Value::F64(reference.timestamp)),
    ])
}

impl Task for CalibrationTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn preload(&mut self, _surface: &mut dyn Surface) -> Result<(), TaskError> {
        self.phase = Phase::Instructions {
            frames_left: self.config.instruction_frames,
        };
        Ok(())
    }

    fn step(
        &mut self,
        surface: &mut dyn Surface,
        input: &mut dyn InputSource,
    ) -> Result<TaskStep, TaskError> {
        let keys = input.poll_keys();
        if keys.contains(&OperatorKey::Quit) || keys.contains(&OperatorKey::Skip) {
            return Ok(TaskStep::Finished);
        }

        match self.phase {
            Phase::Instructions { frames_left } => {
                if frames_left == 0 {
                    self.phase = Phase::AwaitingHotkey { failed: false };
                    return Ok(TaskStep::NoFlip);
                }
                surface.draw_text(self.instruction_text());
                self.phase = Phase::Instructions {
                    frames_left: frames_left - 1,
                };
                Ok(TaskStep::Flip)
            },

            Phase::AwaitingHotkey { failed } => {
                if keys.contains(&OperatorKey::Calibrate) {
                    self.begin_attempt()?;
                    self.phase = Phase::WaitingFirstPupil;
                    return Ok(TaskStep::NoFlip);
                }
                if failed {
                    surface.draw_text("Calibration failed: press the calibrate hotkey to restart");
                } else {
                    surface.draw_text(self.priming_text());
                }
                Ok(TaskStep::Flip)
            },

            Phase::WaitingFirstPupil => {
                let has_pupil = self
                    .buffers
                    .as_ref()
                    .map(|b| !b.lock().pupils.is_empty())
                    .unwrap_or(false);
                if has_pupil {
                    info!("{}: first pupil received, starting marker sequence", self.mode_label());
                    self.phase = Phase::Presenting {
                        order_index: 0,
                        frame: 0,
                    };
                }
                Ok(TaskStep::NoFlip)
            },

            Phase::Presenting { order_index, frame } => {
                let marker_index = self.order[order_index];
                let norm = self.config.markers[marker_index];
                let size = surface.size();
                let pos = self.config.marker_position_px(norm, size);
                surface.draw_marker(pos);

                if frame == 0 {
                    info!(
                        "{}_position: norm=({:.2}, {:.2}) px=({:.0}, {:.0})",
                        self.mode_label(),
                        norm[0],
                        norm[1],
                        pos[0],
                        pos[1]
                    );
                }

                // 掐头去尾：过渡帧不记参考
                let duration = self.config.marker_duration_frames;
                if frame > self.config.lead_in_frames
                    && frame < duration - self.config.lead_out_frames
                {
                    let screen_pos = [pos[0] + size[0] / 2.0, pos[1] + size[1] / 2.0];
                    self.refs.push(MarkerReference {
                        norm_pos: [screen_pos[0] / size[0], screen_pos[1] / size[1]],
                        screen_pos,
                        timestamp: monotonic_s(),
                    });
                }

                let next_frame = frame + 1;
                if next_frame < duration {
                    self.phase = Phase::Presenting {
                        order_index,
                        frame: next_frame,
                    };
                } else if order_index + 1 < self.order.len() {
                    self.phase = Phase::Presenting {
                        order_index: order_index + 1,
                        frame: 0,
                    };
                } else {
                    self.close_window();
                    self.phase = match self.mode {
                        CalibrationMode::Calibrate => self.submit_calibration()?,
                        CalibrationMode::Validate => self.run_validation(),
                    };
                }
                Ok(TaskStep::Flip)
            },

            Phase::Submitted { since } => {
                if let Some(result) = self.client.last_calibration_result() {
                    if result.calibration_succeeded() == Some(true) {
                        info!("calibration successful");
                        self.phase = Phase::Succeeded;
                    } else {
                        warn!("calibration failed, restart with the calibrate hotkey");
                        self.phase = Phase::AwaitingHotkey { failed: true };
                    }
                } else if since.elapsed() >= self.config.result_timeout {
                    // 协议不保证结果通知一定到达，超时按失败处理
                    warn!(
                        "no calibration result within {:?}, treating as failure",
                        self.config.result_timeout
                    );
                    self.phase = Phase::AwaitingHotkey { failed: true };
                }
                Ok(TaskStep::NoFlip)
            },

            Phase::Succeeded => Ok(TaskStep::Finished),
        }
    }

    fn stop(&mut self) -> Result<(), TaskError> {
        for kind in [SampleKind::Pupil, SampleKind::Gaze, SampleKind::Fixation] {
            if let Err(e) = self.client.clear_callback(kind) {
                warn!("failed to clear {:?} callback on stop: {}", kind, e);
            }
        }
        Ok(())
    }

    fn save(&self, dir: &Path) -> Result<Option<PathBuf>, TaskError> {
        let Some(session) = self.session_snapshot() else {
            return Ok(None);
        };
        let label = match self.mode {
            CalibrationMode::Calibrate => "calib-data",
            CalibrationMode::Validate => "valid-data",
        };
        let path = session.save(dir, &self.client.config().session_base, label)?;
        info!("{} session saved to {}", self.mode_label(), path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSurface, ScriptedInput};
    use gaze_driver::{TrackerBuilder, TrackerConfig};
    use gaze_ipc::{MockControlChannel, MockEventChannel};
    use gaze_protocol::{FixationSample, Notification, PupilSample};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn mock_client(dir: &TempDir) -> (Arc<TrackerClient>, MockControlChannel, MockEventChannel) {
        let control = MockControlChannel::new();
        let events = MockEventChannel::new();
        let client = TrackerBuilder::new()
            .config(TrackerConfig {
                record_dir: dir.path().to_path_buf(),
                session_base: "calib-test".to_string(),
                eye_settle_delay: Duration::ZERO,
                ..Default::default()
            })
            .with_channels(Box::new(control.clone()), Box::new(events.clone()))
            .build()
            .unwrap();
        (Arc::new(client), control, events)
    }

    fn quick_config(markers: Vec<[f64; 2]>) -> CalibrationConfig {
        CalibrationConfig {
            markers,
            markers_order: MarkerOrder::Fixed,
            marker_duration_frames: 4,
            lead_in_frames: 1,
            lead_out_frames: 0,
            instruction_frames: 2,
            result_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn pupil_note() -> Notification {
        Notification::new(
            "pupil.0",
            PupilSample {
                // 接受窗口开着（task_stop = +inf），用当前时刻保证在窗口内
                timestamp: monotonic_s() + 0.001,
                confidence: 0.95,
                diameter: 25.0,
                norm_pos: [0.5, 0.5],
            }
            .to_payload(),
        )
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    /// 驱动任务直到阶段标签变化或步数耗尽
    fn step_until(
        task: &mut CalibrationTask,
        surface: &mut MockSurface,
        input: &mut ScriptedInput,
        label: &str,
        max_steps: usize,
    ) -> bool {
        for _ in 0..max_steps {
            if task.phase_label() == label {
                return true;
            }
            task.step(surface, input).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        task.phase_label() == label
    }

    #[test]
    fn test_random_order_is_permutation() {
        let config = CalibrationConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut order = config.marker_order(&mut rng);
            order.sort_unstable();
            assert_eq!(order, (0..9).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_random_order_uniform_first_position() {
        // 每个标记出现在序列首位的频率应接近 1/9
        let config = CalibrationConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        let runs = 4500;
        let mut first_counts = [0usize; 9];
        for _ in 0..runs {
            let order = config.marker_order(&mut rng);
            first_counts[order[0]] += 1;
        }
        let expected = runs / 9;
        for count in first_counts {
            assert!(
                count > expected / 2 && count < expected * 2,
                "first-position counts skewed: {first_counts:?}"
            );
        }
    }

    #[test]
    fn test_fixed_order() {
        let config = CalibrationConfig {
            markers_order: MarkerOrder::Fixed,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(config.marker_order(&mut rng), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_marker_position_px() {
        let config = CalibrationConfig {
            edge_margin_px: 50.0,
            ..Default::default()
        };
        let size = [1280.0, 1024.0];
        // 中心标记在原点
        assert_eq!(config.marker_position_px([0.5, 0.5], size), [0.0, 0.0]);
        // 角标记留出边缘 margin
        let corner = config.marker_position_px([1.0, 1.0], size);
        assert_eq!(corner, [590.0, 462.0]);
    }

    #[test]
    fn test_calibration_flow_to_submission_and_success() {
        let dir = TempDir::new().unwrap();
        let (client, control, events) = mock_client(&dir);
        let config = quick_config(vec![[0.0, 0.0], [1.0, 1.0]]);
        let mut task = CalibrationTask::new(client.clone(), config, CalibrationMode::Calibrate);

        let mut surface = MockSurface::new(800.0, 600.0);
        // 第 3 帧按下校准热键（说明屏 2 帧 + 1）
        let mut input = ScriptedInput::new(vec![(3, OperatorKey::Calibrate)]);

        task.preload(&mut surface).unwrap();
        assert!(step_until(&mut task, &mut surface, &mut input, "waiting-first-pupil", 20));

        // 回调装好后注入首个瞳孔样本
        assert!(wait_until(2000, || {
            events.push(pupil_note());
            client.get_pupil().is_some()
        }));
        assert!(step_until(&mut task, &mut surface, &mut input, "presenting", 2000));

        // 2 个标记 × 4 帧，其间持续注入瞳孔样本
        for _ in 0..8 {
            events.push(pupil_note());
            task.step(&mut surface, &mut input).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(task.phase_label(), "submitted");

        // 提交走了 start_plugin(Gazer2D)
        let last = control.sent_commands().pop().unwrap();
        assert_eq!(last.subject(), Some("start_plugin"));

        // 每个标记记 duration - lead_in - 1 = 2 条参考
        let session = task.session_snapshot().unwrap();
        assert_eq!(session.markers.len(), 4);
        assert!(session.task_stop.is_finite());
        assert!(!session.pupils.is_empty());

        // 成功通知到达后任务结束
        events.push(Notification::new(
            "notify.calibration.successful",
            Value::Map(vec![]),
        ));
        assert!(wait_until(2000, || client.last_calibration_result().is_some()));
        assert!(step_until(&mut task, &mut surface, &mut input, "succeeded", 10));
        assert_eq!(task.step(&mut surface, &mut input).unwrap(), TaskStep::Finished);

        // 持久化产物
        let path = task.save(dir.path()).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "calib-test_calib-data.json");
    }

    #[test]
    fn test_failed_result_returns_to_hotkey() {
        let dir = TempDir::new().unwrap();
        let (client, _control, events) = mock_client(&dir);
        let config = quick_config(vec![[0.5, 0.5]]);
        let mut task = CalibrationTask::new(client.clone(), config, CalibrationMode::Calibrate);

        let mut surface = MockSurface::new(800.0, 600.0);
        let mut input = ScriptedInput::new(vec![(3, OperatorKey::Calibrate)]);

        task.preload(&mut surface).unwrap();
        assert!(step_until(&mut task, &mut surface, &mut input, "waiting-first-pupil", 20));
        assert!(wait_until(2000, || {
            events.push(pupil_note());
            client.get_pupil().is_some()
        }));
        assert!(step_until(&mut task, &mut surface, &mut input, "submitted", 2000));

        events.push(Notification::new(
            "notify.calibration.failed",
            Value::Map(vec![]),
        ));
        assert!(wait_until(2000, || client.last_calibration_result().is_some()));
        assert!(step_until(&mut task, &mut surface, &mut input, "awaiting-hotkey", 10));

        // 失败提示在屏上
        task.step(&mut surface, &mut input).unwrap();
        assert!(surface.texts.last().unwrap().contains("failed"));
    }

    #[test]
    fn test_result_timeout_treated_as_failure() {
        let dir = TempDir::new().unwrap();
        let (client, _control, events) = mock_client(&dir);
        let mut config = quick_config(vec![[0.5, 0.5]]);
        config.result_timeout = Duration::from_millis(30);
        let mut task = CalibrationTask::new(client.clone(), config, CalibrationMode::Calibrate);

        let mut surface = MockSurface::new(800.0, 600.0);
        let mut input = ScriptedInput::new(vec![(3, OperatorKey::Calibrate)]);

        task.preload(&mut surface).unwrap();
        assert!(step_until(&mut task, &mut surface, &mut input, "waiting-first-pupil", 20));
        assert!(wait_until(2000, || {
            events.push(pupil_note());
            client.get_pupil().is_some()
        }));
        assert!(step_until(&mut task, &mut surface, &mut input, "submitted", 2000));

        // 不投递任何结果通知：超时后回到热键阶段
        assert!(step_until(&mut task, &mut surface, &mut input, "awaiting-hotkey", 2000));
    }

    #[test]
    fn test_validation_mode_produces_report() {
        let dir = TempDir::new().unwrap();
        let (client, _control, events) = mock_client(&dir);
        let config = quick_config(vec![[0.2, 0.2], [0.8, 0.8]]);
        let mut task = CalibrationTask::new(client.clone(), config, CalibrationMode::Validate);

        let mut surface = MockSurface::new(800.0, 600.0);
        let mut input = ScriptedInput::new(vec![(3, OperatorKey::Calibrate)]);

        task.preload(&mut surface).unwrap();
        assert!(step_until(&mut task, &mut surface, &mut input, "waiting-first-pupil", 20));
        assert!(wait_until(2000, || {
            events.push(pupil_note());
            client.get_pupil().is_some()
        }));

        // 呈现期间注入 fixation（onset 在接受窗口内）
        let mut fixation_id = 0;
        let mut steps = 0;
        while task.phase_label() == "waiting-first-pupil" || task.phase_label() == "presenting" {
            steps += 1;
            assert!(steps < 5000, "validation run did not progress");
            fixation_id += 1;
            events.push(Notification::new(
                "fixations",
                FixationSample {
                    id: fixation_id,
                    timestamp: monotonic_s() + 0.001,
                    norm_pos: [0.5, 0.5],
                    duration: 100.0,
                    dispersion: 0.4,
                }
                .to_payload(),
            ));
            task.step(&mut surface, &mut input).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }

        // 验证无外部确认回路：几何计算完成即成功
        assert_eq!(task.phase_label(), "succeeded");
        let report = task.validation_report().expect("no validation report");
        assert_eq!(report.markers.len(), 2);

        let path = task.save(dir.path()).unwrap().unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().contains("valid-data"));
    }

    #[test]
    fn test_quit_key_finishes_task() {
        let dir = TempDir::new().unwrap();
        let (client, _control, _events) = mock_client(&dir);
        let mut task = CalibrationTask::new(
            client,
            quick_config(vec![[0.5, 0.5]]),
            CalibrationMode::Calibrate,
        );

        let mut surface = MockSurface::new(800.0, 600.0);
        let mut input = ScriptedInput::new(vec![(0, OperatorKey::Quit)]);
        task.preload(&mut surface).unwrap();
        assert_eq!(task.step(&mut surface, &mut input).unwrap(), TaskStep::Finished);
        // 没有开始过尝试：无会话可存
        assert!(task.save(dir.path()).unwrap().is_none());
    }
}
