//! 任务能力接口与外部协作方接口
//!
//! 眼动任务是实验框架外层循环驱动的多个任务之一。外层循环（外部协作方）
//! 逐帧调用 [`Task::step`]，按返回值决定是否翻转渲染表面；任务类型是闭集
//! （[`SessionTask`]），不做鸭子类型式的能力探测。

use std::path::{Path, PathBuf};

use crate::calibration::CalibrationTask;
use crate::error::TaskError;
use crate::setup::SetupTask;

/// 每帧推进的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// 本帧有新内容，外层循环应翻转表面
    Flip,
    /// 本帧无需翻转（等待键入/样本时保持上一帧画面）
    NoFlip,
    /// 任务结束
    Finished,
}

/// 渲染表面（外部协作方）
///
/// 帧锁定：任务以 `step` 调用为时间基底，一次 `step` 对应一个渲染帧，
/// 不用墙上时钟。坐标约定：像素单位，原点在屏幕中心。
pub trait Surface {
    /// 表面像素尺寸 (宽, 高)
    fn size(&self) -> [f64; 2];
    /// 画校准标记（中心原点像素坐标）
    fn draw_marker(&mut self, pos_px: [f64; 2]);
    /// 画说明文字
    fn draw_text(&mut self, text: &str);
    /// 翻转（由外层循环按 [`TaskStep::Flip`] 调用）
    fn flip(&mut self);
}

/// 操作员按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKey {
    /// （重新）开始一次校准尝试
    Calibrate,
    /// 跳过当前任务
    Skip,
    /// 退出会话
    Quit,
}

/// 操作员输入源（外部协作方）
pub trait InputSource {
    /// 取走自上次调用以来的按键
    fn poll_keys(&mut self) -> Vec<OperatorKey>;
}

/// 任务能力接口
///
/// `run` 的惰性逐帧序列在这里表现为重复调用 `step` 直到 `Finished`。
pub trait Task {
    fn name(&self) -> &str;

    /// 进入外层循环前的准备（资源加载、回调安装前检查）
    fn preload(&mut self, surface: &mut dyn Surface) -> Result<(), TaskError> {
        let _ = surface;
        Ok(())
    }

    /// 推进一个渲染帧
    fn step(
        &mut self,
        surface: &mut dyn Surface,
        input: &mut dyn InputSource,
    ) -> Result<TaskStep, TaskError>;

    /// 外层循环结束时的清理（注销回调）
    fn stop(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    /// 持久化任务产物，返回写出的路径
    fn save(&self, dir: &Path) -> Result<Option<PathBuf>, TaskError> {
        let _ = dir;
        Ok(None)
    }
}

/// 会话任务闭集
pub enum SessionTask {
    Setup(SetupTask),
    Calibration(CalibrationTask),
}

impl Task for SessionTask {
    fn name(&self) -> &str {
        match self {
            SessionTask::Setup(task) => task.name(),
            SessionTask::Calibration(task) => task.name(),
        }
    }

    fn preload(&mut self, surface: &mut dyn Surface) -> Result<(), TaskError> {
        match self {
            SessionTask::Setup(task) => task.preload(surface),
            SessionTask::Calibration(task) => task.preload(surface),
        }
    }

    fn step(
        &mut self,
        surface: &mut dyn Surface,
        input: &mut dyn InputSource,
    ) -> Result<TaskStep, TaskError> {
        match self {
            SessionTask::Setup(task) => task.step(surface, input),
            SessionTask::Calibration(task) => task.step(surface, input),
        }
    }

    fn stop(&mut self) -> Result<(), TaskError> {
        match self {
            SessionTask::Setup(task) => task.stop(),
            SessionTask::Calibration(task) => task.stop(),
        }
    }

    fn save(&self, dir: &Path) -> Result<Option<PathBuf>, TaskError> {
        match self {
            SessionTask::Setup(task) => task.save(dir),
            SessionTask::Calibration(task) => task.save(dir),
        }
    }
}

/// 最小帧循环（测试/演示用）
///
/// 生产环境的外层循环在实验框架里；这里只提供一个按 `TaskStep` 翻转表面的
/// 直通驱动。返回任务是否在 `max_frames` 内结束。
pub fn run_task(
    task: &mut dyn Task,
    surface: &mut dyn Surface,
    input: &mut dyn InputSource,
    max_frames: usize,
) -> Result<bool, TaskError> {
    task.preload(surface)?;
    for _ in 0..max_frames {
        match task.step(surface, input)? {
            TaskStep::Flip => surface.flip(),
            TaskStep::NoFlip => {},
            TaskStep::Finished => {
                task.stop()?;
                return Ok(true);
            },
        }
    }
    task.stop()?;
    Ok(false)
}
