//! 校准会话数据
//!
//! 一次校准/验证尝试的聚合体：回调累积的三类样本列表 + 标记参考列表 +
//! 截止时间窗。尝试结束时整体持久化为一个 JSON 产物，文件名由运行标识
//! 派生并自动避让碰撞。

use std::path::{Path, PathBuf};

use gaze_protocol::{FixationSample, GazeSample, PupilSample};
use gaze_tools::MarkerReference;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// 回调写入的累积缓冲（尝试进行期间存活）
///
/// `task_start`/`task_stop` 限定异步样本的接受窗口：时间戳不在
/// `(task_start, task_stop]` 内的样本由回调自己丢弃，越过 `task_stop`
/// 的回调自行注销。
#[derive(Debug, Default)]
pub struct SessionBuffers {
    pub task_start: f64,
    pub task_stop: f64,
    pub pupils: Vec<PupilSample>,
    pub gaze: Vec<GazeSample>,
    pub fixations: Vec<FixationSample>,
}

impl SessionBuffers {
    /// 打开接受窗口（`task_stop` 先置为 +∞，呈现结束时收口）
    pub fn open(task_start: f64) -> Self {
        Self {
            task_start,
            task_stop: f64::INFINITY,
            ..Default::default()
        }
    }
}

/// 持久化的会话产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub task_start: f64,
    pub task_stop: f64,
    pub pupils: Vec<PupilSample>,
    pub gaze: Vec<GazeSample>,
    pub fixations: Vec<FixationSample>,
    pub markers: Vec<MarkerReference>,
}

impl CalibrationSession {
    pub fn from_buffers(buffers: &SessionBuffers, markers: Vec<MarkerReference>) -> Self {
        Self {
            task_start: buffers.task_start,
            task_stop: buffers.task_stop,
            pupils: buffers.pupils.clone(),
            gaze: buffers.gaze.clone(),
            fixations: buffers.fixations.clone(),
            markers,
        }
    }

    /// 写出 JSON 产物
    ///
    /// 文件名 `<base>_<label>.json`；已存在时追加递增序号避让
    /// （同一会话里重跑校准不会覆盖上一次的数据）。
    pub fn save(&self, dir: &Path, base: &str, label: &str) -> Result<PathBuf, TaskError> {
        std::fs::create_dir_all(dir)?;
        let path = unique_path(dir, base, label);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(path)
    }
}

fn unique_path(dir: &Path, base: &str, label: &str) -> PathBuf {
    let candidate = dir.join(format!("{base}_{label}.json"));
    if !candidate.exists() {
        return candidate;
    }
    let mut index = 1;
    loop {
        let candidate = dir.join(format!("{base}_{label}_{index:03}.json"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}
