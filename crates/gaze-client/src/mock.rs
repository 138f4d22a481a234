//! Mock 渲染表面与操作员输入（测试用）

use crate::task::{InputSource, OperatorKey, Surface};

/// 记录式渲染表面
pub struct MockSurface {
    size: [f64; 2],
    /// flip 次数
    pub flips: usize,
    /// 画过的标记位置（中心原点像素坐标）
    pub markers: Vec<[f64; 2]>,
    /// 画过的文字
    pub texts: Vec<String>,
}

impl MockSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            size: [width, height],
            flips: 0,
            markers: Vec::new(),
            texts: Vec::new(),
        }
    }
}

impl Surface for MockSurface {
    fn size(&self) -> [f64; 2] {
        self.size
    }

    fn draw_marker(&mut self, pos_px: [f64; 2]) {
        self.markers.push(pos_px);
    }

    fn draw_text(&mut self, text: &str) {
        self.texts.push(text.to_string());
    }

    fn flip(&mut self) {
        self.flips += 1;
    }
}

/// 按帧号出键的输入源
///
/// 帧号 = 第几次 `poll_keys` 调用（从 0 起）。
pub struct ScriptedInput {
    schedule: Vec<(usize, OperatorKey)>,
    frame: usize,
}

impl ScriptedInput {
    pub fn new(schedule: Vec<(usize, OperatorKey)>) -> Self {
        Self { schedule, frame: 0 }
    }

    /// 永不出键
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }
}

impl InputSource for ScriptedInput {
    fn poll_keys(&mut self) -> Vec<OperatorKey> {
        let keys = self
            .schedule
            .iter()
            .filter(|(frame, _)| *frame == self.frame)
            .map(|(_, key)| *key)
            .collect();
        self.frame += 1;
        keys
    }
}
