//! 校准标记参考样本与曝光区间
//!
//! 标记在屏上的每一个渲染帧产生一条 [`MarkerReference`]；按呈现顺序把
//! 同位置的连续参考归并成 [`MarkerInterval`]。这是对呈现序列的镜像，
//! 不是通用聚类：位置用逐位相等比较（同一标记的参考由同一份坐标复制而来）。

use serde::{Deserialize, Serialize};

/// 标记参考样本：标记在屏期间每个渲染帧记一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerReference {
    /// 屏幕归一化坐标（[0,1]²，原点在左下）
    pub norm_pos: [f64; 2],
    /// 屏幕像素坐标
    pub screen_pos: [f64; 2],
    /// 单调时钟时间戳（秒），与样本时间戳同域
    pub timestamp: f64,
}

/// 标记曝光区间
///
/// 不变量：`onset` ≤ 区间内每条参考的时间戳 ≤ `offset`；
/// 呈现顺序中不同位置的区间互不重叠。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerInterval {
    pub norm_pos: [f64; 2],
    pub screen_pos: [f64; 2],
    pub onset: f64,
    pub offset: f64,
}

impl MarkerInterval {
    /// 时间点是否落在曝光窗口内（onset 闭、offset 开，与 fixation 指派一致）
    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.onset && timestamp < self.offset
    }
}

/// 参考序列按位置分组为曝光区间
///
/// 扫描呈现顺序：位置相对前一条发生变化时开新区间；同一位置的重复出现
/// （即便不连续）并回该位置已有的区间，只扩展其 `offset`。
pub fn group_markers(refs: &[MarkerReference]) -> Vec<MarkerInterval> {
    let mut intervals: Vec<MarkerInterval> = Vec::new();

    for reference in refs {
        match intervals.iter_mut().find(|i| i.norm_pos == reference.norm_pos) {
            Some(interval) => {
                if reference.timestamp > interval.offset {
                    interval.offset = reference.timestamp;
                }
            },
            None => intervals.push(MarkerInterval {
                norm_pos: reference.norm_pos,
                screen_pos: reference.screen_pos,
                onset: reference.timestamp,
                offset: reference.timestamp,
            }),
        }
    }

    intervals
}
