//! 验证几何
//!
//! 确定性纯函数管线：标记曝光区间 → fixation 指派 → 视角距离 → 精度分级。
//!
//! 视角计算把两个归一化屏幕坐标转成像素空间的 3 维视线向量
//! （z = 假定的眼-屏距离，像素单位），夹角即视角距离。
//! 眼-屏距离是近似常数，按屏幕物理视角估计得到，保持可配置。

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::marker::{MarkerInterval, MarkerReference, group_markers};
use gaze_protocol::FixationSample;

/// 精度分级阈值（度）
pub const GOOD_LIMIT_DEG: f64 = 0.5;
pub const FAIR_LIMIT_DEG: f64 = 1.5;

/// 视角几何配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAngleConfig {
    /// 屏幕尺寸（像素）
    pub screen_px: [f64; 2],
    /// 眼-屏距离（像素）
    ///
    /// 由屏幕像素尺寸与屏幕张角估出：1280×1024 px 对应约 (17.5°, 14°)
    /// 时距离 ≈ 4164 px。
    pub eye_screen_distance_px: f64,
}

impl Default for VisualAngleConfig {
    fn default() -> Self {
        Self {
            screen_px: [1280.0, 1024.0],
            eye_screen_distance_px: 4164.0,
        }
    }
}

/// 精度档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccuracyTier {
    /// < 0.5°
    Good,
    /// [0.5°, 1.5°)
    Fair,
    /// ≥ 1.5°
    Poor,
}

impl AccuracyTier {
    pub fn classify(distance_deg: f64) -> Self {
        if distance_deg < GOOD_LIMIT_DEG {
            AccuracyTier::Good
        } else if distance_deg < FAIR_LIMIT_DEG {
            AccuracyTier::Fair
        } else {
            AccuracyTier::Poor
        }
    }
}

/// 归一化坐标 → 像素空间视线向量
fn ray(norm_pos: [f64; 2], config: &VisualAngleConfig) -> Vector3<f64> {
    Vector3::new(
        (norm_pos[0] - 0.5) * config.screen_px[0],
        (norm_pos[1] - 0.5) * config.screen_px[1],
        config.eye_screen_distance_px,
    )
}

/// 两个归一化屏幕位置之间的视角距离（度）
pub fn angular_distance(a: [f64; 2], b: [f64; 2], config: &VisualAngleConfig) -> f64 {
    let va = ray(a, config);
    let vb = ray(b, config);
    let cos = va.dot(&vb) / (va.norm() * vb.norm());
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

/// 指派到某个区间的一组同 id fixation 样本
///
/// 同一 id 的样本随注视段延续被 tracker 重发（duration/dispersion 细化），
/// 全部保留，按到达顺序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixationGroup {
    pub id: u64,
    pub timestamps: Vec<f64>,
    pub norm_pos: Vec<[f64; 2]>,
    pub durations: Vec<f64>,
    pub dispersions: Vec<f64>,
}

impl FixationGroup {
    fn new(id: u64) -> Self {
        Self {
            id,
            timestamps: Vec::new(),
            norm_pos: Vec::new(),
            durations: Vec::new(),
            dispersions: Vec::new(),
        }
    }

    fn push(&mut self, sample: &FixationSample) {
        self.timestamps.push(sample.timestamp);
        self.norm_pos.push(sample.norm_pos);
        self.durations.push(sample.duration);
        self.dispersions.push(sample.dispersion);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// fixation 指派：onset 落在曝光窗口内的 fixation 归属该区间
///
/// fixation 列表已按时间排序；单个游标单调前进，每条 fixation 至多归属
/// 一个区间。返回值与 `intervals` 等长，按区间顺序。
pub fn assign_fixations(
    fixations: &[FixationSample],
    intervals: &[MarkerInterval],
) -> Vec<Vec<FixationGroup>> {
    let mut assigned = Vec::with_capacity(intervals.len());
    let mut cursor = 0;

    for interval in intervals {
        // 跳过 onset 之前的 fixation
        while cursor < fixations.len() && fixations[cursor].timestamp < interval.onset {
            cursor += 1;
        }

        // 收集 offset 之前的 fixation，按 id 分组（保持首现顺序）
        let mut groups: Vec<FixationGroup> = Vec::new();
        while cursor < fixations.len() && fixations[cursor].timestamp < interval.offset {
            let sample = &fixations[cursor];
            match groups.iter_mut().find(|g| g.id == sample.id) {
                Some(group) => group.push(sample),
                None => {
                    let mut group = FixationGroup::new(sample.id);
                    group.push(sample);
                    groups.push(group);
                },
            }
            cursor += 1;
        }

        assigned.push(groups);
    }

    assigned
}

/// 单个 fixation 组相对其标记的精度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixationAccuracy {
    pub id: u64,
    /// 组内每条样本到标记的视角距离（度），按到达顺序
    pub distances_deg: Vec<f64>,
    /// 各档位占比（仅在样本数 > 0 时计算，构造处保证）
    pub good_ratio: f64,
    pub fair_ratio: f64,
    pub poor_ratio: f64,
}

impl FixationAccuracy {
    fn from_group(
        marker_norm: [f64; 2],
        group: &FixationGroup,
        config: &VisualAngleConfig,
    ) -> Self {
        let distances_deg: Vec<f64> = group
            .norm_pos
            .iter()
            .map(|pos| angular_distance(marker_norm, *pos, config))
            .collect();

        let total = distances_deg.len() as f64;
        let count =
            |tier: AccuracyTier| {
                distances_deg.iter().filter(|d| AccuracyTier::classify(**d) == tier).count()
                    as f64
            };

        Self {
            id: group.id,
            good_ratio: count(AccuracyTier::Good) / total,
            fair_ratio: count(AccuracyTier::Fair) / total,
            poor_ratio: count(AccuracyTier::Poor) / total,
            distances_deg,
        }
    }
}

/// 单个标记的精度条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerAccuracy {
    pub norm_pos: [f64; 2],
    pub onset: f64,
    pub offset: f64,
    /// 没有 fixation 落入曝光窗口时为空（不做除零的占比计算）
    pub fixations: Vec<FixationAccuracy>,
}

/// 验证报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub config: VisualAngleConfig,
    pub markers: Vec<MarkerAccuracy>,
}

impl ValidationReport {
    /// 指派到任意标记的 fixation 组总数
    pub fn total_fixation_groups(&self) -> usize {
        self.markers.iter().map(|m| m.fixations.len()).sum()
    }

    /// 全部距离样本的档位统计 (good, fair, poor)
    pub fn tier_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for marker in &self.markers {
            for fixation in &marker.fixations {
                for distance in &fixation.distances_deg {
                    match AccuracyTier::classify(*distance) {
                        AccuracyTier::Good => counts.0 += 1,
                        AccuracyTier::Fair => counts.1 += 1,
                        AccuracyTier::Poor => counts.2 += 1,
                    }
                }
            }
        }
        counts
    }
}

/// 验证管线：分组 → 指派 → 距离与分级
pub fn evaluate(
    refs: &[MarkerReference],
    fixations: &[FixationSample],
    config: &VisualAngleConfig,
) -> ValidationReport {
    let intervals = group_markers(refs);
    let assigned = assign_fixations(fixations, &intervals);

    let markers = intervals
        .iter()
        .zip(assigned.iter())
        .map(|(interval, groups)| MarkerAccuracy {
            norm_pos: interval.norm_pos,
            onset: interval.onset,
            offset: interval.offset,
            fixations: groups
                .iter()
                .map(|group| FixationAccuracy::from_group(interval.norm_pos, group, config))
                .collect(),
        })
        .collect();

    ValidationReport {
        config: config.clone(),
        markers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixation(id: u64, timestamp: f64, norm_pos: [f64; 2]) -> FixationSample {
        FixationSample {
            id,
            timestamp,
            norm_pos,
            duration: 150.0,
            dispersion: 0.5,
        }
    }

    fn refs_for(positions: &[[f64; 2]], frames: usize, dt: f64) -> Vec<MarkerReference> {
        let mut refs = Vec::new();
        let mut t = 0.0;
        for pos in positions {
            for _ in 0..frames {
                refs.push(MarkerReference {
                    norm_pos: *pos,
                    screen_pos: [pos[0] * 1280.0, pos[1] * 1024.0],
                    timestamp: t,
                });
                t += dt;
            }
        }
        refs
    }

    #[test]
    fn test_zero_distance_same_position() {
        let config = VisualAngleConfig::default();
        let distance = angular_distance([0.3, 0.8], [0.3, 0.8], &config);
        assert!(distance.abs() < 1e-9);
        assert_eq!(AccuracyTier::classify(distance), AccuracyTier::Good);
    }

    #[test]
    fn test_large_offset_is_poor() {
        let config = VisualAngleConfig::default();
        // 对角半屏的偏移在该几何下远超 1.5°
        let distance = angular_distance([0.0, 0.0], [1.0, 1.0], &config);
        assert!(distance >= FAIR_LIMIT_DEG);
        assert_eq!(AccuracyTier::classify(distance), AccuracyTier::Poor);
    }

    #[test]
    fn test_distance_scales_with_assumed_depth() {
        // 距离拉远，同样的屏上偏移对应更小的视角
        let near = VisualAngleConfig {
            eye_screen_distance_px: 2000.0,
            ..Default::default()
        };
        let far = VisualAngleConfig {
            eye_screen_distance_px: 8000.0,
            ..Default::default()
        };
        let a = [0.5, 0.5];
        let b = [0.6, 0.5];
        assert!(angular_distance(a, b, &near) > angular_distance(a, b, &far));
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(AccuracyTier::classify(0.0), AccuracyTier::Good);
        assert_eq!(AccuracyTier::classify(0.499), AccuracyTier::Good);
        assert_eq!(AccuracyTier::classify(0.5), AccuracyTier::Fair);
        assert_eq!(AccuracyTier::classify(1.499), AccuracyTier::Fair);
        assert_eq!(AccuracyTier::classify(1.5), AccuracyTier::Poor);
    }

    #[test]
    fn test_assign_fixations_by_onset() {
        let refs = refs_for(&[[0.0, 0.0], [1.0, 1.0]], 5, 0.1);
        let intervals = group_markers(&refs);
        // 区间 0: [0.0, 0.4]，区间 1: [0.5, 0.9]

        let fixations = vec![
            fixation(1, -0.5, [0.0, 0.0]), // 第一个区间 onset 之前：丢弃
            fixation(2, 0.05, [0.0, 0.1]), // 区间 0
            fixation(2, 0.15, [0.0, 0.1]), // 区间 0，同段细化样本
            fixation(3, 0.55, [1.0, 0.9]), // 区间 1
            fixation(4, 2.00, [0.5, 0.5]), // 最后一个区间 offset 之后：丢弃
        ];

        let assigned = assign_fixations(&fixations, &intervals);
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0].len(), 1);
        assert_eq!(assigned[0][0].id, 2);
        assert_eq!(assigned[0][0].len(), 2);
        assert_eq!(assigned[1].len(), 1);
        assert_eq!(assigned[1][0].id, 3);
    }

    #[test]
    fn test_assign_cursor_is_monotonic() {
        // 同一条 fixation 不会被指派到两个区间
        let refs = refs_for(&[[0.0, 0.0], [1.0, 1.0]], 2, 0.1);
        let intervals = group_markers(&refs);
        let fixations = vec![fixation(1, 0.05, [0.0, 0.0])];

        let assigned = assign_fixations(&fixations, &intervals);
        let total: usize = assigned.iter().flatten().map(FixationGroup::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_evaluate_empty_marker_entry() {
        let config = VisualAngleConfig::default();
        let refs = refs_for(&[[0.0, 0.0], [1.0, 1.0]], 3, 0.1);
        // 只有第二个标记有 fixation
        let fixations = vec![fixation(1, 0.35, [1.0, 1.0])];

        let report = evaluate(&refs, &fixations, &config);
        assert_eq!(report.markers.len(), 2);
        assert!(report.markers[0].fixations.is_empty());
        assert_eq!(report.markers[1].fixations.len(), 1);
        assert_eq!(report.total_fixation_groups(), 1);

        // 对准标记的 fixation：距离 0，全 good
        let acc = &report.markers[1].fixations[0];
        assert!(acc.distances_deg[0].abs() < 1e-9);
        assert_eq!(acc.good_ratio, 1.0);
        assert_eq!(acc.fair_ratio, 0.0);
        assert_eq!(acc.poor_ratio, 0.0);
        assert_eq!(report.tier_counts(), (1, 0, 0));
    }

    #[test]
    fn test_report_serializes() {
        let config = VisualAngleConfig::default();
        let refs = refs_for(&[[0.5, 0.5]], 2, 0.1);
        let fixations = vec![fixation(1, 0.05, [0.52, 0.5])];
        let report = evaluate(&refs, &fixations, &config);

        let json = serde_json::to_string(&report).unwrap();
        let back: ValidationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
