//! Tracker 配置
//!
//! 外部 tracker 进程的启动参数、插件名、通道端口和采集设置。
//! 默认值对应 MRI 环境下的单眼 GigE 采集配置；测试环境用 `uid` 指向
//! fake 视频源即可跑通整条链路。

use std::path::PathBuf;
use std::time::Duration;

use gaze_protocol::Value;

/// 视频源采集设置
///
/// 整体作为 `start_eye_plugin` 的 args 传给 source 插件。
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// 帧尺寸（宽、高）
    pub frame_size: [u32; 2],
    /// 帧率（Hz）
    pub frame_rate: u32,
    /// 曝光时间（微秒）
    pub exposure_time: u32,
    /// 全局增益
    pub global_gain: u32,
    /// GigE Vision 包大小
    pub gev_packet_size: u32,
    /// 相机 UID
    pub uid: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_size: [640, 480],
            frame_rate: 250,
            exposure_time: 1500,
            global_gain: 1,
            gev_packet_size: 1400,
            // 无硬件测试用的 fake 源；真机换成相机 UID
            uid: "Aravis-Fake-GV01".to_string(),
        }
    }
}

impl CaptureSettings {
    pub fn to_value(&self) -> Value {
        Value::map([
            (
                "frame_size",
                Value::Array(vec![
                    Value::from(self.frame_size[0]),
                    Value::from(self.frame_size[1]),
                ]),
            ),
            ("frame_rate", Value::from(self.frame_rate)),
            ("exposure_time", Value::from(self.exposure_time)),
            ("global_gain", Value::from(self.global_gain)),
            ("gev_packet_size", Value::from(self.gev_packet_size)),
            ("uid", Value::from(self.uid.clone())),
        ])
    }
}

/// Tracker 进程与通道配置
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// tracker 可执行文件（`None` 表示连接到已运行的进程）
    pub program: Option<PathBuf>,
    /// 额外命令行参数（`--debug`、`--profile` 等由 builder 追加）
    pub extra_args: Vec<String>,
    /// 控制通道端口
    pub control_port: u16,
    /// 录制输出目录（tracker 日志也写在这里）
    pub record_dir: PathBuf,
    /// 本次运行的会话名（录制目录名、持久化文件名的基底）
    pub session_base: String,
    /// 采集眼别（单眼，另一只在启动脚本中停掉）
    pub eye_id: u8,
    /// 视频源插件
    pub source_plugin: String,
    /// 视频源通知 topic 前缀（由 source 插件的通知命名空间决定）
    pub source_topic_prefix: String,
    /// 瞳孔检测插件
    pub detector_plugin: String,
    /// 校准 gazer 插件
    pub gazer_plugin: String,
    /// 启动时停掉的眼进程附属插件（性能考虑）
    pub accessory_plugins: Vec<String>,
    /// 采集设置
    pub capture: CaptureSettings,
    /// 事件通道轮询超时（dispatcher 的停机延迟上界）
    pub poll_timeout: Duration,
    /// 控制通道回复超时
    pub reply_timeout: Duration,
    /// 眼进程启动后的安置延迟（插件命令发得太早会被丢弃）
    pub eye_settle_delay: Duration,
    /// teardown 宽限期：超时后强制终止进程
    pub shutdown_grace: Duration,
    /// 校准提交的最小瞳孔样本数（低于只告警，不阻止提交）
    pub min_pupil_samples: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            program: None,
            extra_args: Vec::new(),
            control_port: 50123,
            record_dir: PathBuf::from("."),
            session_base: "session".to_string(),
            eye_id: 0,
            source_plugin: "Aravis_Source".to_string(),
            source_topic_prefix: "notify.aravis.".to_string(),
            detector_plugin: "Detector2DPlugin".to_string(),
            gazer_plugin: "Gazer2D".to_string(),
            accessory_plugins: vec!["NDSI_Manager".to_string(), "Pye3DPlugin".to_string()],
            capture: CaptureSettings::default(),
            poll_timeout: Duration::from_millis(1),
            reply_timeout: Duration::from_secs(5),
            eye_settle_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            min_pupil_samples: 100,
        }
    }
}

impl TrackerConfig {
    /// 采集眼别的插件 target（`eye0`/`eye1`）
    pub fn eye_target(&self) -> String {
        format!("eye{}", self.eye_id)
    }

    /// 单眼采集：需要停掉的另一只眼
    pub fn unused_eye_id(&self) -> u8 {
        1 - self.eye_id
    }

    /// 控制通道 endpoint
    pub fn control_endpoint(&self) -> String {
        format!("tcp://localhost:{}", self.control_port)
    }

    /// 事件通道 endpoint（端口由控制通道的 SUB_PORT 查询得到）
    pub fn event_endpoint(&self, sub_port: u16) -> String {
        format!("tcp://localhost:{}", sub_port)
    }

    /// 事件通道的固定订阅集
    pub fn event_topics(&self) -> Vec<String> {
        vec![
            "gaze".to_string(),
            "pupil".to_string(),
            "fixations".to_string(),
            "notify.calibration.successful".to_string(),
            "notify.calibration.failed".to_string(),
            // 去掉尾部的点作为订阅前缀
            self.source_topic_prefix.trim_end_matches('.').to_string(),
        ]
    }

    /// tracker 录制子目录
    pub fn record_subdir(&self) -> PathBuf {
        self.record_dir.join(format!("{}.pupil", self.session_base))
    }
}
