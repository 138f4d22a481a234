//! 眼动仪对接任务
//!
//! 会话开头运行：等视频源插件报告采集成功，没消息就按节奏重发
//! `start_source`（采集硬件可能还没接好，重试对 tracker 幂等）。

use std::sync::Arc;

use gaze_driver::TrackerClient;
use gaze_protocol::{Notification, Value};
use tracing::{info, warn};

use crate::error::TaskError;
use crate::task::{InputSource, OperatorKey, Surface, Task, TaskStep};

/// 对接任务
pub struct SetupTask {
    name: String,
    client: Arc<TrackerClient>,
    /// 两次重试之间的帧数
    retry_interval_frames: u32,
    frame: u32,
    attempts: u32,
}

impl SetupTask {
    pub fn new(client: Arc<TrackerClient>) -> Self {
        Self {
            name: "eyetracker-setup".to_string(),
            client,
            // 60 fps 下约 3 秒
            retry_interval_frames: 180,
            frame: 0,
            attempts: 0,
        }
    }

    pub fn retry_interval_frames(mut self, frames: u32) -> Self {
        self.retry_interval_frames = frames;
        self
    }

    /// 源状态通知是否表示采集眼的视频源已就绪
    fn source_ready(&self, notification: &Notification) -> bool {
        let config = self.client.config();
        let expected_subject = format!(
            "{}start_capture.successful",
            config.source_topic_prefix.trim_start_matches("notify.")
        );

        notification.subject() == Some(expected_subject.as_str())
            && notification.payload.get("target").and_then(Value::as_str)
                == Some(config.eye_target().as_str())
            && notification.payload.get("name").and_then(Value::as_str)
                == Some(config.source_plugin.as_str())
    }
}

impl Task for SetupTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn preload(&mut self, surface: &mut dyn Surface) -> Result<(), TaskError> {
        surface.draw_text("Trying to establish connection to the eyetracker ...");
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

        if let Some(notification) = self.client.last_source_status()
            && self.source_ready(&notification)
        {
            info!("eyetracker source ready after {} retries", self.attempts);
            return Ok(TaskStep::Finished);
        }

        if self.frame % self.retry_interval_frames == 0 {
            self.attempts += 1;
            if let Err(e) = self.client.start_source() {
                // 重试路径：记下来下轮再试，不让对接任务崩掉整个会话
                warn!("start_source retry failed: {}", e);
            }
            surface.draw_text("Trying to establish connection to the eyetracker: retrying");
            self.frame += 1;
            return Ok(TaskStep::Flip);
        }

        self.frame += 1;
        Ok(TaskStep::NoFlip)
    }
}
