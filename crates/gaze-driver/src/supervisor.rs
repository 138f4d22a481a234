//! Tracker 进程监督
//!
//! 负责外部 tracker 进程的启动/终止，以及启动期/关停期的插件配置脚本。
//! 脚本是显式的有序命令表（纯函数生成），supervisor 只负责逐条执行：
//! 哪一步失败一目了然，脚本本身可独立测试。
//!
//! 命令执行采用 fire-and-confirm 语义：回复内容只记日志不校验（tracker 的
//! 确认 payload 不承诺结构），但传输层错误（没有回复）视为硬失败。

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use gaze_ipc::ControlChannel;
use gaze_protocol::{ControlCommand, Value};
use tracing::{info, trace, warn};

use crate::config::TrackerConfig;
use crate::error::DriverError;

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    /// 进程已 spawn（或确认外部已运行），控制通道尚未完成配置脚本
    Launching,
    /// 配置脚本执行完毕，可以开事件通道
    Connected,
    /// dispatcher 已在消费事件流
    Streaming,
    Stopping,
    Stopped,
}

/// 启动配置脚本（纯函数，顺序即执行顺序）
///
/// 1. 停掉未使用的眼进程（MRI 环境单眼采集）
/// 2. 启动采集眼进程
/// 3. 重启 recorder 插件，指向本次运行的输出目录
/// 4. 启动瞳孔检测插件
/// 5. 停掉眼进程附属插件（性能）
///
/// 视频源插件不在脚本里：它由 `start_source` 单独发出，失败后可重发。
pub fn startup_script(config: &TrackerConfig) -> Vec<ControlCommand> {
    let mut script = vec![
        ControlCommand::EyeProcessShouldStop {
            eye_id: config.unused_eye_id(),
        },
        ControlCommand::EyeProcessShouldStart {
            eye_id: config.eye_id,
        },
        ControlCommand::StopPlugin {
            name: "Recorder".to_string(),
        },
        ControlCommand::StartPlugin {
            name: "Recorder".to_string(),
            args: Value::map([
                (
                    "rec_root_dir",
                    Value::from(config.record_subdir().to_string_lossy().into_owned()),
                ),
                (
                    "session_name",
                    Value::from(format!("{}.pupil", config.session_base)),
                ),
                ("raw_jpeg", Value::Bool(false)),
                ("record_eye", Value::Bool(true)),
            ]),
        },
        ControlCommand::StartEyePlugin {
            name: config.detector_plugin.clone(),
            target: config.eye_target(),
            args: Value::map([(
                "properties",
                Value::map([("intensity_range", Value::from(4u8))]),
            )]),
        },
    ];
    for plugin in &config.accessory_plugins {
        script.push(ControlCommand::StopEyePlugin {
            name: plugin.clone(),
            target: config.eye_target(),
        });
    }
    script
}

/// 关停脚本：停录制 → 停世界进程 → 停 launcher
pub fn teardown_script() -> Vec<ControlCommand> {
    vec![
        ControlCommand::RecordingShouldStop,
        ControlCommand::WorldProcessShouldStop,
        ControlCommand::LauncherProcessShouldStop,
    ]
}

/// Tracker 进程监督器
pub struct TrackerSupervisor {
    config: TrackerConfig,
    state: SupervisorState,
    child: Option<Child>,
}

impl TrackerSupervisor {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: SupervisorState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn ensure_state(
        &self,
        operation: &'static str,
        expected: &[SupervisorState],
    ) -> Result<(), DriverError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::Lifecycle {
                operation,
                state: self.state,
            })
        }
    }

    /// 启动外部 tracker 进程
    ///
    /// stdout/stderr 重定向到录制目录下的日志文件。控制端口固定传入，
    /// 事件端口之后通过控制通道查询。
    pub fn spawn_process(&mut self) -> Result<(), DriverError> {
        self.ensure_state("spawn_process", &[SupervisorState::NotStarted])?;
        let program = self.config.program.clone().ok_or_else(|| {
            DriverError::InvalidConfig("no tracker program configured".to_string())
        })?;

        std::fs::create_dir_all(self.config.record_subdir())?;
        let log_path = self.config.record_subdir().join("tracker.log");
        let log_file = std::fs::File::create(&log_path)?;
        let log_err = log_file.try_clone()?;

        let mut command = Command::new(&program);
        command
            .arg("capture")
            .arg("--port")
            .arg(self.config.control_port.to_string())
            .args(&self.config.extra_args)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err));

        let child = command.spawn()?;
        info!(
            "tracker process spawned: {} (pid {}), log at {}",
            program.display(),
            child.id(),
            log_path.display()
        );

        self.child = Some(child);
        self.state = SupervisorState::Launching;
        Ok(())
    }

    /// 不 spawn，直接对接已在运行的 tracker（测试、手动启动的场景）
    pub fn attach_external(&mut self) -> Result<(), DriverError> {
        self.ensure_state("attach_external", &[SupervisorState::NotStarted])?;
        std::fs::create_dir_all(self.config.record_subdir())?;
        self.state = SupervisorState::Launching;
        Ok(())
    }

    /// 执行启动配置脚本
    pub fn run_startup(
        &mut self,
        control: &mut dyn ControlChannel,
    ) -> Result<(), DriverError> {
        self.ensure_state("run_startup", &[SupervisorState::Launching])?;

        for command in startup_script(&self.config) {
            self.confirm(control, &command)?;
            // 插件命令发得太早会在眼进程初始化期间被丢弃
            if matches!(command, ControlCommand::EyeProcessShouldStart { .. })
                && !self.config.eye_settle_delay.is_zero()
            {
                std::thread::sleep(self.config.eye_settle_delay);
            }
        }

        self.state = SupervisorState::Connected;
        // 首次尝试拉起视频源；失败由调用方按需重发
        self.start_source(control)
    }

    /// 启动（或重试启动）视频源插件
    ///
    /// 对调用方幂等：采集硬件没接上时可反复调用，直到源状态通知报告成功。
    pub fn start_source(
        &mut self,
        control: &mut dyn ControlChannel,
    ) -> Result<(), DriverError> {
        self.ensure_state(
            "start_source",
            &[SupervisorState::Connected, SupervisorState::Streaming],
        )?;
        let command = ControlCommand::StartEyePlugin {
            name: self.config.source_plugin.clone(),
            target: self.config.eye_target(),
            args: self.config.capture.to_value(),
        };
        self.confirm(control, &command)
    }

    /// dispatcher 已接管事件流
    pub fn mark_streaming(&mut self) -> Result<(), DriverError> {
        self.ensure_state("mark_streaming", &[SupervisorState::Connected])?;
        self.state = SupervisorState::Streaming;
        Ok(())
    }

    /// 关停：执行 teardown 脚本，等待进程退出，超时强杀
    pub fn shutdown(
        &mut self,
        control: &mut dyn ControlChannel,
    ) -> Result<(), DriverError> {
        self.ensure_state(
            "shutdown",
            &[
                SupervisorState::Launching,
                SupervisorState::Connected,
                SupervisorState::Streaming,
            ],
        )?;
        self.state = SupervisorState::Stopping;

        let mut script_failure = None;
        for command in teardown_script() {
            // teardown 尽量走完：单条失败记下来，后面的照发
            if let Err(e) = self.confirm(control, &command) {
                warn!("teardown command {} failed: {}", command.subject(), e);
                script_failure.get_or_insert(e);
            }
        }

        let wait_result = self.wait_for_exit(self.config.shutdown_grace);
        self.state = SupervisorState::Stopped;

        wait_result?;
        match script_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 发送命令并确认回复到达
    fn confirm(
        &self,
        control: &mut dyn ControlChannel,
        command: &ControlCommand,
    ) -> Result<(), DriverError> {
        let reply = control.send_command(&command.to_notification())?;
        trace!(
            "command {} confirmed ({} byte reply)",
            command.subject(),
            reply.len()
        );
        Ok(())
    }

    /// 等待子进程退出，宽限期后强制终止
    fn wait_for_exit(&mut self, grace: Duration) -> Result<(), DriverError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("tracker process exited: {}", status);
                    return Ok(());
                },
                Ok(None) => {
                    if start.elapsed() >= grace {
                        warn!("tracker process outlived shutdown grace, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(DriverError::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                },
                Err(e) => return Err(DriverError::Io(e)),
            }
        }
    }

    /// 进程是否仍在运行（best effort）
    pub fn process_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// 强杀残留进程（Drop 路径，正常流程应走 `shutdown`）
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!("killing tracker process without teardown");
            let _ = child.kill();
            let _ = child.wait();
        }
        self.state = SupervisorState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaze_ipc::MockControlChannel;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> TrackerConfig {
        TrackerConfig {
            record_dir: dir.path().to_path_buf(),
            session_base: "unit".to_string(),
            eye_settle_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_startup_script_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let subjects: Vec<String> = startup_script(&config)
            .iter()
            .map(ControlCommand::subject)
            .collect();
        assert_eq!(
            subjects,
            vec![
                "eye_process.should_stop.1",
                "eye_process.should_start.0",
                "stop_plugin",
                "start_plugin",
                "start_eye_plugin",
                "stop_eye_plugin",
                "stop_eye_plugin",
            ]
        );
    }

    #[test]
    fn test_startup_recorder_args() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let script = startup_script(&config);
        let recorder = script
            .iter()
            .find_map(|c| match c {
                ControlCommand::StartPlugin { name, args } if name == "Recorder" => Some(args),
                _ => None,
            })
            .expect("no recorder restart in script");
        assert_eq!(
            recorder.get("session_name").and_then(Value::as_str),
            Some("unit.pupil")
        );
        assert_eq!(
            recorder.get("record_eye").and_then(Value::as_bool),
            Some(true)
        );
    }

    #[test]
    fn test_run_startup_and_source() {
        let dir = TempDir::new().unwrap();
        let mock = MockControlChannel::new();
        let mut supervisor = TrackerSupervisor::new(test_config(&dir));

        supervisor.attach_external().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Launching);

        let mut channel = mock.clone();
        supervisor.run_startup(&mut channel).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Connected);

        // 脚本 + 首次 start_source
        let subjects = mock.sent_subjects();
        assert_eq!(subjects.last().map(String::as_str), Some("start_eye_plugin"));
        let last = mock.sent_commands().pop().unwrap();
        assert_eq!(
            last.payload.get("name").and_then(Value::as_str),
            Some("Aravis_Source")
        );

        // start_source 可重发（幂等重试）
        let before = mock.sent_subjects().len();
        supervisor.start_source(&mut channel).unwrap();
        assert_eq!(mock.sent_subjects().len(), before + 1);
    }

    #[test]
    fn test_shutdown_runs_teardown_script() {
        let dir = TempDir::new().unwrap();
        let mock = MockControlChannel::new();
        let mut supervisor = TrackerSupervisor::new(test_config(&dir));

        supervisor.attach_external().unwrap();
        let mut channel = mock.clone();
        supervisor.run_startup(&mut channel).unwrap();
        supervisor.mark_streaming().unwrap();

        supervisor.shutdown(&mut channel).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);

        let subjects = mock.sent_subjects();
        let tail = &subjects[subjects.len() - 3..];
        assert_eq!(
            tail,
            [
                "recording.should_stop",
                "world_process.should_stop",
                "launcher_process.should_stop",
            ]
        );
    }

    #[test]
    fn test_commands_after_stopped_fail() {
        let dir = TempDir::new().unwrap();
        let mock = MockControlChannel::new();
        let mut supervisor = TrackerSupervisor::new(test_config(&dir));

        supervisor.attach_external().unwrap();
        let mut channel = mock.clone();
        supervisor.run_startup(&mut channel).unwrap();
        supervisor.shutdown(&mut channel).unwrap();

        assert!(matches!(
            supervisor.start_source(&mut channel),
            Err(DriverError::Lifecycle {
                operation: "start_source",
                state: SupervisorState::Stopped,
            })
        ));
        assert!(matches!(
            supervisor.shutdown(&mut channel),
            Err(DriverError::Lifecycle { .. })
        ));
    }

    #[test]
    fn test_startup_requires_launching_state() {
        let dir = TempDir::new().unwrap();
        let mock = MockControlChannel::new();
        let mut supervisor = TrackerSupervisor::new(test_config(&dir));

        let mut channel = mock.clone();
        assert!(matches!(
            supervisor.run_startup(&mut channel),
            Err(DriverError::Lifecycle {
                operation: "run_startup",
                ..
            })
        ));
    }

    #[test]
    fn test_spawn_without_program_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut supervisor = TrackerSupervisor::new(test_config(&dir));
        assert!(matches!(
            supervisor.spawn_process(),
            Err(DriverError::InvalidConfig(_))
        ));
    }
}
