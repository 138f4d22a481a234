//! 客户端构建器
//!
//! 流程：spawn（或对接已运行的）tracker 进程 → 开控制通道 → 执行启动脚本
//! → 查询事件端口并订阅 → 起 dispatcher 线程。任何一步失败都在这里返回，
//! 成功后拿到的 [`TrackerClient`] 已处于 `Streaming` 状态。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use gaze_ipc::{ControlChannel, EventChannel};
use gaze_protocol::TopicClassifier;
use parking_lot::Mutex;
use tracing::info;

use crate::client::TrackerClient;
use crate::config::{CaptureSettings, TrackerConfig};
use crate::dispatcher::{DispatcherConfig, dispatch_loop};
use crate::error::DriverError;
use crate::state::TrackerContext;
use crate::supervisor::TrackerSupervisor;

/// Tracker 客户端构建器
pub struct TrackerBuilder {
    config: TrackerConfig,
    control: Option<Box<dyn ControlChannel>>,
    events: Option<Box<dyn EventChannel>>,
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            config: TrackerConfig::default(),
            control: None,
            events: None,
        }
    }

    /// tracker 可执行文件（不设置则必须注入通道）
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.program = Some(program.into());
        self
    }

    /// 控制通道端口
    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    /// 录制输出目录
    pub fn record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.record_dir = dir.into();
        self
    }

    /// 会话名（输出文件名的基底）
    pub fn session_base(mut self, base: impl Into<String>) -> Self {
        self.config.session_base = base.into();
        self
    }

    /// 采集眼别
    pub fn eye_id(mut self, eye_id: u8) -> Self {
        self.config.eye_id = eye_id;
        self
    }

    /// 采集设置
    pub fn capture(mut self, capture: CaptureSettings) -> Self {
        self.config.capture = capture;
        self
    }

    /// 事件轮询超时（dispatcher 停机延迟上界）
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// 控制通道回复超时
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = timeout;
        self
    }

    /// teardown 宽限期
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// tracker 调试输出
    pub fn debug(mut self, debug: bool) -> Self {
        if debug {
            self.config.extra_args.push("--debug".to_string());
        }
        self
    }

    /// tracker 性能剖析
    pub fn profile(mut self, profile: bool) -> Self {
        if profile {
            self.config.extra_args.push("--profile".to_string());
        }
        self
    }

    /// 整体替换配置
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// 注入通道（mock 测试、或对接手动启动的 tracker）
    ///
    /// 注入后不 spawn 进程，supervisor 以 attach 模式运行。
    pub fn with_channels(
        mut self,
        control: Box<dyn ControlChannel>,
        events: Box<dyn EventChannel>,
    ) -> Self {
        self.control = Some(control);
        self.events = Some(events);
        self
    }

    /// 构建并启动
    pub fn build(self) -> Result<TrackerClient, DriverError> {
        let config = self.config;
        let mut supervisor = TrackerSupervisor::new(config.clone());

        let injected = self.control.is_some();
        if injected {
            supervisor.attach_external()?;
        } else {
            supervisor.spawn_process()?;
        }

        // 控制通道
        let mut control: Box<dyn ControlChannel> = match self.control {
            Some(control) => control,
            None => Self::connect_control(&config)?,
        };

        // 启动配置脚本（含首次 start_source）
        supervisor.run_startup(&mut *control)?;

        // 事件通道：端口经由控制通道发现
        let events: Box<dyn EventChannel> = match self.events {
            Some(events) => events,
            None => Self::connect_events(&config, &mut *control)?,
        };

        // dispatcher 线程
        let ctx = Arc::new(TrackerContext::new());
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let is_running = Arc::new(AtomicBool::new(true));

        let thread_ctx = ctx.clone();
        let thread_flag = is_running.clone();
        let classifier = TopicClassifier::new(config.source_topic_prefix.clone());
        let dispatcher_config = DispatcherConfig {
            poll_timeout: config.poll_timeout,
        };
        let dispatcher_thread = std::thread::Builder::new()
            .name("gaze-dispatcher".to_string())
            .spawn(move || {
                dispatch_loop(
                    BoxedEvents(events),
                    thread_ctx,
                    cmd_rx,
                    classifier,
                    dispatcher_config,
                    thread_flag,
                );
            })?;

        supervisor.mark_streaming()?;
        info!("tracker client ready (session {})", config.session_base);

        Ok(TrackerClient {
            config,
            supervisor: Mutex::new(supervisor),
            control: Mutex::new(control),
            ctx,
            cmd_tx,
            dispatcher_thread: Some(dispatcher_thread),
            is_running,
        })
    }

    #[cfg(feature = "zmq-backend")]
    fn connect_control(config: &TrackerConfig) -> Result<Box<dyn ControlChannel>, DriverError> {
        let channel = gaze_ipc::ZmqControlChannel::connect(
            &config.control_endpoint(),
            config.reply_timeout,
        )?;
        Ok(Box::new(channel))
    }

    #[cfg(not(feature = "zmq-backend"))]
    fn connect_control(_config: &TrackerConfig) -> Result<Box<dyn ControlChannel>, DriverError> {
        Err(DriverError::InvalidConfig(
            "no channels injected and zmq-backend feature disabled".to_string(),
        ))
    }

    #[cfg(feature = "zmq-backend")]
    fn connect_events(
        config: &TrackerConfig,
        control: &mut dyn ControlChannel,
    ) -> Result<Box<dyn EventChannel>, DriverError> {
        let reply = control.query("SUB_PORT")?;
        let sub_port: u16 = reply.trim().parse().map_err(|_| {
            DriverError::InvalidConfig(format!("unparsable SUB_PORT reply: {reply:?}"))
        })?;
        info!("event channel port discovered: {}", sub_port);

        let topics = config.event_topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        let channel =
            gaze_ipc::ZmqEventChannel::connect(&config.event_endpoint(sub_port), &topic_refs)?;
        Ok(Box::new(channel))
    }

    #[cfg(not(feature = "zmq-backend"))]
    fn connect_events(
        _config: &TrackerConfig,
        _control: &mut dyn ControlChannel,
    ) -> Result<Box<dyn EventChannel>, DriverError> {
        Err(DriverError::InvalidConfig(
            "no channels injected and zmq-backend feature disabled".to_string(),
        ))
    }
}

/// `Box<dyn EventChannel>` 的直通包装（`EventChannel` 要求 `Sized` 接收者）
struct BoxedEvents(Box<dyn EventChannel>);

impl EventChannel for BoxedEvents {
    fn try_receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<gaze_protocol::Notification>, gaze_ipc::ChannelError> {
        self.0.try_receive(timeout)
    }
}
