//! # Gaze Driver
//!
//! 眼动仪客户端的驱动层：
//! - 外部 tracker 进程监督（spawn、有序配置脚本、限时 teardown）
//! - 后台事件 dispatch 线程（轮询 → 分类 → 缓存更新 → 回调）
//! - 单互斥量共享状态（last-known 样本、回调槽、通知缓存）
//!
//! # 并发模型
//!
//! dispatcher 线程是共享状态的唯一写者；回调的安装/移除经由命令队列流入
//! dispatcher，在其持锁区间内生效。控制通道放在互斥量后面串行化调用方，
//! 与事件通道物理隔离（两条独立连接）。

mod builder;
mod client;
pub mod config;
mod error;
pub mod dispatcher;
pub mod state;
pub mod supervisor;

pub use builder::TrackerBuilder;
pub use client::TrackerClient;
pub use config::{CaptureSettings, TrackerConfig};
pub use dispatcher::{DispatcherCommand, DispatcherConfig, dispatch_loop};
pub use error::DriverError;
pub use state::{
    CallbackFlow, EventCallback, MetricsSnapshot, TrackerContext, TrackerEvent,
};
pub use supervisor::{SupervisorState, TrackerSupervisor, startup_script, teardown_script};
