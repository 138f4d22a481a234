//! Mock 通道（无 socket 依赖）
//!
//! 测试用：事件通道由测试侧注入通知队列，控制通道记录收到的命令并按脚本
//! 回复。两者都可 `Clone`——内部共享同一状态，便于把通道交给后台线程后
//! 仍能从测试侧注入/检查。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use gaze_protocol::Notification;
use parking_lot::Mutex;

use crate::{ChannelError, ControlChannel, EventChannel};

#[derive(Default)]
struct ControlState {
    sent: Vec<Notification>,
    queries: Vec<String>,
    replies: VecDeque<Vec<u8>>,
    query_replies: VecDeque<String>,
    /// 模拟对端不回复：send 进入在途状态并返回 Timeout
    withhold_reply: bool,
    awaiting_reply: bool,
    /// 模拟连接断开
    closed: bool,
}

/// Mock 控制通道
#[derive(Clone, Default)]
pub struct MockControlChannel {
    state: Arc<Mutex<ControlState>>,
}

impl MockControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一条命令回复（默认回复 `b"ok"`）
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        self.state.lock().replies.push_back(reply.into());
    }

    /// 预置一条 query 回复
    pub fn push_query_reply(&self, reply: impl Into<String>) {
        self.state.lock().query_replies.push_back(reply.into());
    }

    /// 之后的 send 不回复（在途状态保持，用于验证 Busy 纪律）
    pub fn withhold_replies(&self, withhold: bool) {
        self.state.lock().withhold_reply = withhold;
    }

    /// 模拟对端消失
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// 已发送命令的快照
    pub fn sent_commands(&self) -> Vec<Notification> {
        self.state.lock().sent.clone()
    }

    /// 已发送命令的 subject 序列（断言启动/关停脚本顺序用）
    pub fn sent_subjects(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .map(|n| n.subject().unwrap_or_default().to_string())
            .collect()
    }

    pub fn sent_queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }
}

impl ControlChannel for MockControlChannel {
    fn send_command(&mut self, command: &Notification) -> Result<Vec<u8>, ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.awaiting_reply {
            return Err(ChannelError::Busy);
        }

        state.sent.push(command.clone());

        if state.withhold_reply {
            state.awaiting_reply = true;
            return Err(ChannelError::Timeout);
        }
        Ok(state.replies.pop_front().unwrap_or_else(|| b"ok".to_vec()))
    }

    fn query(&mut self, request: &str) -> Result<String, ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.awaiting_reply {
            return Err(ChannelError::Busy);
        }

        state.queries.push(request.to_string());
        Ok(state
            .query_replies
            .pop_front()
            .unwrap_or_else(|| "0".to_string()))
    }
}

#[derive(Default)]
struct EventState {
    queue: VecDeque<Notification>,
    closed: bool,
}

/// Mock 事件通道
#[derive(Clone, Default)]
pub struct MockEventChannel {
    state: Arc<Mutex<EventState>>,
}

impl MockEventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入一条事件（按注入顺序被接收）
    pub fn push(&self, notification: Notification) {
        self.state.lock().queue.push_back(notification);
    }

    pub fn push_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        let mut state = self.state.lock();
        state.queue.extend(notifications);
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// 队列中尚未被消费的事件数
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl EventChannel for MockEventChannel {
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<Notification>, ChannelError> {
        let next = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.queue.pop_front()
        };
        if next.is_none() && !timeout.is_zero() {
            // 模拟轮询超时的时间开销，避免测试中空转
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(next)
    }
}
