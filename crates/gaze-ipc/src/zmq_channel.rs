//! ZMQ 后端
//!
//! 控制通道 = REQ socket（lock-step 与 REQ 状态机天然一致），
//! 事件通道 = SUB socket + `zmq::poll` 超时轮询。
//! 两者各自持有独立连接，`linger = 0` 保证 teardown 不悬挂。

use std::time::Duration;

use gaze_protocol::Notification;
use tracing::{info, trace};

use crate::{ChannelError, ControlChannel, EventChannel};

impl From<zmq::Error> for ChannelError {
    fn from(e: zmq::Error) -> Self {
        match e {
            zmq::Error::EAGAIN => ChannelError::Timeout,
            zmq::Error::ECONNREFUSED => {
                ChannelError::Connect(e.to_string())
            },
            zmq::Error::ETERM => ChannelError::Closed,
            other => ChannelError::Socket(other.to_string()),
        }
    }
}

/// 控制通道（REQ）
pub struct ZmqControlChannel {
    socket: zmq::Socket,
    endpoint: String,
    /// 已发送请求但尚未收到回复（超时后遗留的在途状态）
    awaiting_reply: bool,
}

impl ZmqControlChannel {
    /// 连接到 tracker 的控制端口
    ///
    /// `reply_timeout` 限制每次 `send_command`/`query` 等待回复的时长。
    pub fn connect(endpoint: &str, reply_timeout: Duration) -> Result<Self, ChannelError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::REQ)?;
        socket.set_linger(0)?;
        socket.set_rcvtimeo(reply_timeout.as_millis() as i32)?;
        socket
            .connect(endpoint)
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        info!("Control channel connected to {}", endpoint);

        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
            awaiting_reply: false,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 接收一条回复，多余的分帧丢弃（回复是不透明确认，只保留第一帧）
    fn recv_reply(&mut self) -> Result<Vec<u8>, ChannelError> {
        let first = self.socket.recv_bytes(0)?;
        while self.socket.get_rcvmore()? {
            let _ = self.socket.recv_bytes(0)?;
        }
        self.awaiting_reply = false;
        Ok(first)
    }
}

impl ControlChannel for ZmqControlChannel {
    fn send_command(&mut self, command: &Notification) -> Result<Vec<u8>, ChannelError> {
        if self.awaiting_reply {
            return Err(ChannelError::Busy);
        }

        let (topic, payload) = command.to_wire();
        self.socket.send_multipart([topic, payload], 0)?;
        self.awaiting_reply = true;

        trace!("Control command sent: {}", command.topic);
        self.recv_reply()
    }

    fn query(&mut self, request: &str) -> Result<String, ChannelError> {
        if self.awaiting_reply {
            return Err(ChannelError::Busy);
        }

        self.socket.send(request.as_bytes(), 0)?;
        self.awaiting_reply = true;

        let reply = self.recv_reply()?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

/// 事件通道（SUB）
pub struct ZmqEventChannel {
    socket: zmq::Socket,
}

impl ZmqEventChannel {
    /// 连接并订阅固定 topic 集合
    ///
    /// 订阅集在连接时一次性确定，之后不再变更（分类由 dispatcher 做，
    /// 不依赖订阅过滤的精确性——SUB 过滤本身就是前缀匹配）。
    pub fn connect(endpoint: &str, topic_filters: &[&str]) -> Result<Self, ChannelError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket
            .connect(endpoint)
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        for topic in topic_filters {
            socket.set_subscribe(topic.as_bytes())?;
        }

        info!(
            "Event channel connected to {} ({} topic filters)",
            endpoint,
            topic_filters.len()
        );

        Ok(Self { socket })
    }
}

impl EventChannel for ZmqEventChannel {
    fn try_receive(&mut self, timeout: Duration) -> Result<Option<Notification>, ChannelError> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut items, timeout.as_millis() as i64)?;
        if !items[0].is_readable() {
            return Ok(None);
        }

        let topic = self.socket.recv_bytes(0)?;
        if !self.socket.get_rcvmore()? {
            return Err(ChannelError::Socket(
                "event message missing payload frame".to_string(),
            ));
        }
        let payload = self.socket.recv_bytes(0)?;
        // 丢弃超出两帧的部分（当前协议不会出现）
        while self.socket.get_rcvmore()? {
            let _ = self.socket.recv_bytes(0)?;
        }

        Ok(Some(Notification::from_wire(&topic, &payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaze_protocol::{ControlCommand, Value};
    use std::thread;

    // 用 PAIR 之外的真实 REP/PUB 对手方覆盖两条通道的线格式

    #[test]
    fn test_control_channel_roundtrip() {
        let ctx = zmq::Context::new();
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = rep.get_last_endpoint().unwrap().unwrap();

        let server = thread::spawn(move || {
            let parts = rep.recv_multipart(0).unwrap();
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0], b"notify.recording.should_stop");
            rep.send("ok", 0).unwrap();
        });

        let mut channel =
            ZmqControlChannel::connect(&endpoint, Duration::from_secs(2)).unwrap();
        let reply = channel
            .send_command(&ControlCommand::RecordingShouldStop.to_notification())
            .unwrap();
        assert_eq!(reply, b"ok");

        server.join().unwrap();
    }

    #[test]
    fn test_control_channel_busy_after_timeout() {
        let ctx = zmq::Context::new();
        // REP 对端存在但从不回复
        let rep = ctx.socket(zmq::REP).unwrap();
        rep.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = rep.get_last_endpoint().unwrap().unwrap();

        let mut channel =
            ZmqControlChannel::connect(&endpoint, Duration::from_millis(50)).unwrap();
        let cmd = ControlCommand::RecordingShouldStop.to_notification();

        assert!(matches!(
            channel.send_command(&cmd),
            Err(ChannelError::Timeout)
        ));
        // 第一个请求仍在途，第二个必须被拒绝
        assert!(matches!(
            channel.send_command(&cmd),
            Err(ChannelError::Busy)
        ));
    }

    #[test]
    fn test_event_channel_receive_and_timeout() {
        let ctx = zmq::Context::new();
        let publisher = ctx.socket(zmq::PUB).unwrap();
        publisher.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = publisher.get_last_endpoint().unwrap().unwrap();

        let mut channel = ZmqEventChannel::connect(&endpoint, &["gaze"]).unwrap();

        // 订阅生效前发布的消息会丢；轮询直到收到为止
        let payload = gaze_protocol::encode(&Value::map([("timestamp", Value::F64(1.0))]));
        let mut received = None;
        for _ in 0..100 {
            publisher
                .send_multipart([b"gaze.2d.0.".to_vec(), payload.clone()], 0)
                .unwrap();
            if let Some(n) = channel.try_receive(Duration::from_millis(20)).unwrap() {
                received = Some(n);
                break;
            }
        }
        let n = received.expect("no event received");
        assert_eq!(n.topic, "gaze.2d.0.");
        assert_eq!(
            n.payload.get("timestamp").and_then(Value::as_f64),
            Some(1.0)
        );

        // 无消息时超时返回 None
        assert!(channel.try_receive(Duration::from_millis(10)).unwrap().is_none());
    }
}
