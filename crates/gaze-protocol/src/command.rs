//! 控制命令构建
//!
//! 控制通道上的每个请求都是一条 `notify.<subject>` 通知。supervisor 的
//! 启动/关停脚本和校准提交都通过这里构建，保证字段名与 tracker 侧一致。

use crate::notify::Notification;
use crate::value::Value;

/// 控制通道命令
///
/// 闭集：tracker 能接受的 subject 全部在这里列出，
/// 不提供自由拼 map 的逃生口。
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// 启动指定眼别的眼进程
    EyeProcessShouldStart { eye_id: u8 },
    /// 停止指定眼别的眼进程（单眼采集时关掉另一只）
    EyeProcessShouldStop { eye_id: u8 },
    /// 启动世界进程插件
    StartPlugin { name: String, args: Value },
    /// 停止世界进程插件
    StopPlugin { name: String },
    /// 在指定眼进程中启动插件（detector、视频源）
    StartEyePlugin {
        name: String,
        target: String,
        args: Value,
    },
    /// 在指定眼进程中停止插件
    StopEyePlugin { name: String, target: String },
    /// 开始录制
    RecordingShouldStart { session_name: String },
    /// 停止录制
    RecordingShouldStop,
    /// 停止世界进程（teardown）
    WorldProcessShouldStop,
    /// 停止 launcher 进程（teardown 最后一步）
    LauncherProcessShouldStop,
    /// 提交校准数据：以启动 gazer 插件的方式携带 `calib_data`
    Calibrate {
        plugin: String,
        pupil_list: Vec<Value>,
        ref_list: Vec<Value>,
    },
}

impl ControlCommand {
    /// 命令的 subject 字符串
    pub fn subject(&self) -> String {
        match self {
            ControlCommand::EyeProcessShouldStart { eye_id } => {
                format!("eye_process.should_start.{eye_id}")
            },
            ControlCommand::EyeProcessShouldStop { eye_id } => {
                format!("eye_process.should_stop.{eye_id}")
            },
            ControlCommand::StartPlugin { .. } | ControlCommand::Calibrate { .. } => {
                "start_plugin".to_string()
            },
            ControlCommand::StopPlugin { .. } => "stop_plugin".to_string(),
            ControlCommand::StartEyePlugin { .. } => "start_eye_plugin".to_string(),
            ControlCommand::StopEyePlugin { .. } => "stop_eye_plugin".to_string(),
            ControlCommand::RecordingShouldStart { .. } => "recording.should_start".to_string(),
            ControlCommand::RecordingShouldStop => "recording.should_stop".to_string(),
            ControlCommand::WorldProcessShouldStop => "world_process.should_stop".to_string(),
            ControlCommand::LauncherProcessShouldStop => {
                "launcher_process.should_stop".to_string()
            },
        }
    }

    /// 构建线格式通知
    pub fn to_notification(&self) -> Notification {
        let subject = self.subject();
        match self {
            ControlCommand::EyeProcessShouldStart { eye_id }
            | ControlCommand::EyeProcessShouldStop { eye_id } => Notification::request(
                &subject,
                [
                    ("eye_id", Value::from(*eye_id)),
                    ("args", Value::Map(vec![])),
                ],
            ),
            ControlCommand::StartPlugin { name, args } => Notification::request(
                &subject,
                [("name", Value::from(name.clone())), ("args", args.clone())],
            ),
            ControlCommand::StopPlugin { name } => {
                Notification::request(&subject, [("name", Value::from(name.clone()))])
            },
            ControlCommand::StartEyePlugin { name, target, args } => Notification::request(
                &subject,
                [
                    ("name", Value::from(name.clone())),
                    ("target", Value::from(target.clone())),
                    ("args", args.clone()),
                ],
            ),
            ControlCommand::StopEyePlugin { name, target } => Notification::request(
                &subject,
                [
                    ("name", Value::from(name.clone())),
                    ("target", Value::from(target.clone())),
                ],
            ),
            ControlCommand::RecordingShouldStart { session_name } => Notification::request(
                &subject,
                [("session_name", Value::from(session_name.clone()))],
            ),
            ControlCommand::RecordingShouldStop
            | ControlCommand::WorldProcessShouldStop
            | ControlCommand::LauncherProcessShouldStop => {
                Notification::request(&subject, Vec::<(&str, Value)>::new())
            },
            ControlCommand::Calibrate {
                plugin,
                pupil_list,
                ref_list,
            } => Notification::request(
                &subject,
                [
                    ("name", Value::from(plugin.clone())),
                    (
                        "args",
                        Value::map([(
                            "calib_data",
                            Value::map([
                                ("ref_list", Value::Array(ref_list.clone())),
                                ("pupil_list", Value::Array(pupil_list.clone())),
                            ]),
                        )]),
                    ),
                    ("raise_calibration_error", Value::Bool(false)),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_process_subjects() {
        assert_eq!(
            ControlCommand::EyeProcessShouldStop { eye_id: 1 }.subject(),
            "eye_process.should_stop.1"
        );
        assert_eq!(
            ControlCommand::EyeProcessShouldStart { eye_id: 0 }.subject(),
            "eye_process.should_start.0"
        );
    }

    #[test]
    fn test_start_eye_plugin_notification() {
        let cmd = ControlCommand::StartEyePlugin {
            name: "Detector2DPlugin".to_string(),
            target: "eye0".to_string(),
            args: Value::map([(
                "properties",
                Value::map([("intensity_range", Value::from(4u8))]),
            )]),
        };
        let n = cmd.to_notification();
        assert_eq!(n.topic, "notify.start_eye_plugin");
        assert_eq!(n.subject(), Some("start_eye_plugin"));
        assert_eq!(
            n.payload.get("target").and_then(Value::as_str),
            Some("eye0")
        );
        assert!(n.payload.get("args").is_some());
    }

    #[test]
    fn test_calibrate_notification_shape() {
        let cmd = ControlCommand::Calibrate {
            plugin: "Gazer2D".to_string(),
            pupil_list: vec![Value::map([("timestamp", Value::F64(1.0))])],
            ref_list: vec![Value::map([("timestamp", Value::F64(1.1))])],
        };
        let n = cmd.to_notification();
        assert_eq!(n.topic, "notify.start_plugin");

        let calib_data = n
            .payload
            .get("args")
            .and_then(|a| a.get("calib_data"))
            .expect("calib_data missing");
        assert_eq!(
            calib_data.get("pupil_list").and_then(Value::as_array).map(<[Value]>::len),
            Some(1)
        );
        assert_eq!(
            calib_data.get("ref_list").and_then(Value::as_array).map(<[Value]>::len),
            Some(1)
        );
        assert_eq!(
            n.payload.get("raise_calibration_error").and_then(Value::as_bool),
            Some(false)
        );
    }

    #[test]
    fn test_teardown_commands_have_no_extra_fields() {
        let n = ControlCommand::WorldProcessShouldStop.to_notification();
        assert_eq!(n.topic, "notify.world_process.should_stop");
        // 只有 subject 字段
        match &n.payload {
            Value::Map(pairs) => assert_eq!(pairs.len(), 1),
            _ => panic!("payload must be a map"),
        }
    }
}
