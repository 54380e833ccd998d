// 批量执行生命周期事件
// 事件名与 JSON 字段是前端依赖的外部契约

use serde::Serialize;

use crate::models::CheckStatus;

/// 生命周期事件
#[derive(Clone, Debug, PartialEq)]
pub enum BatchEvent {
    Start(StartPayload),
    ServerStart(ServerStartPayload),
    CommandStart(CommandStartPayload),
    Output(OutputPayload),
    CommandComplete(CommandCompletePayload),
    ServerComplete(ServerCompletePayload),
    Complete(CompletePayload),
    Error(ErrorPayload),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StartPayload {
    pub message: String,
    pub total_servers: usize,
    pub total_commands: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServerStartPayload {
    pub server_id: i64,
    pub server_name: String,
    /// user@host:port
    pub server_host: String,
    /// 从 1 开始
    pub server_index: usize,
    pub total_servers: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CommandStartPayload {
    pub server_id: i64,
    pub server_name: String,
    pub command_id: i64,
    pub command_name: String,
    pub command_text: String,
    /// 从 1 开始
    pub command_index: usize,
    pub total_commands: usize,
}

/// 输出流类型
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct OutputPayload {
    pub server_id: i64,
    pub command_id: i64,
    pub data: String,
    #[serde(rename = "type")]
    pub stream: StreamType,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CommandCompletePayload {
    pub server_id: i64,
    pub command_id: i64,
    pub command_name: String,
    pub status: CheckStatus,
    #[serde(rename = "execution_time")]
    pub execution_time_ms: u64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServerCompletePayload {
    pub server_id: i64,
    pub server_name: String,
    pub commands_executed: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CompletePayload {
    pub message: String,
    pub total_servers: usize,
    pub total_commands: usize,
}

/// 错误事件
///
/// 带 server_id 的是单项查找错误，批量继续；不带的是终止错误
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<i64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorPayload {
    pub fn server_not_found(server_id: i64) -> Self {
        Self {
            server_id: Some(server_id),
            command_id: None,
            message: "Server not found".to_string(),
            details: None,
        }
    }

    pub fn command_not_found(server_id: i64, command_id: i64) -> Self {
        Self {
            server_id: Some(server_id),
            command_id: Some(command_id),
            message: "Command not found".to_string(),
            details: None,
        }
    }

    pub fn terminal(details: impl Into<String>) -> Self {
        Self {
            server_id: None,
            command_id: None,
            message: "Execution failed".to_string(),
            details: Some(details.into()),
        }
    }
}

// 对任意变体的负载执行同一表达式
macro_rules! with_payload {
    ($event:expr, $p:ident => $body:expr) => {
        match $event {
            BatchEvent::Start($p) => $body,
            BatchEvent::ServerStart($p) => $body,
            BatchEvent::CommandStart($p) => $body,
            BatchEvent::Output($p) => $body,
            BatchEvent::CommandComplete($p) => $body,
            BatchEvent::ServerComplete($p) => $body,
            BatchEvent::Complete($p) => $body,
            BatchEvent::Error($p) => $body,
        }
    };
}

impl BatchEvent {
    /// 事件名
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::ServerStart(_) => "server_start",
            Self::CommandStart(_) => "command_start",
            Self::Output(_) => "output",
            Self::CommandComplete(_) => "command_complete",
            Self::ServerComplete(_) => "server_complete",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    /// 事件流在此事件后结束
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete(_) => true,
            Self::Error(payload) => payload.server_id.is_none() && payload.command_id.is_none(),
            _ => false,
        }
    }

    /// 事件数据的 JSON 表示
    pub fn data(&self) -> serde_json::Result<serde_json::Value> {
        with_payload!(self, p => serde_json::to_value(p))
    }

    /// 渲染为 Server-Sent-Events 帧（字段保持声明顺序）
    pub fn to_sse(&self) -> serde_json::Result<String> {
        let data = with_payload!(self, p => serde_json::to_string(p))?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}
