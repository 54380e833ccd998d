// 批量执行模块
//
// 模块结构:
// - event: 生命周期事件 (BatchEvent 及各负载)
// - orchestrator: 服务器 × 命令 顺序编排
// - report: 非流式批量执行的汇总结果

pub mod event;
pub mod orchestrator;
pub mod report;

use serde_json::Value;
use thiserror::Error;

pub use event::{BatchEvent, ErrorPayload, StreamType};
pub use orchestrator::BatchOrchestrator;
pub use report::{BatchReport, CheckReport, ServerReport};

/// 批量执行错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 请求不合法，执行前拒绝
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Server not found")]
    ServerNotFound(i64),

    #[error("Command not found")]
    CommandNotFound(i64),

    /// 清单或结果存储故障
    #[error("Storage error: {0:#}")]
    Store(#[source] anyhow::Error),

    /// 执行任务异常结束
    #[error("Execution failed: {0}")]
    Internal(String),
}

/// 已校验的批量执行请求：两个 ID 列表都非空
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRequest {
    server_ids: Vec<i64>,
    command_ids: Vec<i64>,
}

impl BatchRequest {
    pub fn new(server_ids: Vec<i64>, command_ids: Vec<i64>) -> Result<Self, BatchError> {
        if server_ids.is_empty() {
            return Err(invalid_list("server_ids"));
        }
        if command_ids.is_empty() {
            return Err(invalid_list("command_ids"));
        }
        Ok(Self {
            server_ids,
            command_ids,
        })
    }

    /// 从 JSON 请求体解析 `{server_ids: [...], command_ids: [...]}`
    ///
    /// ID 可以是整数或整数字符串
    pub fn from_json(body: &Value) -> Result<Self, BatchError> {
        let server_ids = id_list(body, "server_ids")?;
        let command_ids = id_list(body, "command_ids")?;
        Self::new(server_ids, command_ids)
    }

    pub fn server_ids(&self) -> &[i64] {
        &self.server_ids
    }

    pub fn command_ids(&self) -> &[i64] {
        &self.command_ids
    }
}

fn invalid_list(field: &str) -> BatchError {
    BatchError::InvalidRequest(format!("{} must be a non-empty array", field))
}

fn id_list(body: &Value, field: &str) -> Result<Vec<i64>, BatchError> {
    let items = match body.get(field).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => items,
        _ => return Err(invalid_list(field)),
    };

    items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .map(|id| {
            id.ok_or_else(|| {
                BatchError::InvalidRequest(format!("{} must contain integer ids", field))
            })
        })
        .collect()
}
