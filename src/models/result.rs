// 执行结果数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行状态
///
/// - `Success`: 远端进程退出码为 0
/// - `Failed`: 远端进程运行并以非 0 退出
/// - `Error`: 没有拿到退出码（连接、执行请求或传输失败）
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failed,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// 单次 (server, command) 执行记录，创建后交给持久化层，不再修改
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub server_id: i64,
    pub command_id: i64,
    pub status: CheckStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    #[serde(rename = "execution_time")]
    pub execution_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}
