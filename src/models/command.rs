// 检查命令数据模型

use serde::{Deserialize, Serialize};

use crate::constants::checks::DEFAULT_CHECK_COMMANDS;

/// 单个检查命令
///
/// `command` 原样交给远端 shell 执行，不做拆分或转义。
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckCommand {
    pub id: i64,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CheckCommand {
    pub fn new(id: i64, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            command: command.into(),
            description: None,
        }
    }

    /// 内置的默认检查命令
    pub fn defaults() -> Vec<CheckCommand> {
        DEFAULT_CHECK_COMMANDS
            .iter()
            .map(|(id, name, command, description)| CheckCommand {
                id: *id,
                name: name.to_string(),
                command: command.to_string(),
                description: Some(description.to_string()),
            })
            .collect()
    }
}
