// 非流式批量执行的汇总结果

use serde::Serialize;

use super::event::BatchEvent;
use crate::models::CheckStatus;

/// 批量执行汇总
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct BatchReport {
    pub message: String,
    pub results: Vec<ServerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// 单台服务器的汇总
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServerReport {
    pub server_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checks: Vec<CheckReport>,
}

/// 单条命令的汇总
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CheckReport {
    pub command_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerReport {
    fn new(server_id: i64) -> Self {
        Self {
            server_id,
            server_name: None,
            error: None,
            checks: Vec::new(),
        }
    }
}

impl BatchReport {
    /// 按顺序累积一个事件
    pub fn apply(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::ServerStart(p) => {
                let mut server = ServerReport::new(p.server_id);
                server.server_name = Some(p.server_name.clone());
                self.results.push(server);
            }
            BatchEvent::CommandComplete(p) => {
                self.server_mut(p.server_id).checks.push(CheckReport {
                    command_id: p.command_id,
                    command_name: Some(p.command_name.clone()),
                    status: Some(p.status),
                    execution_time: Some(p.execution_time_ms),
                    error: None,
                });
            }
            BatchEvent::Complete(_) => {
                self.message = "Batch check executed successfully".to_string();
            }
            BatchEvent::Error(p) => match (p.server_id, p.command_id) {
                (Some(server_id), Some(command_id)) => {
                    self.server_mut(server_id).checks.push(CheckReport {
                        command_id,
                        command_name: None,
                        status: None,
                        execution_time: None,
                        error: Some(p.message.clone()),
                    });
                }
                (Some(server_id), None) => {
                    let mut server = ServerReport::new(server_id);
                    server.error = Some(p.message.clone());
                    self.results.push(server);
                }
                _ => {
                    self.message = "Failed to execute batch check".to_string();
                    self.error = Some(p.message.clone());
                    self.details = p.details.clone();
                }
            },
            _ => {}
        }
    }

    /// 批量执行是否正常完成
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && !self.message.is_empty()
    }

    fn server_mut(&mut self, server_id: i64) -> &mut ServerReport {
        let position = self
            .results
            .iter()
            .rposition(|s| s.server_id == server_id);
        match position {
            Some(index) => &mut self.results[index],
            None => {
                self.results.push(ServerReport::new(server_id));
                let last = self.results.len() - 1;
                &mut self.results[last]
            }
        }
    }
}
