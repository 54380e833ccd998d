// 命令执行服务
// 每次执行使用独立的 SSH 连接：连接 → 执行 → 关闭

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::constants::checks::CONNECTION_TEST_COMMAND;
use crate::models::{CheckStatus, ConnectionSettings, ExecutionResult, Server};
use crate::ssh::{CommandOutput, NullSink, OutputSink, RemoteExit, SshClient, SshConfig};

/// 单次执行的结果（尚未关联服务器/命令 ID）
#[derive(Clone, Debug, PartialEq)]
pub struct ExecOutcome {
    pub status: CheckStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    /// 远端退出码，没有到达退出状态时为 None
    pub exit_code: Option<u32>,
    pub execution_time_ms: u64,
}

impl ExecOutcome {
    /// 没有拿到退出码的失败（连接、通道、传输错误）
    pub fn error(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: CheckStatus::Error,
            output: None,
            error_message: Some(message.into()),
            exit_code: None,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckStatus::Success
    }

    /// 生成持久化记录，完成时间取当前时间
    pub fn into_result(self, server_id: i64, command_id: i64) -> ExecutionResult {
        ExecutionResult {
            server_id,
            command_id,
            status: self.status,
            output: self.output,
            error_message: self.error_message,
            execution_time_ms: self.execution_time_ms,
            checked_at: Utc::now(),
        }
    }
}

/// 按退出状态归类命令输出
///
/// 退出码 0 为 success，非 0 为 failed，信号终止或没有退出状态为 error。
/// 输出优先取 stdout，stdout 为空时取 stderr，与退出状态无关。
pub fn classify(output: &CommandOutput, elapsed: Duration) -> ExecOutcome {
    match &output.exit {
        RemoteExit::Code(code) => ExecOutcome {
            status: if *code == 0 {
                CheckStatus::Success
            } else {
                CheckStatus::Failed
            },
            output: preferred_output(output),
            error_message: None,
            exit_code: Some(*code),
            execution_time_ms: elapsed.as_millis() as u64,
        },
        RemoteExit::Signal(signal) => {
            ExecOutcome::error(format!("Command terminated by signal {}", signal), elapsed)
        }
        RemoteExit::Missing => ExecOutcome::error(
            "Channel closed before the command reported an exit status",
            elapsed,
        ),
    }
}

fn preferred_output(output: &CommandOutput) -> Option<String> {
    if !output.stdout.is_empty() {
        Some(output.stdout_string())
    } else if !output.stderr.is_empty() {
        Some(output.stderr_string())
    } else {
        None
    }
}

/// 执行命令的能力（批量编排器依赖此 trait，便于替换）
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行命令；所有失败都体现在返回值中
    async fn run(&self, server: &Server, command: &str, sink: &mut dyn OutputSink)
        -> ExecOutcome;
}

/// 基于 SSH 的命令执行器
#[derive(Clone, Debug, Default)]
pub struct CommandExecutor {
    settings: ConnectionSettings,
}

impl CommandExecutor {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    /// 执行命令，只返回最终结果
    pub async fn execute(&self, server: &Server, command: &str) -> ExecOutcome {
        self.execute_streaming(server, command, &mut NullSink).await
    }

    /// 执行命令，输出块到达时交给 sink
    pub async fn execute_streaming(
        &self,
        server: &Server,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> ExecOutcome {
        let started = Instant::now();
        let client = SshClient::new(SshConfig::from_server(server, &self.settings));

        let session = match client.open_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "[Exec] Connection to {} failed: {}",
                    server.address_label(),
                    e
                );
                return ExecOutcome::error(format!("SSH Connection Error: {}", e), started.elapsed());
            }
        };

        debug!("[Exec] {} $ {}", server.address_label(), command);
        let result = match session.open_exec().await {
            Ok(channel) => channel.exec(command, sink).await,
            Err(e) => Err(e),
        };
        session.close().await;

        let elapsed = started.elapsed();
        match result {
            Ok(output) => {
                let outcome = classify(&output, elapsed);
                debug!(
                    "[Exec] {} finished with {} in {}ms",
                    server.address_label(),
                    outcome.status.as_str(),
                    outcome.execution_time_ms
                );
                outcome
            }
            Err(e) => {
                warn!("[Exec] Command on {} failed: {}", server.address_label(), e);
                ExecOutcome::error(e.to_string(), elapsed)
            }
        }
    }

    /// 连通性测试：执行 echo 并检查是否成功
    pub async fn test_connection(&self, server: &Server) -> bool {
        self.execute(server, CONNECTION_TEST_COMMAND).await.is_success()
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(
        &self,
        server: &Server,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> ExecOutcome {
        self.execute_streaming(server, command, sink).await
    }
}
