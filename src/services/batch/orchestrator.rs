// 批量执行编排
// 服务器在外层、命令在内层，严格按请求给出的顺序逐个执行

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::event::{
    BatchEvent, CommandCompletePayload, CommandStartPayload, CompletePayload, ErrorPayload,
    OutputPayload, ServerCompletePayload, ServerStartPayload, StartPayload, StreamType,
};
use super::report::BatchReport;
use super::{BatchError, BatchRequest};
use crate::models::ExecutionResult;
use crate::services::executor::CommandRunner;
use crate::services::storage::{Inventory, ResultStore};
use crate::ssh::{NullSink, OutputSink};

/// 批量执行编排器
#[derive(Clone)]
pub struct BatchOrchestrator {
    inventory: Arc<dyn Inventory>,
    results: Arc<dyn ResultStore>,
    runner: Arc<dyn CommandRunner>,
}

impl BatchOrchestrator {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        results: Arc<dyn ResultStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            inventory,
            results,
            runner,
        }
    }

    /// 执行批量请求，事件按发生顺序发送到 `events`
    ///
    /// 事件流总是以 `complete` 或终止 `error` 结束。
    /// 接收端关闭后仍会执行完全部命令并保存结果。
    pub async fn run(&self, request: BatchRequest, events: mpsc::UnboundedSender<BatchEvent>) {
        let this = self.clone();
        let emitter = events.clone();
        let task = tokio::spawn(async move { this.drive(&request, &emitter).await });

        let details = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("Batch task aborted: {}", e),
        };
        error!("[Batch] Execution failed: {}", details);
        let _ = events.send(BatchEvent::Error(ErrorPayload::terminal(details)));
    }

    /// 非流式批量执行，返回汇总结果
    pub async fn run_collect(&self, request: BatchRequest) -> BatchReport {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.run(request, tx).await;

        let mut report = BatchReport::default();
        while let Some(event) = rx.recv().await {
            report.apply(&event);
        }
        report
    }

    /// 单项检查：执行一条命令并保存结果
    pub async fn execute_one(
        &self,
        server_id: i64,
        command_id: i64,
    ) -> Result<ExecutionResult, BatchError> {
        let server = self
            .inventory
            .server(server_id)
            .await
            .map_err(BatchError::Store)?
            .ok_or(BatchError::ServerNotFound(server_id))?;
        let command = self
            .inventory
            .command(command_id)
            .await
            .map_err(BatchError::Store)?
            .ok_or(BatchError::CommandNotFound(command_id))?;

        let outcome = self
            .runner
            .run(&server, &command.command, &mut NullSink)
            .await;
        let result = outcome.into_result(server_id, command_id);
        self.results
            .save(result.clone())
            .await
            .map_err(BatchError::Store)?;
        Ok(result)
    }

    async fn drive(
        &self,
        request: &BatchRequest,
        events: &mpsc::UnboundedSender<BatchEvent>,
    ) -> Result<(), BatchError> {
        let emit = |event: BatchEvent| {
            let _ = events.send(event);
        };

        let total_servers = request.server_ids().len();
        let total_commands = request.command_ids().len();
        info!(
            "[Batch] Starting {} server(s) x {} command(s)",
            total_servers, total_commands
        );
        emit(BatchEvent::Start(StartPayload {
            message: "Batch execution started".to_string(),
            total_servers,
            total_commands,
        }));

        for (server_index, &server_id) in request.server_ids().iter().enumerate() {
            let Some(server) = self
                .inventory
                .server(server_id)
                .await
                .map_err(BatchError::Store)?
            else {
                warn!("[Batch] Server {} not found", server_id);
                emit(BatchEvent::Error(ErrorPayload::server_not_found(server_id)));
                continue;
            };

            emit(BatchEvent::ServerStart(ServerStartPayload {
                server_id,
                server_name: server.name.clone(),
                server_host: server.address_label(),
                server_index: server_index + 1,
                total_servers,
            }));

            for (command_index, &command_id) in request.command_ids().iter().enumerate() {
                let Some(command) = self
                    .inventory
                    .command(command_id)
                    .await
                    .map_err(BatchError::Store)?
                else {
                    warn!("[Batch] Command {} not found", command_id);
                    emit(BatchEvent::Error(ErrorPayload::command_not_found(
                        server_id, command_id,
                    )));
                    continue;
                };

                emit(BatchEvent::CommandStart(CommandStartPayload {
                    server_id,
                    server_name: server.name.clone(),
                    command_id,
                    command_name: command.name.clone(),
                    command_text: command.command.clone(),
                    command_index: command_index + 1,
                    total_commands,
                }));

                let mut sink = EventSink::new(server_id, command_id, events);
                let outcome = self.runner.run(&server, &command.command, &mut sink).await;
                sink.flush();

                let status = outcome.status;
                let execution_time_ms = outcome.execution_time_ms;
                self.results
                    .save(outcome.into_result(server_id, command_id))
                    .await
                    .map_err(BatchError::Store)?;
                debug!(
                    "[Batch] {} / {} -> {}",
                    server.name,
                    command.name,
                    status.as_str()
                );

                emit(BatchEvent::CommandComplete(CommandCompletePayload {
                    server_id,
                    command_id,
                    command_name: command.name,
                    status,
                    execution_time_ms,
                }));
            }

            emit(BatchEvent::ServerComplete(ServerCompletePayload {
                server_id,
                server_name: server.name,
                commands_executed: total_commands,
            }));
        }

        emit(BatchEvent::Complete(CompletePayload {
            message: "All checks completed".to_string(),
            total_servers,
            total_commands,
        }));
        info!("[Batch] Completed");
        Ok(())
    }
}

/// 把输出块转成 output 事件
///
/// 块边界可能切断多字节 UTF-8 字符，未完成的尾部留到下一块
struct EventSink<'a> {
    server_id: i64,
    command_id: i64,
    events: &'a mpsc::UnboundedSender<BatchEvent>,
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
}

impl<'a> EventSink<'a> {
    fn new(
        server_id: i64,
        command_id: i64,
        events: &'a mpsc::UnboundedSender<BatchEvent>,
    ) -> Self {
        Self {
            server_id,
            command_id,
            events,
            stdout_pending: Vec::new(),
            stderr_pending: Vec::new(),
        }
    }

    fn emit(&self, data: String, stream: StreamType) {
        if data.is_empty() {
            return;
        }
        let _ = self.events.send(BatchEvent::Output(OutputPayload {
            server_id: self.server_id,
            command_id: self.command_id,
            data,
            stream,
        }));
    }

    /// 输出剩余的不完整字节
    fn flush(&mut self) {
        let stdout = String::from_utf8_lossy(&std::mem::take(&mut self.stdout_pending)).into_owned();
        self.emit(stdout, StreamType::Stdout);
        let stderr = String::from_utf8_lossy(&std::mem::take(&mut self.stderr_pending)).into_owned();
        self.emit(stderr, StreamType::Stderr);
    }
}

impl OutputSink for EventSink<'_> {
    fn on_stdout(&mut self, chunk: &[u8]) {
        let data = decode_chunk(&mut self.stdout_pending, chunk);
        self.emit(data, StreamType::Stdout);
    }

    fn on_stderr(&mut self, chunk: &[u8]) {
        let data = decode_chunk(&mut self.stderr_pending, chunk);
        self.emit(data, StreamType::Stderr);
    }
}

/// 解码 pending + chunk 中完整的部分，末尾不完整的字符留在 pending
///
/// 非法字节逐个替换为 U+FFFD，之后的内容继续按 UTF-8 解码
fn decode_chunk(pending: &mut Vec<u8>, chunk: &[u8]) -> String {
    pending.extend_from_slice(chunk);
    let mut text = String::new();
    let mut consumed = 0;
    loop {
        let rest = &pending[consumed..];
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                consumed = pending.len();
                break;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                match e.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed += valid_up_to + invalid;
                    }
                    None => {
                        consumed += valid_up_to;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..consumed);
    text
}
