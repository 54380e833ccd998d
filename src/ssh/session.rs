// SSH 会话管理
// 连接成功后的会话对象：执行命令、打开转发通道

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{ChannelMsg, Disconnect};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::SshError;
use super::forward::{ChannelOpener, ForwardStream};
use super::handler::SshClientHandler;
use crate::constants::ssh::{DISCONNECT_TIMEOUT_SECS, EXTENDED_DATA_STDERR};

/// SSH 会话（连接成功后）
/// 内部持有 Handle，支持并发打开多个通道
pub struct SshSession {
    /// 会话 ID
    id: String,
    /// 共享的 russh Handle（Arc 包装）
    handle: Arc<Handle<SshClientHandler>>,
    /// 服务器主机名
    host: String,
    /// 用户名
    username: String,
    /// 连接断开信号（Handler 断开回调或主动关闭时取消）
    closed: CancellationToken,
}

impl SshSession {
    /// 由已认证的 Handle 创建会话
    pub fn from_handle(
        handle: Arc<Handle<SshClientHandler>>,
        host: String,
        username: String,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handle,
            host,
            username,
            closed,
        }
    }

    /// 获取会话 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 获取主机名
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 获取用户名
    pub fn username(&self) -> &str {
        &self.username
    }

    /// 检查会话是否活跃
    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled() && !self.handle.is_closed()
    }

    /// 连接断开信号
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// 打开执行通道
    pub async fn open_exec(&self) -> Result<ExecChannel, SshError> {
        if !self.is_alive() {
            return Err(SshError::Disconnected(
                "Session is disconnected".to_string(),
            ));
        }

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(format!("Failed to open session channel: {}", e)))?;

        Ok(ExecChannel { channel })
    }

    /// 关闭会话
    pub async fn close(&self) {
        if self.handle.is_closed() {
            self.closed.cancel();
            return;
        }
        let disconnect = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en");
        match timeout(Duration::from_secs(DISCONNECT_TIMEOUT_SECS), disconnect).await {
            Ok(Ok(())) => debug!("[SSH] Session {} to {} closed", self.id, self.host),
            Ok(Err(e)) => debug!("[SSH] Disconnect from {} failed: {}", self.host, e),
            Err(_) => warn!("[SSH] Disconnect from {} timed out", self.host),
        }
        self.closed.cancel();
    }
}

#[async_trait]
impl ChannelOpener for SshSession {
    /// 发送 direct-tcpip 请求
    async fn open_channel(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Box<dyn ForwardStream>, SshError> {
        if !self.is_alive() {
            return Err(SshError::Disconnected(
                "Session is disconnected".to_string(),
            ));
        }

        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host,
                port as u32,
                originator.ip().to_string(),
                originator.port() as u32,
            )
            .await
            .map_err(|e| {
                SshError::Channel(format!("Failed to open channel to {}:{}: {}", host, port, e))
            })?;

        Ok(Box::new(channel.into_stream()))
    }
}

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// 命令输出接收器
///
/// 每收到一块输出就同步调用一次
pub trait OutputSink: Send {
    fn on_stdout(&mut self, chunk: &[u8]);
    fn on_stderr(&mut self, chunk: &[u8]);
}

/// 丢弃所有输出块（只需要最终结果时使用）
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_stdout(&mut self, _chunk: &[u8]) {}
    fn on_stderr(&mut self, _chunk: &[u8]) {}
}

/// 执行通道（执行单个命令）
pub struct ExecChannel {
    channel: RusshChannel,
}

impl ExecChannel {
    /// 执行命令并收集输出
    ///
    /// 命令文本原样传给远端 shell；输出块到达时先交给 sink，同时累积到返回值中。
    /// 一直读到通道关闭，退出状态可能在 EOF 之后才到达。
    pub async fn exec(
        mut self,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<CommandOutput, SshError> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(format!("Failed to execute command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit = RemoteExit::Missing;
        let mut accepted = false;

        while let Some(channel_msg) = self.channel.wait().await {
            match channel_msg {
                ChannelMsg::Success => {
                    accepted = true;
                }
                ChannelMsg::Failure if !accepted => {
                    return Err(SshError::Channel(
                        "Remote refused to execute command".to_string(),
                    ));
                }
                ChannelMsg::Data { data } => {
                    sink.on_stdout(&data);
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == EXTENDED_DATA_STDERR {
                        sink.on_stderr(&data);
                        stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit = RemoteExit::Code(exit_status);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit = RemoteExit::Signal(format!("{:?}", signal_name));
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit,
        })
    }
}

/// 远端进程的结束方式
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteExit {
    /// 正常退出并报告了退出码
    Code(u32),
    /// 被信号终止
    Signal(String),
    /// 通道关闭前没有收到退出状态
    Missing,
}

/// 命令输出
#[derive(Debug)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出状态
    pub exit: RemoteExit,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 退出码（仅在正常退出时存在）
    pub fn exit_code(&self) -> Option<u32> {
        match self.exit {
            RemoteExit::Code(code) => Some(code),
            _ => None,
        }
    }
}
