// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod)
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现
// - client: SSH 客户端核心
// - session: SSH 会话管理 (SshSession, ExecChannel)
// - forward: 端口转发公共部分 (ChannelOpener, splice)
// - testing: 测试用的进程内 SSH 服务器

pub mod client;
pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;

// 公开导出
pub use client::SshClient;
pub use config::{AuthMethod, KeepaliveConfig, SshConfig};
pub use error::SshError;
pub use forward::{splice, ChannelOpener, ForwardStream};
pub use handler::SshClientHandler;
pub use session::{CommandOutput, ExecChannel, NullSink, OutputSink, RemoteExit, SshSession};
