// 隧道管理模块
//
// 模块结构:
// - manager: 活跃隧道注册表 (TunnelManager)
// - launcher: 为隧道建立 SSH 连接与监听 (TunnelLauncher, SshTunnelLauncher)
// - listener: 本地转发 / 动态转发的接收循环
// - socks5: 仅支持 CONNECT 的最小 SOCKS5 实现

pub mod launcher;
pub mod listener;
pub mod manager;
pub mod socks5;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::TunnelType;
use crate::ssh::SshError;

pub use launcher::{LaunchedTunnel, SshTunnelLauncher, TunnelLauncher};
pub use manager::TunnelManager;

/// 隧道错误
#[derive(Debug, Error)]
pub enum TunnelError {
    /// 隧道配置不合法
    #[error("Invalid tunnel configuration: {0}")]
    Invalid(String),

    /// 本地端口监听失败
    #[error("Failed to listen on 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// SSH 连接失败
    #[error("SSH connection failed: {0}")]
    Ssh(#[from] SshError),

    /// 远端拒绝 tcpip-forward 请求
    #[error("Remote port forwarding on port {port} rejected: {reason}")]
    ForwardRejected { port: u16, reason: String },
}

/// 隧道操作结果（对外返回，不抛出错误）
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TunnelOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// 隧道运行状态
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TunnelStatus {
    pub tunnel_id: i64,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_type: Option<TunnelType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl TunnelStatus {
    pub fn inactive(tunnel_id: i64) -> Self {
        Self {
            tunnel_id,
            active: false,
            tunnel_type: None,
            local_port: None,
            remote_host: None,
            remote_port: None,
            started_at: None,
        }
    }
}
