// 隧道配置数据模型

use serde::{Deserialize, Serialize};

/// 隧道类型
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    /// 本地监听端口，经 SSH 转发到远端网络
    Local,
    /// 远端监听端口，经 SSH 转发回本地
    Remote,
    /// 本地 SOCKS5 代理（仅 CONNECT）
    Dynamic,
}

impl TunnelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Dynamic => "dynamic",
        }
    }
}

/// 隧道配置（持久化的只有配置，运行状态只存在于 TunnelManager）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tunnel {
    pub id: i64,
    pub server_id: i64,
    pub tunnel_type: TunnelType,
    pub local_port: u16,
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
}

impl Tunnel {
    /// 校验该类型所需的字段
    pub fn validate(&self) -> Result<(), String> {
        match self.tunnel_type {
            TunnelType::Local => {
                if self.remote_host.trim().is_empty() {
                    return Err("remote_host is required for a local tunnel".to_string());
                }
                if self.remote_port == 0 {
                    return Err("remote_port must be > 0".to_string());
                }
            }
            TunnelType::Remote => {
                if self.remote_port == 0 {
                    return Err("remote_port must be > 0".to_string());
                }
                if self.local_port == 0 {
                    return Err("local_port must be > 0".to_string());
                }
            }
            TunnelType::Dynamic => {}
        }
        Ok(())
    }
}
