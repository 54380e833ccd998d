// SSH 连接配置

use std::time::Duration;

use crate::constants::ssh::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_KEEPALIVE_INTERVAL_SECS, DEFAULT_PORT,
};
use crate::models::{AuthType, ConnectionSettings, Server};

/// SSH 连接配置
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证方式
    pub auth: AuthMethod,
    /// 连接超时（秒），覆盖 TCP 连接、握手和认证全过程
    pub connect_timeout: u64,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            auth: AuthMethod::Missing(AuthType::Password),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// 认证方式
///
/// 密码与私钥互斥；所选方式没有凭据时为 `Missing`，在连接时报认证错误
#[derive(Clone)]
pub enum AuthMethod {
    /// 密码认证
    Password(String),
    /// 公钥认证（私钥内容，而不是路径）
    PrivateKey(String),
    /// 所选认证方式未配置凭据
    Missing(AuthType),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::PrivateKey(_) => f.write_str("PrivateKey(***)"),
            Self::Missing(kind) => write!(f, "Missing({})", kind.as_str()),
        }
    }
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大未响应次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_KEEPALIVE_INTERVAL_SECS,
            max_retries: 3,
        }
    }
}

impl SshConfig {
    /// 从 Server 构建连接配置
    pub fn from_server(server: &Server, settings: &ConnectionSettings) -> Self {
        let auth = match server.auth_type {
            AuthType::Password => match non_empty(&server.password) {
                Some(password) => AuthMethod::Password(password),
                None => AuthMethod::Missing(AuthType::Password),
            },
            AuthType::Key => match non_empty(&server.private_key) {
                Some(key) => AuthMethod::PrivateKey(key),
                None => AuthMethod::Missing(AuthType::Key),
            },
        };

        let keepalive = KeepaliveConfig {
            enabled: settings.keepalive_interval_secs > 0,
            interval: settings.keepalive_interval_secs as u64,
            max_retries: settings.keepalive_max,
        };

        Self {
            host: server.host.clone(),
            port: if server.port == 0 { DEFAULT_PORT } else { server.port },
            username: server.username.clone(),
            auth,
            connect_timeout: settings.connection_timeout_secs as u64,
            keepalive,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 隧道是长连接，不能用 inactivity_timeout 断开空闲会话
        config.inactivity_timeout = None;
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
