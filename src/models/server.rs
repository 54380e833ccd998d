// Server 数据结构

use serde::{Deserialize, Serialize};

use crate::constants::ssh::DEFAULT_PORT;

/// 认证方式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Password,
    Key,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Key => "key",
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// 服务器数据（由资产清单提供，执行期间只读）
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    /// 密码（auth_type = password 时使用）
    #[serde(default)]
    pub password: Option<String>,
    /// 私钥内容（auth_type = key 时使用，PEM/OpenSSH 格式文本）
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            auth_type: AuthType::Password,
            password: None,
            private_key: None,
            description: None,
        }
    }
}

impl Server {
    /// `user@host:port` 形式的地址标签
    pub fn address_label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

// 手动实现 Debug，避免凭据出现在日志里
impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_type", &self.auth_type)
            .field("has_password", &self.password.is_some())
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}
