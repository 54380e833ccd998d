// SSH 客户端核心实现

use std::net::SocketAddr;
use std::sync::Arc;

use russh::client::{AuthResult, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::handler::SshClientHandler;
use super::session::SshSession;
use crate::models::AuthType;

/// SSH 客户端
/// 负责建立 SSH 连接并返回 SshSession
pub struct SshClient {
    /// 连接配置
    config: SshConfig,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// 建立连接并认证，返回会话
    pub async fn open_session(&self) -> Result<SshSession, SshError> {
        let handler = SshClientHandler::new(self.config.host.clone());
        let closed = handler.closed_token();
        let handle = self.connect(handler).await?;
        Ok(SshSession::from_handle(
            Arc::new(handle),
            self.config.host.clone(),
            self.config.username.clone(),
            closed,
        ))
    }

    /// 建立连接并认证，返回原始 Handle
    ///
    /// 调用方需要在 Handle 被共享前发起全局请求（如 tcpip-forward）时使用
    pub async fn connect(
        &self,
        handler: SshClientHandler,
    ) -> Result<Handle<SshClientHandler>, SshError> {
        debug!(
            "[SSH] Connecting to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        // 超时覆盖 TCP 连接、握手和认证全过程
        timeout(self.config.connect_timeout(), self.establish(handler))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
    }

    async fn establish(
        &self,
        handler: SshClientHandler,
    ) -> Result<Handle<SshClientHandler>, SshError> {
        let socket_addr = self.resolve().await?;

        let tcp_stream = TcpStream::connect(socket_addr).await?;
        debug!("[SSH] TCP connection established to {}", socket_addr);

        let russh_config = Arc::new(self.config.to_russh_config());
        let mut handle = russh::client::connect_stream(russh_config, tcp_stream, handler)
            .await
            .map_err(SshError::from)?;
        debug!("[SSH] Handshake completed with {}", self.config.host);

        self.authenticate(&mut handle).await?;
        info!(
            "[SSH] Authenticated as '{}' on {}",
            self.config.username, self.config.host
        );

        Ok(handle)
    }

    /// 解析地址（非阻塞）
    async fn resolve(&self) -> Result<SocketAddr, SshError> {
        lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| SshError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::Config("No valid address found".to_string()))
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        let (auth_result, method) = match &self.config.auth {
            AuthMethod::Password(password) => {
                debug!("[SSH] Using password authentication");
                let result = handle
                    .authenticate_password(&self.config.username, password)
                    .await
                    .map_err(SshError::from)?;
                (result, "Password")
            }
            AuthMethod::PrivateKey(key_data) => {
                debug!("[SSH] Using public key authentication");
                let key = russh::keys::decode_secret_key(key_data, None)
                    .map_err(|e| SshError::Key(format!("Failed to decode key: {}", e)))?;

                // RSA 密钥需要协商签名哈希算法
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(SshError::from)?
                    .flatten();
                let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

                let result = handle
                    .authenticate_publickey(&self.config.username, key_with_alg)
                    .await
                    .map_err(SshError::from)?;
                (result, "Public key")
            }
            AuthMethod::Missing(AuthType::Password) => {
                return Err(SshError::Auth(
                    "No password configured for password authentication".to_string(),
                ));
            }
            AuthMethod::Missing(AuthType::Key) => {
                return Err(SshError::Auth(
                    "No private key configured for key authentication".to_string(),
                ));
            }
        };

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(SshError::Auth(format!(
                    "{} authentication failed. Server suggests: {:?}",
                    method, remaining_methods
                )))
            }
        }
    }
}
