// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use std::future::Future;

use russh::client::{DisconnectReason, Msg, Session};
use russh::keys::PublicKey;
use russh::Channel;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::forward::splice;
use crate::constants::tunnel::LOOPBACK_HOST;

/// SSH 客户端 Handler
/// 处理主机密钥、远程转发入站连接和断开回调
pub struct SshClientHandler {
    /// 服务器主机名（用于日志）
    host: String,
    /// 远程转发的本地目标端口；None 表示拒绝所有 forwarded-tcpip 通道
    remote_forward_target: Option<u16>,
    /// 连接断开时取消
    closed: CancellationToken,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String) -> Self {
        Self {
            host,
            remote_forward_target: None,
            closed: CancellationToken::new(),
        }
    }

    /// 远端转发进来的连接交给 127.0.0.1:local_port
    pub fn with_remote_forward(mut self, local_port: u16) -> Self {
        self.remote_forward_target = Some(local_port);
        self
    }

    /// 连接断开信号
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 目前接受所有公钥，只记录指纹
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        debug!(
            "[SSH] {} server key {} fingerprint: {}",
            self.host,
            server_public_key.algorithm(),
            fingerprint
        );

        async { Ok(true) }
    }

    /// 远端监听端口上有新连接
    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let target = self.remote_forward_target;
        let closed = self.closed.clone();
        debug!(
            "[SSH] {} forwarded connection {}:{} from {}:{}",
            self.host, connected_address, connected_port, originator_address, originator_port
        );

        async move {
            let Some(local_port) = target else {
                warn!("[SSH] Unexpected forwarded-tcpip channel, closing");
                let _ = channel.close().await;
                return Ok(());
            };

            // 不能在回调里做长时间拷贝，否则会阻塞会话的消息处理
            tokio::spawn(async move {
                match TcpStream::connect((LOOPBACK_HOST, local_port)).await {
                    Ok(stream) => {
                        tokio::select! {
                            _ = closed.cancelled() => {}
                            result = splice(channel.into_stream(), stream) => {
                                if let Err(e) = result {
                                    debug!("[SSH] Remote forward connection ended: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "[SSH] Failed to connect to local target {}:{}: {}",
                            LOOPBACK_HOST, local_port, e
                        );
                        let _ = channel.close().await;
                    }
                }
            });
            Ok(())
        }
    }

    /// 连接断开（正常或异常）
    fn disconnected(
        &mut self,
        reason: DisconnectReason<Self::Error>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.closed.cancel();
        let host = self.host.clone();
        async move {
            match reason {
                DisconnectReason::ReceivedDisconnect(info) => {
                    info!("[SSH] {} disconnected by peer: {:?}", host, info);
                    Ok(())
                }
                DisconnectReason::Error(e) => {
                    warn!("[SSH] {} connection lost: {}", host, e);
                    Err(e)
                }
            }
        }
    }
}
