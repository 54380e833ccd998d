// 隧道启动器
// 为每条隧道建立独立的 SSH 连接，再按类型启动本地监听或请求远端监听

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::listener::{run_dynamic_forward, run_local_forward};
use super::TunnelError;
use crate::constants::tunnel::{HEALTH_CHECK_INTERVAL_SECS, LOOPBACK_HOST, REMOTE_BIND_ALL};
use crate::models::{ConnectionSettings, Server, Tunnel, TunnelType};
use crate::ssh::{ChannelOpener, SshClient, SshClientHandler, SshConfig, SshSession};

/// 启动成功的隧道资源
pub struct LaunchedTunnel {
    /// 转发任务（监听循环或远程转发的守护任务），取消信号到达后结束
    pub task: JoinHandle<()>,
    /// 底层连接断开时取消
    pub closed: CancellationToken,
    /// 隧道独占的 SSH 会话
    pub session: Option<Arc<SshSession>>,
}

/// 隧道启动能力（TunnelManager 依赖此 trait，便于替换）
#[async_trait]
pub trait TunnelLauncher: Send + Sync {
    /// 建立隧道；失败时不得遗留任何连接或监听
    async fn launch(
        &self,
        server: &Server,
        tunnel: &Tunnel,
        cancel: CancellationToken,
    ) -> Result<LaunchedTunnel, TunnelError>;
}

/// 基于 SSH 的隧道启动器
#[derive(Clone, Debug, Default)]
pub struct SshTunnelLauncher {
    settings: ConnectionSettings,
}

impl SshTunnelLauncher {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn client(&self, server: &Server) -> SshClient {
        SshClient::new(SshConfig::from_server(server, &self.settings))
    }

    /// 本地转发 / 动态转发：先连 SSH，再监听 127.0.0.1:local_port
    async fn launch_listener(
        &self,
        server: &Server,
        tunnel: &Tunnel,
        cancel: CancellationToken,
    ) -> Result<LaunchedTunnel, TunnelError> {
        let session = Arc::new(self.client(server).open_session().await?);

        let listener = match TcpListener::bind((LOOPBACK_HOST, tunnel.local_port)).await {
            Ok(listener) => listener,
            Err(source) => {
                session.close().await;
                return Err(TunnelError::Bind {
                    port: tunnel.local_port,
                    source,
                });
            }
        };

        let opener: Arc<dyn ChannelOpener> = session.clone();
        let task = match tunnel.tunnel_type {
            TunnelType::Dynamic => {
                tokio::spawn(run_dynamic_forward(listener, opener, cancel.clone()))
            }
            _ => tokio::spawn(run_local_forward(
                listener,
                opener,
                tunnel.remote_host.clone(),
                tunnel.remote_port,
                cancel.clone(),
            )),
        };

        spawn_health_check(session.clone(), cancel);
        Ok(LaunchedTunnel {
            task,
            closed: session.closed_token(),
            session: Some(session),
        })
    }

    /// 远程转发：请求远端在 0.0.0.0:remote_port 监听，入站连接转到 127.0.0.1:local_port
    async fn launch_remote(
        &self,
        server: &Server,
        tunnel: &Tunnel,
        cancel: CancellationToken,
    ) -> Result<LaunchedTunnel, TunnelError> {
        let client = self.client(server);
        let handler =
            SshClientHandler::new(server.host.clone()).with_remote_forward(tunnel.local_port);
        let closed = handler.closed_token();

        let mut handle = client.connect(handler).await?;
        // 全局请求需要 &mut Handle，必须在共享之前发出
        let request = handle.tcpip_forward(REMOTE_BIND_ALL, tunnel.remote_port as u32);
        let rejected = match timeout(client.config().connect_timeout(), request).await {
            Ok(Ok(_)) => None,
            Ok(Err(russh::Error::RequestDenied)) => {
                Some("port in use or denied by server policy".to_string())
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("request timed out".to_string()),
        };

        let session = Arc::new(SshSession::from_handle(
            Arc::new(handle),
            server.host.clone(),
            server.username.clone(),
            closed.clone(),
        ));

        if let Some(reason) = rejected {
            session.close().await;
            return Err(TunnelError::ForwardRejected {
                port: tunnel.remote_port,
                reason,
            });
        }
        info!(
            "[Tunnel] Remote forward {}:{} -> {}:{}",
            server.host, tunnel.remote_port, LOOPBACK_HOST, tunnel.local_port
        );

        let watch_cancel = cancel.clone();
        let watch_closed = closed.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = watch_cancel.cancelled() => {}
                _ = watch_closed.cancelled() => {}
            }
        });

        spawn_health_check(session.clone(), cancel);
        Ok(LaunchedTunnel {
            task,
            closed,
            session: Some(session),
        })
    }
}

#[async_trait]
impl TunnelLauncher for SshTunnelLauncher {
    async fn launch(
        &self,
        server: &Server,
        tunnel: &Tunnel,
        cancel: CancellationToken,
    ) -> Result<LaunchedTunnel, TunnelError> {
        debug!(
            "[Tunnel] Launching {} tunnel {} via {}",
            tunnel.tunnel_type.as_str(),
            tunnel.id,
            server.address_label()
        );
        match tunnel.tunnel_type {
            TunnelType::Local | TunnelType::Dynamic => {
                self.launch_listener(server, tunnel, cancel).await
            }
            TunnelType::Remote => self.launch_remote(server, tunnel, cancel).await,
        }
    }
}

/// 定期检查连接；Handle 已关闭但没有收到断开回调时补发断开信号
fn spawn_health_check(session: Arc<SshSession>, cancel: CancellationToken) {
    let closed = session.closed_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = closed.cancelled() => break,
                _ = interval.tick() => {
                    if !session.is_alive() {
                        warn!("[Tunnel] SSH connection to {} lost", session.host());
                        closed.cancel();
                        break;
                    }
                }
            }
        }
    });
}
