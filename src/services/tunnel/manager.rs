// 隧道管理器
// 进程内的活跃隧道注册表 (Tunnel ID -> ActiveTunnel)，进程退出即全部停止

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::launcher::{LaunchedTunnel, SshTunnelLauncher, TunnelLauncher};
use super::{TunnelError, TunnelOutcome, TunnelStatus};
use crate::constants::ssh::DISCONNECT_TIMEOUT_SECS;
use crate::models::{ConnectionSettings, Server, Tunnel};

/// 注册表中的一条活跃隧道
struct ActiveTunnel {
    tunnel: Tunnel,
    /// 每次启动递增，用于识别异常退出的是不是当前这一次启动
    generation: u64,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    launched: LaunchedTunnel,
}

impl ActiveTunnel {
    fn status(&self) -> TunnelStatus {
        TunnelStatus {
            tunnel_id: self.tunnel.id,
            active: true,
            tunnel_type: Some(self.tunnel.tunnel_type),
            local_port: Some(self.tunnel.local_port),
            remote_host: Some(self.tunnel.remote_host.clone()),
            remote_port: Some(self.tunnel.remote_port),
            started_at: Some(self.started_at),
        }
    }

    /// 停止转发、关闭监听和 SSH 连接
    async fn shutdown(self) {
        self.cancel.cancel();

        // 等待监听任务退出，保证返回时本地端口已释放
        let mut task = self.launched.task;
        if timeout(Duration::from_secs(DISCONNECT_TIMEOUT_SECS), &mut task)
            .await
            .is_err()
        {
            warn!("[Tunnel] Tunnel {} task did not stop, aborting", self.tunnel.id);
            task.abort();
        }

        if let Some(session) = self.launched.session {
            session.close().await;
        }
        debug!("[Tunnel] Tunnel {} resources released", self.tunnel.id);
    }
}

/// 隧道管理器
#[derive(Clone)]
pub struct TunnelManager {
    launcher: Arc<dyn TunnelLauncher>,
    tunnels: Arc<Mutex<HashMap<i64, ActiveTunnel>>>,
    next_generation: Arc<AtomicU64>,
}

impl TunnelManager {
    pub fn new(launcher: Arc<dyn TunnelLauncher>) -> Self {
        Self {
            launcher,
            tunnels: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 使用 SSH 启动器
    pub fn with_ssh(settings: ConnectionSettings) -> Self {
        Self::new(Arc::new(SshTunnelLauncher::new(settings)))
    }

    /// 启动隧道；同一 ID 已在运行时先停止旧的
    pub async fn start(&self, server: &Server, tunnel: &Tunnel) -> TunnelOutcome {
        match self.try_start(server, tunnel).await {
            Ok(()) => {
                info!(
                    "[Tunnel] Tunnel {} ({}) started on {}",
                    tunnel.id,
                    tunnel.tunnel_type.as_str(),
                    server.address_label()
                );
                TunnelOutcome::ok()
            }
            Err(e) => {
                warn!("[Tunnel] Failed to start tunnel {}: {}", tunnel.id, e);
                TunnelOutcome::failed(e.to_string())
            }
        }
    }

    async fn try_start(&self, server: &Server, tunnel: &Tunnel) -> Result<(), TunnelError> {
        tunnel.validate().map_err(TunnelError::Invalid)?;
        if tunnel.server_id != server.id {
            return Err(TunnelError::Invalid(format!(
                "tunnel {} belongs to server {}, not {}",
                tunnel.id, tunnel.server_id, server.id
            )));
        }

        // 不在持锁期间做网络操作：先摘下旧条目再关闭
        let previous = self.tunnels.lock().await.remove(&tunnel.id);
        if let Some(previous) = previous {
            info!("[Tunnel] Replacing running tunnel {}", tunnel.id);
            previous.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let launched = self.launcher.launch(server, tunnel, cancel.clone()).await?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let closed = launched.closed.clone();
        let entry = ActiveTunnel {
            tunnel: tunnel.clone(),
            generation,
            started_at: Utc::now(),
            cancel: cancel.clone(),
            launched,
        };

        // 并发启动同一 ID 时，后注册的替换先注册的
        let displaced = self.tunnels.lock().await.insert(tunnel.id, entry);
        if let Some(displaced) = displaced {
            displaced.shutdown().await;
        }

        self.watch_connection(tunnel.id, generation, closed, cancel);
        Ok(())
    }

    /// 连接异常断开时把自己从注册表中移除
    fn watch_connection(
        &self,
        tunnel_id: i64,
        generation: u64,
        closed: CancellationToken,
        cancel: CancellationToken,
    ) {
        let tunnels = self.tunnels.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = closed.cancelled() => {}
            }

            let entry = {
                let mut tunnels = tunnels.lock().await;
                match tunnels.get(&tunnel_id) {
                    Some(entry) if entry.generation == generation => tunnels.remove(&tunnel_id),
                    _ => None,
                }
            };
            if let Some(entry) = entry {
                warn!(
                    "[Tunnel] Tunnel {} connection lost, removed from registry",
                    tunnel_id
                );
                entry.shutdown().await;
            }
        });
    }

    /// 停止隧道；未知 ID 直接返回成功
    pub async fn stop(&self, tunnel_id: i64) -> TunnelOutcome {
        let entry = self.tunnels.lock().await.remove(&tunnel_id);
        match entry {
            Some(entry) => {
                entry.shutdown().await;
                info!("[Tunnel] Tunnel {} stopped", tunnel_id);
            }
            None => debug!("[Tunnel] Tunnel {} is not running", tunnel_id),
        }
        TunnelOutcome::ok()
    }

    pub async fn is_active(&self, tunnel_id: i64) -> bool {
        self.tunnels.lock().await.contains_key(&tunnel_id)
    }

    pub async fn status(&self, tunnel_id: i64) -> TunnelStatus {
        self.tunnels
            .lock()
            .await
            .get(&tunnel_id)
            .map(ActiveTunnel::status)
            .unwrap_or_else(|| TunnelStatus::inactive(tunnel_id))
    }

    /// 所有活跃隧道的状态，按 ID 排序
    pub async fn list_active(&self) -> Vec<TunnelStatus> {
        let mut statuses: Vec<TunnelStatus> = self
            .tunnels
            .lock()
            .await
            .values()
            .map(ActiveTunnel::status)
            .collect();
        statuses.sort_by_key(|s| s.tunnel_id);
        statuses
    }

    /// 停止所有隧道（进程退出时调用）
    pub async fn stop_all(&self) {
        let entries: Vec<ActiveTunnel> = {
            let mut tunnels = self.tunnels.lock().await;
            tunnels.drain().map(|(_, entry)| entry).collect()
        };
        if entries.is_empty() {
            return;
        }
        info!("[Tunnel] Stopping {} tunnel(s)", entries.len());
        futures::future::join_all(entries.into_iter().map(ActiveTunnel::shutdown)).await;
    }
}
