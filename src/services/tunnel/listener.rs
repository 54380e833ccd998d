// 本地监听的接收循环
// 每个接入的连接单独起一个任务，取消信号到达后停止接收并关闭监听

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::socks5;
use crate::ssh::{splice, ChannelOpener};

/// 本地转发：把每个接入连接转发到 remote_host:remote_port
pub async fn run_local_forward(
    listener: TcpListener,
    opener: Arc<dyn ChannelOpener>,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
) {
    info!(
        "[Tunnel] Local forward {:?} -> {}:{}",
        listener.local_addr().ok(),
        remote_host,
        remote_port
    );

    while let Some(stream) = accept(&listener, &cancel).await {
        let opener = opener.clone();
        let remote_host = remote_host.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    debug!("[Tunnel] Dropping connection without peer address: {}", e);
                    return;
                }
            };
            let channel = match opener.open_channel(&remote_host, remote_port, peer).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(
                        "[Tunnel] Failed to open channel to {}:{} for {}: {}",
                        remote_host, remote_port, peer, e
                    );
                    return;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {}
                result = splice(stream, channel) => {
                    if let Err(e) = result {
                        debug!("[Tunnel] Forward connection from {} ended: {}", peer, e);
                    }
                }
            }
        });
    }

    debug!("[Tunnel] Local forward listener closed");
}

/// 动态转发：每个接入连接按 SOCKS5 CONNECT 请求转发
pub async fn run_dynamic_forward(
    listener: TcpListener,
    opener: Arc<dyn ChannelOpener>,
    cancel: CancellationToken,
) {
    info!(
        "[Tunnel] SOCKS5 proxy listening on {:?}",
        listener.local_addr().ok()
    );

    while let Some(stream) = accept(&listener, &cancel).await {
        let opener = opener.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    debug!("[Tunnel] Dropping connection without peer address: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = socks5::serve_connection(stream, peer, opener.as_ref()) => {
                    if let Err(e) = result {
                        debug!("[Tunnel] SOCKS5 connection from {} closed: {}", peer, e);
                    }
                }
            }
        });
    }

    debug!("[Tunnel] SOCKS5 listener closed");
}

/// 等待下一个连接；取消后返回 None
async fn accept(listener: &TcpListener, cancel: &CancellationToken) -> Option<TcpStream> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => return Some(stream),
                Err(e) => {
                    // 文件描述符耗尽等错误是暂时的，稍后重试
                    warn!("[Tunnel] Accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            },
        }
    }
}
