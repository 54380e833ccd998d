// 端口转发公共部分
//
// - ForwardStream: 被转发的双向字节流（SSH 转发通道或任意 TCP 流）
// - ChannelOpener: 打开一条到 host:port 的转发通道
// - splice: 双向拷贝，直到任一侧关闭或出错

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::error::SshError;

/// 可转发的双向字节流
pub trait ForwardStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ForwardStream for T {}

/// 转发通道打开器
///
/// SSH 会话的实现发送 direct-tcpip 请求；测试中可以换成内存管道
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open_channel(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<Box<dyn ForwardStream>, SshError>;
}

/// 双向拷贝两个字节流，结束后关闭两端
///
/// 返回 (a -> b 字节数, b -> a 字节数)
pub async fn splice<A, B>(mut a: A, mut b: B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let result = tokio::io::copy_bidirectional(&mut a, &mut b).await;
    let _ = a.shutdown().await;
    let _ = b.shutdown().await;
    if let Ok((a_to_b, b_to_a)) = &result {
        trace!("[Forward] Splice finished: {} bytes out, {} bytes in", a_to_b, b_to_a);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_splice_copies_both_directions() {
        let (mut client, client_side) = tokio::io::duplex(1024);
        let (remote_side, mut remote) = tokio::io::duplex(1024);

        let task = tokio::spawn(splice(client_side, remote_side));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);
        drop(remote);
        let (out, back) = task.await.unwrap().unwrap();
        assert_eq!(out, 4);
        assert_eq!(back, 5);
    }

    #[tokio::test]
    async fn test_splice_propagates_close() {
        let (client, client_side) = tokio::io::duplex(64);
        let (remote_side, mut remote) = tokio::io::duplex(64);
        let task = tokio::spawn(splice(client_side, remote_side));

        // 客户端关闭后，远端读到 EOF
        drop(client);
        let mut rest = Vec::new();
        remote.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        drop(remote);
        task.await.unwrap().unwrap();
    }
}
