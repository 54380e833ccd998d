// 最小 SOCKS5 实现
//
// 只支持：无认证、CONNECT 命令、IPv4 / 域名地址。
// 其他命令和地址类型直接关闭连接。

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::constants::tunnel::SOCKS5_HANDSHAKE_TIMEOUT_SECS;
use crate::ssh::{splice, ChannelOpener, SshError};

pub const VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const CMD_CONNECT: u8 = 0x01;
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;

/// 成功应答，绑定地址固定为 0.0.0.0:0
pub const REPLY_SUCCEEDED: [u8; 10] = [VERSION, 0x00, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
/// 一般性失败应答
pub const REPLY_GENERAL_FAILURE: [u8; 10] = [VERSION, 0x01, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];

/// 握手阶段单个报文的上限（2 + 255 个方法，或 4 + 1 + 255 + 2 字节的请求）
const MAX_FRAME: usize = 262;

#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("Unsupported SOCKS version {0}")]
    UnsupportedVersion(u8),

    #[error("Client offered no authentication methods")]
    NoMethods,

    #[error("Unsupported SOCKS command {0}")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type {0}")]
    UnsupportedAddressType(u8),

    #[error("Invalid domain name")]
    InvalidDomain,

    #[error("Handshake frame too long")]
    FrameTooLong,

    #[error("Client closed during handshake")]
    Closed,

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open forwarded channel: {0}")]
    Channel(#[from] SshError),
}

/// CONNECT 请求的目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
}

/// 解析方法协商报文
///
/// 数据不足时返回 `Ok(None)`，完整时返回报文长度
pub fn parse_greeting(buf: &[u8]) -> Result<Option<usize>, Socks5Error> {
    let Some(&version) = buf.first() else {
        return Ok(None);
    };
    if version != VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    let Some(&n_methods) = buf.get(1) else {
        return Ok(None);
    };
    if n_methods == 0 {
        return Err(Socks5Error::NoMethods);
    }
    let len = 2 + n_methods as usize;
    Ok((buf.len() >= len).then_some(len))
}

/// 解析 CONNECT 请求报文
///
/// 数据不足时返回 `Ok(None)`，完整时返回请求和报文长度
pub fn parse_connect_request(buf: &[u8]) -> Result<Option<(ConnectRequest, usize)>, Socks5Error> {
    if buf.len() < 4 {
        if let Some(&version) = buf.first() {
            if version != VERSION {
                return Err(Socks5Error::UnsupportedVersion(version));
            }
        }
        return Ok(None);
    }
    let (version, command, address_type) = (buf[0], buf[1], buf[3]);
    if version != VERSION {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    if command != CMD_CONNECT {
        return Err(Socks5Error::UnsupportedCommand(command));
    }

    let (host, port_offset) = match address_type {
        ATYP_IPV4 => {
            let Some(octets) = buf.get(4..8) else {
                return Ok(None);
            };
            let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
            (ip.to_string(), 8)
        }
        ATYP_DOMAIN => {
            let Some(&len) = buf.get(4) else {
                return Ok(None);
            };
            if len == 0 {
                return Err(Socks5Error::InvalidDomain);
            }
            let end = 5 + len as usize;
            let Some(name) = buf.get(5..end) else {
                return Ok(None);
            };
            let host = std::str::from_utf8(name)
                .map_err(|_| Socks5Error::InvalidDomain)?
                .to_string();
            (host, end)
        }
        other => return Err(Socks5Error::UnsupportedAddressType(other)),
    };

    let Some(port) = buf.get(port_offset..port_offset + 2) else {
        return Ok(None);
    };
    let port = u16::from_be_bytes([port[0], port[1]]);
    Ok(Some((ConnectRequest { host, port }, port_offset + 2)))
}

/// 读取直到 parse 得到完整报文
async fn read_frame<S, T, F>(stream: &mut S, buf: &mut Vec<u8>, parse: F) -> Result<T, Socks5Error>
where
    S: AsyncRead + Unpin,
    F: Fn(&[u8]) -> Result<Option<T>, Socks5Error>,
{
    let mut chunk = [0u8; 512];
    loop {
        if let Some(frame) = parse(buf.as_slice())? {
            return Ok(frame);
        }
        if buf.len() >= MAX_FRAME {
            return Err(Socks5Error::FrameTooLong);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Socks5Error::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// 处理一个 SOCKS5 客户端连接
///
/// 握手完成后通过 opener 打开转发通道并双向拷贝，直到任一侧关闭。
/// 出错时直接返回，调用方丢弃连接即关闭 socket。
pub async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    opener: &dyn ChannelOpener,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_with_timeout(
        stream,
        peer,
        opener,
        Duration::from_secs(SOCKS5_HANDSHAKE_TIMEOUT_SECS),
    )
    .await
}

/// 握手的每个报文必须在 `handshake_timeout` 内到齐
async fn serve_with_timeout<S>(
    mut stream: S,
    peer: SocketAddr,
    opener: &dyn ChannelOpener,
    handshake_timeout: Duration,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(64);

    let greeting_len = timeout(
        handshake_timeout,
        read_frame(&mut stream, &mut buf, parse_greeting),
    )
    .await
    .map_err(|_| Socks5Error::HandshakeTimeout(handshake_timeout))??;
    buf.drain(..greeting_len);
    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;

    let (request, request_len) = timeout(
        handshake_timeout,
        read_frame(&mut stream, &mut buf, parse_connect_request),
    )
    .await
    .map_err(|_| Socks5Error::HandshakeTimeout(handshake_timeout))??;
    buf.drain(..request_len);
    debug!(
        "[Tunnel] SOCKS5 CONNECT {}:{} from {}",
        request.host, request.port, peer
    );

    let mut channel = match opener.open_channel(&request.host, request.port, peer).await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = stream.write_all(&REPLY_GENERAL_FAILURE).await;
            return Err(e.into());
        }
    };
    stream.write_all(&REPLY_SUCCEEDED).await?;

    // 客户端可能在应答前就发出了数据
    if !buf.is_empty() {
        channel.write_all(&buf).await?;
    }

    splice(stream, channel).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tunnel::testing::DuplexOpener;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_parse_greeting() {
        assert_eq!(parse_greeting(&[]).unwrap(), None);
        assert_eq!(parse_greeting(&[5]).unwrap(), None);
        assert_eq!(parse_greeting(&[5, 2, 0]).unwrap(), None);
        assert_eq!(parse_greeting(&[5, 2, 0, 2]).unwrap(), Some(4));
        assert!(matches!(
            parse_greeting(&[4, 1, 0]),
            Err(Socks5Error::UnsupportedVersion(4))
        ));
        assert!(matches!(parse_greeting(&[5, 0]), Err(Socks5Error::NoMethods)));
    }

    #[test]
    fn test_parse_connect_ipv4() {
        let frame = [5, 1, 0, 1, 10, 0, 0, 7, 0x1f, 0x90];
        for cut in 0..frame.len() {
            assert_eq!(parse_connect_request(&frame[..cut]).unwrap(), None);
        }
        let (request, len) = parse_connect_request(&frame).unwrap().unwrap();
        assert_eq!(request.host, "10.0.0.7");
        assert_eq!(request.port, 8080);
        assert_eq!(len, 10);
    }

    #[test]
    fn test_parse_connect_domain() {
        let mut frame = vec![5, 1, 0, 3, 11];
        frame.extend_from_slice(b"db.internal");
        frame.extend_from_slice(&5432u16.to_be_bytes());
        frame.extend_from_slice(b"extra");

        let (request, len) = parse_connect_request(&frame).unwrap().unwrap();
        assert_eq!(
            request,
            ConnectRequest {
                host: "db.internal".to_string(),
                port: 5432
            }
        );
        assert_eq!(len, frame.len() - 5);
        assert_eq!(parse_connect_request(&frame[..8]).unwrap(), None);
    }

    #[test]
    fn test_parse_connect_rejects_unsupported() {
        assert!(matches!(
            parse_connect_request(&[5, 2, 0, 1, 1, 2, 3, 4, 0, 80]),
            Err(Socks5Error::UnsupportedCommand(2))
        ));
        assert!(matches!(
            parse_connect_request(&[5, 3, 0, 1]),
            Err(Socks5Error::UnsupportedCommand(3))
        ));
        assert!(matches!(
            parse_connect_request(&[5, 1, 0, 4, 0, 0]),
            Err(Socks5Error::UnsupportedAddressType(4))
        ));
        assert!(matches!(
            parse_connect_request(&[5, 1, 0, 3, 0, 0, 80]),
            Err(Socks5Error::InvalidDomain)
        ));
    }

    #[tokio::test]
    async fn test_serve_connection_relays_after_success_reply() {
        let (opener, mut remote_ends) = DuplexOpener::new();
        let (mut client, server_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move { serve_connection(server_side, peer(), &opener).await });

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [5, 0]);

        // 请求后紧跟着的数据也要转发出去
        let mut request = vec![5, 1, 0, 3, 9];
        request.extend_from_slice(b"host.test");
        request.extend_from_slice(&443u16.to_be_bytes());
        request.extend_from_slice(b"early");
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, REPLY_SUCCEEDED);

        let (host, port, mut remote) = remote_ends.recv().await.unwrap();
        assert_eq!((host.as_str(), port), ("host.test", 443));
        let mut early = [0u8; 5];
        remote.read_exact(&mut early).await.unwrap();
        assert_eq!(&early, b"early");

        remote.write_all(b"pong").await.unwrap();
        let mut pong = [0u8; 4];
        client.read_exact(&mut pong).await.unwrap();
        assert_eq!(&pong, b"pong");

        drop(client);
        drop(remote);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_connection_reports_open_failure() {
        let (opener, _remote_ends) = DuplexOpener::new();
        let opener = opener.refusing("10.9.9.9");
        let (mut client, server_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            let result = serve_connection(server_side, peer(), &opener).await;
            (result, opener.refused.lock().await.clone())
        });

        client
            .write_all(&[5, 1, 0, 5, 1, 0, 1, 10, 9, 9, 9, 0, 22])
            .await
            .unwrap();
        let mut reply = [0u8; 12];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..2], &[5u8, 0]);
        assert_eq!(&reply[2..], &REPLY_GENERAL_FAILURE);

        let (result, refused) = task.await.unwrap();
        assert!(matches!(result, Err(Socks5Error::Channel(_))));
        assert_eq!(refused, vec![("10.9.9.9".to_string(), 22)]);
    }

    #[tokio::test]
    async fn test_serve_connection_closes_on_bind_command() {
        let (opener, _remote_ends) = DuplexOpener::new();
        let (mut client, server_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move { serve_connection(server_side, peer(), &opener).await });

        client
            .write_all(&[5, 1, 0, 5, 2, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(Socks5Error::UnsupportedCommand(2))));

        // 方法应答之后连接直接关闭，没有 CONNECT 应答
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![5, 0]);
    }

    #[tokio::test]
    async fn test_silent_client_times_out() {
        let (opener, _remote_ends) = DuplexOpener::new();
        let limit = Duration::from_millis(100);

        // 连接后什么都不发
        let (_client, server_side) = tokio::io::duplex(1024);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_with_timeout(server_side, peer(), &opener, limit),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Socks5Error::HandshakeTimeout(d)) if d == limit));

        // 完成方法协商后不发 CONNECT 请求
        let (mut client, server_side) = tokio::io::duplex(1024);
        client.write_all(&[5, 1, 0]).await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_with_timeout(server_side, peer(), &opener, limit),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Socks5Error::HandshakeTimeout(_))));
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [5, 0]);
    }
}
