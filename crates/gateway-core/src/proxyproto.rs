//! Optional PROXY protocol v1/v2 header peel ahead of
//! [`crate::conn::WrappedConn`] construction, gated by the
//! `GATEWAY_PROXY_PROTOCOL` setting the binary reads at startup. Connections
//! not carrying a header are left completely untouched — not even one byte
//! is consumed past the signature check.

use std::net::{IpAddr, SocketAddr};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const V2_SIGNATURE: [u8; 12] = [0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A];

#[derive(Debug, Clone, Copy)]
pub struct ProxiedAddr {
    pub source: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyProtoError {
    #[error("io_error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed_frame: malformed PROXY protocol header")]
    Malformed,
}

/// Peeks the leading bytes to decide whether a PROXY header is present,
/// then consumes exactly that header if so.
pub async fn peel(stream: &mut TcpStream) -> Result<Option<ProxiedAddr>, ProxyProtoError> {
    let mut probe = [0u8; 12];
    let n = stream.peek(&mut probe).await?;
    if n >= 5 && &probe[..5] == b"PROXY" {
        return peel_v1(stream).await.map(Some);
    }
    if n == 12 && probe == V2_SIGNATURE {
        return peel_v2(stream).await.map(Some);
    }
    Ok(None)
}

async fn peel_v1(stream: &mut TcpStream) -> Result<ProxiedAddr, ProxyProtoError> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        if line.len() > 107 {
            return Err(ProxyProtoError::Malformed);
        }
        stream.read_exact(&mut byte).await?;
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
    }
    let text = std::str::from_utf8(&line).map_err(|_| ProxyProtoError::Malformed)?;
    let parts: Vec<&str> = text.trim_end().split(' ').collect();
    if parts.len() < 6 {
        return Err(ProxyProtoError::Malformed);
    }
    let ip: IpAddr = parts[2].parse().map_err(|_| ProxyProtoError::Malformed)?;
    let port: u16 = parts[4].parse().map_err(|_| ProxyProtoError::Malformed)?;
    Ok(ProxiedAddr { source: SocketAddr::new(ip, port) })
}

async fn peel_v2(stream: &mut TcpStream) -> Result<ProxiedAddr, ProxyProtoError> {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).await?;
    let ver_cmd = header[12];
    if ver_cmd >> 4 != 2 {
        return Err(ProxyProtoError::Malformed);
    }
    let fam = header[13];
    let len = usize::from(u16::from_be_bytes([header[14], header[15]]));
    let mut addr_block = vec![0u8; len];
    stream.read_exact(&mut addr_block).await?;

    match fam >> 4 {
        1 => {
            if addr_block.len() < 12 {
                return Err(ProxyProtoError::Malformed);
            }
            let ip = IpAddr::from([addr_block[0], addr_block[1], addr_block[2], addr_block[3]]);
            let port = u16::from_be_bytes([addr_block[8], addr_block[9]]);
            Ok(ProxiedAddr { source: SocketAddr::new(ip, port) })
        }
        2 => {
            if addr_block.len() < 36 {
                return Err(ProxyProtoError::Malformed);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&addr_block[0..16]);
            let ip = IpAddr::from(octets);
            let port = u16::from_be_bytes([addr_block[32], addr_block[33]]);
            Ok(ProxiedAddr { source: SocketAddr::new(ip, port) })
        }
        _ => Err(ProxyProtoError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn v1_header_is_peeled_and_bytes_after_it_survive() {
        let (mut server, mut client) = pair().await;
        client.write_all(b"PROXY TCP4 10.0.0.1 10.0.0.2 1234 5678\r\n\x78\x78").await.unwrap();
        let proxied = peel(&mut server).await.unwrap().expect("v1 header detected");
        assert_eq!(proxied.source.to_string(), "10.0.0.1:1234");
        let mut rest = [0u8; 2];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0x78, 0x78]);
    }

    #[tokio::test]
    async fn absent_header_leaves_stream_untouched() {
        let (mut server, mut client) = pair().await;
        client.write_all(&[0x78, 0x78]).await.unwrap();
        let proxied = peel(&mut server).await.unwrap();
        assert!(proxied.is_none());
        let mut rest = [0u8; 2];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0x78, 0x78]);
    }
}
