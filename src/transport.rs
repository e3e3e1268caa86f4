//! 데이터그램 전송 계층 추상화
//!
//! 송신자/수신자는 이 트레이트만 알고, 실제 소켓이나 결함 주입 래퍼는 바깥에서 넣는다.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// 비신뢰 데이터그램 전송
///
/// 손실/중복/순서 뒤바뀜이 모두 가능하다고 가정한다.
#[async_trait]
pub trait Transport: Send + Sync {
    /// 데이터그램 하나 전송
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// 데이터그램 하나 수신
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// 로컬 바인드 주소
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        (**self).recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

/// 피어 주소 계열에 맞는 임시 포트 바인드 주소
pub fn ephemeral_bind_addr(peer: SocketAddr) -> SocketAddr {
    if peer.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}

/// 호스트 이름 해석, 주소 계열과 관계없이 첫 번째 주소 사용
pub async fn resolve_peer(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("주소를 찾을 수 없음: {}", host),
            )
        })
}
