//! Transport binding: bind / send / receive / close over unreliable datagrams.
//!
//! `Network` acquires endpoints; dropping an `Endpoint` closes it. Two bindings ship here:
//! [`UdpNetwork`] (connectionless LAN datagrams with broadcast enabled) and
//! [`MemoryNetwork`](crate::memory::MemoryNetwork) (in-process link layer). A short-range radio
//! binding implements the same two traits.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use rollcall_core::Outbound;
use tokio::net::UdpSocket;
use tokio::time::Interval;

/// Receive buffer size; larger than any valid datagram.
pub const RECV_BUF_LEN: usize = 65536;

/// Pause after a receive I/O error before polling the endpoint again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Endpoint factory for one device.
pub trait Network: Clone + Send + Sync + 'static {
    type Endpoint: Endpoint;

    /// Bind a listening endpoint on `port` (0: any free port).
    fn bind(&self, port: u16) -> impl Future<Output = Result<Self::Endpoint, BindError>> + Send;
}

/// Bound datagram endpoint. Close by dropping.
pub trait Endpoint: Send + Sync + 'static {
    /// Port actually bound.
    fn local_port(&self) -> u16;

    fn send_to(
        &self,
        payload: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Wait for the next datagram. Returns length and source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), RecvError>> + Send;
}

/// Endpoint acquisition failed (e.g. port in use). Not retried.
#[derive(Debug, thiserror::Error)]
#[error("bind port {port}: {source}")]
pub struct BindError {
    pub port: u16,
    #[source]
    pub source: io::Error,
}

/// Transient send failure. The next tick or user action may succeed.
#[derive(Debug, thiserror::Error)]
#[error("send to {dest}: {source}")]
pub struct SendError {
    pub dest: SocketAddr,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error("endpoint closed")]
    Closed,
    #[error("receive: {0}")]
    Io(#[from] io::Error),
}

/// UDP over IPv4 with `SO_BROADCAST` set.
#[derive(Debug, Clone, Copy)]
pub struct UdpNetwork {
    bind_ip: Ipv4Addr,
}

impl UdpNetwork {
    pub fn new(bind_ip: Ipv4Addr) -> Self {
        Self { bind_ip }
    }
}

impl Default for UdpNetwork {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED)
    }
}

impl Network for UdpNetwork {
    type Endpoint = UdpEndpoint;

    async fn bind(&self, port: u16) -> Result<UdpEndpoint, BindError> {
        let addr = SocketAddrV4::new(self.bind_ip, port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| BindError { port, source })?;
        socket
            .set_broadcast(true)
            .map_err(|source| BindError { port, source })?;
        let local_port = socket
            .local_addr()
            .map_err(|source| BindError { port, source })?
            .port();
        Ok(UdpEndpoint { socket, local_port })
    }
}

pub struct UdpEndpoint {
    socket: UdpSocket,
    local_port: u16,
}

impl Endpoint for UdpEndpoint {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<(), SendError> {
        self.socket
            .send_to(payload, dest)
            .await
            .map(|_| ())
            .map_err(|source| SendError { dest, source })
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), RecvError> {
        Ok(self.socket.recv_from(buf).await?)
    }
}

/// Next tick of an armed timer; never resolves once the timer is cleared.
pub(crate) async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub(crate) async fn recv<E: Endpoint>(
    endpoint: &Option<E>,
    buf: &mut [u8],
) -> Result<(usize, SocketAddr), RecvError> {
    match endpoint {
        Some(ep) => ep.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn send<E: Endpoint>(
    endpoint: &Option<E>,
    out: &Outbound,
) -> Result<(), SendError> {
    match endpoint {
        Some(ep) => ep.send_to(&out.payload, out.dest).await,
        None => Err(SendError {
            dest: out.dest,
            source: io::Error::new(io::ErrorKind::NotConnected, "endpoint closed"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_loopback_send_and_receive() {
        let net = UdpNetwork::new(Ipv4Addr::LOCALHOST);
        let a = net.bind(0).await.unwrap();
        let b = net.bind(0).await.unwrap();
        assert_ne!(a.local_port(), 0);
        let dest = SocketAddr::from((Ipv4Addr::LOCALHOST, b.local_port()));
        a.send_to(b"hello", dest).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from.port(), a.local_port());
    }

    #[tokio::test]
    async fn udp_bind_conflict_is_bind_error() {
        let net = UdpNetwork::new(Ipv4Addr::LOCALHOST);
        let a = net.bind(0).await.unwrap();
        let err = match net.bind(a.local_port()).await {
            Err(e) => e,
            Ok(_) => panic!("second bind on the same port should fail"),
        };
        assert_eq!(err.port, a.local_port());
        assert_eq!(err.source.kind(), io::ErrorKind::AddrInUse);
    }
}
