//! In-process link layer: each host has an IPv4 address, endpoints register `(ip, port)`, and
//! datagrams to `255.255.255.255:port` fan out to every endpoint bound on that port.
//!
//! Used by tests and demos to run both roles in one process without touching the real network.
//! Hosts can be partitioned to make their sends fail.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::transport::{BindError, Endpoint, Network, RecvError, SendError};

const EPHEMERAL_START: u16 = 49152;

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Default)]
struct Registry {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    partitioned: HashSet<Ipv4Addr>,
    next_ephemeral: u16,
}

/// Shared medium for any number of [`MemoryHost`]s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<Registry>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device attached to this network at `ip`.
    pub fn host(&self, ip: Ipv4Addr) -> MemoryHost {
        MemoryHost {
            network: self.clone(),
            ip,
        }
    }

    /// Make every send from `ip` fail until [`heal`](Self::heal).
    pub fn partition(&self, ip: Ipv4Addr) {
        self.registry().partitioned.insert(ip);
    }

    pub fn heal(&self, ip: Ipv4Addr) {
        self.registry().partitioned.remove(&ip);
    }

    /// Whether an endpoint is bound at `addr`.
    pub fn is_bound(&self, addr: SocketAddr) -> bool {
        self.registry().endpoints.contains_key(&addr)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Every mutation is a single insert/remove, so a poisoned registry is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bind_at(&self, ip: Ipv4Addr, port: u16) -> Result<MemoryEndpoint, BindError> {
        let mut reg = self.registry();
        let port = if port == 0 {
            allocate_ephemeral(&mut reg, ip).ok_or_else(|| BindError {
                port,
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no free ports"),
            })?
        } else {
            port
        };
        let local = SocketAddr::from((ip, port));
        if reg.endpoints.contains_key(&local) {
            return Err(BindError {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        reg.endpoints.insert(local, tx);
        Ok(MemoryEndpoint {
            network: self.clone(),
            local,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn deliver(&self, from: SocketAddr, payload: &[u8], dest: SocketAddr) -> Result<(), SendError> {
        let reg = self.registry();
        if let SocketAddr::V4(v4) = from {
            if reg.partitioned.contains(v4.ip()) {
                return Err(SendError {
                    dest,
                    source: io::Error::new(io::ErrorKind::NetworkUnreachable, "host partitioned"),
                });
            }
        }
        if dest.ip() == Ipv4Addr::BROADCAST {
            // Broadcast: best effort, no listeners is not an error.
            for (addr, tx) in reg.endpoints.iter() {
                if addr.port() == dest.port() {
                    let _ = tx.send((payload.to_vec(), from));
                }
            }
            return Ok(());
        }
        match reg.endpoints.get(&dest) {
            Some(tx) if tx.send((payload.to_vec(), from)).is_ok() => Ok(()),
            _ => Err(SendError {
                dest,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "no endpoint bound"),
            }),
        }
    }

    fn unbind(&self, local: SocketAddr) {
        self.registry().endpoints.remove(&local);
    }
}

fn allocate_ephemeral(reg: &mut Registry, ip: Ipv4Addr) -> Option<u16> {
    let span = u32::from(u16::MAX - EPHEMERAL_START) + 1;
    for _ in 0..span {
        let candidate = reg.next_ephemeral.max(EPHEMERAL_START);
        reg.next_ephemeral = candidate.checked_add(1).unwrap_or(EPHEMERAL_START);
        if !reg.endpoints.contains_key(&SocketAddr::from((ip, candidate))) {
            return Some(candidate);
        }
    }
    None
}

/// One device on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryHost {
    network: MemoryNetwork,
    ip: Ipv4Addr,
}

impl MemoryHost {
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }
}

impl Network for MemoryHost {
    type Endpoint = MemoryEndpoint;

    async fn bind(&self, port: u16) -> Result<MemoryEndpoint, BindError> {
        self.network.bind_at(self.ip, port)
    }
}

pub struct MemoryEndpoint {
    network: MemoryNetwork,
    local: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Endpoint for MemoryEndpoint {
    fn local_port(&self) -> u16 {
        self.local.port()
    }

    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<(), SendError> {
        self.network.deliver(self.local, payload, dest)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), RecvError> {
        let (payload, from) = self.rx.lock().await.recv().await.ok_or(RecvError::Closed)?;
        // Truncate like a datagram socket.
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, from))
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.network.unbind(self.local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const C: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    #[tokio::test]
    async fn unicast_between_hosts() {
        let net = MemoryNetwork::new();
        let a = net.host(A).bind(5000).await.unwrap();
        let b = net.host(B).bind(6000).await.unwrap();
        a.send_to(b"ping", b.local_addr()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, SocketAddr::from((A, 5000)));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_endpoint_on_port() {
        let net = MemoryNetwork::new();
        let sender = net.host(A).bind(0).await.unwrap();
        let b = net.host(B).bind(8887).await.unwrap();
        let c = net.host(C).bind(8887).await.unwrap();
        let other = net.host(C).bind(9999).await.unwrap();
        sender
            .send_to(b"hi", SocketAddr::from((Ipv4Addr::BROADCAST, 8887)))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(b.recv_from(&mut buf).await.unwrap().0, 2);
        assert_eq!(c.recv_from(&mut buf).await.unwrap().0, 2);
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(20), other.recv_from(&mut buf))
                .await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn bind_conflict_and_release_on_drop() {
        let net = MemoryNetwork::new();
        let host = net.host(A);
        let first = host.bind(8888).await.unwrap();
        let err = match host.bind(8888).await {
            Err(e) => e,
            Ok(_) => panic!("expected bind conflict"),
        };
        assert_eq!(err.source.kind(), io::ErrorKind::AddrInUse);
        // Same port on another host is fine.
        let _other = net.host(B).bind(8888).await.unwrap();
        drop(first);
        assert!(!net.is_bound(SocketAddr::from((A, 8888))));
        assert!(host.bind(8888).await.is_ok());
    }

    #[tokio::test]
    async fn send_to_closed_endpoint_fails() {
        let net = MemoryNetwork::new();
        let a = net.host(A).bind(0).await.unwrap();
        let b = net.host(B).bind(7000).await.unwrap();
        let dest = b.local_addr();
        drop(b);
        let err = a.send_to(b"late", dest).await.unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn partitioned_host_cannot_send() {
        let net = MemoryNetwork::new();
        let host = net.host(A);
        let a = host.bind(0).await.unwrap();
        let _b = net.host(B).bind(7000).await.unwrap();
        let dest = SocketAddr::from((B, 7000));
        net.partition(host.ip());
        let err = a.send_to(b"x", dest).await.unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NetworkUnreachable);
        net.heal(host.ip());
        assert!(a.send_to(b"x", dest).await.is_ok());
    }

    #[tokio::test]
    async fn ephemeral_ports_are_unique() {
        let net = MemoryNetwork::new();
        let host = net.host(A);
        let a = host.bind(0).await.unwrap();
        let b = host.bind(0).await.unwrap();
        assert_ne!(a.local_port(), b.local_port());
        assert!(a.local_port() >= EPHEMERAL_START);
    }
}
