//! Student host: binds the discovery endpoint and drives a [`DiscoveryAgent`] from one task.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{
    ClaimStatus, DiscoveredSession, DiscoveryAgent, Inbound, ProtocolConfig, SessionId, StudentId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::HostError;
use crate::gate::{AllowAll, PresenceGate};
use crate::transport::{
    next_tick, recv, send, Endpoint, Network, RecvError, RECV_BUF_LEN, RECV_ERROR_BACKOFF,
};

const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(1);

/// Read-only view of the agent, republished on every change.
#[derive(Debug, Clone)]
pub struct StudentStatus {
    pub discovering: bool,
    /// First-seen order.
    pub sessions: Vec<DiscoveredSession>,
    pub claim: ClaimStatus,
}

enum Command {
    Confirm {
        student_id: StudentId,
        session_id: SessionId,
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Stop,
}

/// Handle to a running discovery agent. Dropping it stops discovery.
pub struct StudentAgent {
    status: watch::Receiver<StudentStatus>,
    commands: mpsc::UnboundedSender<Command>,
    gate: Arc<dyn PresenceGate>,
    task: Option<JoinHandle<()>>,
}

impl StudentAgent {
    /// Bind the student discovery port and start listening. On bind failure nothing is running.
    pub async fn start_discovery<N: Network>(
        network: &N,
        protocol: ProtocolConfig,
    ) -> Result<Self, HostError> {
        let endpoint = network.bind(protocol.student_port).await?;
        let mut agent = DiscoveryAgent::new(protocol);
        agent.start();

        let (status_tx, status_rx) = watch::channel(snapshot(&agent));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let resources = AgentResources::acquire(endpoint);
        let task = tokio::spawn(run_agent(agent, resources, status_tx, cmd_rx));
        Ok(Self {
            status: status_rx,
            commands: cmd_tx,
            gate: Arc::new(AllowAll),
            task: Some(task),
        })
    }

    /// Check run before every claim (PIN, biometric, ...).
    pub fn with_gate(mut self, gate: impl PresenceGate + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn status(&self) -> StudentStatus {
        self.status.borrow().clone()
    }

    /// Live view for observers; receivers cannot mutate the agent.
    pub fn watch(&self) -> watch::Receiver<StudentStatus> {
        self.status.clone()
    }

    pub fn sessions(&self) -> Vec<DiscoveredSession> {
        self.status.borrow().sessions.clone()
    }

    /// Wait until a discovered session matches `pred` and return it.
    pub async fn wait_for_session(
        &self,
        mut pred: impl FnMut(&DiscoveredSession) -> bool,
    ) -> Result<DiscoveredSession, HostError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.sessions.iter().any(&mut pred))
            .await
            .map_err(|_| HostError::Stopped)?;
        status
            .sessions
            .iter()
            .find(|s| pred(*s))
            .cloned()
            .ok_or(HostError::Stopped)
    }

    /// Wait until the claim status matches `pred` and return it.
    pub async fn wait_for_claim(
        &self,
        pred: impl Fn(&ClaimStatus) -> bool,
    ) -> Result<ClaimStatus, HostError> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| pred(&s.claim))
            .await
            .map_err(|_| HostError::Stopped)?;
        Ok(status.claim.clone())
    }

    /// Run the gate, then send a presence claim for `session_id`.
    ///
    /// Returns once the claim is handed to the transport. A transport failure is not an error
    /// here: the claim status becomes `Failed` and the caller may retry.
    pub async fn confirm_presence(
        &self,
        student_id: &StudentId,
        session_id: &SessionId,
    ) -> Result<(), HostError> {
        self.gate.verify(student_id)?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Confirm {
                student_id: student_id.clone(),
                session_id: session_id.clone(),
                reply,
            })
            .map_err(|_| HostError::Stopped)?;
        rx.await.map_err(|_| HostError::Stopped)?
    }

    /// Stop discovery, close the endpoint and forget discovered sessions. Idempotent.
    pub async fn stop(&mut self) -> Result<(), HostError> {
        if let Some(task) = self.task.take() {
            let _ = self.commands.send(Command::Stop);
            task.await?;
        }
        Ok(())
    }
}

/// Endpoint plus the housekeeping timer, released together.
struct AgentResources<E: Endpoint> {
    endpoint: Option<E>,
    housekeeping: Option<Interval>,
}

impl<E: Endpoint> AgentResources<E> {
    fn acquire(endpoint: E) -> Self {
        let mut housekeeping = interval(HOUSEKEEPING_PERIOD);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            endpoint: Some(endpoint),
            housekeeping: Some(housekeeping),
        }
    }

    fn release(&mut self) {
        self.housekeeping = None;
        self.endpoint = None;
    }
}

impl<E: Endpoint> Drop for AgentResources<E> {
    fn drop(&mut self) {
        self.release();
    }
}

async fn run_agent<E: Endpoint>(
    mut agent: DiscoveryAgent,
    mut res: AgentResources<E>,
    status: watch::Sender<StudentStatus>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let clock = Clock::start();
    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        tokio::select! {
            received = recv(&res.endpoint, &mut buf) => match received {
                Ok((n, origin)) => match agent.on_datagram(&buf[..n], origin, clock.now()) {
                    Inbound::SessionDiscovered(_)
                    | Inbound::SessionRefreshed(_)
                    | Inbound::Confirmed(_) => {
                        status.send_replace(snapshot(&agent));
                    }
                    Inbound::Ignored => {}
                },
                Err(RecvError::Closed) => break,
                Err(RecvError::Io(e)) => {
                    warn!(error = %e, "receive failed");
                    sleep(RECV_ERROR_BACKOFF).await;
                }
            },
            _ = next_tick(&mut res.housekeeping) => {
                if agent.tick(clock.now()) {
                    status.send_replace(snapshot(&agent));
                }
            }
            command = commands.recv() => match command {
                Some(Command::Confirm { student_id, session_id, reply }) => {
                    let now = clock.now();
                    let result = match agent.confirm_presence_by_id(&student_id, &session_id, now) {
                        Ok(claim) => {
                            if let Err(e) = send(&res.endpoint, &claim).await {
                                warn!(%session_id, error = %e, "presence claim send failed");
                                agent.on_send_failed(&e);
                            }
                            Ok(())
                        }
                        Err(e) => Err(HostError::from(e)),
                    };
                    status.send_replace(snapshot(&agent));
                    let _ = reply.send(result);
                }
                Some(Command::Stop) => {
                    info!("stop requested");
                    break;
                }
                None => {
                    info!("discovery handle dropped");
                    break;
                }
            },
        }
    }

    agent.stop();
    res.release();
    status.send_replace(snapshot(&agent));
}

fn snapshot(agent: &DiscoveryAgent) -> StudentStatus {
    StudentStatus {
        discovering: agent.is_discovering(),
        sessions: agent.sessions().to_vec(),
        claim: agent.claim_status().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateError;
    use crate::memory::MemoryNetwork;
    use rollcall_core::{wire, Message, PresenceAck, SessionBroadcast, STUDENT_PORT};
    use std::net::{Ipv4Addr, SocketAddr};

    const LECTURER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const STUDENT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

    fn broadcast(id: &str, port: u16) -> Vec<u8> {
        wire::encode_message(&Message::SessionBroadcast(SessionBroadcast::new(
            SessionId::from(id),
            port,
            None,
        )))
        .unwrap()
    }

    fn to_students() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::BROADCAST, STUDENT_PORT))
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_broadcasts_show_one_session() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(8888).await.unwrap();
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
            .await
            .unwrap();
        for _ in 0..3 {
            lecturer.send_to(&broadcast("SES1", 8888), to_students()).await.unwrap();
        }
        let found = agent.wait_for_session(|s| s.session_id.as_str() == "SES1").await.unwrap();
        assert_eq!(found.listen_port, 8888);
        assert_eq!(found.origin_address, SocketAddr::from((LECTURER_IP, 8888)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(agent.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_is_broadcast_to_session_port_and_ack_confirms() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(40000).await.unwrap();
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
            .await
            .unwrap();
        lecturer.send_to(&broadcast("SES1", 40000), to_students()).await.unwrap();
        agent.wait_for_session(|_| true).await.unwrap();

        agent
            .confirm_presence(&StudentId::from("STU42"), &SessionId::from("SES1"))
            .await
            .unwrap();
        assert!(matches!(agent.status().claim, ClaimStatus::Pending { .. }));

        let mut buf = vec![0u8; RECV_BUF_LEN];
        let (n, from) = lecturer.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, SocketAddr::from((STUDENT_IP, STUDENT_PORT)));
        match wire::decode_message(&buf[..n]).unwrap() {
            Message::PresenceClaim(c) => assert_eq!(c.id.as_str(), "STU42"),
            other => panic!("expected claim, got {other:?}"),
        }

        let ack = wire::encode_message(&Message::PresenceAck(PresenceAck::success(
            SessionId::from("SES1"),
        )))
        .unwrap();
        lecturer.send_to(&ack, from).await.unwrap();
        let claim = agent
            .wait_for_claim(|c| matches!(c, ClaimStatus::Confirmed { .. }))
            .await
            .unwrap();
        assert!(matches!(
            claim,
            ClaimStatus::Confirmed { session_id, .. } if session_id.as_str() == "SES1"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_send_failure_sets_failed() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(8888).await.unwrap();
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
            .await
            .unwrap();
        lecturer.send_to(&broadcast("SES1", 8888), to_students()).await.unwrap();
        agent.wait_for_session(|_| true).await.unwrap();

        net.partition(STUDENT_IP);
        agent
            .confirm_presence(&StudentId::from("STU1"), &SessionId::from("SES1"))
            .await
            .unwrap();
        assert!(matches!(agent.status().claim, ClaimStatus::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_rejection_sends_nothing() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(8888).await.unwrap();
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
            .await
            .unwrap()
            .with_gate(|_: &StudentId| -> Result<(), GateError> {
                Err(GateError::Rejected("wrong PIN".into()))
            });
        lecturer.send_to(&broadcast("SES1", 8888), to_students()).await.unwrap();
        agent.wait_for_session(|_| true).await.unwrap();

        let err = agent
            .confirm_presence(&StudentId::from("STU1"), &SessionId::from("SES1"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Gate(GateError::Rejected(_))));
        assert_eq!(agent.status().claim, ClaimStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_session_is_rejected() {
        let net = MemoryNetwork::new();
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
            .await
            .unwrap();
        let err = agent
            .confirm_presence(&StudentId::from("STU1"), &SessionId::from("NOPE"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Confirm(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn bind_failure_leaves_nothing_running() {
        let net = MemoryNetwork::new();
        let host = net.host(STUDENT_IP);
        let _squatter = host.bind(STUDENT_PORT).await.unwrap();
        let err = StudentAgent::start_discovery(&host, ProtocolConfig::default())
            .await
            .err()
            .expect("port is taken");
        assert!(matches!(err, HostError::Bind(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_sessions_and_releases_port() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(8888).await.unwrap();
        let mut agent =
            StudentAgent::start_discovery(&net.host(STUDENT_IP), ProtocolConfig::default())
                .await
                .unwrap();
        lecturer.send_to(&broadcast("SES1", 8888), to_students()).await.unwrap();
        agent.wait_for_session(|_| true).await.unwrap();

        agent.stop().await.unwrap();
        agent.stop().await.unwrap();
        let status = agent.status();
        assert!(!status.discovering);
        assert!(status.sessions.is_empty());
        assert!(!net.is_bound(SocketAddr::from((STUDENT_IP, STUDENT_PORT))));
        assert!(lecturer
            .send_to(b"{}", SocketAddr::from((STUDENT_IP, STUDENT_PORT)))
            .await
            .is_err());
        assert!(matches!(
            agent
                .confirm_presence(&StudentId::from("STU1"), &SessionId::from("SES1"))
                .await,
            Err(HostError::Stopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_claim_timeout_applies() {
        let net = MemoryNetwork::new();
        let lecturer = net.host(LECTURER_IP).bind(8888).await.unwrap();
        let protocol = ProtocolConfig {
            claim_timeout: Some(Duration::from_secs(3)),
            ..ProtocolConfig::default()
        };
        let agent = StudentAgent::start_discovery(&net.host(STUDENT_IP), protocol)
            .await
            .unwrap();
        lecturer.send_to(&broadcast("SES1", 8888), to_students()).await.unwrap();
        agent.wait_for_session(|_| true).await.unwrap();
        agent
            .confirm_presence(&StudentId::from("STU1"), &SessionId::from("SES1"))
            .await
            .unwrap();
        let claim = agent
            .wait_for_claim(|c| matches!(c, ClaimStatus::TimedOut { .. }))
            .await
            .unwrap();
        assert!(matches!(claim, ClaimStatus::TimedOut { .. }));
    }
}
