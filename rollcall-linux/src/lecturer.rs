//! Lecturer host: binds the session endpoint and drives a [`SessionManager`] from one task.
//!
//! The task selects over inbound datagrams, the broadcast timer, the countdown timer and the
//! command channel. Endpoint and both timers live in [`SessionResources`] and are released
//! together on every exit path (end command, countdown expiry, handle dropped, task aborted).

use std::time::Duration;

use rollcall_core::{
    Countdown, Health, PresenceRecord, ProtocolConfig, SessionConfig, SessionId,
    SessionManager, SessionState,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::HostError;
use crate::transport::{
    next_tick, recv, send, Endpoint, Network, RecvError, RECV_BUF_LEN, RECV_ERROR_BACKOFF,
};

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
/// Floor for the broadcast period; `interval` rejects zero.
const MIN_BROADCAST_PERIOD: Duration = Duration::from_millis(1);

/// Read-only view of a running session, republished on every change.
#[derive(Debug, Clone)]
pub struct LecturerStatus {
    pub session_id: SessionId,
    pub label: Option<String>,
    pub state: SessionState,
    pub listen_port: u16,
    pub remaining_secs: Option<u32>,
    pub health: Health,
    pub last_send_error: Option<String>,
    /// Acceptance order.
    pub roster: Vec<PresenceRecord>,
}

enum Command {
    End,
}

/// Handle to a running session. Dropping it ends the session.
pub struct LecturerSession {
    session_id: SessionId,
    status: watch::Receiver<LecturerStatus>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<Vec<PresenceRecord>>>,
    final_roster: Option<Vec<PresenceRecord>>,
}

impl LecturerSession {
    /// Bind the lecturer endpoint and start broadcasting. Bind failures are returned, not retried.
    pub async fn start<N: Network>(
        network: &N,
        protocol: ProtocolConfig,
        config: SessionConfig,
    ) -> Result<Self, HostError> {
        let endpoint = network.bind(protocol.lecturer_port).await?;
        let mut manager = SessionManager::new(config, protocol.clone());
        manager.start(endpoint.local_port())?;
        let session_id = manager.id().clone();

        let resources = SessionResources::acquire(
            endpoint,
            protocol.broadcast_interval,
            manager.remaining_secs().is_some(),
        );
        let (status_tx, status_rx) = watch::channel(snapshot(&manager, None));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(manager, resources, status_tx, cmd_rx));

        Ok(Self {
            session_id,
            status: status_rx,
            commands: cmd_tx,
            task: Some(task),
            final_roster: None,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current snapshot.
    pub fn status(&self) -> LecturerStatus {
        self.status.borrow().clone()
    }

    /// Live view for observers; receivers cannot mutate the session.
    pub fn watch(&self) -> watch::Receiver<LecturerStatus> {
        self.status.clone()
    }

    /// Resolve once the session has ended (countdown expiry or [`end`](Self::end)).
    pub async fn ended(&self) {
        let mut rx = self.status.clone();
        // Sender gone means the loop already exited.
        let _ = rx.wait_for(|s| s.state == SessionState::Ended).await;
    }

    /// End the session and hand off the roster. Idempotent: later calls return the same roster.
    pub async fn end(&mut self) -> Result<Vec<PresenceRecord>, HostError> {
        if let Some(task) = self.task.take() {
            let _ = self.commands.send(Command::End);
            self.final_roster = Some(task.await?);
        }
        Ok(self.final_roster.clone().unwrap_or_default())
    }
}

/// Endpoint plus the two session timers, acquired and released as one unit.
struct SessionResources<E: Endpoint> {
    endpoint: Option<E>,
    broadcast_timer: Option<Interval>,
    countdown_timer: Option<Interval>,
}

impl<E: Endpoint> SessionResources<E> {
    fn acquire(endpoint: E, broadcast_every: Duration, countdown: bool) -> Self {
        let mut broadcast = interval(broadcast_every.max(MIN_BROADCAST_PERIOD));
        broadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let countdown_timer = countdown.then(|| {
            let mut t = interval_at(Instant::now() + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);
            t.set_missed_tick_behavior(MissedTickBehavior::Burst);
            t
        });
        Self {
            endpoint: Some(endpoint),
            broadcast_timer: Some(broadcast),
            countdown_timer,
        }
    }

    /// Clear both timers and close the endpoint. Safe to call more than once.
    fn release(&mut self) {
        self.broadcast_timer = None;
        self.countdown_timer = None;
        if let Some(endpoint) = self.endpoint.take() {
            debug!(port = endpoint.local_port(), "closing session endpoint");
        }
    }
}

impl<E: Endpoint> Drop for SessionResources<E> {
    fn drop(&mut self) {
        self.release();
    }
}

async fn run_session<E: Endpoint>(
    mut manager: SessionManager,
    mut res: SessionResources<E>,
    status: watch::Sender<LecturerStatus>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Vec<PresenceRecord> {
    let clock = Clock::start();
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let mut last_send_error: Option<String> = None;

    loop {
        tokio::select! {
            _ = next_tick(&mut res.broadcast_timer) => {
                let Some(out) = manager.broadcast() else { continue };
                let sent = send(&res.endpoint, &out).await;
                let was = (manager.health(), last_send_error.clone());
                let health = manager.record_broadcast_result(sent.is_ok());
                last_send_error = match sent {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(session_id = %manager.id(), error = %e, "session broadcast failed");
                        Some(e.to_string())
                    }
                };
                if (health, last_send_error.clone()) != was || last_send_error.is_some() {
                    status.send_replace(snapshot(&manager, last_send_error.clone()));
                }
            }
            _ = next_tick(&mut res.countdown_timer) => {
                match manager.countdown_tick() {
                    Countdown::Expired => break,
                    Countdown::Remaining(_) => {
                        status.send_replace(snapshot(&manager, last_send_error.clone()));
                    }
                    Countdown::Unbounded | Countdown::Inactive => {}
                }
            }
            received = recv(&res.endpoint, &mut buf) => {
                match received {
                    Ok((n, origin)) => {
                        let before = manager.roster().len();
                        let mut ack_failed = false;
                        if let Some(ack) = manager.on_datagram(&buf[..n], origin, clock.now()) {
                            if let Err(e) = send(&res.endpoint, &ack).await {
                                warn!(session_id = %manager.id(), error = %e, "ack send failed");
                                last_send_error = Some(e.to_string());
                                ack_failed = true;
                            }
                        }
                        if ack_failed || manager.roster().len() != before {
                            status.send_replace(snapshot(&manager, last_send_error.clone()));
                        }
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Io(e)) => {
                        warn!(session_id = %manager.id(), error = %e, "receive failed");
                        sleep(RECV_ERROR_BACKOFF).await;
                    }
                }
            }
            command = commands.recv() => match command {
                Some(Command::End) => {
                    info!(session_id = %manager.id(), "end requested");
                    break;
                }
                None => {
                    info!(session_id = %manager.id(), "session handle dropped");
                    break;
                }
            },
        }
    }

    manager.end();
    res.release();
    status.send_replace(snapshot(&manager, last_send_error));
    manager.into_roster()
}

fn snapshot(manager: &SessionManager, last_send_error: Option<String>) -> LecturerStatus {
    LecturerStatus {
        session_id: manager.id().clone(),
        label: manager.label().map(str::to_owned),
        state: manager.state(),
        listen_port: manager.listen_port().unwrap_or_default(),
        remaining_secs: manager.remaining_secs(),
        health: manager.health(),
        last_send_error,
        roster: manager.roster().records().to_vec(),
    }
}
