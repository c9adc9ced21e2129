//! Synchronization manager: runs a `Replica` against a live transport.
//!
//! `Session::open` attaches to the channel and spawns one task that owns
//! the replica. The task multiplexes transport signals, UI commands and the
//! replica's next timer deadline, executes the resulting effects, and
//! publishes a `SessionView` after every step.

use crate::bootstrap::{BootstrapPhase, JoinRole};
use crate::config::SessionConfig;
use crate::events::{EventBus, SessionEvent};
use crate::ids::SessionId;
use crate::model::{Issue, Participant, SessionState, VoteValue};
use crate::replica::{Command, Effect, Replica};
use crate::transport::{ChannelTransport, PresenceMember, TransportError, TransportSignal};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Snapshot of a running session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: Option<SessionState>,
    pub connected: bool,
    pub is_authority: bool,
    pub bootstrap: BootstrapPhase,
}

impl SessionView {
    fn of(replica: &Replica) -> Self {
        Self {
            state: replica.state().cloned(),
            connected: replica.connected(),
            is_authority: replica.is_authority(),
            bootstrap: replica.bootstrap_phase(),
        }
    }
}

enum Request {
    Command(Command),
    Close(oneshot::Sender<()>),
}

/// Entry point for joining a session.
pub struct Session;

impl Session {
    /// Attach to the session channel and start synchronizing.
    pub async fn open(
        transport: Arc<dyn ChannelTransport>,
        local: Participant,
        session_id: SessionId,
        role: JoinRole,
        config: &SessionConfig,
    ) -> Result<SessionHandle> {
        let signals = transport.attach().await?;
        info!(
            "Joined session {} as {} ({:?}) on {}",
            session_id,
            local.id,
            role,
            transport.channel_name()
        );

        let replica = Replica::new(session_id.clone(), local.clone(), role, config);
        let (view_tx, view_rx) = watch::channel(SessionView::of(&replica));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventBus::new());

        let driver = Driver {
            replica,
            transport,
            events: Arc::clone(&events),
            view: view_tx,
            origin: Instant::now(),
        };
        let task = tokio::spawn(driver.run(signals, request_rx));

        Ok(SessionHandle {
            session_id,
            local,
            requests: request_tx,
            view: view_rx,
            events,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Handle to a running session.
///
/// Clones share the same session. Dropping the last clone closes the
/// session in the background; call [`SessionHandle::close`] to wait for
/// presence to be left.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    local: Participant,
    requests: mpsc::UnboundedSender<Request>,
    view: watch::Receiver<SessionView>,
    events: Arc<EventBus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Latest view of the session.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> Option<SessionState> {
        self.view.borrow().state.clone()
    }

    pub fn connected(&self) -> bool {
        self.view.borrow().connected
    }

    /// Receiver that wakes on every view change.
    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Notification bus for this session.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Wait until the view satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(predicate).await.map_err(|_| SessionError::Closed)?;
        Ok(view.clone())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.requests
            .send(Request::Command(command))
            .map_err(|_| SessionError::Closed)
    }

    pub fn submit_vote(&self, value: Option<VoteValue>) -> Result<()> {
        self.send(Command::SubmitVote(value))
    }

    pub fn reveal_votes(&self) -> Result<()> {
        self.send(Command::RevealVotes)
    }

    pub fn start_voting(&self, issue: Issue) -> Result<()> {
        self.send(Command::StartVoting(issue))
    }

    pub fn reset_voting(&self) -> Result<()> {
        self.send(Command::ResetVoting)
    }

    pub fn add_issue(&self, issue: Issue) -> Result<()> {
        self.send(Command::AddIssue(issue))
    }

    pub fn select_issue(&self, issue: Issue) -> Result<()> {
        self.send(Command::SelectIssue(issue))
    }

    pub fn estimate_issue(&self, issue_id: impl Into<String>, estimate: f64) -> Result<()> {
        self.send(Command::EstimateIssue {
            issue_id: issue_id.into(),
            estimate,
        })
    }

    /// Leave presence, detach and stop the session task.
    ///
    /// Commands sent through any clone afterwards fail with `Closed`.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.requests.send(Request::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

struct Driver {
    replica: Replica,
    transport: Arc<dyn ChannelTransport>,
    events: Arc<EventBus>,
    view: watch::Sender<SessionView>,
    origin: Instant,
}

impl Driver {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn deadline(&self) -> Option<Instant> {
        self.replica
            .next_deadline()
            .map(|ms| self.origin + Duration::from_millis(ms))
    }

    async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<TransportSignal>,
        mut requests: mpsc::UnboundedReceiver<Request>,
    ) {
        let effects = self.replica.open(self.now_ms());
        self.execute(effects).await;
        self.publish_view();

        let mut signals_open = true;
        loop {
            let deadline = self.deadline();
            tokio::select! {
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => {
                        let effects = self.replica.on_signal(signal);
                        self.execute(effects).await;
                    }
                    None => {
                        warn!(
                            "Transport stopped delivering signals for {}",
                            self.replica.session_id()
                        );
                        signals_open = false;
                    }
                },

                request = requests.recv() => match request {
                    Some(Request::Command(command)) => {
                        debug!("Command: {:?}", command);
                        let effects = self.replica.on_command(command);
                        self.execute(effects).await;
                    }
                    Some(Request::Close(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        return;
                    }
                },

                _ = sleep_until(deadline) => {
                    let effects = self.replica.tick(self.now_ms());
                    self.execute(effects).await;
                }
            }
            self.publish_view();
        }
    }

    async fn shutdown(&mut self) {
        let effects = self.replica.close();
        self.execute(effects).await;
        if let Err(e) = self.transport.detach().await {
            warn!("Failed to detach from {}: {}", self.transport.channel_name(), e);
        }
        self.publish_view();
        info!("Left session {}", self.replica.session_id());
    }

    fn publish_view(&self) {
        let view = SessionView::of(&self.replica);
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Publish(msg) => {
                    let topic = msg.topic();
                    if !self.transport.state().can_publish() {
                        debug!("Channel cannot publish, dropping {}", topic);
                        self.events.emit(SessionEvent::PublishDropped {
                            topic: topic.to_string(),
                        });
                        continue;
                    }
                    let payload = match msg.to_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("{}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.transport.publish(topic, payload).await {
                        warn!("Failed to publish {}: {}", topic, e);
                        self.events.emit(SessionEvent::PublishDropped {
                            topic: topic.to_string(),
                        });
                    }
                }
                Effect::EnterPresence => {
                    let member = PresenceMember::from(self.replica.local());
                    if let Err(e) = self.transport.presence_enter(member).await {
                        warn!("Failed to enter presence: {}", e);
                    }
                }
                Effect::LeavePresence => {
                    if let Err(e) = self.transport.presence_leave().await {
                        warn!("Failed to leave presence: {}", e);
                    }
                }
                Effect::FetchPresence => match self.transport.presence_members().await {
                    Ok(members) => queue.extend(self.replica.on_presence_members(&members)),
                    Err(e) => warn!("Failed to fetch presence members: {}", e),
                },
                Effect::Notify(event) => self.events.emit(event),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
