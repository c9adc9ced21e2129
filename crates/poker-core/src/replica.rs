//! Replica: the deterministic core of the synchronization manager.
//!
//! A `Replica` owns one client's view of a session. It consumes transport
//! signals, UI commands and clock ticks, and returns `Effect`s for the
//! caller to execute. It performs no I/O and reads no clock.
//!
//! Consistency discipline:
//! - Events are applied locally when they arrive (including our own echoes)
//! - The authority re-broadcasts a full snapshot after every state change
//! - Any snapshot replaces local state wholesale (last snapshot wins)

use crate::authority::{self, SnapshotOrigin};
use crate::bootstrap::{
    BootstrapAction, BootstrapPhase, BootstrapSource, BootstrapTracker, JoinRole,
};
use crate::config::SessionConfig;
use crate::events::SessionEvent;
use crate::ids::SessionId;
use crate::membership::MembershipBridge;
use crate::model::{Issue, Participant, SessionState, Vote, VoteValue};
use crate::protocol::{StateRequest, WireMessage};
use crate::reducer::{self, Event};
use crate::transport::{ChannelMessage, ConnectionState, PresenceMember, TransportSignal};
use tracing::{debug, info, warn};

/// UI command surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SubmitVote(Option<VoteValue>),
    RevealVotes,
    StartVoting(Issue),
    ResetVoting,
    AddIssue(Issue),
    SelectIssue(Issue),
    EstimateIssue { issue_id: String, estimate: f64 },
}

/// Side effect requested by the replica.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish on the session channel (dropped if the channel cannot publish)
    Publish(WireMessage),
    /// Enter presence with our participant metadata
    EnterPresence,
    /// Leave presence
    LeavePresence,
    /// Fetch current presence members and feed them to `on_presence_members`
    FetchPresence,
    /// Surface a notification
    Notify(SessionEvent),
}

pub struct Replica {
    session_id: SessionId,
    local: Participant,
    state: Option<SessionState>,
    connected: bool,
    bootstrap: BootstrapTracker,
    membership: MembershipBridge,
}

impl Replica {
    pub fn new(
        session_id: SessionId,
        local: Participant,
        role: JoinRole,
        config: &SessionConfig,
    ) -> Self {
        let membership = MembershipBridge::new(local.id.clone());
        Self {
            session_id,
            local,
            state: None,
            connected: false,
            bootstrap: BootstrapTracker::new(config, role),
            membership,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn is_authority(&self) -> bool {
        authority::should_broadcast(self.state.as_ref(), &self.local.id)
    }

    pub fn bootstrap_phase(&self) -> BootstrapPhase {
        self.bootstrap.phase()
    }

    /// Next time `tick()` has work to do.
    pub fn next_deadline(&self) -> Option<u64> {
        self.bootstrap.next_deadline()
    }

    /// Start the session after the channel attached.
    pub fn open(&mut self, now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.connected {
            self.connected = true;
            effects.push(Effect::Notify(SessionEvent::ConnectionChanged { connected: true }));
        }
        effects.push(Effect::EnterPresence);
        effects.push(Effect::FetchPresence);

        let actions = self.bootstrap.start(now_ms);
        self.run_bootstrap_actions(actions, &mut effects);
        effects
    }

    /// Tear down: stop bootstrap timers and leave presence.
    pub fn close(&mut self) -> Vec<Effect> {
        self.bootstrap.cancel();
        let mut effects = vec![Effect::LeavePresence];
        if self.connected {
            self.connected = false;
            effects.push(Effect::Notify(SessionEvent::ConnectionChanged { connected: false }));
        }
        effects
    }

    /// Fire due bootstrap deadlines.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Effect> {
        let mut effects = Vec::new();
        let actions = self.bootstrap.tick(now_ms);
        self.run_bootstrap_actions(actions, &mut effects);
        effects
    }

    /// Replay the members already present when we attached.
    pub fn on_presence_members(&mut self, members: &[PresenceMember]) -> Vec<Effect> {
        self.membership
            .replay(members)
            .into_iter()
            .map(|event| Effect::Publish(WireMessage::Event(event)))
            .collect()
    }

    /// Handle one inbound transport signal.
    pub fn on_signal(&mut self, signal: TransportSignal) -> Vec<Effect> {
        match signal {
            TransportSignal::Message(msg) => self.on_message(msg),
            TransportSignal::PresenceEnter(member) => self
                .membership
                .on_enter(&member)
                .map(|event| vec![Effect::Publish(WireMessage::Event(event))])
                .unwrap_or_default(),
            TransportSignal::PresenceLeave(member) => self
                .membership
                .on_leave(&member)
                .map(|event| vec![Effect::Publish(WireMessage::Event(event))])
                .unwrap_or_default(),
            TransportSignal::ConnectionChanged(state) => self.on_connection_changed(state),
        }
    }

    /// Translate a UI command into outbound events.
    ///
    /// Commands never mutate local state directly. Our own publishes are
    /// applied when the transport echoes them back.
    pub fn on_command(&mut self, command: Command) -> Vec<Effect> {
        let event = match command {
            Command::SubmitVote(value) => {
                if self.state.is_none() {
                    debug!("Dropping vote: no session state yet");
                    return Vec::new();
                }
                Event::VoteSubmitted {
                    vote: Vote::cast(&self.local, value),
                }
            }
            Command::RevealVotes => {
                let Some(state) = &self.state else {
                    debug!("Dropping reveal: no session state yet");
                    return Vec::new();
                };
                let votes = state
                    .votes
                    .iter()
                    .cloned()
                    .map(|mut v| {
                        v.revealed = true;
                        v
                    })
                    .collect();
                Event::VotesRevealed { votes }
            }
            Command::StartVoting(issue) => Event::VotingStarted { issue },
            Command::ResetVoting => Event::VotingReset,
            Command::AddIssue(issue) => Event::IssueAdded { issue },
            Command::SelectIssue(issue) => Event::IssueSelected { issue },
            Command::EstimateIssue { issue_id, estimate } => {
                Event::IssueEstimated { issue_id, estimate }
            }
        };
        vec![Effect::Publish(WireMessage::Event(event))]
    }

    fn on_message(&mut self, msg: ChannelMessage) -> Vec<Effect> {
        let decoded = match WireMessage::decode(&msg.topic, &msg.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Ignoring message from {}: {}", msg.client_id, e);
                return Vec::new();
            }
        };

        let mut effects = vec![Effect::Notify(SessionEvent::MessageReceived {
            topic: msg.topic,
        })];
        match decoded {
            WireMessage::Snapshot(snapshot) => self.on_snapshot(snapshot, &mut effects),
            WireMessage::Event(event) => self.on_event(event, &mut effects),
            WireMessage::RequestState(request) => self.on_state_request(request, &mut effects),
        }
        effects
    }

    fn on_snapshot(&mut self, snapshot: SessionState, effects: &mut Vec<Effect>) {
        if snapshot.session_id != self.session_id {
            warn!(
                "Ignoring snapshot for session {} on channel for {}",
                snapshot.session_id, self.session_id
            );
            return;
        }

        if let SnapshotOrigin::Conflict { local, remote } =
            authority::classify_snapshot(self.state.as_ref(), &snapshot)
        {
            warn!(
                "Competing authority for session {}: had {}, adopting snapshot from {}",
                self.session_id, local, remote
            );
            effects.push(Effect::Notify(SessionEvent::AuthorityConflict { local, remote }));
        }

        if !self.bootstrap.is_complete() {
            self.bootstrap.complete(BootstrapSource::Snapshot);
            info!(
                "Received session state for {} from authority {}",
                self.session_id, snapshot.authority_id
            );
            effects.push(Effect::Notify(SessionEvent::BootstrapCompleted {
                source: BootstrapSource::Snapshot,
            }));
        }

        let missing_self = !snapshot.has_participant(&self.local.id);
        let changed = self.state.as_ref() != Some(&snapshot);
        self.state = Some(snapshot);
        if changed {
            effects.push(Effect::Notify(SessionEvent::StateChanged));
        }

        if missing_self {
            // The join may have been announced before this authority had state.
            debug!("Snapshot lacks {}, announcing ourselves", self.local.id);
            effects.push(Effect::Publish(WireMessage::Event(Event::ParticipantJoined {
                participant: self.local.clone(),
            })));
        }
    }

    fn on_event(&mut self, event: Event, effects: &mut Vec<Effect>) {
        if reducer::needs_bootstrap(self.state.as_ref(), &event) {
            debug!("{} before any state, requesting state", event.kind());
            effects.push(Effect::Publish(WireMessage::request_state(
                self.local.id.clone(),
            )));
            return;
        }

        let Some(next) = reducer::reduce(self.state.as_ref(), &event) else {
            debug!("Dropping {}: no session state yet", event.kind());
            return;
        };

        if self.state.as_ref() == Some(&next) {
            return;
        }

        self.state = Some(next);
        effects.push(Effect::Notify(SessionEvent::StateChanged));

        if self.is_authority() {
            if let Some(state) = &self.state {
                effects.push(Effect::Publish(WireMessage::Snapshot(state.clone())));
            }
        }
    }

    fn on_state_request(&mut self, request: StateRequest, effects: &mut Vec<Effect>) {
        if !self.is_authority() {
            return;
        }
        if let Some(state) = &self.state {
            debug!("Answering state request from {}", request.participant_id);
            effects.push(Effect::Publish(WireMessage::Snapshot(state.clone())));
        }
    }

    fn on_connection_changed(&mut self, state: ConnectionState) -> Vec<Effect> {
        let connected = state.is_connected();
        if connected == self.connected {
            return Vec::new();
        }
        self.connected = connected;
        info!("Session {} connection state: {:?}", self.session_id, state);

        let mut effects = vec![Effect::Notify(SessionEvent::ConnectionChanged { connected })];
        if connected {
            // Presence does not survive a dropped connection.
            effects.push(Effect::EnterPresence);
            effects.push(Effect::FetchPresence);
        } else {
            self.membership.reset();
        }
        effects
    }

    fn run_bootstrap_actions(&mut self, actions: Vec<BootstrapAction>, effects: &mut Vec<Effect>) {
        for action in actions {
            match action {
                BootstrapAction::RequestState => {
                    debug!("Requesting state for session {}", self.session_id);
                    effects.push(Effect::Publish(WireMessage::request_state(
                        self.local.id.clone(),
                    )));
                }
                BootstrapAction::SelfInitialize => {
                    if self.state.is_some() {
                        continue;
                    }
                    info!(
                        "No state received for session {}, initializing as authority",
                        self.session_id
                    );
                    let state = SessionState::new(self.session_id.clone(), self.local.clone());
                    self.state = Some(state.clone());
                    effects.push(Effect::Notify(SessionEvent::BootstrapCompleted {
                        source: BootstrapSource::SelfInitialized,
                    }));
                    effects.push(Effect::Notify(SessionEvent::StateChanged));
                    effects.push(Effect::Publish(WireMessage::Snapshot(state)));
                }
                BootstrapAction::TimedOut => {
                    warn!("Timed out waiting for a host for session {}", self.session_id);
                    effects.push(Effect::Notify(SessionEvent::JoinTimedOut));
                }
            }
        }
    }
}
