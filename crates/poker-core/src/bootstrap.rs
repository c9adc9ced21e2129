//! Snapshot bootstrap for late joiners.
//!
//! There is no snapshot store, so a client without state asks the channel:
//! 1. On join, broadcast `request-state`
//! 2. Retransmit at each configured retry delay while no snapshot has arrived
//! 3. If the fallback window passes, self-initialize as the authority
//! 4. If fallback is disabled and the join timeout passes, report a timeout
//!
//! The tracker is driven by the caller: call `tick()` when `next_deadline()`
//! is reached and act on the returned actions. It never touches the clock
//! or the network itself.

use crate::config::{BootstrapConfig, SessionConfig};
use serde::Serialize;
use std::collections::VecDeque;

/// How this client entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRole {
    /// Opened a new session; self-initializes after `creator_fallback_after_ms`.
    Creator,
    /// Joined an existing session; self-initializes after `fallback_after_ms`.
    Participant,
}

/// Where the first state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BootstrapSource {
    /// A peer's snapshot arrived.
    Snapshot,
    /// Nobody answered; we created the state ourselves.
    SelfInitialized,
}

/// Current phase of the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// `start()` not called yet
    Idle,
    /// Requested state, waiting for an answer
    Waiting,
    /// State acquired
    Complete(BootstrapSource),
    /// Join timeout elapsed with fallback disabled; still accepts a late snapshot
    TimedOut,
}

/// Action the caller must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapAction {
    /// Broadcast `request-state`
    RequestState,
    /// Create a fresh state with ourselves as authority and broadcast it
    SelfInitialize,
    /// Surface the "waiting for host" timeout
    TimedOut,
}

/// Tracks retransmission and fallback deadlines for one join.
pub struct BootstrapTracker {
    config: BootstrapConfig,
    role: JoinRole,
    join_timeout_ms: u64,
    phase: BootstrapPhase,
    /// Absolute retry deadlines (milliseconds), earliest first
    retries: VecDeque<u64>,
    fallback_at: Option<u64>,
    timeout_at: Option<u64>,
}

impl BootstrapTracker {
    pub fn new(config: &SessionConfig, role: JoinRole) -> Self {
        Self {
            config: config.bootstrap.clone(),
            role,
            join_timeout_ms: config.join_timeout_ms,
            phase: BootstrapPhase::Idle,
            retries: VecDeque::new(),
            fallback_at: None,
            timeout_at: None,
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, BootstrapPhase::Complete(_))
    }

    /// Begin waiting for a snapshot.
    ///
    /// Returns the initial `RequestState` plus anything already due (a
    /// creator with zero fallback delay self-initializes right away).
    pub fn start(&mut self, now_ms: u64) -> Vec<BootstrapAction> {
        if self.is_complete() {
            return Vec::new();
        }

        self.phase = BootstrapPhase::Waiting;

        let mut delays = self.config.retry_delays_ms.clone();
        delays.sort_unstable();
        self.retries = delays.into_iter().map(|d| now_ms + d).collect();

        let fallback = match self.role {
            JoinRole::Creator => Some(self.config.creator_fallback_after_ms),
            JoinRole::Participant => self.config.fallback_after_ms,
        };
        self.fallback_at = fallback.map(|d| now_ms + d);
        self.timeout_at = match self.fallback_at {
            Some(_) => None,
            None => Some(now_ms + self.join_timeout_ms),
        };

        let mut actions = vec![BootstrapAction::RequestState];
        actions.extend(self.tick(now_ms));
        actions
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        if self.phase != BootstrapPhase::Waiting {
            return None;
        }
        [self.retries.front().copied(), self.fallback_at, self.timeout_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Fire every deadline at or before `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Vec<BootstrapAction> {
        if self.phase != BootstrapPhase::Waiting {
            return Vec::new();
        }

        if self.fallback_at.is_some_and(|t| now_ms >= t) {
            self.complete(BootstrapSource::SelfInitialized);
            return vec![BootstrapAction::SelfInitialize];
        }

        let mut actions = Vec::new();

        let mut retry_due = false;
        while self.retries.front().is_some_and(|t| now_ms >= *t) {
            self.retries.pop_front();
            retry_due = true;
        }
        if retry_due {
            actions.push(BootstrapAction::RequestState);
        }

        if self.timeout_at.is_some_and(|t| now_ms >= t) {
            self.phase = BootstrapPhase::TimedOut;
            self.clear_deadlines();
            actions.push(BootstrapAction::TimedOut);
        }

        actions
    }

    /// Record that state was acquired and drop all pending deadlines.
    pub fn complete(&mut self, source: BootstrapSource) {
        self.phase = BootstrapPhase::Complete(source);
        self.clear_deadlines();
    }

    /// Drop pending deadlines without completing (session teardown).
    pub fn cancel(&mut self) {
        self.clear_deadlines();
        if self.phase == BootstrapPhase::Waiting {
            self.phase = BootstrapPhase::Idle;
        }
    }

    fn clear_deadlines(&mut self) {
        self.retries.clear();
        self.fallback_at = None;
        self.timeout_at = None;
    }
}
