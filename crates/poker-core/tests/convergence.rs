//! Multi-client sessions over the in-process hub.
//!
//! Every test runs on paused tokio time, so bootstrap timers fire as soon
//! as all tasks are idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use poker_core::{
    BootstrapPhase, BootstrapSource, ChannelTransport, Issue, JoinRole, LocalChannel, LocalHub,
    Participant, Session, SessionConfig, SessionEvent, SessionHandle, SessionId, SessionView,
    VoteValue,
};
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(30);

fn session_id() -> SessionId {
    "SPRINT42".parse().unwrap()
}

async fn join_with(
    hub: &LocalHub,
    id: &str,
    role: JoinRole,
    config: &SessionConfig,
) -> (SessionHandle, Arc<LocalChannel>) {
    let channel = Arc::new(hub.channel(session_id().channel_name(), id));
    let transport: Arc<dyn ChannelTransport> = channel.clone();
    let handle = Session::open(
        transport,
        Participant::new(id, id.to_uppercase()),
        session_id(),
        role,
        config,
    )
    .await
    .expect("open session");
    (handle, channel)
}

async fn join(hub: &LocalHub, id: &str, role: JoinRole) -> (SessionHandle, Arc<LocalChannel>) {
    join_with(hub, id, role, &SessionConfig::default()).await
}

async fn wait_until(
    handle: &SessionHandle,
    what: &str,
    predicate: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    timeout(WAIT, handle.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .expect("session closed")
}

fn participant_count(view: &SessionView) -> usize {
    view.state.as_ref().map(|s| s.participants.len()).unwrap_or(0)
}

fn record_events(
    handle: &SessionHandle,
) -> (Arc<Mutex<Vec<SessionEvent>>>, poker_core::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let sub = handle.events().subscribe(move |event| {
        seen_clone.lock().unwrap().push(event);
    });
    (seen, sub)
}

// ==================== Bootstrap ====================

#[tokio::test(start_paused = true)]
async fn test_creator_initializes_immediately() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;

    let view = wait_until(&host, "state", |v| v.state.is_some()).await;
    assert!(view.is_authority);
    assert_eq!(
        view.bootstrap,
        BootstrapPhase::Complete(BootstrapSource::SelfInitialized)
    );
    assert_eq!(participant_count(&view), 1);
    host.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_lone_participant_self_initializes_after_fallback() {
    let hub = LocalHub::new();
    let started = Instant::now();
    let (solo, _) = join(&hub, "p2", JoinRole::Participant).await;

    let view = wait_until(&solo, "state", |v| v.state.is_some()).await;
    assert!(started.elapsed() >= Duration::from_millis(2000));
    assert!(view.is_authority);
    assert_eq!(view.state.unwrap().authority_id.as_str(), "p2");
    solo.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_join_times_out_without_fallback() {
    let hub = LocalHub::new();
    let mut config = SessionConfig::default();
    config.bootstrap.fallback_after_ms = None;
    let (guest, _) = join_with(&hub, "p2", JoinRole::Participant, &config).await;
    let (seen, _sub) = record_events(&guest);

    let view = wait_until(&guest, "timeout", |v| v.bootstrap == BootstrapPhase::TimedOut).await;
    assert!(view.state.is_none());
    assert!(seen.lock().unwrap().contains(&SessionEvent::JoinTimedOut));
    guest.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_participant_adopts_host_snapshot() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    host.add_issue(Issue::new("Login").with_id("login")).unwrap();
    wait_until(&host, "issue", |v| {
        v.state.as_ref().is_some_and(|s| s.issues.len() == 1)
    })
    .await;

    let (guest, _) = join(&hub, "p2", JoinRole::Participant).await;
    let view = wait_until(&guest, "both participants", |v| participant_count(v) == 2).await;
    assert_eq!(
        view.bootstrap,
        BootstrapPhase::Complete(BootstrapSource::Snapshot)
    );
    assert!(!view.is_authority);
    assert_eq!(view.state.as_ref().unwrap().issues.len(), 1);

    wait_until(&host, "guest on host", |v| participant_count(v) == 2).await;
    assert_eq!(host.state(), guest.state());

    guest.close().await;
    host.close().await;
}

// ==================== Voting round ====================

#[tokio::test(start_paused = true)]
async fn test_full_round_converges() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    let (guest, _) = join(&hub, "p2", JoinRole::Participant).await;
    wait_until(&guest, "guest state", |v| participant_count(v) == 2).await;

    let issue = Issue::new("Checkout").with_id("checkout");
    host.add_issue(issue.clone()).unwrap();
    host.start_voting(issue).unwrap();
    wait_until(&guest, "voting", |v| {
        v.state.as_ref().is_some_and(|s| s.voting_in_progress)
    })
    .await;

    host.submit_vote(Some(VoteValue::Points(5.0))).unwrap();
    guest.submit_vote(Some(VoteValue::Points(8.0))).unwrap();
    wait_until(&host, "two votes", |v| {
        v.state.as_ref().is_some_and(|s| s.votes.len() == 2)
    })
    .await;

    host.reveal_votes().unwrap();
    let view = wait_until(&guest, "reveal", |v| {
        v.state.as_ref().is_some_and(|s| s.votes_revealed)
    })
    .await;
    let state = view.state.unwrap();
    assert!(state.votes.iter().all(|v| v.revealed));
    assert_eq!(poker_core::tally::suggested_estimate(&state), Some(6.5));

    host.estimate_issue("checkout", 8.0).unwrap();
    host.reset_voting().unwrap();
    wait_until(&guest, "estimate", |v| {
        v.state
            .as_ref()
            .and_then(|s| s.issue("checkout"))
            .is_some_and(|i| i.estimate == Some(8.0))
    })
    .await;
    let view = wait_until(&guest, "reset", |v| {
        v.state.as_ref().is_some_and(|s| !s.voting_in_progress)
    })
    .await;
    assert!(view.state.as_ref().unwrap().votes.is_empty());

    wait_until(&host, "reset on host", |v| {
        v.state.as_ref().is_some_and(|s| !s.voting_in_progress)
    })
    .await;
    assert_eq!(host.state(), guest.state());
    assert!(host.state().unwrap().check_invariants().is_ok());

    guest.close().await;
    host.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_three_clients_converge() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    let (b, _) = join(&hub, "p2", JoinRole::Participant).await;
    let (c, _) = join(&hub, "p3", JoinRole::Participant).await;

    for handle in [&host, &b, &c] {
        wait_until(handle, "three participants", |v| participant_count(v) == 3).await;
    }

    let issue = Issue::new("Search").with_id("search");
    b.select_issue(issue).unwrap();
    for handle in [&host, &b, &c] {
        wait_until(handle, "selected", |v| {
            v.state
                .as_ref()
                .is_some_and(|s| s.current_issue.as_ref().is_some_and(|i| i.id == "search"))
        })
        .await;
    }
    assert_eq!(host.state(), b.state());
    assert_eq!(b.state(), c.state());

    for handle in [&c, &b, &host] {
        handle.close().await;
    }
}

// ==================== Membership ====================

#[tokio::test(start_paused = true)]
async fn test_leave_removes_participant_and_vote() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    let (guest, _) = join(&hub, "p2", JoinRole::Participant).await;
    wait_until(&guest, "guest state", |v| participant_count(v) == 2).await;

    host.start_voting(Issue::new("A").with_id("a")).unwrap();
    wait_until(&guest, "voting", |v| {
        v.state.as_ref().is_some_and(|s| s.voting_in_progress)
    })
    .await;
    guest.submit_vote(Some(VoteValue::UNSURE)).unwrap();
    wait_until(&host, "vote", |v| {
        v.state.as_ref().is_some_and(|s| s.votes.len() == 1)
    })
    .await;

    guest.close().await;
    let view = wait_until(&host, "guest gone", |v| participant_count(v) == 1).await;
    assert!(view.state.unwrap().votes.is_empty());
    assert_eq!(hub.presence_count(&session_id().channel_name()), 1);
    host.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reenters_presence() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    let (guest, guest_channel) = join(&hub, "p2", JoinRole::Participant).await;
    wait_until(&host, "guest joined", |v| participant_count(v) == 2).await;

    guest_channel.disconnect();
    wait_until(&guest, "disconnected", |v| !v.connected).await;
    wait_until(&host, "guest dropped", |v| participant_count(v) == 1).await;

    guest_channel.reconnect();
    wait_until(&guest, "reconnected", |v| v.connected).await;
    wait_until(&host, "guest back", |v| participant_count(v) == 2).await;
    wait_until(&guest, "guest sees itself", |v| participant_count(v) == 2).await;

    guest.close().await;
    host.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_publish_dropped_while_disconnected() {
    let hub = LocalHub::new();
    let (host, host_channel) = join(&hub, "p1", JoinRole::Creator).await;
    wait_until(&host, "host state", |v| v.state.is_some()).await;
    let (seen, _sub) = record_events(&host);

    host_channel.disconnect();
    wait_until(&host, "disconnected", |v| !v.connected).await;
    host.reset_voting().unwrap();

    timeout(WAIT, async {
        loop {
            if seen
                .lock()
                .unwrap()
                .iter()
                .any(|e| {
                    matches!(e, SessionEvent::PublishDropped { topic } if topic == "game-event")
                })
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("publish dropped notification");
    host.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_fail_after_close() {
    let hub = LocalHub::new();
    let (host, _) = join(&hub, "p1", JoinRole::Creator).await;
    let other = host.clone();
    host.close().await;
    assert!(matches!(
        other.reset_voting(),
        Err(poker_core::SessionError::Closed)
    ));
}
