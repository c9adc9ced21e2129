//! Authority policy: who publishes canonical snapshots.
//!
//! Authority is assigned once, to whoever creates the `SessionState`, and
//! is never transferred. There is no re-election when the authority leaves,
//! and two clients that both self-initialize will each believe themselves
//! authoritative. Such competing snapshots are detected and reported here,
//! not resolved.

use crate::ids::ParticipantId;
use crate::model::SessionState;

/// Whether `local` is the writer-of-record for `state`.
pub fn is_authority(state: &SessionState, local: &ParticipantId) -> bool {
    &state.authority_id == local
}

/// Whether `local` should broadcast a snapshot of `state` after a change.
pub fn should_broadcast(state: Option<&SessionState>, local: &ParticipantId) -> bool {
    state.is_some_and(|s| is_authority(s, local))
}

/// Outcome of comparing an incoming snapshot with the local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// First snapshot we have seen.
    Initial,
    /// Same authority as our current state.
    SameAuthority,
    /// A different participant claims authority over this session.
    Conflict {
        local: ParticipantId,
        remote: ParticipantId,
    },
}

/// Classify an incoming snapshot against the current local state.
pub fn classify_snapshot(
    current: Option<&SessionState>,
    incoming: &SessionState,
) -> SnapshotOrigin {
    match current {
        None => SnapshotOrigin::Initial,
        Some(state) if state.authority_id == incoming.authority_id => SnapshotOrigin::SameAuthority,
        Some(state) => SnapshotOrigin::Conflict {
            local: state.authority_id.clone(),
            remote: incoming.authority_id.clone(),
        },
    }
}
