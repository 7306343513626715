//! Notifications emitted by a revisioner.

use std::path::PathBuf;

use super::state::RevisionState;
use crate::descriptor::LocalFileInfo;
use crate::error::RevisionError;
use crate::reconstruct::FinishedFile;
use crate::transfer::ProgressReport;

/// Asynchronous notifications delivered on the event channel returned
/// by [`DeltaRevisioner::new`](super::DeltaRevisioner::new).
///
/// A session emits exactly one terminal notification: `Finished`,
/// `Canceled`, or `Error`; never more than one of them.
#[derive(Debug)]
pub enum RevisionEvent {
    /// A full update session began.
    Started,

    /// The state machine moved to a new phase.
    StateChanged(RevisionState),

    /// Progress during matching and downloading, emitted after each
    /// processed chunk.
    Progress(ProgressReport),

    /// Result of `check_for_update`.
    UpdateAvailable {
        available: bool,
        local: LocalFileInfo,
    },

    /// A full update session completed; the target file is verified
    /// and in place.
    Finished {
        target: FinishedFile,
        old_path: PathBuf,
    },

    /// The session was canceled and every worker has unwound.
    Canceled,

    /// The session failed.
    Error(RevisionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_debuggable() {
        let event = RevisionEvent::StateChanged(RevisionState::Matching);
        assert!(format!("{:?}", event).contains("Matching"));
    }
}
