//! Revision state machine states.

use std::fmt;

/// Phase of a revision session.
///
/// ```text
/// Idle → FetchingInfo → FetchingManifest → ComparingHashes
///      → { NoUpdateNeeded | Matching → Downloading → Reconstructing }
///      → Finished | Canceled | Errored
/// ```
///
/// `Idle`, `NoUpdateNeeded`, `Finished`, `Canceled`, and `Errored` are
/// resting states: `start`, `check_for_update`, and `clear` only act
/// from them, and are debounced no-ops everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevisionState {
    /// Nothing in flight.
    Idle,
    /// Determining the seed file's hash and length.
    FetchingInfo,
    /// Fetching and parsing the control file.
    FetchingManifest,
    /// Comparing the local hash with the manifest's.
    ComparingHashes,
    /// The local file already matches the remote target.
    NoUpdateNeeded,
    /// Scanning the seed for reusable blocks.
    Matching,
    /// Fetching required ranges.
    Downloading,
    /// Verifying and moving the rebuilt file into place.
    Reconstructing,
    /// A session completed successfully.
    Finished,
    /// A session was canceled and fully unwound.
    Canceled,
    /// A session failed.
    Errored,
}

impl RevisionState {
    /// Whether new work may be started from this state.
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::NoUpdateNeeded | Self::Finished | Self::Canceled | Self::Errored
        )
    }
}

impl fmt::Display for RevisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FetchingInfo => "fetching-info",
            Self::FetchingManifest => "fetching-manifest",
            Self::ComparingHashes => "comparing-hashes",
            Self::NoUpdateNeeded => "no-update-needed",
            Self::Matching => "matching",
            Self::Downloading => "downloading",
            Self::Reconstructing => "reconstructing",
            Self::Finished => "finished",
            Self::Canceled => "canceled",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resting_states() {
        assert!(RevisionState::Idle.is_resting());
        assert!(RevisionState::NoUpdateNeeded.is_resting());
        assert!(RevisionState::Finished.is_resting());
        assert!(RevisionState::Canceled.is_resting());
        assert!(RevisionState::Errored.is_resting());
    }

    #[test]
    fn test_active_states_are_not_resting() {
        for state in [
            RevisionState::FetchingInfo,
            RevisionState::FetchingManifest,
            RevisionState::ComparingHashes,
            RevisionState::Matching,
            RevisionState::Downloading,
            RevisionState::Reconstructing,
        ] {
            assert!(!state.is_resting(), "{} must not be resting", state);
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(RevisionState::Downloading.to_string(), "downloading");
        assert_eq!(RevisionState::NoUpdateNeeded.to_string(), "no-update-needed");
    }
}
