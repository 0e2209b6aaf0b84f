use crate::dao::models::{JamSong, JamSongId};
use crate::dto::requests::VoteAction;
use crate::state::highlight::HighlightKind;
use crate::state::ordering::{PositionChange, SortMethod, compute_position_delta, rank_by_votes};
use crate::state::reducer;

/// Vote change coming from this device or from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteUpdate {
    /// Optimistic local toggle.
    Delta(VoteAction),
    /// Authoritative count pushed by the server.
    Count(i64),
}

/// New song list after a vote plus the annotations it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTransition {
    /// List after the vote, re-sorted if ranking by votes.
    pub songs: Vec<JamSong>,
    /// Highlights to schedule on the voted entry.
    pub highlights: Vec<HighlightKind>,
    /// How the entry moved, if it did.
    pub position: Option<PositionChange>,
}

/// Apply a vote to `songs`, re-ranking the stored list when sorting by votes.
///
/// Returns `None` when the entry is unknown or the count is already current.
/// A reorder highlight is produced only for an upward move; every increase
/// produces a celebration.
pub fn vote(
    songs: &[JamSong],
    id: &JamSongId,
    update: VoteUpdate,
    sort: SortMethod,
) -> Option<VoteTransition> {
    let old_index = songs.iter().position(|entry| &entry.id == id)?;
    let previous = songs[old_index].votes;

    let updated = match update {
        VoteUpdate::Delta(action) => reducer::apply_vote_delta(songs, id, action),
        VoteUpdate::Count(votes) if votes == previous => return None,
        VoteUpdate::Count(votes) => reducer::apply_vote_count(songs, id, votes),
    };
    let current = updated[old_index].votes;

    let mut highlights = Vec::new();
    if current > previous {
        highlights.push(HighlightKind::Celebrate);
    }

    let (songs, position) = match sort {
        SortMethod::Votes => {
            let ranked = rank_by_votes(&updated);
            let position = compute_position_delta(&ranked, id, old_index);
            if position.is_some_and(|change| change.moved_up()) {
                highlights.push(HighlightKind::Reorder);
            }
            (ranked, position)
        }
        SortMethod::Order => (updated, None),
    };

    Some(VoteTransition {
        songs,
        highlights,
        position,
    })
}
