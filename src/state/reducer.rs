//! Pure transformations of a jam's song list.
//!
//! Every function borrows the current list and returns a fresh one, so the
//! committed snapshot is never touched in place.

use crate::dao::models::{Captain, JamSong, JamSongId, SongId, SongPatch};
use crate::dto::requests::VoteAction;

/// Add or remove one vote on the entry.
pub fn apply_vote_delta(songs: &[JamSong], id: &JamSongId, action: VoteAction) -> Vec<JamSong> {
    map_entry(songs, id, |entry| entry.votes += action.delta())
}

/// Set the server's authoritative vote count on the entry.
pub fn apply_vote_count(songs: &[JamSong], id: &JamSongId, votes: i64) -> Vec<JamSong> {
    map_entry(songs, id, |entry| entry.votes = votes)
}

/// Flip the played flag.
pub fn apply_toggle_played(songs: &[JamSong], id: &JamSongId) -> Vec<JamSong> {
    map_entry(songs, id, |entry| entry.played = !entry.played)
}

/// Set the server's authoritative played flag.
pub fn apply_played(songs: &[JamSong], id: &JamSongId, played: bool) -> Vec<JamSong> {
    map_entry(songs, id, |entry| entry.played = played)
}

/// Drop the entry referencing the catalog song `song_id`.
pub fn apply_removal(songs: &[JamSong], song_id: &SongId) -> Vec<JamSong> {
    songs
        .iter()
        .filter(|entry| &entry.song.id != song_id)
        .cloned()
        .collect()
}

/// Append `entry` unless the jam already holds it or its song.
pub fn apply_addition(songs: &[JamSong], entry: &JamSong) -> Vec<JamSong> {
    let mut next = songs.to_vec();
    let present = songs
        .iter()
        .any(|existing| existing.id == entry.id || existing.song.id == entry.song.id);
    if !present {
        next.push(entry.clone());
    }
    next
}

/// Put `entry` back at `index` unless it is already present.
pub fn apply_reinsertion(songs: &[JamSong], entry: &JamSong, index: usize) -> Vec<JamSong> {
    let mut next = songs.to_vec();
    let present = songs
        .iter()
        .any(|existing| existing.id == entry.id || existing.song.id == entry.song.id);
    if !present {
        next.insert(index.min(next.len()), entry.clone());
    }
    next
}

/// Merge `patch` into the nested song of every entry referencing `song_id`.
pub fn apply_edit(songs: &[JamSong], song_id: &SongId, patch: &SongPatch) -> Vec<JamSong> {
    songs
        .iter()
        .map(|entry| {
            if &entry.song.id == song_id {
                let mut next = entry.clone();
                next.song = patch.apply_to(&entry.song);
                next
            } else {
                entry.clone()
            }
        })
        .collect()
}

/// Record a captain signup; a repeat of the same (name, role) is ignored.
pub fn apply_captain_added(songs: &[JamSong], id: &JamSongId, captain: &Captain) -> Vec<JamSong> {
    map_entry(songs, id, |entry| {
        if !entry.captains.iter().any(|existing| existing.same_signup(captain)) {
            entry.captains.push(captain.clone());
        }
    })
}

/// Withdraw every signup matching the captain's (name, role).
pub fn apply_captain_removed(
    songs: &[JamSong],
    id: &JamSongId,
    captain: &Captain,
) -> Vec<JamSong> {
    map_entry(songs, id, |entry| {
        entry.captains.retain(|existing| !existing.same_signup(captain))
    })
}

fn map_entry<F>(songs: &[JamSong], id: &JamSongId, mut change: F) -> Vec<JamSong>
where
    F: FnMut(&mut JamSong),
{
    songs
        .iter()
        .map(|entry| {
            let mut next = entry.clone();
            if &entry.id == id {
                change(&mut next);
            }
            next
        })
        .collect()
}
