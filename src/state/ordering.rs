use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::dao::models::{JamSong, JamSongId, SongKind};

/// How entries are ranked within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMethod {
    /// Most votes first.
    #[default]
    Votes,
    /// Insertion order.
    Order,
}

/// Display options of a jam view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewOptions {
    /// Split bangers from ballads.
    pub grouping_enabled: bool,
    /// How entries are ranked.
    pub sort_method: SortMethod,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            grouping_enabled: true,
            sort_method: SortMethod::Votes,
        }
    }
}

/// Display order of a setlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrangement {
    /// Bangers and ballads listed separately, played entries first in each.
    Grouped {
        bangers: Vec<JamSong>,
        ballads: Vec<JamSong>,
    },
    /// One list, played entries first.
    Ungrouped { songs: Vec<JamSong> },
}

/// Arranged setlist plus the song that should be played next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setlist {
    /// Entries as displayed.
    pub arrangement: Arrangement,
    /// First unplayed entry by votes.
    pub next_song: Option<JamSongId>,
}

impl Setlist {
    /// Entries in display order, groups concatenated.
    pub fn ordered(&self) -> impl Iterator<Item = &JamSong> {
        let (first, second): (&[JamSong], &[JamSong]) = match &self.arrangement {
            Arrangement::Grouped { bangers, ballads } => (bangers.as_slice(), ballads.as_slice()),
            Arrangement::Ungrouped { songs } => (songs.as_slice(), [].as_slice()),
        };
        first.iter().chain(second.iter())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match &self.arrangement {
            Arrangement::Grouped { bangers, ballads } => bangers.len() + ballads.len(),
            Arrangement::Ungrouped { songs } => songs.len(),
        }
    }

    /// Whether the setlist is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compare(a: &JamSong, b: &JamSong, method: SortMethod) -> Ordering {
    match method {
        SortMethod::Votes => b.votes.cmp(&a.votes),
        SortMethod::Order => a.order.cmp(&b.order),
    }
}

/// Stable sort of `entries` by `method`.
pub fn sort_entries(entries: &mut [JamSong], method: SortMethod) {
    entries.sort_by(|a, b| compare(a, b, method));
}

/// Copy of `songs` stably ordered by descending votes.
pub fn rank_by_votes(songs: &[JamSong]) -> Vec<JamSong> {
    let mut ranked = songs.to_vec();
    sort_entries(&mut ranked, SortMethod::Votes);
    ranked
}

fn played_then_unplayed<'a, I>(entries: I, method: SortMethod) -> Vec<JamSong>
where
    I: Iterator<Item = &'a JamSong> + Clone,
{
    let mut played: Vec<JamSong> = entries.clone().filter(|e| e.played).cloned().collect();
    let mut unplayed: Vec<JamSong> = entries.filter(|e| !e.played).cloned().collect();
    sort_entries(&mut played, method);
    sort_entries(&mut unplayed, method);
    played.extend(unplayed);
    played
}

fn first_unplayed(entries: &[JamSong]) -> Option<JamSongId> {
    entries
        .iter()
        .find(|entry| !entry.played)
        .map(|entry| entry.id.clone())
}

/// Arrange `songs` for display and pick the next song to play.
pub fn group_and_sort(songs: &[JamSong], options: ViewOptions) -> Setlist {
    let method = options.sort_method;
    if options.grouping_enabled {
        let bangers = played_then_unplayed(
            songs.iter().filter(|e| e.song.kind == SongKind::Banger),
            method,
        );
        let ballads = played_then_unplayed(
            songs.iter().filter(|e| e.song.kind == SongKind::Ballad),
            method,
        );
        let next_song = first_unplayed(&bangers).or_else(|| first_unplayed(&ballads));
        Setlist {
            arrangement: Arrangement::Grouped { bangers, ballads },
            next_song,
        }
    } else {
        let songs = played_then_unplayed(songs.iter(), method);
        let next_song = first_unplayed(&songs);
        Setlist {
            arrangement: Arrangement::Ungrouped { songs },
            next_song,
        }
    }
}

/// Movement of one entry across a re-sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionChange {
    /// Index before the re-sort.
    pub from: usize,
    /// Index after the re-sort.
    pub to: usize,
}

impl PositionChange {
    /// Whether the entry climbed towards the top.
    pub fn moved_up(&self) -> bool {
        self.to < self.from
    }
}

/// Where the entry `id` landed in `sorted`, given it sat at `old_index` before.
pub fn compute_position_delta(
    sorted: &[JamSong],
    id: &JamSongId,
    old_index: usize,
) -> Option<PositionChange> {
    sorted
        .iter()
        .position(|entry| &entry.id == id)
        .map(|to| PositionChange {
            from: old_index,
            to,
        })
}
