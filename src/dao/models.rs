use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use validator::Validate;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a jam session.
    JamId
);
string_id!(
    /// Identifier of a catalog song, shared by every jam referencing it.
    SongId
);
string_id!(
    /// Identifier of one song's entry inside one jam.
    JamSongId
);

/// Classification used to split the setlist into two groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SongKind {
    /// Upbeat crowd-pleaser.
    #[default]
    Banger,
    /// Slow song.
    Ballad,
}

/// Catalog song shared by reference across jams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    /// Catalog identifier.
    #[serde(rename = "_id")]
    pub id: SongId,
    /// Song title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Group the song is listed under.
    #[serde(rename = "type", default)]
    pub kind: SongKind,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Link to the chord chart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord_chart: Option<String>,
    /// How many jams played the song.
    #[serde(default)]
    pub times_played: u32,
    /// When the song was last played.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_played: Option<OffsetDateTime>,
}

impl Song {
    /// `"Title" by Artist`, the way songs are named in notifications.
    pub fn describe(&self) -> String {
        format!("\"{}\" by {}", self.title, self.artist)
    }
}

/// Role a captain signs up for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptainRole {
    /// Leads the song.
    #[default]
    Regular,
    /// Plays the piano part.
    Piano,
}

/// Performer who volunteered to lead a song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Captain {
    /// Display name of the performer.
    pub name: String,
    /// Role taken on the song.
    #[serde(rename = "type", default)]
    pub role: CaptainRole,
    /// When the signup happened.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Captain {
    /// Two signups are the same when both name and role match.
    pub fn same_signup(&self, other: &Captain) -> bool {
        self.name == other.name && self.role == other.role
    }
}

/// Visual emphasis shown on a row; never sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Highlight {
    /// Song just added from this device.
    Success,
    /// Entry moved up after a vote.
    Warning,
    /// Reserved for failures shown on the row.
    Error,
}

/// One song's entry inside a jam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JamSong {
    /// Entry identifier, distinct from the catalog song id.
    #[serde(rename = "_id")]
    pub id: JamSongId,
    /// Catalog song the entry refers to.
    pub song: Song,
    /// Insertion order within the jam.
    #[serde(default)]
    pub order: u32,
    /// Vote count; may dip below zero transiently.
    #[serde(default)]
    pub votes: i64,
    /// Whether the song was played tonight.
    #[serde(default)]
    pub played: bool,
    /// Performers signed up to lead the song.
    #[serde(default)]
    pub captains: Vec<Captain>,
    /// Transient row emphasis.
    #[serde(skip)]
    pub highlight: Option<Highlight>,
    /// Transient celebration after a local vote.
    #[serde(skip)]
    pub show_rainbow_heart: bool,
}

impl JamSong {
    /// Vote count as shown to users; transient negative counts display as zero.
    pub fn display_votes(&self) -> u64 {
        self.votes.max(0).unsigned_abs()
    }
}

/// A jam session and its setlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Jam {
    /// Jam identifier.
    #[serde(rename = "_id")]
    pub id: JamId,
    /// Jam name.
    pub name: String,
    /// When the jam takes place.
    #[serde(with = "time::serde::rfc3339")]
    pub jam_date: OffsetDateTime,
    /// When the jam was created.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    /// Setlist entries.
    #[serde(default)]
    pub songs: Vec<JamSong>,
}

impl Jam {
    /// Copy of the jam metadata carrying a new song list.
    pub fn with_songs(&self, songs: Vec<JamSong>) -> Jam {
        Jam {
            id: self.id.clone(),
            name: self.name.clone(),
            jam_date: self.jam_date,
            created_at: self.created_at,
            songs,
        }
    }

    /// Entry for a given jam song id.
    pub fn entry(&self, id: &JamSongId) -> Option<&JamSong> {
        self.songs.iter().find(|entry| &entry.id == id)
    }
}

/// Partial update of a catalog song; absent fields are left untouched.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SongPatch {
    /// New title.
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: Option<String>,
    /// New artist.
    #[validate(length(min = 1, message = "artist must not be empty"))]
    pub artist: Option<String>,
    /// New classification.
    #[serde(rename = "type")]
    pub kind: Option<SongKind>,
    /// Replacement tag list.
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the chart; sent as `null`.
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[validate(url(message = "chord chart must be a valid URL"))]
    pub chord_chart: Option<Option<String>>,
    /// New play count.
    pub times_played: Option<u32>,
}

impl SongPatch {
    /// Whether the patch touches no field at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.kind.is_none()
            && self.tags.is_none()
            && self.chord_chart.is_none()
            && self.times_played.is_none()
    }

    /// Merge the present fields into a copy of `song`.
    pub fn apply_to(&self, song: &Song) -> Song {
        let mut next = song.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(artist) = &self.artist {
            next.artist = artist.clone();
        }
        if let Some(kind) = self.kind {
            next.kind = kind;
        }
        if let Some(tags) = &self.tags {
            next.tags = tags.clone();
        }
        if let Some(chord_chart) = &self.chord_chart {
            next.chord_chart = chord_chart.clone();
        }
        if let Some(times_played) = self.times_played {
            next.times_played = times_played;
        }
        next
    }

    /// Patch restoring the fields this patch would overwrite on `song`.
    pub fn inverse_for(&self, song: &Song) -> SongPatch {
        SongPatch {
            title: self.title.as_ref().map(|_| song.title.clone()),
            artist: self.artist.as_ref().map(|_| song.artist.clone()),
            kind: self.kind.map(|_| song.kind),
            tags: self.tags.as_ref().map(|_| song.tags.clone()),
            chord_chart: self.chord_chart.as_ref().map(|_| song.chord_chart.clone()),
            times_played: self.times_played.map(|_| song.times_played),
        }
    }
}
