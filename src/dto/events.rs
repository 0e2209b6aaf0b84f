use serde::{Deserialize, Serialize};

use crate::dao::models::{Captain, JamId, JamSong, JamSongId, SongId, SongPatch};

/// Push channel carrying a jam's events.
pub fn channel_name(jam_id: &JamId) -> String {
    format!("jam-{jam_id}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Named event carried over a push channel, with its JSON-encoded payload.
pub struct ChannelMessage {
    /// Event name, e.g. `vote`.
    pub event: String,
    /// JSON payload.
    pub data: String,
}

impl ChannelMessage {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<T>(event: impl Into<String>, payload: &T) -> serde_json::Result<Self>
    where
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Events broadcast on a jam channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SongAdded,
    Vote,
    CaptainAdded,
    CaptainRemoved,
    SongPlayed,
    SongRemoved,
    SongEdited,
}

impl EventKind {
    /// Every kind, in registration order.
    pub const ALL: [EventKind; 7] = [
        EventKind::SongAdded,
        EventKind::Vote,
        EventKind::CaptainAdded,
        EventKind::CaptainRemoved,
        EventKind::SongPlayed,
        EventKind::SongRemoved,
        EventKind::SongEdited,
    ];

    /// Wire name of the event.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::SongAdded => "song-added",
            EventKind::Vote => "vote",
            EventKind::CaptainAdded => "captain-added",
            EventKind::CaptainRemoved => "captain-removed",
            EventKind::SongPlayed => "song-played",
            EventKind::SongRemoved => "song-removed",
            EventKind::SongEdited => "song-edited",
        }
    }

    /// Kind for a wire name, if it is one of ours.
    pub fn from_name(name: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Broadcast when a song joins the jam.
pub struct SongAddedEvent {
    /// Entry as stored by the server.
    pub song: JamSong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Broadcast with the authoritative vote count after any vote.
pub struct VoteEvent {
    /// Entry voted on.
    pub song_id: JamSongId,
    /// Count after the vote.
    pub votes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a captain signs up or withdraws.
pub struct CaptainEvent {
    /// Entry the captain belongs to.
    pub song_id: JamSongId,
    /// Captain added or removed.
    pub captain: Captain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Broadcast with the authoritative played flag.
pub struct SongPlayedEvent {
    /// Entry whose flag changed.
    pub song_id: JamSongId,
    /// Flag after the change.
    pub played: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a song leaves the jam; addressed by catalog song id.
pub struct SongRemovedEvent {
    /// Catalog song removed.
    pub song_id: SongId,
    /// Title, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_title: Option<String>,
    /// Artist, when the server knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_artist: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Broadcast when a catalog song referenced by the jam is edited.
pub struct SongEditedEvent {
    /// Catalog song edited.
    pub song_id: SongId,
    /// Fields that changed.
    pub updated_song: SongPatch,
}

/// Decoded jam channel event.
#[derive(Debug, Clone)]
pub enum JamEvent {
    /// `song-added`.
    SongAdded(SongAddedEvent),
    /// `vote`.
    Vote(VoteEvent),
    /// `captain-added`.
    CaptainAdded(CaptainEvent),
    /// `captain-removed`.
    CaptainRemoved(CaptainEvent),
    /// `song-played`.
    SongPlayed(SongPlayedEvent),
    /// `song-removed`.
    SongRemoved(SongRemovedEvent),
    /// `song-edited`.
    SongEdited(SongEditedEvent),
}

impl JamEvent {
    /// Decode the JSON payload of an event of the given kind.
    pub fn decode(kind: EventKind, data: &str) -> serde_json::Result<JamEvent> {
        Ok(match kind {
            EventKind::SongAdded => JamEvent::SongAdded(serde_json::from_str(data)?),
            EventKind::Vote => JamEvent::Vote(serde_json::from_str(data)?),
            EventKind::CaptainAdded => JamEvent::CaptainAdded(serde_json::from_str(data)?),
            EventKind::CaptainRemoved => JamEvent::CaptainRemoved(serde_json::from_str(data)?),
            EventKind::SongPlayed => JamEvent::SongPlayed(serde_json::from_str(data)?),
            EventKind::SongRemoved => JamEvent::SongRemoved(serde_json::from_str(data)?),
            EventKind::SongEdited => JamEvent::SongEdited(serde_json::from_str(data)?),
        })
    }

    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            JamEvent::SongAdded(_) => EventKind::SongAdded,
            JamEvent::Vote(_) => EventKind::Vote,
            JamEvent::CaptainAdded(_) => EventKind::CaptainAdded,
            JamEvent::CaptainRemoved(_) => EventKind::CaptainRemoved,
            JamEvent::SongPlayed(_) => EventKind::SongPlayed,
            JamEvent::SongRemoved(_) => EventKind::SongRemoved,
            JamEvent::SongEdited(_) => EventKind::SongEdited,
        }
    }

    /// Encode into a channel message.
    pub fn to_message(&self) -> serde_json::Result<ChannelMessage> {
        let name = self.kind().name();
        match self {
            JamEvent::SongAdded(payload) => ChannelMessage::json(name, payload),
            JamEvent::Vote(payload) => ChannelMessage::json(name, payload),
            JamEvent::CaptainAdded(payload) | JamEvent::CaptainRemoved(payload) => {
                ChannelMessage::json(name, payload)
            }
            JamEvent::SongPlayed(payload) => ChannelMessage::json(name, payload),
            JamEvent::SongRemoved(payload) => ChannelMessage::json(name, payload),
            JamEvent::SongEdited(payload) => ChannelMessage::json(name, payload),
        }
    }
}
