use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use validator::{Validate, ValidationErrors};

use crate::dao::models::{CaptainRole, Jam, JamSongId, SongId, SongKind};
use crate::dto::validation::{validate_display_name, validate_unique};

/// Direction of a vote toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    /// Add one vote.
    Vote,
    /// Withdraw a vote.
    Unvote,
}

impl VoteAction {
    /// Change applied to the vote count.
    pub fn delta(self) -> i64 {
        match self {
            VoteAction::Vote => 1,
            VoteAction::Unvote => -1,
        }
    }

    /// Action undoing this one.
    pub fn inverse(self) -> VoteAction {
        match self {
            VoteAction::Vote => VoteAction::Unvote,
            VoteAction::Unvote => VoteAction::Vote,
        }
    }
}

/// Body of `POST /jams/{id}/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// Entry voted on.
    pub song_id: JamSongId,
    /// Vote or unvote.
    pub action: VoteAction,
}

/// Body of `POST /jams/{id}/played`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayedRequest {
    /// Entry whose flag flips.
    pub song_id: JamSongId,
}

/// Body of `DELETE /jams/{id}/songs`; addresses the catalog song.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveSongRequest {
    /// Catalog song to remove.
    pub song_id: SongId,
}

/// Body of `POST /jams/{id}/songs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSongsRequest {
    /// Catalog songs to add.
    pub song_ids: Vec<SongId>,
}

impl Validate for AddSongsRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.song_ids.is_empty() {
            let mut err = validator::ValidationError::new("song_ids_empty");
            err.message = Some("Select at least one song".into());
            errors.add("song_ids", err);
        } else if let Err(err) = validate_unique(&self.song_ids) {
            errors.add("song_ids", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Result of adding catalog songs to a jam.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSongsResponse {
    /// Jam after the addition.
    pub jam: Option<Jam>,
    /// Songs that joined the jam.
    #[serde(default)]
    pub added_songs: Vec<SongId>,
    /// Songs already present.
    #[serde(default)]
    pub skipped_songs: Vec<SongId>,
    /// Server summary.
    pub message: Option<String>,
}

/// Body of `POST /jams/{id}/captain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptainSignupRequest {
    /// Display name of the captain.
    pub name: String,
    /// Role signed up for.
    #[serde(rename = "type")]
    pub role: CaptainRole,
    /// Entry to lead.
    pub song_id: JamSongId,
}

impl Validate for CaptainSignupRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = validate_display_name(&self.name) {
            errors.add("name", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Query of `DELETE /jams/{id}/captain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptainRemovalQuery {
    /// Entry to withdraw from.
    pub song_id: JamSongId,
    /// Captain withdrawing.
    pub name: String,
}

/// Song reference inside a new jam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialJamSong {
    /// Catalog song.
    pub song: SongId,
}

/// Body of `POST /jams`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJamRequest {
    /// Jam name.
    #[validate(length(min = 1, message = "jam name must not be empty"))]
    pub name: String,
    /// When the jam takes place.
    #[serde(with = "time::serde::rfc3339")]
    pub jam_date: OffsetDateTime,
    /// Songs to start with.
    #[serde(default)]
    pub songs: Vec<InitialJamSong>,
}

/// Body of `POST /songs`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewSong {
    /// Song title.
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    /// Performing artist.
    #[validate(length(min = 1, message = "artist must not be empty"))]
    pub artist: String,
    /// Classification.
    #[serde(rename = "type")]
    pub kind: SongKind,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Link to the chord chart.
    #[validate(url(message = "chord chart must be a valid URL"))]
    pub chord_chart: Option<String>,
}

/// Query of `GET /songs/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Search text.
    pub q: String,
}

/// Error body returned by the API on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Message meant for the user.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_request_uses_wire_names() {
        let request = VoteRequest {
            song_id: JamSongId::from("js-1"),
            action: VoteAction::Unvote,
        };
        let value = serde_json::to_value(&request).expect("serializes");
        assert_eq!(
            value,
            serde_json::json!({ "songId": "js-1", "action": "unvote" })
        );
    }

    #[test]
    fn vote_action_inverse_cancels_delta() {
        for action in [VoteAction::Vote, VoteAction::Unvote] {
            assert_eq!(action.delta() + action.inverse().delta(), 0);
        }
    }

    #[test]
    fn add_songs_response_tolerates_missing_fields() {
        let response: AddSongsResponse =
            serde_json::from_str(r#"{ "message": "nothing to add" }"#).expect("decodes");
        assert!(response.jam.is_none());
        assert!(response.added_songs.is_empty());
        assert!(response.skipped_songs.is_empty());
    }

    #[test]
    fn add_songs_request_requires_unique_ids() {
        let empty = AddSongsRequest { song_ids: vec![] };
        assert!(empty.validate().is_err());

        let duplicated = AddSongsRequest {
            song_ids: vec![SongId::from("a"), SongId::from("a")],
        };
        assert!(duplicated.validate().is_err());

        let fine = AddSongsRequest {
            song_ids: vec![SongId::from("a"), SongId::from("b")],
        };
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn captain_signup_serializes_role_as_type() {
        let request = CaptainSignupRequest {
            name: "Ana".into(),
            role: CaptainRole::Piano,
            song_id: JamSongId::from("js-9"),
        };
        assert!(request.validate().is_ok());
        let value = serde_json::to_value(&request).expect("serializes");
        assert_eq!(
            value,
            serde_json::json!({ "name": "Ana", "type": "piano", "songId": "js-9" })
        );
    }

    #[test]
    fn new_song_validation_rejects_bad_chart_url() {
        let song = NewSong {
            title: "Creep".into(),
            artist: "Radiohead".into(),
            kind: SongKind::Ballad,
            tags: vec![],
            chord_chart: Some("not a url".into()),
        };
        assert!(song.validate().is_err());
    }
}
