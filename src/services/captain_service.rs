use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        jam_api::JamApi,
        ledger::VoteLedger,
        models::{CaptainRole, JamId, JamSong, JamSongId},
    },
    dto::requests::CaptainSignupRequest,
    error::ServiceError,
    services::{notifications::Notifier, optimistic::bounded},
};

/// Signup awaiting a display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignup {
    /// Entry to lead.
    pub song_id: JamSongId,
    /// Role requested.
    pub role: CaptainRole,
}

/// Outcome of a signup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// Signup sent and confirmed.
    SignedUp,
    /// No display name is remembered yet; call [`CaptainFlow::provide_name`].
    NeedsName,
}

/// Captain signup and withdrawal for one jam, keyed on the remembered display name.
pub struct CaptainFlow {
    jam_id: JamId,
    api: Arc<dyn JamApi>,
    ledger: Arc<VoteLedger>,
    notifier: Notifier,
    remote_timeout: Option<Duration>,
    pending: Mutex<Option<PendingSignup>>,
}

impl CaptainFlow {
    /// Signup flow for one jam; no signup is pending yet.
    pub fn new(
        jam_id: JamId,
        api: Arc<dyn JamApi>,
        ledger: Arc<VoteLedger>,
        notifier: Notifier,
        remote_timeout: Option<Duration>,
    ) -> Self {
        Self {
            jam_id,
            api,
            ledger,
            notifier,
            remote_timeout,
            pending: Mutex::new(None),
        }
    }

    /// Sign up for `entry` under the remembered name, or park the request until a name is given.
    pub async fn request_signup(
        &self,
        entry: &JamSong,
        role: CaptainRole,
    ) -> Result<SignupOutcome, ServiceError> {
        if entry.played {
            return Err(ServiceError::InvalidState(
                "cannot sign up for a song that was already played".into(),
            ));
        }

        match self.ledger.display_name() {
            Some(name) => {
                self.submit(name, entry.id.clone(), role).await?;
                Ok(SignupOutcome::SignedUp)
            }
            None => {
                debug!(jam_song_id = %entry.id, ?role, "captain signup waiting for a name");
                *self.lock_pending() = Some(PendingSignup {
                    song_id: entry.id.clone(),
                    role,
                });
                Ok(SignupOutcome::NeedsName)
            }
        }
    }

    /// Remember `name` and complete the parked signup, if any.
    pub async fn provide_name(&self, name: &str) -> Result<Option<JamSongId>, ServiceError> {
        let pending = self.lock_pending().take();
        let Some(PendingSignup { song_id, role }) = pending else {
            self.ledger.remember_display_name(name);
            return Ok(None);
        };

        let request = CaptainSignupRequest {
            name: name.trim().to_owned(),
            role,
            song_id: song_id.clone(),
        };
        if let Err(err) = request.validate() {
            *self.lock_pending() = Some(PendingSignup { song_id, role });
            return Err(err.into());
        }

        self.ledger.remember_display_name(&request.name);
        self.send(request).await?;
        Ok(Some(song_id))
    }

    /// Drop a parked signup without submitting it.
    pub fn cancel_pending(&self) -> Option<PendingSignup> {
        self.lock_pending().take()
    }

    /// Signup currently waiting for a name.
    pub fn pending(&self) -> Option<PendingSignup> {
        self.lock_pending().clone()
    }

    /// Withdraw this device's captain signup from `entry`.
    pub async fn withdraw(&self, entry: &JamSong) -> Result<(), ServiceError> {
        let name = self
            .ledger
            .display_name()
            .filter(|name| self.is_captain_as(entry, name))
            .ok_or_else(|| {
                ServiceError::InvalidState("you are not a captain of this song".into())
            })?;

        let outcome = bounded(
            self.remote_timeout,
            self.api
                .remove_captain(self.jam_id.clone(), entry.id.clone(), name),
        )
        .await;
        match outcome {
            Ok(()) => {
                info!(jam_id = %self.jam_id, jam_song_id = %entry.id, "captain withdrawn");
                self.notifier.success("Successfully removed as captain");
                Ok(())
            }
            Err(err) => {
                warn!(jam_id = %self.jam_id, jam_song_id = %entry.id, error = %err, "captain withdrawal failed");
                self.notifier
                    .error(format!("Error removing captain: {}", err.user_message()));
                Err(err)
            }
        }
    }

    /// Whether the remembered name holds any signup on `entry`.
    pub fn is_captain(&self, entry: &JamSong) -> bool {
        self.ledger
            .display_name()
            .is_some_and(|name| self.is_captain_as(entry, &name))
    }

    fn is_captain_as(&self, entry: &JamSong, name: &str) -> bool {
        entry.captains.iter().any(|captain| captain.name == name)
    }

    async fn submit(
        &self,
        name: String,
        song_id: JamSongId,
        role: CaptainRole,
    ) -> Result<(), ServiceError> {
        let request = CaptainSignupRequest {
            name,
            role,
            song_id,
        };
        request.validate()?;
        self.send(request).await
    }

    async fn send(&self, request: CaptainSignupRequest) -> Result<(), ServiceError> {
        let song_id = request.song_id.clone();
        let role = request.role;
        match bounded(
            self.remote_timeout,
            self.api.add_captain(self.jam_id.clone(), request),
        )
        .await
        {
            Ok(()) => {
                info!(jam_id = %self.jam_id, jam_song_id = %song_id, ?role, "captain signed up");
                self.notifier.success("Successfully signed up as captain!");
                Ok(())
            }
            Err(err) => {
                warn!(jam_id = %self.jam_id, jam_song_id = %song_id, error = %err, "captain signup failed");
                self.notifier
                    .error(format!("Error signing up as captain: {}", err.user_message()));
                Err(err)
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingSignup>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
