use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::remote::RemoteResult,
    error::ServiceError,
    services::notifications::Notifier,
    state::{Snapshot, Version, VersionedStore},
};

/// Bound applied to every remote call unless configured otherwise.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier for one optimistic mutation.
pub type MutationId = Uuid;

type Compensation<T> = Box<dyn FnOnce(&T) -> Option<T> + Send>;

/// Await `remote`, failing with [`ServiceError::Timeout`] once `limit` elapses.
pub async fn bounded<Fut, R>(limit: Option<Duration>, remote: Fut) -> Result<R, ServiceError>
where
    Fut: Future<Output = RemoteResult<R>>,
{
    match limit {
        Some(limit) => match timeout(limit, remote).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout),
        },
        None => remote.await.map_err(ServiceError::from),
    }
}

/// What a failed mutation did to the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// Pre-mutation snapshot reinstated.
    Restored,
    /// Another commit intervened; the inverse was applied on top of it.
    Compensated,
    /// Another commit intervened and the inverse declined or was absent; latest state kept.
    Kept,
    /// The mutation had changed nothing, or the view is gone.
    Skipped,
}

/// Optimistic commit awaiting the outcome of its remote call.
pub struct PendingMutation<T> {
    id: MutationId,
    label: &'static str,
    before: Snapshot<T>,
    committed: Version,
    compensate: Option<Compensation<T>>,
    success: Option<String>,
}

impl<T> PendingMutation<T> {
    /// Identifier used in logs.
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Whether the optimistic commit changed the state.
    pub fn changed(&self) -> bool {
        self.committed != self.before.version
    }

    /// Version installed by the optimistic commit.
    pub fn version(&self) -> Version {
        self.committed
    }

    /// State the mutation started from.
    pub fn before(&self) -> &T {
        &self.before.value
    }

    /// Inverse applied on failure when another commit happened in between.
    pub fn with_compensation<F>(mut self, compensate: F) -> Self
    where
        F: FnOnce(&T) -> Option<T> + Send + 'static,
    {
        self.compensate = Some(Box::new(compensate));
        self
    }

    /// Notice emitted once the remote call succeeds.
    pub fn with_success(mut self, message: impl Into<String>) -> Self {
        self.success = Some(message.into());
        self
    }
}

/// Applies local changes first, then confirms or reverts them against the remote call.
pub struct OptimisticExecutor<T> {
    store: Arc<VersionedStore<T>>,
    notifier: Notifier,
    remote_timeout: Option<Duration>,
}

impl<T> Clone for OptimisticExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: self.notifier.clone(),
            remote_timeout: self.remote_timeout,
        }
    }
}

impl<T> OptimisticExecutor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Executor over `store` bounded by [`DEFAULT_REMOTE_TIMEOUT`].
    pub fn new(store: Arc<VersionedStore<T>>, notifier: Notifier) -> Self {
        Self {
            store,
            notifier,
            remote_timeout: Some(DEFAULT_REMOTE_TIMEOUT),
        }
    }

    /// Override the remote timeout; `None` waits forever.
    pub fn with_timeout(mut self, remote_timeout: Option<Duration>) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    /// Store the executor commits to.
    pub fn store(&self) -> &Arc<VersionedStore<T>> {
        &self.store
    }

    /// Notifier receiving success and error notices.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Timeout applied to remote calls.
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout
    }

    /// Commit `update` synchronously and return the pending mutation.
    pub fn begin<F>(&self, label: &'static str, update: F) -> Result<PendingMutation<T>, ServiceError>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        if !self.store.is_open() {
            return Err(ServiceError::Unmounted);
        }

        let commit = self.store.commit(update);
        let pending = PendingMutation {
            id: Uuid::new_v4(),
            label,
            committed: commit.version,
            before: commit.before,
            compensate: None,
            success: None,
        };
        debug!(
            mutation_id = %pending.id,
            label,
            version = pending.committed,
            changed = pending.changed(),
            "optimistic update committed"
        );
        Ok(pending)
    }

    /// Await a remote call under the configured timeout.
    pub async fn call<Fut, R>(&self, remote: Fut) -> Result<R, ServiceError>
    where
        Fut: Future<Output = RemoteResult<R>>,
    {
        bounded(self.remote_timeout, remote).await
    }

    /// Keep the optimistic state on success; roll back and notify on failure.
    pub fn settle<R>(
        &self,
        pending: PendingMutation<T>,
        outcome: Result<R, ServiceError>,
    ) -> Result<R, ServiceError> {
        let id = pending.id;
        let label = pending.label;

        if !self.store.is_open() {
            debug!(mutation_id = %id, label, "mutation completed after unmount; ignoring");
            return outcome;
        }

        match outcome {
            Ok(value) => {
                debug!(mutation_id = %id, label, "optimistic update confirmed");
                if let Some(message) = &pending.success {
                    self.notifier.success(message.clone());
                }
                Ok(value)
            }
            Err(err) => {
                let rollback = self.roll_back(pending);
                warn!(
                    mutation_id = %id,
                    label,
                    error = %err,
                    ?rollback,
                    "optimistic update failed"
                );
                self.notifier
                    .error(format!("Error {label}: {}", err.user_message()));
                Err(err)
            }
        }
    }

    /// Commit, call, settle.
    pub async fn run<Fut, R>(
        &self,
        pending: PendingMutation<T>,
        remote: Fut,
    ) -> Result<R, ServiceError>
    where
        Fut: Future<Output = RemoteResult<R>>,
    {
        let outcome = self.call(remote).await;
        self.settle(pending, outcome)
    }

    fn roll_back(&self, pending: PendingMutation<T>) -> Rollback {
        if !pending.changed() {
            return Rollback::Skipped;
        }

        let PendingMutation {
            id,
            label,
            before,
            committed,
            compensate,
            ..
        } = pending;

        match self.store.restore_if(committed, before.value) {
            Ok(_) => Rollback::Restored,
            Err(current) => {
                let compensated = compensate
                    .map(|inverse| self.store.commit(inverse).changed())
                    .unwrap_or(false);
                let rollback = if compensated {
                    Rollback::Compensated
                } else {
                    Rollback::Kept
                };
                warn!(
                    mutation_id = %id,
                    label,
                    expected = committed,
                    current,
                    ?rollback,
                    "state changed before rollback; snapshot not restored"
                );
                rollback
            }
        }
    }
}
