use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::watch;

/// Monotonic counter bumped by every data commit.
pub type Version = u64;

/// Point-in-time copy of a store's value.
#[derive(Debug)]
pub struct Snapshot<T> {
    /// Shared value at the time the snapshot was taken.
    pub value: Arc<T>,
    /// Data version of `value`.
    pub version: Version,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            version: self.version,
        }
    }
}

/// Outcome of a data commit.
#[derive(Debug)]
pub struct Commit<T> {
    /// State as it was right before the commit.
    pub before: Snapshot<T>,
    /// Version after the commit; equal to `before.version` when nothing changed.
    pub version: Version,
}

impl<T> Commit<T> {
    /// Whether the commit moved the version.
    pub fn changed(&self) -> bool {
        self.version != self.before.version
    }
}

struct Versioned<T> {
    value: Arc<T>,
    version: Version,
}

/// Copy-on-write container with a data version and change notifications.
///
/// Data commits replace the shared value and bump the version. Annotations go
/// through [`VersionedStore::annotate`] and leave the version alone, so they
/// never look like an intervening update to an optimistic mutation.
pub struct VersionedStore<T> {
    inner: RwLock<Versioned<T>>,
    changes: watch::Sender<Arc<T>>,
    open: AtomicBool,
}

impl<T> VersionedStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build a store holding `value` at version zero.
    pub fn new(value: T) -> Self {
        let value = Arc::new(value);
        let (changes, _rx) = watch::channel(Arc::clone(&value));
        Self {
            inner: RwLock::new(Versioned { value, version: 0 }),
            changes,
            open: AtomicBool::new(true),
        }
    }

    /// Current value and version.
    pub fn snapshot(&self) -> Snapshot<T> {
        let guard = self.read();
        Snapshot {
            value: Arc::clone(&guard.value),
            version: guard.version,
        }
    }

    /// Current shared value.
    pub fn value(&self) -> Arc<T> {
        Arc::clone(&self.read().value)
    }

    /// Current data version.
    pub fn version(&self) -> Version {
        self.read().version
    }

    /// Whether the store still accepts writes.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Stop accepting writes; every later commit or annotation is a no-op.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Observe every committed or annotated value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.changes.subscribe()
    }

    /// Commit the value produced by `update`, or nothing when it returns `None`.
    pub fn commit<F>(&self, update: F) -> Commit<T>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let mut guard = self.write();
        let before = Snapshot {
            value: Arc::clone(&guard.value),
            version: guard.version,
        };
        if !self.is_open() {
            return Commit {
                version: before.version,
                before,
            };
        }

        match update(&guard.value) {
            Some(next) => {
                let version = self.install(&mut guard, Arc::new(next));
                Commit { before, version }
            }
            None => Commit {
                version: before.version,
                before,
            },
        }
    }

    /// Commit a server-confirmed value; bumps the version even when `update` returns `None`.
    ///
    /// `update` receives the version being installed. A confirmation always counts as
    /// an intervening commit, so no pending optimistic mutation restores over it.
    pub fn confirm<F>(&self, update: F) -> Commit<T>
    where
        F: FnOnce(&T, Version) -> Option<T>,
    {
        let mut guard = self.write();
        let before = Snapshot {
            value: Arc::clone(&guard.value),
            version: guard.version,
        };
        if !self.is_open() {
            return Commit {
                version: before.version,
                before,
            };
        }

        let version = match update(&guard.value, guard.version + 1) {
            Some(next) => self.install(&mut guard, Arc::new(next)),
            None => {
                guard.version += 1;
                guard.version
            }
        };
        Commit { before, version }
    }

    /// Reinstate `snapshot` only if no commit happened since `expected`.
    ///
    /// Returns the current version as the error when another commit won the race.
    pub fn restore_if(&self, expected: Version, snapshot: Arc<T>) -> Result<Version, Version> {
        let mut guard = self.write();
        if guard.version != expected {
            return Err(guard.version);
        }
        if !self.is_open() {
            return Ok(guard.version);
        }
        Ok(self.install(&mut guard, snapshot))
    }

    /// Mutate ephemeral parts of the value in place without bumping the version.
    ///
    /// `annotate` returns whether it changed anything; observers are only
    /// notified in that case.
    pub fn annotate<F>(&self, annotate: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        if !self.is_open() {
            return false;
        }
        let mut guard = self.write();
        let mut next = T::clone(&guard.value);
        if !annotate(&mut next) {
            return false;
        }
        guard.value = Arc::new(next);
        self.changes.send_replace(Arc::clone(&guard.value));
        true
    }

    fn install(&self, guard: &mut Versioned<T>, value: Arc<T>) -> Version {
        guard.value = value;
        guard.version += 1;
        self.changes.send_replace(Arc::clone(&guard.value));
        guard.version
    }

    fn read(&self) -> RwLockReadGuard<'_, Versioned<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Versioned<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_bumps_version_and_keeps_previous_snapshot() {
        let store = VersionedStore::new(vec![1, 2]);
        let commit = store.commit(|items| {
            let mut next = items.clone();
            next.push(3);
            Some(next)
        });

        assert!(commit.changed());
        assert_eq!(*commit.before.value, vec![1, 2]);
        assert_eq!(commit.version, 1);
        assert_eq!(*store.value(), vec![1, 2, 3]);
    }

    #[test]
    fn declined_commit_leaves_version_alone() {
        let store = VersionedStore::new(5u32);
        let commit = store.commit(|_| None);
        assert!(!commit.changed());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn annotate_does_not_bump_version() {
        let store = VersionedStore::new(vec![0u8]);
        let mut rx = store.subscribe();

        assert!(store.annotate(|items| {
            items[0] = 9;
            true
        }));
        assert_eq!(store.version(), 0);
        assert_eq!(*store.value(), vec![9]);
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(**rx.borrow_and_update(), vec![9]);

        assert!(!store.annotate(|_| false));
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[test]
    fn unchanged_confirmation_still_moves_the_version() {
        let store = VersionedStore::new(3u32);
        let optimistic = store.commit(|_| Some(4));
        let mut seen = None;

        let confirmed = store.confirm(|_, version| {
            seen = Some(version);
            None
        });

        assert!(confirmed.changed());
        assert_eq!(seen, Some(2));
        assert_eq!(store.version(), 2);
        assert_eq!(*store.value(), 4);
        assert_eq!(
            store.restore_if(optimistic.version, optimistic.before.value),
            Err(2)
        );
        assert_eq!(*store.value(), 4);
    }

    #[test]
    fn restore_only_when_version_matches() {
        let store = VersionedStore::new(String::from("a"));
        let first = store.commit(|_| Some("b".into()));
        assert_eq!(
            store.restore_if(first.version, Arc::clone(&first.before.value)),
            Ok(2)
        );
        assert_eq!(*store.value(), "a");

        let second = store.commit(|_| Some("c".into()));
        store.commit(|_| Some("d".into()));
        assert_eq!(
            store.restore_if(second.version, Arc::clone(&second.before.value)),
            Err(4)
        );
        assert_eq!(*store.value(), "d");
    }

    #[test]
    fn closed_store_ignores_writes() {
        let store = VersionedStore::new(1i32);
        store.close();

        assert!(!store.commit(|_| Some(2)).changed());
        assert!(!store.confirm(|_, _| Some(2)).changed());
        assert!(!store.annotate(|value| {
            *value = 3;
            true
        }));
        assert_eq!(*store.value(), 1);
        assert!(!store.is_open());
    }
}
