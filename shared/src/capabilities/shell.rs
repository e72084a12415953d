//! Capabilities served by a crux shell.
//!
//! The shell performs the actual I/O: it reads and writes the host's
//! key-value storage, fetches the template and runs timers. Each capability
//! here turns a request into an effect and the shell's answer back into an
//! app event.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{HttpError, HttpResponse};
use super::kv::{KeyValueStore, KvError};

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageOperation {
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    Remove { key: String },
}

/// `Get` answers with the stored value; `Set` and `Remove` with `None`.
pub type StorageOutput = Result<Option<Vec<u8>>, KvError>;

impl Operation for StorageOperation {
    type Output = StorageOutput;
}

pub struct Storage<Ev> {
    context: CapabilityContext<StorageOperation, Ev>,
}

impl<Ev> Capability<Ev> for Storage<Ev> {
    type Operation = StorageOperation;
    type MappedSelf<MappedEv> = Storage<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Storage::new(self.context.map_event(f))
    }
}

impl<Ev> Storage<Ev> {
    pub fn new(context: CapabilityContext<StorageOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Storage<Ev>
where
    Ev: Send + 'static,
{
    pub fn get<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(StorageOutput) -> Ev + Send + 'static,
    {
        self.request(StorageOperation::Get { key: key.into() }, make_event);
    }

    pub fn set<F>(&self, key: impl Into<String>, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(StorageOutput) -> Ev + Send + 'static,
    {
        let key = key.into();
        self.request(StorageOperation::Set { key, value }, make_event);
    }

    pub fn remove<F>(&self, key: impl Into<String>, make_event: F)
    where
        F: FnOnce(StorageOutput) -> Ev + Send + 'static,
    {
        self.request(StorageOperation::Remove { key: key.into() }, make_event);
    }

    fn request<F>(&self, operation: StorageOperation, make_event: F)
    where
        F: FnOnce(StorageOutput) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let output = context.request_from_shell(operation).await;
            context.update_app(make_event(output));
        });
    }
}

// ============================================================================
// Template fetch
// ============================================================================

/// A plain GET; the shell should bypass any HTTP cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOperation {
    pub url: String,
}

impl Operation for FetchOperation {
    type Output = Result<HttpResponse, HttpError>;
}

pub struct Fetch<Ev> {
    context: CapabilityContext<FetchOperation, Ev>,
}

impl<Ev> Capability<Ev> for Fetch<Ev> {
    type Operation = FetchOperation;
    type MappedSelf<MappedEv> = Fetch<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Fetch::new(self.context.map_event(f))
    }
}

impl<Ev> Fetch<Ev> {
    pub fn new(context: CapabilityContext<FetchOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Fetch<Ev>
where
    Ev: Send + 'static,
{
    pub fn get<F>(&self, url: impl Into<String>, make_event: F)
    where
        F: FnOnce(Result<HttpResponse, HttpError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        let operation = FetchOperation { url: url.into() };
        self.context.spawn(async move {
            let output = context.request_from_shell(operation).await;
            context.update_app(make_event(output));
        });
    }
}

// ============================================================================
// Timer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitOperation {
    pub millis: u64,
}

impl Operation for WaitOperation {
    type Output = ();
}

pub struct Timer<Ev> {
    context: CapabilityContext<WaitOperation, Ev>,
}

impl<Ev> Capability<Ev> for Timer<Ev> {
    type Operation = WaitOperation;
    type MappedSelf<MappedEv> = Timer<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Timer::new(self.context.map_event(f))
    }
}

impl<Ev> Timer<Ev> {
    pub fn new(context: CapabilityContext<WaitOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Timer<Ev>
where
    Ev: Send + 'static,
{
    /// Sends `make_event()` to the app once `millis` have passed.
    pub fn wait<F>(&self, millis: u64, make_event: F)
    where
        F: FnOnce() -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.request_from_shell(WaitOperation { millis }).await;
            context.update_app(make_event());
        });
    }
}

// ============================================================================
// Write-behind store
// ============================================================================

/// A write the shell still has to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Set { key: String, value: Vec<u8> },
    Remove { key: String },
}

#[derive(Debug, Default)]
struct ShellState {
    entries: HashMap<String, Vec<u8>>,
    read_errors: HashMap<String, KvError>,
    pending: VecDeque<PendingWrite>,
}

/// A local mirror of the shell's storage.
///
/// Reads are served from values the shell already delivered. Writes apply to
/// the mirror at once and queue a [`PendingWrite`]; a failure is only known
/// once the shell answers, so `set` never reports one itself.
#[derive(Debug, Clone, Default)]
pub struct ShellStore {
    state: Arc<Mutex<ShellState>>,
}

impl ShellStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records what the shell read for `key`.
    pub fn seed(&self, key: &str, read: StorageOutput) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match read {
            Ok(Some(value)) => {
                state.read_errors.remove(key);
                state.entries.insert(key.to_string(), value);
            }
            Ok(None) => {
                state.read_errors.remove(key);
                state.entries.remove(key);
            }
            Err(error) => {
                state.entries.remove(key);
                state.read_errors.insert(key.to_string(), error);
            }
        }
    }

    /// Hands over queued writes, oldest first.
    pub fn take_pending(&self) -> Vec<PendingWrite> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.drain(..).collect()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_empty()
    }
}

impl KeyValueStore for ShellStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(error) = state.read_errors.get(key) {
            return Err(error.clone());
        }
        Ok(state.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.read_errors.remove(key);
        state.entries.insert(key.to_string(), value.to_vec());
        state.pending.push_back(PendingWrite::Set {
            key: key.to_string(),
            value: value.to_vec(),
        });
        debug!(key, bytes = value.len(), "write queued for shell");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.read_errors.remove(key);
        state.entries.remove(key);
        state.pending.push_back(PendingWrite::Remove {
            key: key.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::StorageErrorCode;

    #[test]
    fn test_seeded_values_and_errors_are_served() {
        let store = ShellStore::new();
        store.seed("a", Ok(Some(b"1".to_vec())));
        store.seed("b", Err(KvError::storage(StorageErrorCode::IoError, "bad")));

        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        assert!(store.get("b").is_err());
        assert_eq!(store.get("c").unwrap(), None);
        assert!(!store.has_pending());
    }

    #[test]
    fn test_writes_apply_locally_and_queue_in_order() {
        let store = ShellStore::new();
        store.seed("a", Err(KvError::storage(StorageErrorCode::IoError, "bad")));

        store.set("a", b"fresh").unwrap();
        store.remove("b").unwrap();

        assert_eq!(store.get("a").unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(
            store.take_pending(),
            vec![
                PendingWrite::Set {
                    key: "a".into(),
                    value: b"fresh".to_vec()
                },
                PendingWrite::Remove { key: "b".into() },
            ]
        );
        assert!(store.take_pending().is_empty());
    }

    #[test]
    fn test_clones_share_the_mirror() {
        let store = ShellStore::new();
        let other = store.clone();
        other.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert!(store.has_pending());
    }
}
