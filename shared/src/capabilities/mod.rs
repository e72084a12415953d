//! Host capabilities.
//!
//! The core never touches storage, the network or timers directly. Native
//! hosts and tests hand implementations of these traits to the planner; a
//! crux shell answers the effects in `shell` instead.

mod http;
mod kv;
pub mod shell;

pub use self::http::{
    Delay, HttpError, HttpResponse, RetryConfig, TemplateTransport, TemplateUrl, MAX_URL_LENGTH,
};
pub use self::kv::{
    validate_prefix, KeyValueStore, KvError, MemoryStore, StorageErrorCode, StorageKeys,
    MAX_PREFIX_LENGTH,
};

#[cfg(not(target_arch = "wasm32"))]
pub use self::http::TokioDelay;
#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteStore;
pub use self::shell::{PendingWrite, ShellStore};

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! Scripted capabilities for exercising retry and failure paths.

    use super::{Delay, HttpError, HttpResponse, KeyValueStore, KvError, TemplateTransport};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Replays queued responses in order; once the queue is empty every call
    /// fails with a connection error.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedTransport {
        responses: Arc<Mutex<VecDeque<Result<HttpResponse, HttpError>>>>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn serving(body: &str) -> Self {
            let transport = Self::new();
            transport.push(Ok(HttpResponse::ok(body.as_bytes().to_vec())));
            transport
        }

        #[must_use]
        pub fn offline() -> Self {
            Self::new()
        }

        pub fn push(&self, response: Result<HttpResponse, HttpError>) {
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(response);
        }

        #[must_use]
        pub fn requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl TemplateTransport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(url.to_string());
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| {
                    Err(HttpError::Connection {
                        message: "offline".to_string(),
                    })
                })
        }
    }

    /// Records requested delays and returns immediately.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingDelay {
        waits: Arc<Mutex<Vec<Duration>>>,
    }

    impl RecordingDelay {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn waits(&self) -> Vec<Duration> {
            self.waits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl Delay for RecordingDelay {
        async fn wait(&self, duration: Duration) {
            self.waits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(duration);
        }
    }

    /// Wraps a store and fails writes to chosen keys.
    #[derive(Debug, Clone)]
    pub struct FailingStore<S> {
        inner: S,
        failures: Arc<Mutex<Vec<(String, KvError)>>>,
    }

    impl<S: KeyValueStore> FailingStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                failures: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn fail_writes_to(&self, key: &str, error: KvError) {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((key.to_string(), error));
        }

        pub fn heal(&self) {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }

        pub fn inner(&self) -> &S {
            &self.inner
        }
    }

    impl<S: KeyValueStore> KeyValueStore for FailingStore<S> {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
            let failure = self
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, e)| e.clone());
            match failure {
                Some(error) => Err(error),
                None => self.inner.set(key, value),
            }
        }

        fn remove(&self, key: &str) -> Result<(), KvError> {
            self.inner.remove(key)
        }
    }
    /// Completes the next write to one key and then panics, once. Stands in
    /// for a host call that blows up part-way through a command.
    #[derive(Debug, Clone)]
    pub struct PanickingStore<S> {
        inner: S,
        key: String,
        armed: Arc<AtomicBool>,
    }

    impl<S: KeyValueStore> PanickingStore<S> {
        pub fn new(inner: S, key: &str) -> Self {
            Self {
                inner,
                key: key.to_string(),
                armed: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        pub fn inner(&self) -> &S {
            &self.inner
        }
    }

    impl<S: KeyValueStore> KeyValueStore for PanickingStore<S> {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
            self.inner.set(key, value)?;
            if key == self.key && self.armed.swap(false, Ordering::SeqCst) {
                panic!("store failed after writing '{key}'");
            }
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), KvError> {
            self.inner.remove(key)
        }
    }
}
