//! Host doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camplist_core::capabilities::{HttpError, HttpResponse};
use camplist_core::{
    Delay, KeyValueStore, KvError, MemoryStore, Planner, PlannerConfig, TemplateLoader,
    TemplateTransport,
};

pub const DATA_KEY: &str = "campChecklist_data";
pub const META_KEY: &str = "campChecklist_meta";

/// Serves queued responses, then fails every further request.
#[derive(Clone, Default)]
pub struct Transport {
    queue: Arc<Mutex<VecDeque<Result<HttpResponse, HttpError>>>>,
    pub hits: Arc<Mutex<Vec<String>>>,
}

impl Transport {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn serving(body: &str) -> Self {
        let transport = Self::default();
        transport.respond(Ok(HttpResponse::ok(body.as_bytes().to_vec())));
        transport
    }

    pub fn respond(&self, response: Result<HttpResponse, HttpError>) {
        self.queue.lock().unwrap().push_back(response);
    }

    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[async_trait]
impl TemplateTransport for Transport {
    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.hits.lock().unwrap().push(url.to_string());
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(HttpError::Connection {
                    message: "offline".into(),
                })
            })
    }
}

/// Records requested waits instead of sleeping.
#[derive(Clone, Default)]
pub struct Waits(pub Arc<Mutex<Vec<Duration>>>);

impl Waits {
    pub fn recorded(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delay for Waits {
    async fn wait(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

/// Fails every write to one key with the given error.
#[derive(Clone)]
pub struct BrokenKey {
    pub inner: MemoryStore,
    pub key: String,
    pub error: KvError,
}

impl KeyValueStore for BrokenKey {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if key == self.key {
            return Err(self.error.clone());
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.inner.remove(key)
    }
}

pub type TestPlanner<S = MemoryStore> = Planner<S>;

pub fn loader(transport: Transport, waits: Waits) -> TemplateLoader<Transport, Waits> {
    TemplateLoader::from_config(&PlannerConfig::default(), transport, waits).unwrap()
}

pub async fn load<S: KeyValueStore>(store: S) -> TestPlanner<S> {
    load_with(store, &loader(Transport::offline(), Waits::default())).await
}

pub async fn load_with<S: KeyValueStore>(
    store: S,
    loader: &TemplateLoader<Transport, Waits>,
) -> TestPlanner<S> {
    Planner::load(&PlannerConfig::default(), store, loader)
        .await
        .unwrap()
}

/// A store already holding the single-section "General / Tent" list.
pub fn fallback_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_raw(
        DATA_KEY,
        r#"[{"id":"general","title":"General","items":[
            {"id":"tent","text":"Tent","checked":false}
        ]}]"#,
    );
    store
}

pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}
