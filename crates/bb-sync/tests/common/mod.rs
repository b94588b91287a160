#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bb_compiler::{build_static_index, FilterCompiler};
use bb_core::{Diff, QuotaLimits, StaticRuleIndex, SubscriptionInfo, SubscriptionOptions, TransportError};
use bb_sync::{DiffFetcher, EngineConfig, MemoryPersistence, Persistence, PersistenceError, SyncEngine};
use parking_lot::Mutex;

pub const EASYLIST: &str = "https://lists.example/easylist.txt";
pub const PRIVACY: &str = "https://lists.example/privacy.txt";
pub const PLAIN: &str = "https://lists.example/plain.txt";

pub const S1: &str = "||s1.example^";
pub const S2: &str = "||s2.example^";
pub const S3: &str = "||s3.example^";

pub fn f(n: u32) -> String {
    format!("||f{n}.example^")
}

pub fn statics() -> StaticRuleIndex {
    let baseline = [S1, S2, S3].join("\n");
    let (index, _) = build_static_index([(EASYLIST, baseline.as_str()), (PLAIN, "||plain.example^")]);
    index
}

pub fn updatable() -> SubscriptionOptions {
    SubscriptionOptions {
        diff_endpoint: Some("https://diffs.example/".to_string()),
        enabled: true,
    }
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, Result<Diff, TransportError>>,
    fetches: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Serves a configured response per subscription url.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn respond(&self, url: &str, response: Result<Diff, TransportError>) {
        self.script.lock().responses.insert(url.to_string(), response);
    }

    pub fn fetches(&self) -> usize {
        self.script.lock().fetches
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.lock().max_in_flight
    }
}

impl DiffFetcher for ScriptedFetcher {
    fn fetch(&self, subscription: &SubscriptionInfo) -> impl Future<Output = Result<Diff, TransportError>> + Send {
        let response = {
            let mut script = self.script.lock();
            script.fetches += 1;
            script
                .responses
                .get(&subscription.url)
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Connection("no diff scripted".to_string())))
        };
        let script = Arc::clone(&self.script);
        let delay = self.delay;

        async move {
            {
                let mut script = script.lock();
                script.in_flight += 1;
                script.max_in_flight = script.max_in_flight.max(script.in_flight);
            }
            tokio::time::sleep(delay).await;
            script.lock().in_flight -= 1;
            response
        }
    }
}

/// Memory persistence whose writes can be made to fail.
#[derive(Clone, Default)]
pub struct FlakyPersistence {
    pub inner: MemoryPersistence,
    failing: Arc<AtomicBool>,
}

impl FlakyPersistence {
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Persistence for FlakyPersistence {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(format!("write to {key} refused")));
        }
        self.inner.set(key, value)
    }
}

pub fn config(dynamic_max: usize, disabled_max: usize) -> EngineConfig {
    EngineConfig {
        quota: QuotaLimits::new(dynamic_max, disabled_max),
        ..EngineConfig::default()
    }
}

pub fn engine(
    limits: (usize, usize),
    fetcher: &ScriptedFetcher,
    persistence: impl Persistence + 'static,
) -> SyncEngine<ScriptedFetcher> {
    SyncEngine::open(
        &config(limits.0, limits.1),
        statics(),
        fetcher.clone(),
        FilterCompiler::new(),
        persistence,
    )
    .unwrap()
}
