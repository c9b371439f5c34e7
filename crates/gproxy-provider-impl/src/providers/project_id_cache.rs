//! TTL + singleflight cache for the cloud project id that Antigravity and
//! GeminiCLI resolve per credential (`loadCodeAssist`/`onboardUser`).
//!
//! Keyed by credential id (a connection): concurrent requests racing on the
//! same connection share one in-flight detection call instead of each firing
//! its own round trip, and a resolved id is reused until it expires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

use gproxy_provider_core::{CredentialId, ProviderResult};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct ReadyEntry {
    project_id: String,
    expires_at: Instant,
}

pub(crate) struct ProjectIdCache {
    ttl: Duration,
    ready: Mutex<HashMap<CredentialId, ReadyEntry>>,
    pending: Mutex<HashMap<CredentialId, Arc<OnceCell<Option<String>>>>>,
}

impl ProjectIdCache {
    pub(crate) fn new(ttl: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            ttl,
            ready: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        });
        Self::spawn_sweeper(cache.clone());
        cache
    }

    fn spawn_sweeper(cache: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                cache.sweep_expired().await;
            }
        });
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        self.ready.lock().await.retain(|_, entry| entry.expires_at > now);
    }

    /// Resolves a project id for `credential_id`. `fetch` runs only for whichever
    /// caller wins the race to populate the pending slot; every other concurrent
    /// caller for the same credential awaits that same in-flight result instead of
    /// starting its own `loadCodeAssist`/`onboardUser` call.
    pub(crate) async fn resolve<F, Fut>(
        &self,
        credential_id: CredentialId,
        fetch: F,
    ) -> ProviderResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<Option<String>>>,
    {
        if let Some(project_id) = self.get_fresh(credential_id).await {
            return Ok(Some(project_id));
        }

        let cell = {
            let mut pending = self.pending.lock().await;
            pending
                .entry(credential_id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_try_init(fetch).await.map(|value| value.clone());
        // The slot is only meaningful while a fetch is in flight; drop it once
        // settled so a later cache miss starts a fresh attempt rather than
        // replaying a completed (or failed) `OnceCell`.
        self.pending.lock().await.remove(&credential_id);

        match result {
            Ok(Some(project_id)) => {
                self.ready.lock().await.insert(
                    credential_id,
                    ReadyEntry {
                        project_id: project_id.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                Ok(Some(project_id))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_fresh(&self, credential_id: CredentialId) -> Option<String> {
        let ready = self.ready.lock().await;
        let entry = ready.get(&credential_id)?;
        (entry.expires_at > Instant::now()).then(|| entry.project_id.clone())
    }

    /// Evicts cached and in-flight state for a credential that was removed
    /// (connection deleted). This detaches a pending slot from the map; a fetch
    /// already in flight for it is not cancelled, since the provider hooks that
    /// drive `resolve` have no cancellation token to carry through here.
    pub(crate) async fn remove(&self, credential_id: CredentialId) {
        self.ready.lock().await.remove(&credential_id);
        self.pending.lock().await.remove(&credential_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_resolves_for_same_credential_dedupe_into_one_fetch() {
        let cache = ProjectIdCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .resolve(1, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(Some("proj-1".to_string()))
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().as_deref(), Some("proj-1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolved_value_is_served_from_cache_without_refetching() {
        let cache = ProjectIdCache::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let result = cache
                .resolve(7, || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Some("proj-7".to_string()))
                    }
                })
                .await
                .unwrap();
            assert_eq!(result.as_deref(), Some("proj-7"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_credentials_fetch_independently() {
        let cache = ProjectIdCache::new(Duration::from_secs(60));
        let a = cache
            .resolve(1, || async { Ok(Some("proj-a".to_string())) })
            .await
            .unwrap();
        let b = cache
            .resolve(2, || async { Ok(Some("proj-b".to_string())) })
            .await
            .unwrap();
        assert_eq!(a.as_deref(), Some("proj-a"));
        assert_eq!(b.as_deref(), Some("proj-b"));
    }

    #[tokio::test]
    async fn remove_evicts_cached_value() {
        let cache = ProjectIdCache::new(Duration::from_secs(60));
        cache
            .resolve(5, || async { Ok(Some("proj-5".to_string())) })
            .await
            .unwrap();
        cache.remove(5).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        cache
            .resolve(5, || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("proj-5-again".to_string()))
                }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_does_not_poison_future_resolves() {
        let cache = ProjectIdCache::new(Duration::from_secs(60));
        let first = cache
            .resolve(9, || async {
                Err(gproxy_provider_core::ProviderError::Other(
                    "detect failed".to_string(),
                ))
            })
            .await;
        assert!(first.is_err());
        let second = cache
            .resolve(9, || async { Ok(Some("proj-9".to_string())) })
            .await
            .unwrap();
        assert_eq!(second.as_deref(), Some("proj-9"));
    }
}
