//! Principal Resolver.
//!
//! Maps `(tenant, caller)` to the caller's [`PrincipalSet`] through a TTL
//! cache. A miss starts one upstream fetch and parks it in the cache as a
//! shared future; every concurrent caller for the same key awaits that same
//! future instead of issuing its own lookup.
//!
//! Failures are never cached and never widen access: the caller gets
//! `IdentityUnavailable` and the pipeline treats that as an empty set.

use crate::identity::IdentityDirectory;
use crate::principal::{Principal, PrincipalSet};
use bastion_core::config::{AppConfig, MAX_PRINCIPAL_TTL_SECS, MIN_PRINCIPAL_TTL_SECS};
use bastion_core::{AppError, AppResult, Clock, SystemClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type FetchResult = Result<Arc<PrincipalSet>, String>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Cache key. Kept as a pair so tenants can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant: String,
    caller: String,
}

impl CacheKey {
    fn new(tenant: &str, caller: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            caller: caller.to_string(),
        }
    }
}

enum Slot {
    Ready(Arc<PrincipalSet>),
    /// A fetch in flight; `generation` tells a finished waiter whether the
    /// slot still belongs to its fetch.
    Pending { generation: u64, fetch: SharedFetch },
}

/// Cache and upstream settings.
#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub ttl: Duration,
    pub max_entries: usize,
    pub fetch_timeout: Duration,
}

impl ResolverSettings {
    /// `ttl` is clamped into the 5-15 minute window.
    pub fn new(ttl: Duration, max_entries: usize, fetch_timeout: Duration) -> Self {
        let ttl = ttl.clamp(
            Duration::from_secs(MIN_PRINCIPAL_TTL_SECS),
            Duration::from_secs(MAX_PRINCIPAL_TTL_SECS),
        );
        Self {
            ttl,
            max_entries,
            fetch_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.principal_ttl(),
            config.identity.max_entries,
            config.identity_timeout(),
        )
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), 10_000, Duration::from_secs(1))
    }
}

pub struct PrincipalResolver {
    directory: Arc<IdentityDirectory>,
    settings: ResolverSettings,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<CacheKey, Slot>>,
    generation: AtomicU64,
}

impl PrincipalResolver {
    pub fn new(directory: IdentityDirectory, settings: ResolverSettings) -> Self {
        Self {
            directory: Arc::new(directory),
            settings,
            clock: Arc::new(SystemClock),
            cache: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Resolve the caller's current principal set.
    ///
    /// An unexpired cache entry is returned without I/O. Otherwise the
    /// tenant's identity providers are queried once for all concurrent
    /// callers of this key, bounded by the fetch timeout.
    pub async fn resolve(&self, tenant: &str, caller: &str) -> AppResult<Arc<PrincipalSet>> {
        let key = CacheKey::new(tenant, caller);

        let (generation, fetch) = {
            let now = self.clock.now();
            let mut cache = self.lock();
            let in_flight = match cache.get(&key) {
                Some(Slot::Ready(set)) if !set.is_expired(now) => {
                    tracing::trace!("Principal cache hit for {}/{}", tenant, caller);
                    return Ok(Arc::clone(set));
                }
                Some(Slot::Pending { generation, fetch }) => Some((*generation, fetch.clone())),
                _ => None,
            };

            match in_flight {
                Some(joined) => {
                    tracing::trace!("Joining in-flight resolution for {}/{}", tenant, caller);
                    joined
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.start_fetch(&key);
                    cache.insert(
                        key.clone(),
                        Slot::Pending {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    (generation, fetch)
                }
            }
        };

        let outcome = fetch.await;

        {
            let mut cache = self.lock();
            let owns_slot = matches!(
                cache.get(&key),
                Some(Slot::Pending { generation: current, .. }) if *current == generation
            );
            if owns_slot {
                match &outcome {
                    Ok(set) => {
                        cache.insert(key, Slot::Ready(Arc::clone(set)));
                        self.evict(&mut cache);
                    }
                    Err(reason) => {
                        tracing::warn!("Identity resolution failed for tenant {}: {}", tenant, reason);
                        cache.remove(&key);
                    }
                }
            }
        }

        outcome.map_err(AppError::IdentityUnavailable)
    }

    fn start_fetch(&self, key: &CacheKey) -> SharedFetch {
        let directory = Arc::clone(&self.directory);
        let clock = Arc::clone(&self.clock);
        let timeout = self.settings.fetch_timeout;
        let ttl = chrono::Duration::from_std(self.settings.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_PRINCIPAL_TTL_SECS as i64));
        let tenant = key.tenant.clone();
        let caller = key.caller.clone();

        async move {
            tracing::debug!("Resolving principals for {}/{}", tenant, caller);
            let lookup = tokio::time::timeout(timeout, fetch_principals(&directory, &tenant, &caller)).await;
            match lookup {
                Ok(Ok(principals)) => {
                    let set = PrincipalSet::new(tenant, caller, principals, clock.now(), ttl);
                    tracing::debug!("Resolved {} principals", set.len());
                    Ok(Arc::new(set))
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("identity lookup timed out after {:?}", timeout)),
            }
        }
        .boxed()
        .shared()
    }

    /// Drop expired entries, then trim ready entries down to `max_entries`.
    fn evict(&self, cache: &mut HashMap<CacheKey, Slot>) {
        let now = self.clock.now();
        cache.retain(|_, slot| match slot {
            Slot::Ready(set) => !set.is_expired(now),
            Slot::Pending { .. } => true,
        });

        if cache.len() <= self.settings.max_entries {
            return;
        }

        let mut overflow = cache.len() - self.settings.max_entries;
        let ready: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            if overflow == 0 {
                break;
            }
            if cache.remove(&key).is_some() {
                overflow -= 1;
            }
        }
    }

    /// The cached, unexpired set for a caller, without I/O.
    pub fn current(&self, tenant: &str, caller: &str) -> Option<Arc<PrincipalSet>> {
        let now = self.clock.now();
        match self.lock().get(&CacheKey::new(tenant, caller)) {
            Some(Slot::Ready(set)) if !set.is_expired(now) => Some(Arc::clone(set)),
            _ => None,
        }
    }

    /// Re-check a set resolved earlier against the cache, without I/O.
    ///
    /// A newer cached set replaces `held`. If the entry was invalidated,
    /// expired or is being fetched again, `held` is no longer trusted and the
    /// empty set comes back.
    pub fn revalidate(&self, held: &Arc<PrincipalSet>) -> Arc<PrincipalSet> {
        match self.current(held.tenant(), held.caller()) {
            Some(latest) if latest.issued_at() >= held.issued_at() => latest,
            Some(_) => Arc::clone(held),
            None => {
                tracing::debug!(
                    "Principals for {}/{} no longer cached; gating with none",
                    held.tenant(),
                    held.caller()
                );
                Arc::new(PrincipalSet::empty(held.tenant(), held.caller(), self.clock.now()))
            }
        }
    }

    /// Forget the cached set for one caller.
    pub fn invalidate(&self, tenant: &str, caller: &str) {
        self.lock().remove(&CacheKey::new(tenant, caller));
    }

    /// Number of resolved sets currently cached.
    pub fn cached_entries(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}

/// Query every provider of the tenant and merge the results.
async fn fetch_principals(
    directory: &IdentityDirectory,
    tenant: &str,
    caller: &str,
) -> AppResult<Vec<Principal>> {
    let identity = directory.tenant(tenant).ok_or_else(|| {
        AppError::IdentityUnavailable(format!("no identity providers for tenant {}", tenant))
    })?;

    let lookups = identity
        .providers
        .iter()
        .map(|provider| provider.memberships(tenant, caller));
    let found = futures::future::try_join_all(lookups).await?;

    let mut principals = vec![Principal::user(caller)];
    for principal in found.into_iter().flatten() {
        if principal.is_org_link() && !identity.allow_org_wide_links {
            tracing::debug!("Dropping {} for {}: org-wide links not enabled", principal, tenant);
            continue;
        }
        principals.push(principal);
    }
    Ok(principals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityProvider, TenantIdentity};
    use bastion_core::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    /// Counts lookups; optionally slow or failing.
    struct FakeDirectory {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
        memberships: Vec<Principal>,
    }

    impl FakeDirectory {
        fn new(memberships: Vec<Principal>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                fail: false,
                memberships,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IdentityProvider for FakeDirectory {
        fn name(&self) -> &str {
            "fake"
        }

        async fn memberships(&self, _tenant: &str, _caller: &str) -> AppResult<Vec<Principal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AppError::IdentityUnavailable("directory down".to_string()));
            }
            Ok(self.memberships.clone())
        }
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn resolver(
        provider: Arc<FakeDirectory>,
        allow_links: bool,
        settings: ResolverSettings,
    ) -> (PrincipalResolver, Arc<ManualClock>) {
        let directory = IdentityDirectory::new().with_tenant(
            "t1",
            TenantIdentity {
                providers: vec![provider as Arc<dyn IdentityProvider>],
                allow_org_wide_links: allow_links,
            },
        );
        let clock = Arc::new(ManualClock::new(start()));
        let resolver = PrincipalResolver::new(directory, settings).with_clock(clock.clone());
        (resolver, clock)
    }

    #[tokio::test]
    async fn test_resolve_merges_direct_identity_and_caches() {
        let provider = Arc::new(FakeDirectory::new(vec![Principal::group("box/eng")]));
        let (resolver, _clock) = resolver(provider.clone(), false, ResolverSettings::default());

        let set = resolver.resolve("t1", "bob").await.unwrap();
        assert!(set.contains_token("user:bob"));
        assert!(set.contains_token("group:box/eng"));
        assert_eq!(set.expires_at() - set.issued_at(), chrono::Duration::minutes(10));

        let again = resolver.resolve("t1", "bob").await.unwrap();
        assert!(Arc::ptr_eq(&set, &again));
        assert_eq!(provider.calls(), 1);
        assert_eq!(resolver.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let provider = Arc::new(FakeDirectory::new(vec![]));
        let (resolver, _clock) = resolver(provider.clone(), false, ResolverSettings::default());

        let results =
            futures::future::join_all((0..10).map(|_| resolver.resolve("t1", "bob"))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refreshes_once_for_concurrent_requests() {
        let provider = Arc::new(FakeDirectory::new(vec![]));
        let (resolver, clock) = resolver(provider.clone(), false, ResolverSettings::default());

        resolver.resolve("t1", "bob").await.unwrap();
        clock.advance(chrono::Duration::minutes(11));

        let results =
            futures::future::join_all((0..5).map(|_| resolver.resolve("t1", "bob"))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_closed_and_is_not_cached() {
        let mut slow = FakeDirectory::new(vec![Principal::group("box/eng")]);
        slow.delay = Duration::from_secs(5);
        let provider = Arc::new(slow);
        let settings =
            ResolverSettings::new(Duration::from_secs(600), 100, Duration::from_millis(30));
        let (resolver, _clock) = resolver(provider.clone(), false, settings);

        let err = resolver.resolve("t1", "eve").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityUnavailable(_)));
        assert_eq!(resolver.cached_entries(), 0);

        // The next request tries upstream again rather than reusing a failure
        let _ = resolver.resolve("t1", "eve").await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_is_identity_unavailable() {
        let mut failing = FakeDirectory::new(vec![]);
        failing.fail = true;
        let (resolver, _clock) = resolver(Arc::new(failing), false, ResolverSettings::default());

        let err = resolver.resolve("t1", "bob").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_identity_unavailable() {
        let provider = Arc::new(FakeDirectory::new(vec![]));
        let (resolver, _clock) = resolver(provider.clone(), false, ResolverSettings::default());

        assert!(resolver.resolve("t2", "bob").await.is_err());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_org_links_require_opt_in() {
        let links = vec![Principal::org_link("box/org"), Principal::group("box/eng")];

        let (closed, _) = resolver(Arc::new(FakeDirectory::new(links.clone())), false, ResolverSettings::default());
        let set = closed.resolve("t1", "bob").await.unwrap();
        assert!(!set.contains_token("link:box/org"));
        assert!(set.contains_token("group:box/eng"));

        let (open, _) = resolver(Arc::new(FakeDirectory::new(links)), true, ResolverSettings::default());
        assert!(open.resolve("t1", "bob").await.unwrap().contains_token("link:box/org"));
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_entries() {
        let provider = Arc::new(FakeDirectory::new(vec![]));
        let shared: Arc<dyn IdentityProvider> = provider.clone();
        let directory = IdentityDirectory::new()
            .with_tenant("t1", TenantIdentity { providers: vec![shared.clone()], allow_org_wide_links: false })
            .with_tenant("t2", TenantIdentity { providers: vec![shared], allow_org_wide_links: false });
        let resolver = PrincipalResolver::new(directory, ResolverSettings::default());

        let a = resolver.resolve("t1", "bob").await.unwrap();
        let b = resolver.resolve("t2", "bob").await.unwrap();
        assert_eq!(a.tenant(), "t1");
        assert_eq!(b.tenant(), "t2");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_max_entries_and_invalidate() {
        let provider = Arc::new(FakeDirectory::new(vec![]));
        let settings = ResolverSettings::new(Duration::from_secs(600), 2, Duration::from_secs(1));
        let (resolver, _clock) = resolver(provider.clone(), false, settings);

        for caller in ["a", "b", "c"] {
            resolver.resolve("t1", caller).await.unwrap();
        }
        assert_eq!(resolver.cached_entries(), 2);

        for caller in ["a", "b", "c"] {
            resolver.invalidate("t1", caller);
        }
        assert_eq!(resolver.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_revalidate_follows_the_cache() {
        let provider = Arc::new(FakeDirectory::new(vec![Principal::group("aad/finance")]));
        let (resolver, clock) = resolver(provider.clone(), false, ResolverSettings::default());

        let held = resolver.resolve("t1", "bob").await.unwrap();
        assert!(Arc::ptr_eq(&resolver.revalidate(&held), &held));

        // Invalidated and not yet fetched again
        resolver.invalidate("t1", "bob");
        assert!(resolver.current("t1", "bob").is_none());
        assert!(resolver.revalidate(&held).is_empty());

        // A newer resolution replaces the held set
        clock.advance(chrono::Duration::seconds(5));
        let fresh = resolver.resolve("t1", "bob").await.unwrap();
        assert!(Arc::ptr_eq(&resolver.revalidate(&held), &fresh));

        // Expired entries are not trusted
        clock.advance(chrono::Duration::minutes(11));
        assert!(resolver.current("t1", "bob").is_none());
        assert!(resolver.revalidate(&fresh).is_empty());
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_ttl_clamped() {
        let settings = ResolverSettings::new(Duration::from_secs(30), 10, Duration::from_secs(1));
        assert_eq!(settings.ttl, Duration::from_secs(300));
    }
}
