//! Cache-first repository that merges the local store and the remote API.
//!
//! For each entity kind the repository keeps one published value and one
//! status, both exposed as `tokio::sync::watch` channels:
//!
//! - a load reads the store first and publishes a usable hit immediately;
//!   a miss (or an incomplete detail record) falls back to the network
//! - every successful network result is written through to the store before
//!   it is published
//! - a refresh skips the store and always goes to the network
//! - the status a consumer sees is the OR of the store-side and remote-side
//!   flags
//!
//! Cancelling a kind resets its flags at once and advances its epoch. Any
//! cache read or fetch started under an older epoch is dropped when it
//! finishes, so a late result cannot republish a value or revive a flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, CountryApi};
use crate::cache::CountryStore;
use crate::config::Config;
use crate::models::{Country, CountrySummary};

use super::merge::{merge, CacheUsable, NextAction, SourceEvent};
use super::remote::{FetchOutcome, RemoteSource};
use super::state::{EntityKind, FetchMode, RequestContext, RequestState, RequestStatus};

// ============================================================================
// Per-kind plumbing
// ============================================================================

/// Store-side bookkeeping for one kind.
#[derive(Default)]
struct LocalState {
    epoch: u64,
    /// Store reads started in the current epoch and not yet finished
    cache_reads: usize,
    last_requested_key: Option<String>,
}

struct KindChannel<T> {
    value: watch::Sender<Option<T>>,
    status: watch::Sender<RequestStatus>,
    local: Mutex<LocalState>,
}

impl<T> KindChannel<T> {
    fn new() -> Self {
        Self {
            value: watch::Sender::new(None),
            status: watch::Sender::new(RequestStatus::idle()),
            local: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What the repository needs to know about each published entity type.
trait Entity: CacheUsable + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn channel(inner: &Inner) -> &KindChannel<Self>;

    fn read_cache(store: &CountryStore, ctx: &RequestContext) -> Option<Self>;

    fn fetch(remote: &RemoteSource, ctx: &RequestContext) -> BoxFuture<'static, FetchOutcome<Self>>;

    fn persist(store: &CountryStore, value: &Self) -> Result<()>;
}

impl Entity for Vec<CountrySummary> {
    const KIND: EntityKind = EntityKind::List;

    fn channel(inner: &Inner) -> &KindChannel<Self> {
        &inner.list
    }

    fn read_cache(store: &CountryStore, _ctx: &RequestContext) -> Option<Self> {
        Some(store.list())
    }

    fn fetch(remote: &RemoteSource, ctx: &RequestContext) -> BoxFuture<'static, FetchOutcome<Self>> {
        remote.fetch_list(ctx.mode).boxed()
    }

    /// Names only: a list write never overwrites a full record.
    fn persist(store: &CountryStore, value: &Self) -> Result<()> {
        store.upsert_list(value).map(|_| ())
    }
}

impl Entity for Country {
    const KIND: EntityKind = EntityKind::Detail;

    fn channel(inner: &Inner) -> &KindChannel<Self> {
        &inner.detail
    }

    fn read_cache(store: &CountryStore, ctx: &RequestContext) -> Option<Self> {
        let key = ctx.key.as_deref()?;
        store.find_complete(key).map(|cached| cached.data)
    }

    fn fetch(remote: &RemoteSource, ctx: &RequestContext) -> BoxFuture<'static, FetchOutcome<Self>> {
        remote
            .fetch_country(ctx.key.as_deref().unwrap_or_default(), ctx.mode)
            .boxed()
    }

    fn persist(store: &CountryStore, value: &Self) -> Result<()> {
        store.upsert_country(value)
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Inner {
    remote: RemoteSource,
    store: Arc<CountryStore>,
    list: KindChannel<Vec<CountrySummary>>,
    detail: KindChannel<Country>,
    closed: AtomicBool,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a result produced under `ctx` may still be published.
    fn is_current(&self, local: &LocalState, ctx: &RequestContext) -> bool {
        local.epoch == ctx.epoch && local.last_requested_key == ctx.key && !self.is_closed()
    }

    fn status_sender(&self, kind: EntityKind) -> &watch::Sender<RequestStatus> {
        match kind {
            EntityKind::List => &self.list.status,
            EntityKind::Detail => &self.detail.status,
        }
    }

    fn local(&self, kind: EntityKind) -> MutexGuard<'_, LocalState> {
        match kind {
            EntityKind::List => self.list.lock(),
            EntityKind::Detail => self.detail.lock(),
        }
    }

    fn cache_status(&self, kind: EntityKind) -> RequestStatus {
        RequestStatus {
            loading: self.local(kind).cache_reads > 0,
            ..RequestStatus::idle()
        }
    }

    /// Recompute the observed status of `kind` and notify on change.
    fn publish_status(&self, kind: EntityKind) {
        let status = self.cache_status(kind).union(self.remote.flags(kind));
        self.status_sender(kind).send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Record the request and snapshot the current epoch. A load also
    /// starts counting a store read.
    fn context(&self, kind: EntityKind, key: Option<String>, mode: FetchMode) -> RequestContext {
        let mut local = self.local(kind);
        local.last_requested_key = key.clone();
        if mode == FetchMode::Load {
            local.cache_reads += 1;
        }
        RequestContext {
            kind,
            key,
            mode,
            epoch: local.epoch,
        }
    }

    /// Store read for a load. A usable hit is published; a miss falls
    /// through to the network under the same context.
    async fn read_through<E: Entity>(self: Arc<Self>, ctx: RequestContext) {
        let store = Arc::clone(&self.store);
        let read_ctx = ctx.clone();
        let cached = match tokio::task::spawn_blocking(move || E::read_cache(&store, &read_ctx)).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(kind = %ctx.kind, error = %e, "Store read task failed");
                None
            }
        };

        let step = merge(SourceEvent::Cache(cached));
        let channel = E::channel(&self);

        let fetch = {
            let mut local = channel.lock();
            if local.epoch != ctx.epoch || self.is_closed() {
                debug!(kind = %ctx.kind, key = ?ctx.key, "Dropping stale store result");
                return;
            }
            if !self.is_current(&local, &ctx) {
                // A newer load for another key owns the value now
                local.cache_reads = local.cache_reads.saturating_sub(1);
                drop(local);
                debug!(kind = %ctx.kind, key = ?ctx.key, "Dropping superseded store result");
                self.publish_status(ctx.kind);
                return;
            }

            // Register the fallback fetch before the store read stops
            // counting, so `loading` never blips false in between
            let fetch = match step.next {
                NextAction::FetchRemote => {
                    debug!(kind = %ctx.kind, key = ?ctx.key, "Cache miss, fetching from network");
                    Some(E::fetch(&self.remote, &ctx))
                }
                _ => {
                    debug!(kind = %ctx.kind, key = ?ctx.key, "Cache hit");
                    None
                }
            };
            local.cache_reads = local.cache_reads.saturating_sub(1);
            if let Some(value) = step.publish {
                channel.value.send_replace(Some(value));
            }
            fetch
        };
        self.publish_status(ctx.kind);

        if let Some(fetch) = fetch {
            self.complete_fetch::<E>(ctx, fetch).await;
        }
    }

    /// Await a remote fetch and apply its outcome.
    async fn complete_fetch<E: Entity>(
        self: Arc<Self>,
        ctx: RequestContext,
        fetch: BoxFuture<'static, FetchOutcome<E>>,
    ) {
        let outcome = fetch.await;
        let channel = E::channel(&self);

        if channel.lock().epoch != ctx.epoch {
            debug!(kind = %ctx.kind, key = ?ctx.key, "Dropping stale network result");
            self.publish_status(ctx.kind);
            return;
        }

        match &outcome {
            FetchOutcome::Failed(err) => {
                warn!(kind = %ctx.kind, key = ?ctx.key, mode = ?ctx.mode, error = %err, "Network fetch failed");
            }
            FetchOutcome::Cancelled => {
                debug!(kind = %ctx.kind, key = ?ctx.key, "Network fetch cancelled");
            }
            FetchOutcome::Success(_) => {}
        }

        let step = merge(SourceEvent::Network(outcome));
        if let Some(value) = step.publish {
            if step.next == NextAction::Persist {
                self.write_through::<E>(&ctx, value.clone()).await;
            }

            let local = channel.lock();
            if self.is_current(&local, &ctx) {
                channel.value.send_replace(Some(value));
            } else {
                debug!(kind = %ctx.kind, key = ?ctx.key, "Superseded while persisting, not publishing");
            }
        }
        self.publish_status(ctx.kind);
    }

    /// Persist a network result. Failures are logged; the value is still published.
    async fn write_through<E: Entity>(&self, ctx: &RequestContext, value: E) {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || E::persist(&store, &value)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(kind = %ctx.kind, key = ?ctx.key, error = %e, "Failed to cache network result");
            }
            Err(e) => {
                warn!(kind = %ctx.kind, key = ?ctx.key, error = %e, "Store write task failed");
            }
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Cache-first access to the country list and to single countries.
///
/// Operations return immediately and do their work on spawned Tokio tasks,
/// so they must be called from within a Tokio runtime. Results arrive
/// through the watch channels returned by [`countries`](Self::countries),
/// [`country`](Self::country) and [`status`](Self::status).
pub struct CountryRepository {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CountryRepository {
    pub fn new(api: Arc<dyn CountryApi>, store: Arc<CountryStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote: RemoteSource::new(api),
                store,
                list: KindChannel::new(),
                detail: KindChannel::new(),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::default(),
        }
    }

    /// Build the HTTP client and open the on-disk store described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = ApiClient::with_base_url(&config.api_base_url(), config.request_timeout())?;
        let store = CountryStore::open(config.cache_dir()?)?;
        info!(base_url = %api.base_url(), records = store.len(), "Country repository ready");
        Ok(Self::new(Arc::new(api), Arc::new(store)))
    }

    /// The backing store, for read-only metadata such as record age.
    pub fn store(&self) -> &CountryStore {
        &self.inner.store
    }

    // ===== Observation =====

    /// The published country list (`None` until something is published).
    pub fn countries(&self) -> watch::Receiver<Option<Vec<CountrySummary>>> {
        self.inner.list.value.subscribe()
    }

    /// The published country detail (`None` until something is published).
    pub fn country(&self) -> watch::Receiver<Option<Country>> {
        self.inner.detail.value.subscribe()
    }

    /// Combined store and network flags for `kind`.
    pub fn status(&self, kind: EntityKind) -> watch::Receiver<RequestStatus> {
        self.inner.status_sender(kind).subscribe()
    }

    pub fn request_state(&self, kind: EntityKind) -> RequestState {
        let status = *self.inner.status_sender(kind).borrow();
        RequestState {
            loading: status.loading,
            refreshing: status.refreshing,
            failed: status.failed,
            last_requested_key: self.inner.local(kind).last_requested_key.clone(),
        }
    }

    pub fn is_loading(&self, kind: EntityKind) -> bool {
        self.inner.status_sender(kind).borrow().loading
    }

    pub fn is_refreshing(&self, kind: EntityKind) -> bool {
        self.inner.status_sender(kind).borrow().refreshing
    }

    pub fn is_failed(&self, kind: EntityKind) -> bool {
        self.inner.status_sender(kind).borrow().failed
    }

    // ===== Operations =====

    /// Load the country list, from the store if it has any entries.
    pub fn load_countries(&self) {
        self.load::<Vec<CountrySummary>>(None);
    }

    /// Load one country, from the store if its record is complete.
    pub fn load_country(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            warn!("Ignoring country load with an empty name");
            return;
        }

        // Never show another country's detail under this request
        self.inner.detail.value.send_if_modified(|current| {
            if current.as_ref().is_some_and(|c| c.name != name) {
                *current = None;
                true
            } else {
                false
            }
        });
        self.load::<Country>(Some(name.to_string()));
    }

    /// Fetch the country list from the network, bypassing the store.
    pub fn refresh_countries(&self) {
        self.refresh::<Vec<CountrySummary>>(None);
    }

    /// Fetch one country from the network, bypassing the store.
    pub fn refresh_country(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            warn!("Ignoring country refresh with an empty name");
            return;
        }
        self.refresh::<Country>(Some(name.to_string()));
    }

    /// Reset every flag for `kind` and abort its in-flight request.
    ///
    /// Results of work started before the cancel are ignored when they
    /// arrive. A publish that was already under way may still land.
    pub fn cancel(&self, kind: EntityKind) {
        {
            let mut local = self.inner.local(kind);
            local.epoch += 1;
            local.cache_reads = 0;
        }
        self.inner.remote.cancel(kind);
        self.inner.publish_status(kind);
        debug!(%kind, "Request cancelled");
    }

    /// Cancel both kinds, stop every spawned task, and release the store.
    /// Operations issued afterwards are ignored.
    pub async fn shutdown(self) {
        info!("Shutting down country repository");
        self.inner.closed.store(true, Ordering::SeqCst);
        self.cancel(EntityKind::List);
        self.cancel(EntityKind::Detail);

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    fn load<E: Entity>(&self, key: Option<String>) {
        if self.inner.is_closed() {
            debug!(kind = %E::KIND, "Repository shut down, ignoring load");
            return;
        }

        // Cancelling a failed request is asynchronous; the displayed
        // failure must go away now
        self.inner.remote.reset_failed(E::KIND);
        // A fetch for another key must not drive this request's flags
        self.inner.remote.release_superseded(E::KIND, key.as_deref());
        let ctx = self.inner.context(E::KIND, key, FetchMode::Load);
        self.inner.publish_status(E::KIND);

        debug!(kind = %E::KIND, key = ?ctx.key, "Loading");
        self.spawn(Arc::clone(&self.inner).read_through::<E>(ctx));
    }

    fn refresh<E: Entity>(&self, key: Option<String>) {
        if self.inner.is_closed() {
            debug!(kind = %E::KIND, "Repository shut down, ignoring refresh");
            return;
        }

        let ctx = self.inner.context(E::KIND, key, FetchMode::Refresh);
        let fetch = E::fetch(&self.inner.remote, &ctx);
        self.inner.publish_status(E::KIND);

        debug!(kind = %E::KIND, key = ?ctx.key, "Refreshing");
        self.spawn(Arc::clone(&self.inner).complete_fetch::<E>(ctx, fetch));
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self, task: impl std::future::Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(task);
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{
        chile, peru, peru_without_flag, wait_for, wait_until, Reply, ScriptedApi,
    };
    use std::time::Duration;

    fn repository(api: ScriptedApi, store: CountryStore) -> (Arc<ScriptedApi>, Arc<CountryStore>, CountryRepository) {
        let api = Arc::new(api);
        let store = Arc::new(store);
        let repo = CountryRepository::new(api.clone(), Arc::clone(&store));
        (api, store, repo)
    }

    async fn settle(repo: &CountryRepository, kind: EntityKind) -> RequestStatus {
        wait_for(&mut repo.status(kind), |s| !s.loading).await
    }

    fn store_with(countries: &[Country]) -> CountryStore {
        let store = CountryStore::in_memory();
        for country in countries {
            store.upsert_country(country).expect("upsert");
        }
        store
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_complete_cache_hit_skips_network() {
        let (api, _store, repo) = repository(ScriptedApi::new(), store_with(&[peru()]));

        repo.load_country("Peru");
        let status = settle(&repo, EntityKind::Detail).await;

        assert!(status.is_idle());
        assert_eq!(*repo.country().borrow(), Some(peru()));
        assert!(api.detail_calls().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_cache_fetches_once_and_persists() {
        let api = ScriptedApi::new().with_country("Peru", Reply::Ok(peru()));
        let (api, store, repo) = repository(api, store_with(&[peru_without_flag()]));

        repo.load_country("Peru");
        let published = wait_for(&mut repo.country(), |c| c.is_some()).await;
        settle(&repo, EntityKind::Detail).await;

        assert_eq!(published, Some(peru()));
        assert_eq!(api.detail_calls(), vec!["Peru".to_string()]);
        assert_eq!(store.find_complete("Peru").map(|c| c.data), Some(peru()));
    }

    #[tokio::test]
    async fn test_absent_record_fetches_once() {
        let api = ScriptedApi::new().with_country("Chile", Reply::Ok(chile()));
        let (api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Chile");
        wait_for(&mut repo.country(), |c| c.is_some()).await;
        settle(&repo, EntityKind::Detail).await;

        assert_eq!(api.detail_calls(), vec!["Chile".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_list_cache_fetches_and_persists() {
        let api = ScriptedApi::new().with_list(Reply::Ok(vec![CountrySummary::new("Peru")]));
        let (api, store, repo) = repository(api, CountryStore::in_memory());

        repo.load_countries();
        let published = wait_for(&mut repo.countries(), |l| l.is_some()).await;
        settle(&repo, EntityKind::List).await;

        assert_eq!(published, Some(vec![CountrySummary::new("Peru")]));
        assert_eq!(api.list_calls(), 1);
        assert_eq!(store.list(), vec![CountrySummary::new("Peru")]);
    }

    #[tokio::test]
    async fn test_list_cache_hit_skips_network() {
        let (api, _store, repo) = repository(ScriptedApi::new(), store_with(&[peru(), chile()]));

        repo.load_countries();
        let published = wait_for(&mut repo.countries(), |l| l.is_some()).await;

        assert_eq!(
            published,
            Some(vec![CountrySummary::new("Chile"), CountrySummary::new("Peru")])
        );
        assert_eq!(api.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_load_publishes_same_value() {
        let (_api, _store, repo) = repository(ScriptedApi::new(), store_with(&[peru()]));
        let mut rx = repo.country();

        repo.load_country("Peru");
        let first = wait_for(&mut rx, |c| c.is_some()).await;
        settle(&repo, EntityKind::Detail).await;
        rx.borrow_and_update();

        repo.load_country("Peru");
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("published again")
            .expect("sender alive");
        assert_eq!(*rx.borrow(), first);
    }

    #[tokio::test]
    async fn test_loading_stays_set_across_cache_fallback() {
        let api = ScriptedApi::held().with_country("Peru", Reply::Ok(peru()));
        let (api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Peru");
        assert!(repo.is_loading(EntityKind::Detail));

        api.wait_for_detail_calls(1).await;
        assert!(repo.is_loading(EntityKind::Detail));

        api.release(1);
        let status = settle(&repo, EntityKind::Detail).await;
        assert!(status.is_idle());
        assert_eq!(*repo.country().borrow(), Some(peru()));
    }

    #[tokio::test]
    async fn test_load_clears_other_country_immediately() {
        let api = ScriptedApi::held().with_country("Chile", Reply::Ok(chile()));
        let (_api, _store, repo) = repository(api, store_with(&[peru()]));

        repo.load_country("Peru");
        wait_for(&mut repo.country(), |c| c.is_some()).await;

        repo.load_country("Chile");
        assert_eq!(*repo.country().borrow(), None);
        assert_eq!(
            repo.request_state(EntityKind::Detail).last_requested_key.as_deref(),
            Some("Chile")
        );
    }

    #[tokio::test]
    async fn test_superseded_detail_is_persisted_but_not_published() {
        let api = ScriptedApi::held().with_country("Chile", Reply::Ok(chile()));
        let (api, store, repo) = repository(api, store_with(&[peru()]));

        repo.load_country("Chile");
        api.wait_for_detail_calls(1).await;
        repo.load_country("Peru");
        wait_for(&mut repo.country(), |c| c.is_some()).await;

        api.release(1);
        wait_until(|| store.find_complete("Chile").is_some()).await;
        settle(&repo, EntityKind::Detail).await;

        assert_eq!(*repo.country().borrow(), Some(peru()));
    }

    #[tokio::test]
    async fn test_superseded_failure_does_not_flag_current_detail() {
        let api = ScriptedApi::held().with_country("Peru", Reply::Timeout);
        let (api, _store, repo) = repository(api, store_with(&[chile()]));

        repo.load_country("Peru");
        api.wait_for_detail_calls(1).await;
        repo.load_country("Chile");
        wait_for(&mut repo.country(), |c| c.is_some()).await;

        let status = settle(&repo, EntityKind::Detail).await;
        assert!(status.is_idle());

        api.release(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(repo.status(EntityKind::Detail).borrow().is_idle());
        assert_eq!(*repo.country().borrow(), Some(chile()));
    }

    #[tokio::test]
    async fn test_empty_name_is_ignored() {
        let (api, _store, repo) = repository(ScriptedApi::new(), CountryStore::in_memory());

        repo.load_country("   ");
        assert!(repo.status(EntityKind::Detail).borrow().is_idle());
        assert_eq!(repo.request_state(EntityKind::Detail).last_requested_key, None);
        assert!(api.detail_calls().is_empty());
    }

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_primary_load_failure_sets_failed() {
        let api = ScriptedApi::new().with_country("Peru", Reply::Timeout);
        let (_api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Peru");
        let status = settle(&repo, EntityKind::Detail).await;

        assert!(status.failed);
        assert!(!status.refreshing);
        assert_eq!(*repo.country().borrow(), None);
    }

    #[tokio::test]
    async fn test_unsuccessful_status_fails_without_publishing() {
        let api = ScriptedApi::new().with_list(Reply::Status(500));
        let (_api, store, repo) = repository(api, CountryStore::in_memory());

        repo.load_countries();
        let status = settle(&repo, EntityKind::List).await;

        assert!(status.failed);
        assert_eq!(*repo.countries().borrow(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_clears_failure_immediately() {
        let api = ScriptedApi::held().with_country("Peru", Reply::Timeout);
        let (api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Peru");
        api.release(1);
        assert!(settle(&repo, EntityKind::Detail).await.failed);

        repo.load_country("Peru");
        let status = *repo.status(EntityKind::Detail).borrow();
        assert!(!status.failed);
        assert!(status.loading);
    }

    // -------------------------------------------------------------------------
    // Refreshing
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_bypasses_cache_and_replaces_value() {
        let newer = Country {
            population: Some(34_000_000),
            ..peru()
        };
        let api = ScriptedApi::new().with_country("Peru", Reply::Ok(newer.clone()));
        let (api, store, repo) = repository(api, store_with(&[peru()]));

        repo.refresh_country("Peru");
        assert!(repo.is_refreshing(EntityKind::Detail));

        let published = wait_for(&mut repo.country(), |c| c.is_some()).await;
        let status = settle(&repo, EntityKind::Detail).await;

        assert_eq!(published, Some(newer.clone()));
        assert!(status.is_idle());
        assert_eq!(api.detail_calls().len(), 1);
        assert_eq!(store.find_complete("Peru").map(|c| c.data), Some(newer));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_displayed_value() {
        let api = ScriptedApi::new().with_country("Peru", Reply::Ok(peru()));
        let (api, _store, repo) = repository(api, store_with(&[peru_without_flag()]));

        repo.load_country("Peru");
        wait_for(&mut repo.country(), |c| c.is_some()).await;
        settle(&repo, EntityKind::Detail).await;

        api.set_country("Peru", Reply::Timeout);
        repo.refresh_country("Peru");
        let status = settle(&repo, EntityKind::Detail).await;

        assert!(!status.refreshing);
        assert!(!status.failed);
        assert_eq!(*repo.country().borrow(), Some(peru()));
    }

    #[tokio::test]
    async fn test_list_refresh_keeps_full_records() {
        let api = ScriptedApi::new().with_list(Reply::Ok(vec![
            CountrySummary::new("Chile"),
            CountrySummary::new("Peru"),
        ]));
        let (_api, store, repo) = repository(api, store_with(&[peru()]));

        repo.refresh_countries();
        wait_for(&mut repo.countries(), |l| l.is_some()).await;
        settle(&repo, EntityKind::List).await;

        assert_eq!(store.len(), 2);
        assert_eq!(store.find_complete("Peru").map(|c| c.data), Some(peru()));
    }

    // -------------------------------------------------------------------------
    // Cancellation and lifecycle
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_suppresses_late_result() {
        let api = ScriptedApi::held().with_country("Peru", Reply::Ok(peru()));
        let (api, store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Peru");
        api.wait_for_detail_calls(1).await;

        repo.cancel(EntityKind::Detail);
        assert!(repo.status(EntityKind::Detail).borrow().is_idle());

        api.release(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(repo.status(EntityKind::Detail).borrow().is_idle());
        assert_eq!(*repo.country().borrow(), None);
        assert!(store.get("Peru").is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_cache_read_finishes() {
        let api = ScriptedApi::new().with_country("Peru", Reply::Timeout);
        let (api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_country("Peru");
        repo.cancel(EntityKind::Detail);
        assert!(repo.status(EntityKind::Detail).borrow().is_idle());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(repo.status(EntityKind::Detail).borrow().is_idle());
        assert!(api.detail_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_other_kind_running() {
        let api = ScriptedApi::held().with_list(Reply::Ok(vec![CountrySummary::new("Peru")]));
        let (api, _store, repo) = repository(api, CountryStore::in_memory());

        repo.load_countries();
        api.wait_for_list_calls(1).await;

        repo.cancel(EntityKind::Detail);
        assert!(repo.is_loading(EntityKind::List));

        api.release(1);
        wait_for(&mut repo.countries(), |l| l.is_some()).await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_store_and_ignores_operations() {
        let api = ScriptedApi::held();
        let (api, store, repo) = repository(api, CountryStore::in_memory());

        repo.load_countries();
        api.wait_for_list_calls(1).await;
        let mut status = repo.status(EntityKind::List);
        let countries = repo.countries();

        repo.shutdown().await;

        assert!(status.borrow_and_update().is_idle());
        assert_eq!(*countries.borrow(), None);
        wait_until(|| Arc::strong_count(&store) == 1).await;
    }
}
