//! Remote side of the sync layer: one cancellable request slot per entity kind.
//!
//! Starting a fetch registers it in its kind's slot synchronously, so the
//! loading/refreshing flags are set before the caller regains control. The
//! returned future is `'static` and can be awaited from any task.
//!
//! A new fetch replaces the slot without aborting the previous request. The
//! previous request still runs to completion and still returns its outcome,
//! but only the request currently occupying the slot updates the flags.
//! A detail request can also be detached when a load moves on to another key.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use tracing::debug;

use crate::api::{ApiError, CountryApi};
use crate::models::{Country, CountrySummary};

use super::state::{EntityKind, FetchMode, RequestStatus};

/// How a remote request ended.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Success(T),
    /// Transport error, timeout, or unsuccessful status
    Failed(ApiError),
    /// Aborted through `RemoteSource::cancel`
    Cancelled,
}

struct InFlight {
    ticket: u64,
    mode: FetchMode,
    key: Option<String>,
    handle: AbortHandle,
}

#[derive(Default)]
struct SlotState {
    next_ticket: u64,
    in_flight: Option<InFlight>,
    loading: bool,
    refreshing: bool,
    failed: bool,
}

#[derive(Default)]
struct RequestSlot {
    state: Mutex<SlotState>,
}

impl RequestSlot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, mode: FetchMode, key: Option<String>) -> (u64, AbortRegistration) {
        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;

        let (handle, registration) = AbortHandle::new_pair();
        // Dropping the old handle does not abort the old request
        state.in_flight = Some(InFlight {
            ticket,
            mode,
            key,
            handle,
        });
        state.loading = true;
        if mode == FetchMode::Refresh {
            state.refreshing = true;
        }
        (ticket, registration)
    }

    fn finish<T>(&self, ticket: u64, outcome: &FetchOutcome<T>) {
        let mut state = self.lock();
        let mode = match &state.in_flight {
            Some(current) if current.ticket == ticket => current.mode,
            // Superseded or cancelled: the flags belong to someone else now
            _ => return,
        };

        match outcome {
            FetchOutcome::Success(_) => {
                state.failed = false;
            }
            FetchOutcome::Failed(_) => {
                // A failed refresh keeps whatever was displayed valid
                if mode == FetchMode::Load {
                    state.failed = true;
                }
            }
            FetchOutcome::Cancelled => return,
        }
        state.refreshing = false;
        state.loading = false;
        state.in_flight = None;
    }

    fn cancel(&self) -> bool {
        let mut state = self.lock();
        state.loading = false;
        state.refreshing = false;
        state.failed = false;
        match state.in_flight.take() {
            Some(in_flight) => {
                in_flight.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Give up the slot if it is fetching something other than `key`.
    /// The request keeps running but no longer touches the flags.
    fn release_unless(&self, key: Option<&str>) -> bool {
        let mut state = self.lock();
        let superseded = state
            .in_flight
            .as_ref()
            .is_some_and(|current| current.key.as_deref() != key);
        if superseded {
            state.in_flight = None;
            state.loading = false;
            state.refreshing = false;
        }
        superseded
    }

    fn reset_failed(&self) {
        self.lock().failed = false;
    }

    fn flags(&self) -> RequestStatus {
        let state = self.lock();
        RequestStatus {
            loading: state.loading,
            refreshing: state.refreshing,
            failed: state.failed,
        }
    }
}

/// Network access for both entity kinds, with per-kind status flags.
pub struct RemoteSource {
    api: Arc<dyn CountryApi>,
    list: Arc<RequestSlot>,
    detail: Arc<RequestSlot>,
}

impl RemoteSource {
    pub fn new(api: Arc<dyn CountryApi>) -> Self {
        Self {
            api,
            list: Arc::default(),
            detail: Arc::default(),
        }
    }

    fn slot(&self, kind: EntityKind) -> &Arc<RequestSlot> {
        match kind {
            EntityKind::List => &self.list,
            EntityKind::Detail => &self.detail,
        }
    }

    /// Start fetching the country list.
    pub fn fetch_list(
        &self,
        mode: FetchMode,
    ) -> impl Future<Output = FetchOutcome<Vec<CountrySummary>>> + Send + 'static {
        let api = Arc::clone(&self.api);
        self.dispatch(EntityKind::List, mode, None, async move {
            api.fetch_all().await
        })
    }

    /// Start fetching one country by name.
    pub fn fetch_country(
        &self,
        name: &str,
        mode: FetchMode,
    ) -> impl Future<Output = FetchOutcome<Country>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let name = name.to_string();
        self.dispatch(EntityKind::Detail, mode, Some(name.clone()), async move {
            api.fetch_by_name(&name).await
        })
    }

    fn dispatch<T, F>(
        &self,
        kind: EntityKind,
        mode: FetchMode,
        key: Option<String>,
        request: F,
    ) -> impl Future<Output = FetchOutcome<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let slot = Arc::clone(self.slot(kind));
        debug!(%kind, ?mode, ?key, "Remote request started");
        let (ticket, registration) = slot.begin(mode, key);

        async move {
            let outcome = match Abortable::new(request, registration).await {
                Ok(Ok(value)) => FetchOutcome::Success(value),
                Ok(Err(err)) => FetchOutcome::Failed(err),
                Err(_aborted) => FetchOutcome::Cancelled,
            };
            slot.finish(ticket, &outcome);
            outcome
        }
    }

    /// Reset every flag for `kind` and abort its in-flight request, if any.
    ///
    /// The reset happens immediately; the abort takes effect whenever the
    /// request is next polled.
    pub fn cancel(&self, kind: EntityKind) {
        let aborted = self.slot(kind).cancel();
        debug!(%kind, aborted, "Remote request cancelled");
    }

    /// Detach an in-flight request for a key other than `key`.
    ///
    /// Its outcome is still returned to whoever awaits it, but it no longer
    /// drives the loading, refreshing or failed flags of `kind`.
    pub fn release_superseded(&self, kind: EntityKind, key: Option<&str>) {
        if self.slot(kind).release_unless(key) {
            debug!(%kind, ?key, "Released superseded remote request");
        }
    }

    pub fn reset_failed(&self, kind: EntityKind) {
        self.slot(kind).reset_failed();
    }

    pub fn flags(&self, kind: EntityKind) -> RequestStatus {
        self.slot(kind).flags()
    }
}
