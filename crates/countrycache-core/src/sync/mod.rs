//! Cache/network synchronization.
//!
//! - [`state`]: entity kinds, fetch modes and the flags consumers observe
//! - [`remote`]: cancellable per-kind network requests
//! - [`merge`]: precedence rules between cache and network results
//! - [`coordinator`]: [`CountryRepository`], which ties them to the store

pub mod coordinator;
pub mod merge;
pub mod remote;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::CountryRepository;
pub use merge::{merge, CacheUsable, Merge, NextAction, SourceEvent};
pub use remote::{FetchOutcome, RemoteSource};
pub use state::{EntityKind, FetchMode, RequestContext, RequestState, RequestStatus};
