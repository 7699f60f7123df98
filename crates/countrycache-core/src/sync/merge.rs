//! Precedence rules for combining cache and network results.
//!
//! `merge` is pure: it decides what to publish and what to do next, and the
//! coordinator carries the decision out.

use crate::models::{Country, CountrySummary};

use super::remote::FetchOutcome;

/// Whether a cached value is good enough to publish without a network round-trip.
pub trait CacheUsable {
    fn is_usable(&self) -> bool;
}

impl CacheUsable for Vec<CountrySummary> {
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

impl CacheUsable for Country {
    fn is_usable(&self) -> bool {
        self.is_complete()
    }
}

/// A result arriving from one of the two sources.
#[derive(Debug)]
pub enum SourceEvent<T> {
    /// Store read finished; `None` when nothing matched
    Cache(Option<T>),
    /// Remote request finished
    Network(FetchOutcome<T>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    None,
    /// Cache miss or incomplete record: ask the network
    FetchRemote,
    /// Write the published value through to the store
    Persist,
}

#[derive(Debug, PartialEq)]
pub struct Merge<T> {
    pub publish: Option<T>,
    pub next: NextAction,
}

impl<T> Merge<T> {
    fn nothing() -> Self {
        Self {
            publish: None,
            next: NextAction::None,
        }
    }
}

pub fn merge<T: CacheUsable>(event: SourceEvent<T>) -> Merge<T> {
    match event {
        SourceEvent::Cache(Some(value)) if value.is_usable() => Merge {
            publish: Some(value),
            next: NextAction::None,
        },
        SourceEvent::Cache(_) => Merge {
            publish: None,
            next: NextAction::FetchRemote,
        },
        SourceEvent::Network(FetchOutcome::Success(value)) => Merge {
            publish: Some(value),
            next: NextAction::Persist,
        },
        // Flags already carry the failure; cancellations are silent
        SourceEvent::Network(FetchOutcome::Failed(_) | FetchOutcome::Cancelled) => {
            Merge::nothing()
        }
    }
}
