use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Country, CountrySummary};

/// Store file name in the cache directory
const STORE_FILE: &str = "countries.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

type Records = BTreeMap<String, CachedData<Country>>;

/// Keyed collection of country records, optionally persisted as one JSON file.
///
/// List writes and detail writes share the same collection. Each upsert
/// holds the write lock across mutate-and-persist, so readers see either the
/// old record or the new one, never a mix. There is no expiry; records live
/// until they are overwritten.
pub struct CountryStore {
    path: Option<PathBuf>,
    records: RwLock<Records>,
}

impl CountryStore {
    /// Open (or create) the store under `cache_dir`.
    pub fn open(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

        let path = cache_dir.join(STORE_FILE);
        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse store file: {}", path.display()))?
        } else {
            Records::new()
        };

        debug!(path = %path.display(), records = records.len(), "Country store opened");
        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Records::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Records> {
        // A panicking writer never leaves a half-applied record: the map is
        // only touched by whole-record inserts
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Every stored key, ordered by name.
    pub fn list(&self) -> Vec<CountrySummary> {
        self.read()
            .values()
            .map(|cached| cached.data.summary())
            .collect()
    }

    /// Raw record lookup, complete or not.
    pub fn get(&self, name: &str) -> Option<CachedData<Country>> {
        self.read().get(name).cloned()
    }

    /// The record for `name`, but only if it is complete. An incomplete
    /// record is reported as absent.
    pub fn find_complete(&self, name: &str) -> Option<CachedData<Country>> {
        self.read()
            .get(name)
            .filter(|cached| cached.data.is_complete())
            .cloned()
    }

    /// Insert a name-only record for every key not already stored.
    /// Existing records, complete or not, are left as they are.
    ///
    /// If the file cannot be written, the inserts are rolled back.
    pub fn upsert_list(&self, items: &[CountrySummary]) -> Result<usize> {
        let mut records = self.write();
        let mut inserted = Vec::new();
        for item in items {
            if !records.contains_key(&item.name) {
                records.insert(item.name.clone(), CachedData::new(Country::named(&item.name)));
                inserted.push(item.name.as_str());
            }
        }
        if !inserted.is_empty() {
            if let Err(e) = self.persist(&records) {
                for name in &inserted {
                    records.remove(*name);
                }
                return Err(e);
            }
        }
        debug!(received = items.len(), inserted = inserted.len(), "Cached country list");
        Ok(inserted.len())
    }

    /// Replace the whole record for `country.name`.
    /// If the file cannot be written, the previous record is restored.
    pub fn upsert_country(&self, country: &Country) -> Result<()> {
        let mut records = self.write();
        let previous = records.insert(country.name.clone(), CachedData::new(country.clone()));
        if let Err(e) = self.persist(&records) {
            match previous {
                Some(previous) => records.insert(country.name.clone(), previous),
                None => records.remove(&country.name),
            };
            return Err(e);
        }
        debug!(country = %country.name, complete = country.is_complete(), "Cached country");
        Ok(())
    }

    /// Write the snapshot to a sibling temp file and rename it into place.
    /// Called with the write lock held.
    fn persist(&self, records: &Records) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let contents = serde_json::to_string_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write store file: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace store file: {}", path.display()))?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
