use serde::{Deserialize, Serialize};

/// A country as returned by `GET {base}/name/{name}` and as persisted in the store.
///
/// Every descriptive field is optional: a record written by a list fetch only
/// carries the name, while a detail fetch fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Country {
    pub name: String,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default)]
    pub currencies: Option<Vec<Currency>>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub population: Option<u64>,
    #[serde(default)]
    pub languages: Option<Vec<Language>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Currency {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Language {
    #[serde(default)]
    pub name: Option<String>,
}

/// List projection of a country, as returned by `GET {base}/all?fields=name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CountrySummary {
    pub name: String,
}

impl CountrySummary {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Country {
    /// Minimal record carrying only the key. This is what a list fetch persists.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capital: None,
            currencies: None,
            flag: None,
            population: None,
            languages: None,
        }
    }

    /// A record is complete when every descriptive field is present and
    /// every list field is non-empty. Incomplete records count as cache misses.
    pub fn is_complete(&self) -> bool {
        self.capital.is_some()
            && self.flag.is_some()
            && self.population.is_some()
            && self.currencies.as_ref().is_some_and(|c| !c.is_empty())
            && self.languages.as_ref().is_some_and(|l| !l.is_empty())
    }

    pub fn summary(&self) -> CountrySummary {
        CountrySummary::new(self.name.clone())
    }

    /// Comma-separated currency names, skipping unnamed entries.
    pub fn currency_names(&self) -> String {
        join_names(
            self.currencies
                .iter()
                .flatten()
                .filter_map(|c| c.name.as_deref()),
        )
    }

    /// Comma-separated language names, skipping unnamed entries.
    pub fn language_names(&self) -> String {
        join_names(
            self.languages
                .iter()
                .flatten()
                .filter_map(|l| l.name.as_deref()),
        )
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}
