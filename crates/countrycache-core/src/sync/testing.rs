//! Scripted transport and fixtures shared by the sync tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::{watch, Semaphore};

use crate::api::{ApiError, CountryApi};
use crate::models::{Country, CountrySummary, Currency, Language};

/// Upper bound for any wait in a test before it is considered hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn peru() -> Country {
    Country {
        name: "Peru".to_string(),
        capital: Some("Lima".to_string()),
        currencies: Some(vec![Currency {
            name: Some("Peruvian sol".to_string()),
        }]),
        flag: Some("https://flagcdn.com/pe.svg".to_string()),
        population: Some(32_971_846),
        languages: Some(vec![
            Language {
                name: Some("Spanish".to_string()),
            },
            Language {
                name: Some("Aymara".to_string()),
            },
            Language {
                name: Some("Quechua".to_string()),
            },
        ]),
    }
}

pub fn peru_without_flag() -> Country {
    Country {
        flag: None,
        ..peru()
    }
}

pub fn chile() -> Country {
    Country {
        name: "Chile".to_string(),
        capital: Some("Santiago".to_string()),
        currencies: Some(vec![Currency {
            name: Some("Chilean peso".to_string()),
        }]),
        flag: Some("https://flagcdn.com/cl.svg".to_string()),
        population: Some(19_116_209),
        languages: Some(vec![Language {
            name: Some("Spanish".to_string()),
        }]),
    }
}

/// What the scripted transport answers with.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Status(u16),
    Timeout,
}

impl<T: Clone> Reply<T> {
    fn to_result(&self) -> Result<T, ApiError> {
        match self {
            Reply::Ok(value) => Ok(value.clone()),
            Reply::Status(code) => Err(ApiError::from_status(
                StatusCode::from_u16(*code).expect("valid status code"),
                "",
            )),
            Reply::Timeout => Err(ApiError::Timeout),
        }
    }
}

/// In-memory `CountryApi` with canned replies and call recording.
///
/// A held transport parks every request on a gate until `release` hands
/// out permits, which keeps requests in flight for cancellation tests.
pub struct ScriptedApi {
    list: Mutex<Reply<Vec<CountrySummary>>>,
    details: Mutex<HashMap<String, Reply<Country>>>,
    list_calls: AtomicUsize,
    detail_calls: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Reply::Ok(Vec::new())),
            details: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            detail_calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn with_list(self, reply: Reply<Vec<CountrySummary>>) -> Self {
        self.set_list(reply);
        self
    }

    pub fn with_country(self, name: &str, reply: Reply<Country>) -> Self {
        self.set_country(name, reply);
        self
    }

    pub fn set_list(&self, reply: Reply<Vec<CountrySummary>>) {
        *self.list.lock().unwrap() = reply;
    }

    pub fn set_country(&self, name: &str, reply: Reply<Country>) {
        self.details.lock().unwrap().insert(name.to_string(), reply);
    }

    /// Let `n` parked requests through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }

    pub async fn wait_for_list_calls(&self, n: usize) {
        wait_until(|| self.list_calls() >= n).await;
    }

    pub async fn wait_for_detail_calls(&self, n: usize) {
        wait_until(|| self.detail_calls().len() >= n).await;
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate is never closed").forget();
        }
    }
}

#[async_trait]
impl CountryApi for ScriptedApi {
    async fn fetch_all(&self) -> Result<Vec<CountrySummary>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        let reply = self.list.lock().unwrap().clone();
        reply.to_result()
    }

    async fn fetch_by_name(&self, name: &str) -> Result<Country, ApiError> {
        self.detail_calls.lock().unwrap().push(name.to_string());
        self.pass_gate().await;
        let reply = self
            .details
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(Reply::Status(404));
        reply.to_result()
    }
}

/// Poll `condition` until it holds, failing the test after `TEST_TIMEOUT`.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until a watched value satisfies `condition` and return a copy of it.
pub async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    condition: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(TEST_TIMEOUT, rx.wait_for(condition))
        .await
        .expect("watched value not reached in time")
        .expect("sender alive")
        .clone()
}
