// Failure-windowed circuit breaker, one per external dependency

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Failures inside `monitor_window` that open the breaker
    pub failure_threshold: u32,
    /// Time spent open before a probe is let through
    pub reset_timeout: Duration,
    pub monitor_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitor_window: Duration::from_secs(120),
        }
    }
}

/// Read-only view served by `/metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_times: VecDeque<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn prune(&mut self, window: Duration) {
        while let Some(oldest) = self.failure_times.front() {
            if oldest.elapsed() > window {
                self.failure_times.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_times: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                last_failure: None,
                last_success: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Failures currently inside the monitor window
    pub fn failures(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.prune(self.config.monitor_window);
        inner.failure_times.len() as u32
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        inner.prune(self.config.monitor_window);
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failure_times.len() as u32,
            last_failure: inner.last_failure,
            last_success: inner.last_success,
        }
    }

    /// Run `fut` through the breaker. While open the future is dropped unpolled.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let mut attempt = Attempt {
            breaker: self,
            admission,
            settled: false,
        };
        let result = fut.await;
        attempt.settled = true;
        match &result {
            Ok(_) => self.record_success(admission),
            // cancellation says nothing about the dependency's health
            Err(Error::Cancelled) => self.release_probe(admission),
            Err(_) => self.record_failure(admission),
        }
        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    info!("Circuit breaker '{}' half-open, probing", self.name);
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(self.open_error())
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error())
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn open_error(&self) -> Error {
        Error::CircuitOpen {
            name: self.name.clone(),
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.last_success = Some(Utc::now());
        if admission == Admission::Probe || inner.state == BreakerState::HalfOpen {
            info!("Circuit breaker '{}' closed", self.name);
            inner.state = BreakerState::Closed;
            inner.failure_times.clear();
            inner.opened_at = None;
            inner.probe_in_flight = false;
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.last_failure = Some(Utc::now());
        match admission {
            Admission::Probe => {
                warn!("Circuit breaker '{}' probe failed, reopening", self.name);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.failure_times.push_back(now);
            }
            Admission::Normal => {
                inner.prune(self.config.monitor_window);
                inner.failure_times.push_back(now);
                if inner.state == BreakerState::Closed
                    && inner.failure_times.len() as u32 >= self.config.failure_threshold
                {
                    warn!(
                        "Circuit breaker '{}' opened after {} failures",
                        self.name,
                        inner.failure_times.len()
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
        }
    }

    fn release_probe(&self, admission: Admission) {
        if admission == Admission::Probe {
            self.inner.lock().probe_in_flight = false;
        }
    }
}

/// Frees the half-open probe slot when a probing future is dropped mid-flight
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_probe(self.admission);
        }
    }
}

/// Named breakers, created lazily with a shared configuration
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
