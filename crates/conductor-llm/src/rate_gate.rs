//! Per-key sliding-window admission control for LLM calls.
//!
//! Every LLM request asks the gate for admission under a key (normally the
//! model id). The gate admits immediately while both the request count and the
//! token total of the last `window_secs` stay under their limits; otherwise the
//! caller sleeps, re-checking at least every `max_check_secs`, until enough of
//! the window has expired. This is the only place in the engine that waits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use conductor_core::config::RateGateConfig;

/// Proof that a request was admitted. Pass it back to [`RateGate::record_usage`].
#[derive(Debug, Clone)]
pub struct Admission {
    pub key: String,
    pub ticket: u64,
    /// Total time spent waiting for the window.
    pub waited: Duration,
    /// Number of sleeps taken before admission.
    pub checks: u32,
}

/// Snapshot of one key's queue and window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    /// Callers currently inside `acquire` for this key.
    pub pending: usize,
    /// Pending callers that have already been told to wait at least once.
    pub delayed: usize,
    pub requests_in_window: usize,
    pub tokens_in_window: u64,
}

#[derive(Debug)]
struct WindowEntry {
    ticket: u64,
    at: Instant,
    tokens: u64,
}

#[derive(Debug, Default)]
struct KeyWindow {
    entries: VecDeque<WindowEntry>,
    pending: usize,
    delayed: usize,
    next_ticket: u64,
}

impl KeyWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) >= window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.tokens).sum()
    }

    /// How long until a request of `tokens` fits, `None` when it fits now.
    fn wait_time(
        &self,
        now: Instant,
        window: Duration,
        max_requests: usize,
        max_tokens: u64,
        tokens: u64,
    ) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        if self.entries.len() >= max_requests {
            // The oldest entries must expire until one slot is free.
            let idx = self.entries.len() - max_requests;
            if let Some(entry) = self.entries.get(idx) {
                wait = wait.max((entry.at + window).saturating_duration_since(now));
            }
        }

        let used = self.tokens();
        if !self.entries.is_empty() && used + tokens > max_tokens {
            // Oldest entry whose expiry makes room. A request larger than the
            // whole budget only fits once the window is empty.
            let mut remaining = used;
            let freeing = self
                .entries
                .iter()
                .find(|entry| {
                    remaining -= entry.tokens;
                    remaining + tokens <= max_tokens
                })
                .or(self.entries.back());
            if let Some(entry) = freeing {
                wait = wait.max((entry.at + window).saturating_duration_since(now));
            }
        }

        if wait.is_zero() {
            None
        } else {
            Some(wait)
        }
    }
}

/// Sliding-window rate gate shared by all LLM calls.
#[derive(Debug)]
pub struct RateGate {
    config: RateGateConfig,
    windows: Mutex<HashMap<String, KeyWindow>>,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs.max(1))
    }

    /// Wait until a request of `estimated_tokens` may proceed under `key`.
    pub async fn acquire(&self, key: &str, estimated_tokens: u64) -> Admission {
        let start = Instant::now();
        let window = self.window();
        let max_requests = self.config.requests_per_minute.max(1) as usize;
        let max_check = Duration::from_secs(self.config.max_check_secs.max(1));

        let mut guard = PendingGuard::new(self, key);
        let mut checks = 0u32;

        loop {
            let step = {
                let mut windows = self.lock();
                let w = windows.entry(key.to_string()).or_default();
                let now = Instant::now();
                w.prune(now, window);

                match w.wait_time(
                    now,
                    window,
                    max_requests,
                    self.config.tokens_per_minute,
                    estimated_tokens,
                ) {
                    None => {
                        let ticket = w.next_ticket;
                        w.next_ticket += 1;
                        w.entries.push_back(WindowEntry {
                            ticket,
                            at: now,
                            tokens: estimated_tokens,
                        });
                        Step::Admit(ticket)
                    }
                    Some(wait) => {
                        if !guard.delayed {
                            w.delayed += 1;
                            guard.delayed = true;
                        }
                        Step::Sleep(wait.min(max_check))
                    }
                }
            };

            match step {
                Step::Admit(ticket) => {
                    drop(guard);
                    return Admission {
                        key: key.to_string(),
                        ticket,
                        waited: start.elapsed(),
                        checks,
                    };
                }
                Step::Sleep(sleep) => {
                    checks += 1;
                    debug!(key, sleep_ms = sleep.as_millis() as u64, "Rate gate delaying request");
                    tokio::time::sleep(sleep).await;
                }
            }
        }
    }

    /// Replace an admitted request's estimate with the usage the backend reported.
    pub fn record_usage(&self, admission: &Admission, actual_tokens: u64) {
        let mut windows = self.lock();
        if let Some(w) = windows.get_mut(&admission.key) {
            if let Some(entry) = w.entries.iter_mut().find(|e| e.ticket == admission.ticket) {
                entry.tokens = actual_tokens;
            }
        }
    }

    /// Current queue and window state for `key`.
    pub fn queue_state(&self, key: &str) -> QueueState {
        let window = self.window();
        let mut windows = self.lock();
        match windows.get_mut(key) {
            Some(w) => {
                w.prune(Instant::now(), window);
                QueueState {
                    pending: w.pending,
                    delayed: w.delayed,
                    requests_in_window: w.entries.len(),
                    tokens_in_window: w.tokens(),
                }
            }
            None => QueueState::default(),
        }
    }
}

enum Step {
    Admit(u64),
    Sleep(Duration),
}

/// Keeps `pending`/`delayed` accurate even when an `acquire` future is dropped.
struct PendingGuard<'a> {
    gate: &'a RateGate,
    key: &'a str,
    delayed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(gate: &'a RateGate, key: &'a str) -> Self {
        gate.lock().entry(key.to_string()).or_default().pending += 1;
        Self {
            gate,
            key,
            delayed: false,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut windows = self.gate.lock();
        if let Some(w) = windows.get_mut(self.key) {
            w.pending = w.pending.saturating_sub(1);
            if self.delayed {
                w.delayed = w.delayed.saturating_sub(1);
            }
        }
    }
}
