//! Runtime profiler
//!
//! Process-wide accumulators behind one mutex: per-endpoint wall-time
//! stats for partial requests, plus a per-expert activation histogram.
//! Disabled by default; the recording calls are no-ops until enabled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Environment variable that enables the global profiler when set to `1`
pub const PROFILE_ENV: &str = "MOESPLIT_PROFILE";

/// How many experts a snapshot lists in `top_experts`
const TOP_EXPERTS: usize = 8;

/// Timing accumulators for one endpoint
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EndpointStats {
    pub samples: u64,
    pub sum_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl EndpointStats {
    fn record(&mut self, ns: u64) {
        if self.samples == 0 || ns < self.min_ns {
            self.min_ns = ns;
        }
        if ns > self.max_ns {
            self.max_ns = ns;
        }
        self.samples += 1;
        self.sum_ns += ns;
    }

    pub fn avg_ns(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.sum_ns as f64 / self.samples as f64
        }
    }
}

/// One entry of the activation histogram
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExpertActivation {
    pub expert: u32,
    pub count: u64,
}

/// Point-in-time view of the profiler state
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSnapshot {
    pub per_endpoint: Vec<EndpointStats>,
    /// `1 / (1 + σ/μ)` over the per-endpoint average times. 1.0 is perfect
    /// balance; below 0.7 indicates significant skew.
    pub load_balance: f64,
    /// Hottest experts, most activated first
    pub top_experts: Vec<ExpertActivation>,
}

impl ProfileSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ProfilerState {
    endpoints: Vec<EndpointStats>,
    activations: HashMap<u32, u64>,
}

/// Mutex-guarded profiler, usable as the process-wide singleton via
/// [`global`] or as an injected instance in tests
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: AtomicBool,
    state: Mutex<ProfilerState>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record one partial-request wall time for `endpoint`
    pub fn record_endpoint(&self, endpoint: usize, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.endpoints.len() <= endpoint {
            state.endpoints.resize_with(endpoint + 1, Default::default);
        }
        state.endpoints[endpoint].record(elapsed.as_nanos() as u64);
    }

    /// Count one activation of `expert`
    pub fn record_activation(&self, expert: u32) {
        if !self.is_enabled() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state.activations.entry(expert).or_insert(0) += 1;
    }

    pub fn activation_count(&self, expert: u32) -> u64 {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.activations.get(&expert).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());

        let mut top_experts: Vec<ExpertActivation> = state
            .activations
            .iter()
            .map(|(&expert, &count)| ExpertActivation { expert, count })
            .collect();
        top_experts.sort_by(|a, b| b.count.cmp(&a.count).then(a.expert.cmp(&b.expert)));
        top_experts.truncate(TOP_EXPERTS);

        ProfileSnapshot {
            per_endpoint: state.endpoints.clone(),
            load_balance: load_balance(&state.endpoints),
            top_experts,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = ProfilerState::default();
    }
}

/// The process-wide profiler used by the dispatcher
pub fn global() -> &'static Profiler {
    static GLOBAL: Lazy<Profiler> = Lazy::new(|| {
        let profiler = Profiler::new();
        if std::env::var(PROFILE_ENV).map(|v| v == "1").unwrap_or(false) {
            profiler.set_enabled(true);
        }
        profiler
    });
    &GLOBAL
}

fn load_balance(endpoints: &[EndpointStats]) -> f64 {
    let avgs: Vec<f64> = endpoints
        .iter()
        .filter(|s| s.samples > 0)
        .map(|s| s.avg_ns())
        .collect();
    if avgs.len() < 2 {
        return 1.0;
    }

    let mean = avgs.iter().sum::<f64>() / avgs.len() as f64;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = avgs.iter().map(|a| (a - mean) * (a - mean)).sum::<f64>() / avgs.len() as f64;
    let stddev = variance.sqrt();

    1.0 / (1.0 + stddev / mean)
}
