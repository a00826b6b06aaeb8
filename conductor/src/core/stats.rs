//! Process-wide statistics counters.
//!
//! Each counter group is a set of atomics, so concurrent sessions can update
//! them without a lock. The global instances are created lazily on first use
//! and live until process exit; components accept an `Arc` so tests can supply
//! isolated instances.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use serde::Serialize;

use crate::core::types::{Domain, ReasonCode};

fn domain_index(domain: Domain) -> usize {
    match domain {
        Domain::Coding => 0,
        Domain::Research => 1,
        Domain::Data => 2,
        Domain::General => 3,
    }
}

fn per_domain(counters: &[AtomicU64; 4]) -> BTreeMap<String, u64> {
    Domain::ALL
        .iter()
        .map(|domain| {
            (
                domain.as_str().to_string(),
                counters[domain_index(*domain)].load(Ordering::Relaxed),
            )
        })
        .collect()
}

/// Intent classifier counters.
#[derive(Debug, Default)]
pub struct ClassifierStats {
    requests: AtomicU64,
    fallbacks: AtomicU64,
    low_confidence: AtomicU64,
    per_domain: [AtomicU64; 4],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifierStatsSnapshot {
    pub requests: u64,
    pub fallbacks: u64,
    pub low_confidence: u64,
    pub per_domain: BTreeMap<String, u64>,
}

impl ClassifierStats {
    pub fn record(&self, domain: Domain, used_fallback: bool, low_confidence: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if used_fallback {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        if low_confidence {
            self.low_confidence.fetch_add(1, Ordering::Relaxed);
        }
        self.per_domain[domain_index(domain)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClassifierStatsSnapshot {
        ClassifierStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            low_confidence: self.low_confidence.load(Ordering::Relaxed),
            per_domain: per_domain(&self.per_domain),
        }
    }
}

/// Safety gate counters. Only denials count as violations.
#[derive(Debug, Default)]
pub struct SafetyStats {
    checks: AtomicU64,
    violations: [AtomicU64; 5],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyStatsSnapshot {
    pub checks: u64,
    pub violations: BTreeMap<String, u64>,
}

impl SafetyStatsSnapshot {
    pub fn violations_of(&self, reason: ReasonCode) -> u64 {
        self.violations.get(reason.as_str()).copied().unwrap_or(0)
    }

    pub fn total_violations(&self) -> u64 {
        self.violations.values().sum()
    }
}

impl SafetyStats {
    pub fn record(&self, reason: ReasonCode) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if let Some(index) = ReasonCode::VIOLATIONS.iter().position(|r| *r == reason) {
            self.violations[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SafetyStatsSnapshot {
        SafetyStatsSnapshot {
            checks: self.checks.load(Ordering::Relaxed),
            violations: ReasonCode::VIOLATIONS
                .iter()
                .enumerate()
                .map(|(index, reason)| {
                    (
                        reason.as_str().to_string(),
                        self.violations[index].load(Ordering::Relaxed),
                    )
                })
                .collect(),
        }
    }
}

/// Orchestrator counters.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    total_tasks: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_iterations: AtomicU64,
    per_domain: [AtomicU64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatsSnapshot {
    pub total_tasks: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub per_domain: BTreeMap<String, u64>,
    pub average_iterations: f64,
}

impl OrchestratorStats {
    pub fn record(&self, domain: Domain, success: bool, iterations: u32) {
        self.total_tasks.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_iterations
            .fetch_add(u64::from(iterations), Ordering::Relaxed);
        self.per_domain[domain_index(domain)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OrchestratorStatsSnapshot {
        let total_tasks = self.total_tasks.load(Ordering::Relaxed);
        let total_iterations = self.total_iterations.load(Ordering::Relaxed);
        let average_iterations = if total_tasks == 0 {
            0.0
        } else {
            total_iterations as f64 / total_tasks as f64
        };
        OrchestratorStatsSnapshot {
            total_tasks,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            per_domain: per_domain(&self.per_domain),
            average_iterations,
        }
    }
}

static CLASSIFIER: LazyLock<Arc<ClassifierStats>> = LazyLock::new(Arc::default);
static SAFETY: LazyLock<Arc<SafetyStats>> = LazyLock::new(Arc::default);
static ORCHESTRATOR: LazyLock<Arc<OrchestratorStats>> = LazyLock::new(Arc::default);

/// Process-wide classifier counters.
pub fn classifier_stats() -> Arc<ClassifierStats> {
    Arc::clone(&CLASSIFIER)
}

/// Process-wide safety gate counters.
pub fn safety_stats() -> Arc<SafetyStats> {
    Arc::clone(&SAFETY)
}

/// Process-wide orchestrator counters.
pub fn orchestrator_stats() -> Arc<OrchestratorStats> {
    Arc::clone(&ORCHESTRATOR)
}

/// The three counter groups, shared by the components of one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct StatsHandles {
    pub classifier: Arc<ClassifierStats>,
    pub safety: Arc<SafetyStats>,
    pub orchestrator: Arc<OrchestratorStats>,
}

impl StatsHandles {
    /// Handles to the process-wide counters.
    pub fn global() -> Self {
        Self {
            classifier: classifier_stats(),
            safety: safety_stats(),
            orchestrator: orchestrator_stats(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            classifier: self.classifier.snapshot(),
            safety: self.safety.snapshot(),
            orchestrator: self.orchestrator.snapshot(),
        }
    }
}

/// Point-in-time copy of every counter group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub classifier: ClassifierStatsSnapshot,
    pub safety: SafetyStatsSnapshot,
    pub orchestrator: OrchestratorStatsSnapshot,
}
