//! Phi-accrual and deadline failure detectors.
//!
//! Provides two implementations of the `FailureDetector` trait:
//! - `PhiAccrualFailureDetector`: statistical failure detection based on heartbeat
//!   interval distribution, using the CDF-based phi formula from the phi-accrual
//!   failure detector paper (Hayashibara et al., 2004).
//! - `DeadlineFailureDetector`: simple deadline-based detection for testing.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::traits::FailureDetector;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the phi-accrual failure detector.
#[derive(Debug, Clone)]
pub struct PhiAccrualConfig {
    /// Phi value at which a node is considered dead.
    pub phi_threshold: f64,
    /// Maximum number of heartbeat intervals to retain in the sample window.
    pub max_sample_size: usize,
    /// Floor for standard deviation to prevent false positives from very
    /// consistent heartbeats (ms).
    pub min_std_dev_ms: u64,
    /// Maximum time without a heartbeat before considering a node dead (ms).
    pub max_no_heartbeat_ms: u64,
    /// Expected interval between heartbeats (ms).
    pub heartbeat_interval_ms: u64,
}

impl Default for PhiAccrualConfig {
    fn default() -> Self {
        Self {
            phi_threshold: 8.0,
            max_sample_size: 200,
            min_std_dev_ms: 100,
            max_no_heartbeat_ms: 5000,
            heartbeat_interval_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal heartbeat tracking
// ---------------------------------------------------------------------------

/// Per-node heartbeat tracking state.
struct NodeHeartbeatState {
    /// Timestamp of the most recent heartbeat (ms since epoch).
    last_heartbeat_ms: u64,
    /// Circular buffer of observed inter-heartbeat intervals.
    intervals: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Phi-accrual failure detector
// ---------------------------------------------------------------------------

/// Statistical failure detector using the phi-accrual algorithm.
///
/// Tracks heartbeat intervals per node and computes a suspicion level (phi)
/// based on the probability that the observed silence duration would occur
/// given the historical interval distribution. Higher phi means greater
/// suspicion of failure.
pub struct PhiAccrualFailureDetector {
    config: PhiAccrualConfig,
    states: RwLock<HashMap<String, NodeHeartbeatState>>,
}

impl PhiAccrualFailureDetector {
    /// Creates a new phi-accrual failure detector with the given configuration.
    #[must_use]
    pub fn new(config: PhiAccrualConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl FailureDetector for PhiAccrualFailureDetector {
    fn heartbeat(&self, node_id: &str, timestamp_ms: u64) {
        let mut states = self.states.write();
        let max_samples = self.config.max_sample_size;

        match states.get_mut(node_id) {
            Some(state) => {
                // Compute interval since last heartbeat and record it.
                let interval = timestamp_ms.saturating_sub(state.last_heartbeat_ms);
                state.last_heartbeat_ms = timestamp_ms;

                // Maintain circular buffer: evict oldest when at capacity.
                if state.intervals.len() >= max_samples {
                    state.intervals.remove(0);
                }
                state.intervals.push(interval);
            }
            None => {
                // First heartbeat for this node -- just record the timestamp.
                states.insert(
                    node_id.to_string(),
                    NodeHeartbeatState {
                        last_heartbeat_ms: timestamp_ms,
                        intervals: Vec::new(),
                    },
                );
            }
        }
    }

    fn is_alive(&self, node_id: &str, timestamp_ms: u64) -> bool {
        self.suspicion_level(node_id, timestamp_ms) < self.config.phi_threshold
    }

    fn last_heartbeat(&self, node_id: &str) -> Option<u64> {
        let states = self.states.read();
        states.get(node_id).map(|s| s.last_heartbeat_ms)
    }

    #[allow(clippy::cast_precision_loss)]
    fn suspicion_level(&self, node_id: &str, timestamp_ms: u64) -> f64 {
        let states = self.states.read();
        let Some(state) = states.get(node_id) else {
            return 0.0;
        };

        let elapsed = timestamp_ms.saturating_sub(state.last_heartbeat_ms) as f64;

        if state.intervals.len() < 3 {
            // Not enough samples for statistical analysis -- fall back to
            // a simple deadline-style linear scaling.
            return elapsed / self.config.max_no_heartbeat_ms as f64
                * self.config.phi_threshold;
        }

        // Compute mean and standard deviation of recorded intervals.
        let n = state.intervals.len() as f64;
        let sum: u64 = state.intervals.iter().sum();
        let mean = sum as f64 / n;

        let variance = state
            .intervals
            .iter()
            .map(|&iv| {
                let diff = iv as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt().max(self.config.min_std_dev_ms as f64);

        // CDF of normal distribution: P(X <= elapsed)
        // CDF(x) = 0.5 * erfc(-(x - mean) / (std_dev * sqrt(2)))
        let y = -(elapsed - mean) / (std_dev * std::f64::consts::SQRT_2);
        let cdf = 0.5 * erfc(y);

        // phi = -log10(1 - CDF(elapsed))
        // Clamp (1 - CDF) to a small epsilon to prevent infinity when CDF
        // approaches 1.0. This bounds phi to a finite maximum (~308).
        let one_minus_cdf = (1.0 - cdf).max(f64::MIN_POSITIVE);
        let phi = -(one_minus_cdf.log10());

        // Clamp to non-negative (phi should never be negative).
        phi.max(0.0)
    }

    fn remove(&self, node_id: &str) {
        self.states.write().remove(node_id);
    }

    fn reset(&self) {
        self.states.write().clear();
    }
}

// ---------------------------------------------------------------------------
// Deadline failure detector (for testing)
// ---------------------------------------------------------------------------

/// Simple deadline-based failure detector.
///
/// A node is considered dead if no heartbeat arrives within
/// `max_no_heartbeat_ms`. Intended for testing scenarios where statistical
/// detection is unnecessary.
pub struct DeadlineFailureDetector {
    max_no_heartbeat_ms: u64,
    states: RwLock<HashMap<String, u64>>,
}

impl DeadlineFailureDetector {
    /// Creates a new deadline failure detector with the given timeout.
    #[must_use]
    pub fn new(max_no_heartbeat_ms: u64) -> Self {
        Self {
            max_no_heartbeat_ms,
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl FailureDetector for DeadlineFailureDetector {
    fn heartbeat(&self, node_id: &str, timestamp_ms: u64) {
        self.states
            .write()
            .insert(node_id.to_string(), timestamp_ms);
    }

    fn is_alive(&self, node_id: &str, timestamp_ms: u64) -> bool {
        let states = self.states.read();
        match states.get(node_id) {
            Some(&last) => timestamp_ms.saturating_sub(last) <= self.max_no_heartbeat_ms,
            // No heartbeat recorded -- assume alive (no evidence of failure).
            None => true,
        }
    }

    fn last_heartbeat(&self, node_id: &str) -> Option<u64> {
        self.states.read().get(node_id).copied()
    }

    #[allow(clippy::cast_precision_loss)]
    fn suspicion_level(&self, node_id: &str, timestamp_ms: u64) -> f64 {
        let states = self.states.read();
        match states.get(node_id) {
            Some(&last) => {
                let elapsed = timestamp_ms.saturating_sub(last) as f64;
                // Linear scaling: reaches 8.0 at the deadline boundary.
                elapsed / self.max_no_heartbeat_ms as f64 * 8.0
            }
            None => 0.0,
        }
    }

    fn remove(&self, node_id: &str) {
        self.states.write().remove(node_id);
    }

    fn reset(&self) {
        self.states.write().clear();
    }
}

// ---------------------------------------------------------------------------
// erfc approximation (Abramowitz and Stegun, formula 7.1.26)
// ---------------------------------------------------------------------------

/// Complementary error function approximation.
///
/// Uses the rational approximation from Abramowitz and Stegun (Handbook of
/// Mathematical Functions, formula 7.1.26) with maximum error |epsilon| < 1.5e-7.
fn erfc(x: f64) -> f64 {
    // For negative arguments: erfc(-x) = 2 - erfc(x)
    let (z, negate) = if x < 0.0 { (-x, true) } else { (x, false) };

    let t = 1.0 / (1.0 + 0.327_591_1 * z);

    // Horner's form of the polynomial coefficients
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736
                + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));

    let result = poly * (-z * z).exp();

    if negate {
        2.0 - result
    } else {
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
