//! Per-endpoint circuit breaker with cooldown and jitter.
//!
//! One circuit exists per endpoint key (the feed layer keys them as
//! `"{instance_id}:{feed}"`). The circuit has two states:
//!
//! - **Closed**: calls are allowed; consecutive failures are counted.
//! - **Open**: calls are skipped until `cooldown_until` passes.
//!
//! Opening happens after [`CircuitBreakerConfig::failure_threshold`]
//! consecutive failures, or immediately on a single
//! [`FailureClass::SessionInvalid`] failure (a malformed response means the
//! session credential is gone and hammering the endpoint only spams logs).
//! The cooldown is jittered so a fleet of circuits opened by one outage does
//! not resume in lockstep.
//!
//! There is no half-open probe state: once the cooldown elapses the circuit
//! closes and the next scheduled call is the probe. The state is in-memory
//! and resets on application restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::Rng;

use crate::errors::{BrokerError, FailureClass};

/// Default consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default cooldown once the circuit opens.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Default upper bound of the random jitter added to the cooldown.
const DEFAULT_COOLDOWN_JITTER: Duration = Duration::from_secs(5);

/// Externally visible circuit state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed,
    /// Calls are skipped until the cooldown passes.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
        }
    }
}

/// Internal state for a single endpoint.
#[derive(Debug)]
struct Circuit {
    /// Consecutive failures since the last success or open.
    failures: u32,
    /// Set while the circuit is open.
    cooldown_until: Option<Instant>,
    /// Last failure, kept for the skip log line.
    last_error: Option<String>,
    /// Whether the current open period has been logged at warn level yet.
    notified: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            failures: 0,
            cooldown_until: None,
            last_error: None,
            notified: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Base cooldown once the circuit opens.
    pub cooldown: Duration,
    /// Upper bound of the random jitter added to the cooldown.
    pub cooldown_jitter: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            cooldown_jitter: DEFAULT_COOLDOWN_JITTER,
        }
    }
}

/// Thread-safe per-endpoint circuit breaker.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Creates a breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    ///
    /// The worst case of recovering is slightly incorrect circuit state,
    /// which beats panicking a refresh loop.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Checks whether a call to `key` is allowed right now.
    ///
    /// The first skip of an open period is logged at warn level, every
    /// subsequent one at debug, so a long outage produces one loud line per
    /// open instead of one per cycle. When the cooldown has elapsed the
    /// circuit closes and the call is allowed; that call is the probe.
    pub fn is_allowed(&self, key: &str) -> bool {
        let mut circuits = self.lock_circuits();

        let Some(circuit) = circuits.get_mut(key) else {
            return true;
        };

        let Some(cooldown_until) = circuit.cooldown_until else {
            return true;
        };

        let now = Instant::now();
        if now < cooldown_until {
            let remaining = cooldown_until - now;
            if circuit.notified {
                debug!("Circuit '{}' still open ({:?} left), skipping", key, remaining);
            } else {
                warn!(
                    "Circuit '{}' open, skipping calls for {:?}; last error: {}",
                    key,
                    remaining,
                    circuit.last_error.as_deref().unwrap_or("unknown")
                );
                circuit.notified = true;
            }
            return false;
        }

        debug!("Circuit '{}' cooldown elapsed, resuming calls", key);
        circuit.cooldown_until = None;
        circuit.failures = 0;
        circuit.notified = false;
        true
    }

    /// Records a successful call: the circuit entry is cleared entirely.
    pub fn record_success(&self, key: &str) {
        let mut circuits = self.lock_circuits();
        if circuits.remove(key).is_some() {
            debug!("Circuit '{}' cleared after success", key);
        }
    }

    /// Records a failed call. Returns true when this failure opened the
    /// circuit.
    ///
    /// A [`FailureClass::SessionInvalid`] error opens the circuit
    /// immediately regardless of the count; otherwise the circuit opens at
    /// the consecutive-failure threshold. Opening resets the count and
    /// re-arms the one-shot skip notification.
    pub fn record_failure(&self, key: &str, error: &BrokerError) -> bool {
        let mut circuits = self.lock_circuits();
        let circuit = circuits.entry(key.to_string()).or_insert_with(Circuit::new);

        circuit.failures += 1;
        circuit.last_error = Some(error.to_string());

        let session_invalid = error.failure_class() == FailureClass::SessionInvalid;
        if circuit.failures >= self.config.failure_threshold || session_invalid {
            let cooldown = self.config.cooldown + self.random_jitter();
            warn!(
                "Opening circuit '{}' for {:?} ({}): {}",
                key,
                cooldown,
                if session_invalid {
                    "session invalid"
                } else {
                    "failure threshold reached"
                },
                error
            );
            circuit.cooldown_until = Some(Instant::now() + cooldown);
            circuit.failures = 0;
            circuit.notified = false;
            true
        } else {
            debug!(
                "Circuit '{}' failure {}/{}: {}",
                key, circuit.failures, self.config.failure_threshold, error
            );
            false
        }
    }

    /// Current state for an endpoint.
    pub fn state(&self, key: &str) -> CircuitState {
        let circuits = self.lock_circuits();
        match circuits.get(key).and_then(|c| c.cooldown_until) {
            Some(until) if Instant::now() < until => CircuitState::Open,
            _ => CircuitState::Closed,
        }
    }

    /// Consecutive failure count for an endpoint.
    pub fn failure_count(&self, key: &str) -> u32 {
        let circuits = self.lock_circuits();
        circuits.get(key).map(|c| c.failures).unwrap_or(0)
    }

    /// Drops all circuit state.
    pub fn reset_all(&self) {
        let mut circuits = self.lock_circuits();
        circuits.clear();
    }

    fn random_jitter(&self) -> Duration {
        let bound = self.config.cooldown_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_error() -> BrokerError {
        BrokerError::Upstream {
            instance: "inst-1".to_string(),
            message: "HTTP 502".to_string(),
        }
    }

    fn malformed_error() -> BrokerError {
        BrokerError::Malformed {
            instance: "inst-1".to_string(),
            message: "expected JSON object".to_string(),
        }
    }

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(20),
            cooldown_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_circuit_starts_closed() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.is_allowed("inst-1:quotes"));
        assert_eq!(breaker.state("inst-1:quotes"), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let breaker = CircuitBreaker::with_config(fast_config());
        let key = "inst-1:quotes";

        assert!(!breaker.record_failure(key, &upstream_error()));
        assert!(!breaker.record_failure(key, &upstream_error()));
        assert!(breaker.is_allowed(key));

        assert!(breaker.record_failure(key, &upstream_error()));
        assert_eq!(breaker.state(key), CircuitState::Open);
        assert!(!breaker.is_allowed(key));
    }

    #[test]
    fn test_malformed_opens_immediately() {
        let breaker = CircuitBreaker::with_config(fast_config());
        let key = "inst-1:positions";

        assert!(breaker.record_failure(key, &malformed_error()));
        assert!(!breaker.is_allowed(key));
    }

    #[test]
    fn test_success_clears_the_circuit() {
        let breaker = CircuitBreaker::with_config(fast_config());
        let key = "inst-1:funds";

        breaker.record_failure(key, &upstream_error());
        breaker.record_failure(key, &upstream_error());
        assert_eq!(breaker.failure_count(key), 2);

        breaker.record_success(key);
        assert_eq!(breaker.failure_count(key), 0);

        // The count restarts, so two more failures don't open it.
        breaker.record_failure(key, &upstream_error());
        breaker.record_failure(key, &upstream_error());
        assert_eq!(breaker.state(key), CircuitState::Closed);
    }

    #[test]
    fn test_open_resets_failure_count() {
        let breaker = CircuitBreaker::with_config(fast_config());
        let key = "inst-1:quotes";

        breaker.record_failure(key, &upstream_error());
        breaker.record_failure(key, &upstream_error());
        breaker.record_failure(key, &upstream_error());
        assert_eq!(breaker.failure_count(key), 0);
    }

    #[test]
    fn test_cooldown_elapse_closes_optimistically() {
        let breaker = CircuitBreaker::with_config(fast_config());
        let key = "inst-1:quotes";

        for _ in 0..3 {
            breaker.record_failure(key, &upstream_error());
        }
        assert!(!breaker.is_allowed(key));

        std::thread::sleep(Duration::from_millis(30));

        // No probe handshake: cooldown expiry alone closes the circuit.
        assert!(breaker.is_allowed(key));
        assert_eq!(breaker.state(key), CircuitState::Closed);

        // The probe call failing once does not reopen; the count restarted.
        assert!(!breaker.record_failure(key, &upstream_error()));
        assert_eq!(breaker.state(key), CircuitState::Closed);
    }

    #[test]
    fn test_per_key_isolation() {
        let breaker = CircuitBreaker::with_config(fast_config());

        breaker.record_failure("inst-1:quotes", &malformed_error());
        assert!(!breaker.is_allowed("inst-1:quotes"));

        assert!(breaker.is_allowed("inst-1:funds"));
        assert!(breaker.is_allowed("inst-2:quotes"));
    }

    #[test]
    fn test_reset_all() {
        let breaker = CircuitBreaker::with_config(fast_config());
        breaker.record_failure("inst-1:quotes", &malformed_error());
        breaker.reset_all();
        assert!(breaker.is_allowed("inst-1:quotes"));
    }
}
