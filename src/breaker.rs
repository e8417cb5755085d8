//! Per-(tenant, target) circuit breaker shielding the identity provider and the SaaS API.

// self
use crate::{_prelude::*, auth::TenantId};

/// Which upstream target a breaker instance is guarding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerTarget {
	/// The identity provider's token endpoint.
	Identity,
	/// The SaaS REST API.
	Api,
}
impl BreakerTarget {
	/// Label used in `Error::CircuitOpen` and log fields.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Identity => "identity",
			Self::Api => "api",
		}
	}
}

/// Breaker lifecycle state, persisted alongside the credential record so restarts don't lose
/// protection (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
	/// Calls are admitted; failures accumulate toward `failure_threshold`.
	Closed,
	/// Calls fail immediately until `reset_timeout` elapses.
	Open,
	/// A single probe call is admitted to test recovery.
	HalfOpen,
}

/// Durable snapshot of one breaker's state, embedded in the credential record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
	/// Current lifecycle state.
	pub state: BreakerState,
	/// Consecutive failures observed while `Closed`.
	pub consecutive_failures: u32,
	/// Consecutive successes observed while `HalfOpen`.
	pub consecutive_successes: u32,
	/// When the breaker tripped to `Open`, if it is currently open.
	pub opened_at: Option<OffsetDateTime>,
}
impl Default for BreakerSnapshot {
	fn default() -> Self {
		Self {
			state: BreakerState::Closed,
			consecutive_failures: 0,
			consecutive_successes: 0,
			opened_at: None,
		}
	}
}

/// Thresholds configuring one [`CircuitBreaker`] instance (§6 `SDP_BROKER_BREAKER_*`).
#[derive(Clone, Copy, Debug)]
pub struct BreakerThresholds {
	/// Consecutive failures in `Closed` before tripping to `Open`.
	pub failure_threshold: u32,
	/// Consecutive successes in `HalfOpen` before resetting to `Closed`.
	pub success_threshold: u32,
	/// How long an `Open` breaker stays open before admitting a probe call.
	pub reset_timeout: Duration,
}
impl Default for BreakerThresholds {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			success_threshold: 2,
			reset_timeout: Duration::seconds(300),
		}
	}
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
	/// The call may proceed.
	Admit,
	/// The call must fail immediately.
	Deny {
		/// Suggested wait before the caller tries again.
		retry_after: Duration,
	},
}

/// Per-(tenant, target) circuit breaker state machine.
///
/// State transitions exactly follow §4.4: `Closed` → (N consecutive failures) → `Open` →
/// (after `reset_timeout`) → `HalfOpen` → (M consecutive successes) → `Closed`, or (one
/// failure) → `Open`. Only genuine upstream failures (5xx, network errors, identity-side
/// refresh denials) are reported via [`CircuitBreaker::record_failure`]; tenant-caused 4xx
/// errors must never be reported here.
pub struct CircuitBreaker {
	thresholds: BreakerThresholds,
	states: Mutex<HashMap<(TenantId, BreakerTarget), BreakerSnapshot>>,
}
impl CircuitBreaker {
	/// Builds a breaker with the given thresholds and no persisted state.
	pub fn new(thresholds: BreakerThresholds) -> Self {
		Self { thresholds, states: Mutex::new(HashMap::new()) }
	}

	/// Restores a breaker's prior state for one (tenant, target) pair, e.g. loaded from the
	/// credential record at startup.
	pub fn restore(&self, tenant: &TenantId, target: BreakerTarget, snapshot: BreakerSnapshot) {
		self.states.lock().insert((tenant.clone(), target), snapshot);
	}

	/// Returns a snapshot suitable for persisting back into the credential record.
	pub fn snapshot(&self, tenant: &TenantId, target: BreakerTarget) -> BreakerSnapshot {
		self.states.lock().get(&(tenant.clone(), target)).copied().unwrap_or_default()
	}

	/// Asks whether a call to `target` on behalf of `tenant` may proceed right now.
	pub fn admit(&self, tenant: &TenantId, target: BreakerTarget, now: OffsetDateTime) -> Admission {
		let mut states = self.states.lock();
		let snapshot = states.entry((tenant.clone(), target)).or_default();

		match snapshot.state {
			BreakerState::Closed | BreakerState::HalfOpen => Admission::Admit,
			BreakerState::Open => {
				let opened_at = snapshot.opened_at.unwrap_or(now);
				let elapsed = now - opened_at;

				if elapsed >= self.thresholds.reset_timeout {
					snapshot.state = BreakerState::HalfOpen;
					snapshot.consecutive_successes = 0;

					Admission::Admit
				} else {
					Admission::Deny { retry_after: self.thresholds.reset_timeout - elapsed }
				}
			},
		}
	}

	/// Records a successful call, per the transition table in §4.4.
	pub fn record_success(&self, tenant: &TenantId, target: BreakerTarget) {
		let mut states = self.states.lock();
		let snapshot = states.entry((tenant.clone(), target)).or_default();

		match snapshot.state {
			BreakerState::Closed => snapshot.consecutive_failures = 0,
			BreakerState::HalfOpen => {
				snapshot.consecutive_successes += 1;

				if snapshot.consecutive_successes >= self.thresholds.success_threshold {
					*snapshot = BreakerSnapshot::default();
				}
			},
			BreakerState::Open => {},
		}
	}

	/// Records a genuine upstream failure, per the transition table in §4.4.
	pub fn record_failure(&self, tenant: &TenantId, target: BreakerTarget, now: OffsetDateTime) {
		let mut states = self.states.lock();
		let snapshot = states.entry((tenant.clone(), target)).or_default();

		match snapshot.state {
			BreakerState::Closed => {
				snapshot.consecutive_failures += 1;

				if snapshot.consecutive_failures >= self.thresholds.failure_threshold {
					snapshot.state = BreakerState::Open;
					snapshot.opened_at = Some(now);
				}
			},
			BreakerState::HalfOpen => {
				snapshot.state = BreakerState::Open;
				snapshot.opened_at = Some(now);
				snapshot.consecutive_successes = 0;
			},
			BreakerState::Open => {},
		}
	}
}
