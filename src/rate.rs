//! Per-tenant rate limiting: a hard sliding-window cap on refresh-token exchanges, plus an
//! advisory three-tier call budget against the upstream API (§4.3).

// self
use crate::{_prelude::*, auth::TenantId};

/// Outcome of asking for permission to proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
	/// The call may proceed.
	Admit,
	/// The call must be denied until `retry_after` elapses.
	Denied {
		/// Suggested wait before trying again.
		retry_after: Duration,
	},
}

/// Thresholds for one [`RateCoordinator`] instance (§6 `SDP_BROKER_REFRESH_*` /
/// `SDP_BROKER_CALL_BUDGET_*`).
#[derive(Clone, Copy, Debug)]
pub struct RateThresholds {
	/// Minimum spacing between two refresh exchanges for the same tenant.
	pub refresh_min_interval: Duration,
	/// Maximum refresh exchanges allowed within `refresh_window`.
	pub refresh_max_per_window: usize,
	/// Width of the refresh sliding window.
	pub refresh_window: Duration,
	/// Advisory per-minute call budget.
	pub calls_per_minute: u32,
	/// Advisory per-hour call budget.
	pub calls_per_hour: u32,
	/// Advisory per-day call budget.
	pub calls_per_day: u32,
}
impl Default for RateThresholds {
	fn default() -> Self {
		Self {
			refresh_min_interval: Duration::seconds(180),
			refresh_max_per_window: 10,
			refresh_window: Duration::seconds(600),
			calls_per_minute: 60,
			calls_per_hour: 1_000,
			calls_per_day: 10_000,
		}
	}
}

/// Sliding-window record of refresh-exchange timestamps for one tenant, trimmed to
/// `refresh_window` on every access.
#[derive(Clone, Debug, Default)]
struct RefreshWindow {
	timestamps: Vec<OffsetDateTime>,
}
impl RefreshWindow {
	fn trim(&mut self, now: OffsetDateTime, window: Duration) {
		self.timestamps.retain(|ts| now - *ts < window);
	}
}

#[derive(Clone, Copy, Debug)]
struct CounterWindow {
	window_start: OffsetDateTime,
	count: u32,
}

/// Three independent sliding counters (minute/hour/day) for one tenant's API call volume.
#[derive(Clone, Debug)]
struct CallBudget {
	minute: CounterWindow,
	hour: CounterWindow,
	day: CounterWindow,
}
impl CallBudget {
	fn new(now: OffsetDateTime) -> Self {
		let fresh = CounterWindow { window_start: now, count: 0 };

		Self { minute: fresh, hour: fresh, day: fresh }
	}
}

/// Per-tenant sliding-window refresh gate and advisory call budget (§4.3).
///
/// Refreshes are a hard cap: the upstream identity provider enforces this itself, and tripping
/// it risks a provider-side penalty, so the coordinator never allows a refresh through once
/// either window limit is reached. The call budget is advisory; it exists to fail fast locally
/// rather than spend a round trip discovering the provider also rejected the call.
pub struct RateCoordinator {
	thresholds: RateThresholds,
	refresh_windows: Mutex<HashMap<TenantId, RefreshWindow>>,
	call_budgets: Mutex<HashMap<TenantId, CallBudget>>,
}
impl RateCoordinator {
	/// Builds a coordinator with the given thresholds and no recorded history.
	pub fn new(thresholds: RateThresholds) -> Self {
		Self {
			thresholds,
			refresh_windows: Mutex::new(HashMap::new()),
			call_budgets: Mutex::new(HashMap::new()),
		}
	}

	/// Asks whether a refresh-token exchange may proceed for `tenant` at `now`, without
	/// recording it. Callers must call [`RateCoordinator::record_refresh`] only after a
	/// successful exchange (§4.6 step 6).
	pub fn reserve_refresh(&self, tenant: &TenantId, now: OffsetDateTime) -> Grant {
		let mut windows = self.refresh_windows.lock();
		let window = windows.entry(tenant.clone()).or_default();

		window.trim(now, self.thresholds.refresh_window);

		if let Some(last) = window.timestamps.last() {
			let elapsed = now - *last;

			if elapsed < self.thresholds.refresh_min_interval {
				return Grant::Denied { retry_after: self.thresholds.refresh_min_interval - elapsed };
			}
		}

		if window.timestamps.len() >= self.thresholds.refresh_max_per_window {
			let oldest = window.timestamps[0];
			let retry_after = self.thresholds.refresh_window - (now - oldest);

			return Grant::Denied { retry_after: retry_after.max(Duration::ZERO) };
		}

		Grant::Admit
	}

	/// Records a successful refresh-token exchange at `now`.
	pub fn record_refresh(&self, tenant: &TenantId, now: OffsetDateTime) {
		let mut windows = self.refresh_windows.lock();
		let window = windows.entry(tenant.clone()).or_default();

		window.trim(now, self.thresholds.refresh_window);
		window.timestamps.push(now);
	}

	/// Reserves and records one API call against the tenant's advisory budget.
	pub fn record_call(&self, tenant: &TenantId, now: OffsetDateTime) -> Grant {
		let mut budgets = self.call_budgets.lock();
		let budget = budgets.entry(tenant.clone()).or_insert_with(|| CallBudget::new(now));

		Self::tick(&mut budget.minute, now, Duration::minutes(1), self.thresholds.calls_per_minute)
			.or_else(|| Self::tick(&mut budget.hour, now, Duration::hours(1), self.thresholds.calls_per_hour))
			.or_else(|| Self::tick(&mut budget.day, now, Duration::days(1), self.thresholds.calls_per_day))
			.unwrap_or(Grant::Admit)
	}

	/// Clears all recorded history for a tenant, e.g. after the tenant is deprovisioned.
	pub fn reset(&self, tenant: &TenantId) {
		self.refresh_windows.lock().remove(tenant);
		self.call_budgets.lock().remove(tenant);
	}

	/// Advances `counter` if still within its window and admits if under `limit`; rolls the
	/// window over and admits if the window has elapsed; denies otherwise.
	fn tick(counter: &mut CounterWindow, now: OffsetDateTime, width: Duration, limit: u32) -> Option<Grant> {
		if now - counter.window_start >= width {
			counter.window_start = now;
			counter.count = 0;
		}

		if counter.count >= limit {
			let retry_after = width - (now - counter.window_start);

			return Some(Grant::Denied { retry_after: retry_after.max(Duration::ZERO) });
		}

		counter.count += 1;

		None
	}
}
