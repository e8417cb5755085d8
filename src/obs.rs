//! Observability helpers for broker operations.
//!
//! `tracing` spans are always emitted (the broker is a long-running service, not a library
//! callers opt into). Enable the `metrics` feature to additionally increment the
//! `sdp_mcp_broker_operation_total` counter for every attempt/success/failure, labeled by
//! `operation` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Broker operation kinds observed end to end (§10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// Per-tenant access-token refresh against the identity provider.
	Refresh,
	/// One MCP `tools/call` dispatch through to the upstream SaaS API.
	ToolCall,
	/// SSE session lifecycle (open, keep-alive, close).
	SessionOpen,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Refresh => "refresh",
			Self::ToolCall => "tool_call",
			Self::SessionOpen => "session_open",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
	/// Entry to a broker operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OperationOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Attempt => "attempt",
			Self::Success => "success",
			Self::Failure => "failure",
		}
	}
}
impl Display for OperationOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
