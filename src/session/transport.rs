//! SSE event plumbing: the per-session outbound channel and the `axum` response it feeds.

// std
use std::{convert::Infallible, time::Duration as StdDuration};
// crates.io
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
// self
use crate::_prelude::*;

/// Bound on the number of buffered outbound events before the session is considered
/// backpressured and closed (§4.9's "1 MiB buffer" rule, expressed as an event count proxy
/// since individual MCP frames are small and uniformly sized in practice).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

type BoxedEventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Boxed outbound event stream, so the concrete `Sse<S>` type does not leak `impl Trait` across
/// the session manager's public API.
pub type SseStream = KeepAliveStream<BoxedEventStream>;

/// Sender half of a session's outbound SSE channel.
#[derive(Clone)]
pub struct SseSender(mpsc::Sender<Event>);
impl SseSender {
	/// Sends one named SSE event; returns `false` if the channel is closed or full, signalling
	/// to the caller that the session should be closed for backpressure.
	pub async fn send(&self, event_name: &'static str, payload: &serde_json::Value) -> bool {
		let event = Event::default().event(event_name).data(payload.to_string());

		self.0.send(event).await.is_ok()
	}

	/// Tries to send without waiting; used on hot paths that must not block on a slow reader.
	pub fn try_send(&self, event_name: &'static str, payload: &serde_json::Value) -> bool {
		let event = Event::default().event(event_name).data(payload.to_string());

		self.0.try_send(event).is_ok()
	}
}

/// Builds a fresh outbound channel and the `axum` [`Sse`] response that drains it.
///
/// The response applies a 30 s keep-alive comment frame, matching the SSE transport contract;
/// disconnect is a normal stream close with no error frame.
pub fn new_stream() -> (SseSender, Sse<SseStream>) {
	let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
	let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (Ok(event), rx)) });
	let sse = Sse::new(Box::pin(stream) as BoxedEventStream)
		.keep_alive(KeepAlive::new().interval(StdDuration::from_secs(30)).text(":keepalive"));

	(SseSender(tx), sse)
}
