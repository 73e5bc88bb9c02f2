use std::sync::Arc;
use log::debug;
use serde::{Serialize, Deserialize};
use tokio::sync::watch;
use super::error::{ComError, ComResult};

/// Remote-callable operations, including the two reserved wire-level ones.
/// Resolved once at deserialization; dispatch is a plain match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
	// reserved: handshake at connection setup
	Connect,
	// reserved: teardown notification, never replied to
	Shutdown,
	GetNodeId,
	Ping,
	FindSuccessor,
	Notify,
	LeavesNetwork,
	NotifyAndCopyEntries,
	InsertEntry,
	RemoveEntry,
	InsertReplicas,
	RemoveReplicas,
	RetrieveEntries
}

impl Method {
	/// Operations that touch stored entries, permitted only once the
	/// endpoint accepts entries.
	pub fn entry_sensitive(&self) -> bool {
		matches!(
			self,
			Method::NotifyAndCopyEntries
				| Method::InsertEntry
				| Method::RemoveEntry
				| Method::InsertReplicas
				| Method::RemoveReplicas
				| Method::RetrieveEntries
		)
	}
}

/// States of an endpoint in lifecycle order. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EndpointState {
	Created,
	Listening,
	AcceptingEntries,
	Closed
}

struct Inner {
	tx: watch::Sender<EndpointState>,
	rx: watch::Receiver<EndpointState>
}

/// The lifecycle gate shared by every transport endpoint. Gated callers
/// park on the watch channel; every transition wakes all of them and each
/// re-checks the guard, so coalesced transitions are handled correctly.
#[derive(Clone)]
pub struct Lifecycle(Arc<Inner>);

impl Lifecycle {
	pub fn new() -> Self {
		let (tx, rx) = watch::channel(EndpointState::Created);
		Lifecycle(Arc::new(Inner { tx, rx }))
	}

	pub fn state(&self) -> EndpointState {
		*self.0.rx.borrow()
	}

	/// Advance to a later state. Moving backwards is a programming error of
	/// the owning node and is rejected.
	pub fn advance(&self, to: EndpointState) -> ComResult<()> {
		let mut moved = true;
		self.0.tx.send_modify(|state| {
			if to > *state {
				*state = to;
			} else {
				moved = false;
			}
		});
		if moved {
			debug!("endpoint state advanced to {:?}", to);
			Ok(())
		} else {
			Err(ComError::Protocol(format!(
				"endpoint state cannot move back to {:?}",
				to
			)))
		}
	}

	/// Block the caller until `method` may be dispatched. Entry-sensitive
	/// methods wait for AcceptingEntries; everything else passes as soon as
	/// the endpoint exists. A closed endpoint fails every call.
	pub async fn gate(&self, method: Method) -> ComResult<()> {
		let mut rx = self.0.rx.clone();
		loop {
			// re-check after every wake-up
			let state = *rx.borrow_and_update();
			match state {
				EndpointState::Closed => return Err(ComError::Closed),
				EndpointState::AcceptingEntries => return Ok(()),
				_ if !method.entry_sensitive() => return Ok(()),
				_ => {
					debug!("blocking {:?} until entries are acceptable", method);
				}
			}
			rx.changed().await.map_err(|_| ComError::Closed)?;
		}
	}

	/// Resolve once the endpoint reaches Closed. Used by listener loops to
	/// stop accepting work.
	pub async fn wait_closed(&self) {
		let mut rx = self.0.rx.clone();
		loop {
			if *rx.borrow_and_update() == EndpointState::Closed {
				return;
			}
			if rx.changed().await.is_err() {
				return;
			}
		}
	}
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}
