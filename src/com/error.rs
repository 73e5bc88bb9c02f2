use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::storage::StoreError;

/// Failure of a remote-callable operation as seen by the caller.
#[derive(Error, Debug)]
pub enum ComError {
	/// The transport could not reach the remote endpoint. Always invalidates
	/// the connection and the proxy that observed it.
	#[error("Connection failure: {reason}")]
	Connection {
		reason: String,
		#[source]
		source: Option<std::io::Error>
	},
	/// Unexpected or unparseable message. Fatal to the connection.
	#[error("Protocol violation: {0}")]
	Protocol(String),
	/// The remote endpoint executed the call but reported failure.
	/// Does not invalidate the connection.
	#[error("Remote failure: {reason}")]
	RemoteFailure {
		reason: String,
		cause: Option<String>
	},
	/// The proxy was already marked invalid; no I/O was attempted.
	#[error("Invalid proxy: {0}")]
	InvalidProxy(String),
	/// The endpoint has been shut down.
	#[error("Endpoint closed")]
	Closed,
	#[error("IO error")]
	Io(#[from] std::io::Error),
	#[error("RPC error")]
	Rpc(#[from] tarpc::client::RpcError),
	#[error("Store error")]
	Store(#[from] StoreError)
}

impl ComError {
	pub fn connection(reason: impl Into<String>) -> Self {
		ComError::Connection {
			reason: reason.into(),
			source: None
		}
	}

	pub fn connection_io(reason: impl Into<String>, source: std::io::Error) -> Self {
		ComError::Connection {
			reason: reason.into(),
			source: Some(source)
		}
	}

	/// True for failures that must permanently invalidate the proxy
	/// that observed them.
	pub fn invalidates_proxy(&self) -> bool {
		matches!(
			self,
			ComError::Connection { .. }
				| ComError::Protocol(_)
				| ComError::Io(_)
				| ComError::Rpc(_)
				| ComError::Closed
		)
	}
}

pub type ComResult<T> = std::result::Result<T, ComError>;

/// Serializable reason+cause pair carried by failure responses on both wires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFault {
	pub reason: String,
	pub cause: Option<String>
}

impl RemoteFault {
	pub fn new(reason: impl Into<String>) -> Self {
		RemoteFault {
			reason: reason.into(),
			cause: None
		}
	}
}

impl From<&ComError> for RemoteFault {
	fn from(e: &ComError) -> Self {
		let cause = match e {
			ComError::Connection { source: Some(io), .. } => Some(io.to_string()),
			ComError::RemoteFailure { cause, .. } => cause.clone(),
			ComError::Io(io) => Some(io.to_string()),
			ComError::Store(s) => Some(s.to_string()),
			_ => None
		};
		RemoteFault {
			reason: e.to_string(),
			cause
		}
	}
}

impl From<RemoteFault> for ComError {
	fn from(f: RemoteFault) -> Self {
		ComError::RemoteFailure {
			reason: f.reason,
			cause: f.cause
		}
	}
}
