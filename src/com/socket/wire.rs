use std::collections::HashSet;
use serde::{Serialize, Deserialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use crate::com::endpoint::Method;
use crate::com::error::{ComError, ComResult, RemoteFault};
use crate::com::node::NodeInfo;
use crate::data::{Entry, Id};

/// Hard cap on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Tagged request body. The variant determines the method, so dispatch is
/// resolved once at deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
	Connect,
	Shutdown,
	GetNodeId,
	Ping,
	FindSuccessor { id: Id },
	Notify { candidate: NodeInfo },
	LeavesNetwork { predecessor: NodeInfo },
	NotifyAndCopyEntries { candidate: NodeInfo },
	InsertEntry { entry: Entry },
	RemoveEntry { entry: Entry },
	InsertReplicas { replicas: HashSet<Entry> },
	RemoveReplicas { from: Id, replicas: HashSet<Entry> },
	RetrieveEntries { id: Id }
}

impl RequestBody {
	pub fn method(&self) -> Method {
		match self {
			RequestBody::Connect => Method::Connect,
			RequestBody::Shutdown => Method::Shutdown,
			RequestBody::GetNodeId => Method::GetNodeId,
			RequestBody::Ping => Method::Ping,
			RequestBody::FindSuccessor { .. } => Method::FindSuccessor,
			RequestBody::Notify { .. } => Method::Notify,
			RequestBody::LeavesNetwork { .. } => Method::LeavesNetwork,
			RequestBody::NotifyAndCopyEntries { .. } => Method::NotifyAndCopyEntries,
			RequestBody::InsertEntry { .. } => Method::InsertEntry,
			RequestBody::RemoveEntry { .. } => Method::RemoveEntry,
			RequestBody::InsertReplicas { .. } => Method::InsertReplicas,
			RequestBody::RemoveReplicas { .. } => Method::RemoveReplicas,
			RequestBody::RetrieveEntries { .. } => Method::RetrieveEntries
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub correlation: u64,
	pub body: RequestBody
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseBody {
	Ack,
	NodeId(Id),
	NodeRef(NodeInfo),
	Refs(Vec<NodeInfo>),
	RefsAndEntries {
		refs: Vec<NodeInfo>,
		entries: HashSet<Entry>
	},
	Entries(HashSet<Entry>)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub correlation: u64,
	/// Method of the request this answers, or Shutdown for the teardown
	/// notification an endpoint pushes on close.
	pub method: Method,
	pub result: Result<ResponseBody, RemoteFault>
}

impl Response {
	pub fn success(correlation: u64, method: Method, body: ResponseBody) -> Self {
		Response {
			correlation,
			method,
			result: Ok(body)
		}
	}

	pub fn failure(correlation: u64, method: Method, fault: RemoteFault) -> Self {
		Response {
			correlation,
			method,
			result: Err(fault)
		}
	}

	pub fn shutdown() -> Self {
		Response {
			correlation: 0,
			method: Method::Shutdown,
			result: Ok(ResponseBody::Ack)
		}
	}
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> ComResult<()>
where
	W: AsyncWrite + Unpin,
	T: Serialize
{
	let bytes = bincode::serialize(message)
		.map_err(|e| ComError::Protocol(format!("cannot encode frame: {}", e)))?;
	writer.write_u32_le(bytes.len() as u32).await?;
	writer.write_all(&bytes).await?;
	writer.flush().await?;
	Ok(())
}

/// Read one frame. Ok(None) signals a clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> ComResult<Option<T>>
where
	R: AsyncRead + Unpin,
	T: serde::de::DeserializeOwned
{
	let len = match reader.read_u32_le().await {
		Ok(v) => v as usize,
		Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(e) => return Err(e.into())
	};
	if len > MAX_FRAME_LEN {
		return Err(ComError::Protocol(format!("frame of {} bytes exceeds limit", len)));
	}
	let mut buf = vec![0u8; len];
	reader.read_exact(&mut buf).await?;
	let message = bincode::deserialize(&buf)
		.map_err(|e| ComError::Protocol(format!("cannot decode frame: {}", e)))?;
	Ok(Some(message))
}
