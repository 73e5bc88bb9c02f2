use std::{
	collections::HashSet,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc
	}
};
use async_trait::async_trait;
use log::debug;
use crate::com::error::{ComError, ComResult};
use crate::com::factory::ProxyFactory;
use crate::com::node::{Node, NodeInfo, NodeRef, RefsAndEntries};
use crate::data::{Entry, Id, Url};
use super::connection::Connection;
use super::wire::{RequestBody, ResponseBody};

/// Caller-side stand-in for a remote node reached over the socket
/// transport. Starts out disconnected; every operation goes through
/// ensure_connected, so a proxy received inside an RPC result only opens
/// (or joins) a pooled connection when it is first used. Once a
/// connection-level failure is observed the proxy is permanently invalid;
/// callers must resolve a fresh proxy, there is no implicit recovery.
pub struct SocketProxy {
	factory: Arc<ProxyFactory>,
	info: NodeInfo,
	proxy_id: u64,
	connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
	invalid: AtomicBool
}

impl SocketProxy {
	/// First contact: joins the pooled connection (handshake if it is the
	/// first proxy for the pair) and resolves the remote node id.
	pub async fn connect(factory: Arc<ProxyFactory>, url: Url) -> ComResult<Arc<Self>> {
		let proxy_id = factory.pool().next_proxy_id();
		let local_url = factory.local_url().clone();
		let conn = factory
			.pool()
			.connection_for(&local_url, &url, proxy_id)
			.await?;

		let resolve = async {
			let correlation = conn.send(proxy_id, RequestBody::GetNodeId).await?;
			let response = conn.wait_for_response(correlation).await?;
			match response.result {
				Ok(ResponseBody::NodeId(id)) => Ok(id),
				Ok(other) => Err(ComError::Protocol(format!(
					"unexpected node id response: {:?}",
					other
				))),
				Err(fault) => Err(fault.into())
			}
		};
		let id = match resolve.await {
			Ok(id) => id,
			// a failed first contact must not keep the connection pooled
			Err(e) => {
				factory.pool().release(&local_url, &url, proxy_id).await;
				return Err(e);
			}
		};
		debug!("SocketProxy for {} created, remote id {}", url, id);

		Ok(Arc::new(SocketProxy {
			factory,
			info: NodeInfo { id, url },
			proxy_id,
			connection: tokio::sync::Mutex::new(Some(conn)),
			invalid: AtomicBool::new(false)
		}))
	}

	/// Proxy for a node reference whose id is already known. No I/O.
	pub fn for_info(factory: Arc<ProxyFactory>, info: NodeInfo) -> Arc<Self> {
		let proxy_id = factory.pool().next_proxy_id();
		Arc::new(SocketProxy {
			factory,
			info,
			proxy_id,
			connection: tokio::sync::Mutex::new(None),
			invalid: AtomicBool::new(false)
		})
	}

	pub fn is_valid(&self) -> bool {
		!self.invalid.load(Ordering::Relaxed)
	}

	/// Give the underlying connection back to the pool. The owner of a
	/// proxy calls this on its exit path; the last release per peer pair
	/// tears the physical connection down.
	pub async fn release(&self) {
		let mut guard = self.connection.lock().await;
		if guard.take().is_some() {
			self.factory
				.pool()
				.release(self.factory.local_url(), &self.info.url, self.proxy_id)
				.await;
		}
	}

	async fn ensure_connected(&self) -> ComResult<Arc<Connection>> {
		if !self.is_valid() {
			return Err(ComError::InvalidProxy(format!(
				"{} -> {}",
				self.factory.local_url(),
				self.info.url
			)));
		}
		let mut guard = self.connection.lock().await;
		if let Some(conn) = guard.as_ref() {
			return Ok(conn.clone());
		}
		let conn = self
			.factory
			.pool()
			.connection_for(self.factory.local_url(), &self.info.url, self.proxy_id)
			.await
			.map_err(|e| self.fail(e))?;
		*guard = Some(conn.clone());
		Ok(conn)
	}

	fn fail(&self, e: ComError) -> ComError {
		if e.invalidates_proxy() {
			self.invalid.store(true, Ordering::Relaxed);
		}
		e
	}

	async fn call(&self, body: RequestBody) -> ComResult<ResponseBody> {
		let conn = self.ensure_connected().await?;
		let result = async {
			let correlation = conn.send(self.proxy_id, body).await?;
			let response = conn.wait_for_response(correlation).await?;
			match response.result {
				Ok(body) => Ok(body),
				Err(fault) => Err(ComError::from(fault))
			}
		}
		.await;
		result.map_err(|e| self.fail(e))
	}

	fn rebind(&self, infos: Vec<NodeInfo>) -> ComResult<Vec<NodeRef>> {
		infos
			.into_iter()
			.map(|info| self.factory.create(info))
			.collect()
	}
}

#[async_trait]
impl Node for SocketProxy {
	fn info(&self) -> NodeInfo {
		self.info.clone()
	}

	async fn find_successor(&self, id: Id) -> ComResult<NodeRef> {
		match self.call(RequestBody::FindSuccessor { id }).await? {
			ResponseBody::NodeRef(info) => self.factory.create(info),
			other => Err(self.fail(ComError::Protocol(format!(
				"unexpected find_successor result: {:?}",
				other
			))))
		}
	}

	async fn notify(&self, candidate: &NodeInfo) -> ComResult<Vec<NodeRef>> {
		let body = RequestBody::Notify {
			candidate: candidate.clone()
		};
		match self.call(body).await? {
			ResponseBody::Refs(infos) => self.rebind(infos),
			other => Err(self.fail(ComError::Protocol(format!(
				"unexpected notify result: {:?}",
				other
			))))
		}
	}

	async fn notify_and_copy_entries(&self, candidate: &NodeInfo) -> ComResult<RefsAndEntries> {
		let body = RequestBody::NotifyAndCopyEntries {
			candidate: candidate.clone()
		};
		match self.call(body).await? {
			ResponseBody::RefsAndEntries { refs, entries } => Ok(RefsAndEntries {
				refs: self.rebind(refs)?,
				entries
			}),
			other => Err(self.fail(ComError::Protocol(format!(
				"unexpected notify_and_copy_entries result: {:?}",
				other
			))))
		}
	}

	async fn insert_entry(&self, entry: &Entry) -> ComResult<()> {
		self.call(RequestBody::InsertEntry {
			entry: entry.clone()
		})
		.await?;
		Ok(())
	}

	async fn remove_entry(&self, entry: &Entry) -> ComResult<()> {
		self.call(RequestBody::RemoveEntry {
			entry: entry.clone()
		})
		.await?;
		Ok(())
	}

	async fn insert_replicas(&self, replicas: &HashSet<Entry>) -> ComResult<()> {
		self.call(RequestBody::InsertReplicas {
			replicas: replicas.clone()
		})
		.await?;
		Ok(())
	}

	async fn remove_replicas(&self, from: Id, replicas: &HashSet<Entry>) -> ComResult<()> {
		self.call(RequestBody::RemoveReplicas {
			from,
			replicas: replicas.clone()
		})
		.await?;
		Ok(())
	}

	async fn retrieve_entries(&self, id: Id) -> ComResult<HashSet<Entry>> {
		match self.call(RequestBody::RetrieveEntries { id }).await? {
			ResponseBody::Entries(entries) => Ok(entries),
			other => Err(self.fail(ComError::Protocol(format!(
				"unexpected retrieve_entries result: {:?}",
				other
			))))
		}
	}

	async fn leaves_network(&self, predecessor: &NodeInfo) -> ComResult<()> {
		self.call(RequestBody::LeavesNetwork {
			predecessor: predecessor.clone()
		})
		.await?;
		Ok(())
	}

	async fn ping(&self) -> ComResult<()> {
		self.call(RequestBody::Ping).await?;
		Ok(())
	}
}
