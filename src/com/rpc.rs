use std::{
	collections::HashSet,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex
	}
};
use async_trait::async_trait;
use futures::{future, StreamExt};
use log::{debug, info, warn};
use tarpc::{context, server::Channel, tokio_serde::formats::Bincode};
use tokio::task::JoinHandle;
use crate::data::{Entry, Id, Scheme, Url};
use super::endpoint::{EndpointState, Lifecycle, Method};
use super::error::{ComError, ComResult, RemoteFault};
use super::factory::ProxyFactory;
use super::node::{Node, NodeInfo, NodeRef, RefsAndEntries};

const MAX_CHANNELS: usize = 64;

/// Wire shape of a refs-plus-entries result; node references travel as
/// plain infos and are re-bound to proxies on the caller side.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WireRefsAndEntries {
	pub refs: Vec<NodeInfo>,
	pub entries: HashSet<Entry>
}

#[tarpc::service]
pub trait OverlayService {
	async fn get_node_id_rpc() -> Id;
	async fn ping_rpc() -> Result<(), RemoteFault>;
	async fn find_successor_rpc(id: Id) -> Result<NodeInfo, RemoteFault>;
	async fn notify_rpc(candidate: NodeInfo) -> Result<Vec<NodeInfo>, RemoteFault>;
	async fn leaves_network_rpc(predecessor: NodeInfo) -> Result<(), RemoteFault>;
	async fn notify_and_copy_entries_rpc(candidate: NodeInfo)
		-> Result<WireRefsAndEntries, RemoteFault>;
	async fn insert_entry_rpc(entry: Entry) -> Result<(), RemoteFault>;
	async fn remove_entry_rpc(entry: Entry) -> Result<(), RemoteFault>;
	async fn insert_replicas_rpc(replicas: HashSet<Entry>) -> Result<(), RemoteFault>;
	async fn remove_replicas_rpc(from: Id, replicas: HashSet<Entry>) -> Result<(), RemoteFault>;
	async fn retrieve_entries_rpc(id: Id) -> Result<HashSet<Entry>, RemoteFault>;
}

/// Serves one local node over tarpc. Cloned per channel; the shared state
/// lives behind the contained Arcs.
#[derive(Clone)]
pub struct OverlayServer {
	node: NodeRef,
	lifecycle: Lifecycle
}

impl OverlayServer {
	async fn gated<T, F>(&self, method: Method, call: F) -> Result<T, RemoteFault>
	where
		F: future::Future<Output = ComResult<T>>
	{
		if let Err(e) = self.lifecycle.gate(method).await {
			return Err(RemoteFault::from(&e));
		}
		call.await.map_err(|e| RemoteFault::from(&e))
	}
}

#[tarpc::server]
impl OverlayService for OverlayServer {
	async fn get_node_id_rpc(self, _: context::Context) -> Id {
		self.node.info().id
	}

	async fn ping_rpc(self, _: context::Context) -> Result<(), RemoteFault> {
		self.gated(Method::Ping, self.node.ping()).await
	}

	async fn find_successor_rpc(self, _: context::Context, id: Id) -> Result<NodeInfo, RemoteFault> {
		self.gated(Method::FindSuccessor, async {
			Ok(self.node.find_successor(id).await?.info())
		})
		.await
	}

	async fn notify_rpc(
		self,
		_: context::Context,
		candidate: NodeInfo
	) -> Result<Vec<NodeInfo>, RemoteFault> {
		self.gated(Method::Notify, async {
			let refs = self.node.notify(&candidate).await?;
			Ok(refs.iter().map(|n| n.info()).collect())
		})
		.await
	}

	async fn leaves_network_rpc(
		self,
		_: context::Context,
		predecessor: NodeInfo
	) -> Result<(), RemoteFault> {
		self.gated(Method::LeavesNetwork, self.node.leaves_network(&predecessor))
			.await
	}

	async fn notify_and_copy_entries_rpc(
		self,
		_: context::Context,
		candidate: NodeInfo
	) -> Result<WireRefsAndEntries, RemoteFault> {
		self.gated(Method::NotifyAndCopyEntries, async {
			let RefsAndEntries { refs, entries } =
				self.node.notify_and_copy_entries(&candidate).await?;
			Ok(WireRefsAndEntries {
				refs: refs.iter().map(|n| n.info()).collect(),
				entries
			})
		})
		.await
	}

	async fn insert_entry_rpc(self, _: context::Context, entry: Entry) -> Result<(), RemoteFault> {
		self.gated(Method::InsertEntry, self.node.insert_entry(&entry))
			.await
	}

	async fn remove_entry_rpc(self, _: context::Context, entry: Entry) -> Result<(), RemoteFault> {
		self.gated(Method::RemoveEntry, self.node.remove_entry(&entry))
			.await
	}

	async fn insert_replicas_rpc(
		self,
		_: context::Context,
		replicas: HashSet<Entry>
	) -> Result<(), RemoteFault> {
		self.gated(Method::InsertReplicas, self.node.insert_replicas(&replicas))
			.await
	}

	async fn remove_replicas_rpc(
		self,
		_: context::Context,
		from: Id,
		replicas: HashSet<Entry>
	) -> Result<(), RemoteFault> {
		self.gated(
			Method::RemoveReplicas,
			self.node.remove_replicas(from, &replicas)
		)
		.await
	}

	async fn retrieve_entries_rpc(
		self,
		_: context::Context,
		id: Id
	) -> Result<HashSet<Entry>, RemoteFault> {
		self.gated(Method::RetrieveEntries, self.node.retrieve_entries(id))
			.await
	}
}

/// Callee side of the native-RPC transport. Framing, correlation and
/// connection management are tarpc's; the lifecycle gate is applied inside
/// each service method.
pub struct RpcEndpoint {
	node: NodeRef,
	url: Url,
	lifecycle: Lifecycle,
	handle: Mutex<Option<JoinHandle<()>>>
}

impl RpcEndpoint {
	pub fn new(node: NodeRef, url: Url) -> ComResult<Arc<Self>> {
		if url.scheme != Scheme::Rpc {
			return Err(ComError::Protocol(format!(
				"rpc endpoint cannot serve {}",
				url
			)));
		}
		Ok(Arc::new(RpcEndpoint {
			node,
			url,
			lifecycle: Lifecycle::new(),
			handle: Mutex::new(None)
		}))
	}

	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	pub async fn listen(self: &Arc<Self>) -> ComResult<()> {
		let mut listener =
			tarpc::serde_transport::tcp::listen(self.url.socket_addr(), Bincode::default).await?;
		self.lifecycle.advance(EndpointState::Listening)?;
		info!("{}: listening at {}", self.node.info(), self.url);

		let server = OverlayServer {
			node: self.node.clone(),
			lifecycle: self.lifecycle.clone()
		};
		let lifecycle = self.lifecycle.clone();
		let url = self.url.clone();
		let handle = tokio::spawn(async move {
			listener.config_mut().max_frame_length(usize::MAX);
			let serve_fut = listener
				.filter_map(|r| future::ready(r.ok()))
				.map(tarpc::server::BaseChannel::with_defaults)
				.map(|channel| {
					let server = server.clone();
					async move {
						channel.execute(server.serve()).await;
					}
				})
				.buffer_unordered(MAX_CHANNELS)
				.for_each(|_| async {});
			tokio::select! {
				_ = serve_fut => {}
				_ = lifecycle.wait_closed() => {
					debug!("{}: rpc listener stopped", url);
				}
			}
		});
		*self.handle.lock().unwrap() = Some(handle);
		Ok(())
	}

	pub fn accept_entries(&self) -> ComResult<()> {
		self.lifecycle.advance(EndpointState::AcceptingEntries)
	}

	pub async fn close(&self) {
		let _ = self.lifecycle.advance(EndpointState::Closed);
		let handle = self.handle.lock().unwrap().take();
		if let Some(handle) = handle {
			let _ = handle.await;
		}
	}
}

/// Caller-side handle over tarpc. The client is built lazily on first use;
/// a transport-level failure invalidates the proxy permanently, a failure
/// reported by the remote node does not.
pub struct RpcProxy {
	factory: Arc<ProxyFactory>,
	info: NodeInfo,
	client: tokio::sync::Mutex<Option<OverlayServiceClient>>,
	invalid: AtomicBool
}

impl RpcProxy {
	pub async fn connect(factory: Arc<ProxyFactory>, url: Url) -> ComResult<Arc<Self>> {
		let client = Self::dial(&url).await?;
		let id = client.get_node_id_rpc(context::current()).await?;
		debug!("RpcProxy for {} created, remote id {}", url, id);
		Ok(Arc::new(RpcProxy {
			factory,
			info: NodeInfo { id, url },
			client: tokio::sync::Mutex::new(Some(client)),
			invalid: AtomicBool::new(false)
		}))
	}

	pub fn for_info(factory: Arc<ProxyFactory>, info: NodeInfo) -> Arc<Self> {
		Arc::new(RpcProxy {
			factory,
			info,
			client: tokio::sync::Mutex::new(None),
			invalid: AtomicBool::new(false)
		})
	}

	pub fn is_valid(&self) -> bool {
		!self.invalid.load(Ordering::Relaxed)
	}

	async fn dial(url: &Url) -> ComResult<OverlayServiceClient> {
		let transport = tarpc::serde_transport::tcp::connect(url.socket_addr(), Bincode::default)
			.await
			.map_err(|e| {
				warn!("Failed to reach {}: {}", url, e);
				ComError::connection_io(format!("cannot reach {}", url), e)
			})?;
		Ok(OverlayServiceClient::new(tarpc::client::Config::default(), transport).spawn())
	}

	async fn client(&self) -> ComResult<OverlayServiceClient> {
		if !self.is_valid() {
			return Err(ComError::InvalidProxy(format!(
				"{} -> {}",
				self.factory.local_url(),
				self.info.url
			)));
		}
		let mut guard = self.client.lock().await;
		if let Some(client) = guard.as_ref() {
			return Ok(client.clone());
		}
		let client = Self::dial(&self.info.url).await.map_err(|e| self.fail(e))?;
		*guard = Some(client.clone());
		Ok(client)
	}

	fn fail(&self, e: ComError) -> ComError {
		if e.invalidates_proxy() {
			self.invalid.store(true, Ordering::Relaxed);
		}
		e
	}

	/// Collapse the two failure layers: the tarpc transport error and the
	/// fault reported by the remote node.
	fn unwrap_result<T>(
		&self,
		result: Result<Result<T, RemoteFault>, tarpc::client::RpcError>
	) -> ComResult<T> {
		match result {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(fault)) => Err(ComError::from(fault)),
			Err(e) => Err(self.fail(ComError::Rpc(e)))
		}
	}

	fn rebind(&self, infos: Vec<NodeInfo>) -> ComResult<Vec<NodeRef>> {
		infos
			.into_iter()
			.map(|info| self.factory.create(info))
			.collect()
	}
}

#[async_trait]
impl Node for RpcProxy {
	fn info(&self) -> NodeInfo {
		self.info.clone()
	}

	async fn find_successor(&self, id: Id) -> ComResult<NodeRef> {
		let client = self.client().await?;
		let info = self.unwrap_result(client.find_successor_rpc(context::current(), id).await)?;
		self.factory.create(info)
	}

	async fn notify(&self, candidate: &NodeInfo) -> ComResult<Vec<NodeRef>> {
		let client = self.client().await?;
		let infos = self.unwrap_result(
			client
				.notify_rpc(context::current(), candidate.clone())
				.await
		)?;
		self.rebind(infos)
	}

	async fn notify_and_copy_entries(&self, candidate: &NodeInfo) -> ComResult<RefsAndEntries> {
		let client = self.client().await?;
		let result = self.unwrap_result(
			client
				.notify_and_copy_entries_rpc(context::current(), candidate.clone())
				.await
		)?;
		Ok(RefsAndEntries {
			refs: self.rebind(result.refs)?,
			entries: result.entries
		})
	}

	async fn insert_entry(&self, entry: &Entry) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(
			client
				.insert_entry_rpc(context::current(), entry.clone())
				.await
		)
	}

	async fn remove_entry(&self, entry: &Entry) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(
			client
				.remove_entry_rpc(context::current(), entry.clone())
				.await
		)
	}

	async fn insert_replicas(&self, replicas: &HashSet<Entry>) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(
			client
				.insert_replicas_rpc(context::current(), replicas.clone())
				.await
		)
	}

	async fn remove_replicas(&self, from: Id, replicas: &HashSet<Entry>) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(
			client
				.remove_replicas_rpc(context::current(), from, replicas.clone())
				.await
		)
	}

	async fn retrieve_entries(&self, id: Id) -> ComResult<HashSet<Entry>> {
		let client = self.client().await?;
		self.unwrap_result(client.retrieve_entries_rpc(context::current(), id).await)
	}

	async fn leaves_network(&self, predecessor: &NodeInfo) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(
			client
				.leaves_network_rpc(context::current(), predecessor.clone())
				.await
		)
	}

	async fn ping(&self) -> ComResult<()> {
		let client = self.client().await?;
		self.unwrap_result(client.ping_rpc(context::current()).await)
	}
}
