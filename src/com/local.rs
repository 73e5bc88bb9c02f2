use std::{
	collections::{HashMap, HashSet},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex, RwLock, Weak
	}
};
use async_trait::async_trait;
use log::debug;
use crate::data::{Entry, Id, Scheme, Url};
use super::endpoint::{EndpointState, Lifecycle, Method};
use super::error::{ComError, ComResult};
use super::factory::ProxyFactory;
use super::node::{Node, NodeInfo, NodeRef, RefsAndEntries};

/// Process-wide registry of the in-process transport, mapping each local
/// address to its live endpoint. Created explicitly; no static state.
/// Rebinding an address bumps the generation, which invalidates every proxy
/// created against the previous endpoint.
pub struct Registry {
	endpoints: RwLock<HashMap<Url, Arc<LocalEndpoint>>>,
	generation: AtomicU64
}

impl Registry {
	pub fn new() -> Arc<Self> {
		Arc::new(Registry {
			endpoints: RwLock::new(HashMap::new()),
			generation: AtomicU64::new(0)
		})
	}

	pub fn lookup(&self, url: &Url) -> Option<Arc<LocalEndpoint>> {
		self.endpoints.read().unwrap().get(url).cloned()
	}

	fn bind(self: &Arc<Self>, node: NodeRef, url: Url) -> Arc<LocalEndpoint> {
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let endpoint = Arc::new(LocalEndpoint {
			node,
			url: url.clone(),
			generation,
			lifecycle: Lifecycle::new(),
			registry: Arc::downgrade(self),
			callers: Mutex::new(HashSet::new())
		});
		let mut endpoints = self.endpoints.write().unwrap();
		if endpoints.insert(url.clone(), endpoint.clone()).is_some() {
			debug!("Rebinding local endpoint at {} (generation {})", url, generation);
		}
		endpoint
	}

	/// Remove the binding only if it still refers to the given generation,
	/// so closing a stale endpoint cannot evict its replacement.
	fn unbind(&self, url: &Url, generation: u64) {
		let mut endpoints = self.endpoints.write().unwrap();
		if let Some(current) = endpoints.get(url) {
			if current.generation == generation {
				endpoints.remove(url);
			}
		}
	}
}

/// Callee-side dispatcher of the in-process transport. There is no network
/// and no framing, but inbound calls still pass the lifecycle gate.
pub struct LocalEndpoint {
	node: NodeRef,
	url: Url,
	generation: u64,
	lifecycle: Lifecycle,
	registry: Weak<Registry>,
	// creator urls of the proxies that have called in, for diagnostics
	callers: Mutex<HashSet<Url>>
}

impl LocalEndpoint {
	/// Bind the node under its address and start listening.
	pub fn open(registry: &Arc<Registry>, node: NodeRef, url: Url) -> ComResult<Arc<Self>> {
		if url.scheme != Scheme::Local {
			return Err(ComError::Protocol(format!(
				"local endpoint cannot serve {}",
				url
			)));
		}
		let endpoint = registry.bind(node, url);
		endpoint.lifecycle.advance(EndpointState::Listening)?;
		Ok(endpoint)
	}

	pub fn node(&self) -> &NodeRef {
		&self.node
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	pub fn accept_entries(&self) -> ComResult<()> {
		self.lifecycle.advance(EndpointState::AcceptingEntries)
	}

	/// Withdraw the binding and fail all further calls.
	pub fn close(&self) {
		let _ = self.lifecycle.advance(EndpointState::Closed);
		if let Some(registry) = self.registry.upgrade() {
			registry.unbind(&self.url, self.generation);
		}
		self.callers.lock().unwrap().clear();
	}

	fn register_caller(&self, creator: Url) {
		let mut callers = self.callers.lock().unwrap();
		if callers.insert(creator.clone()) {
			debug!("{}: new caller {}", self.url, creator);
		}
	}

	pub fn caller_count(&self) -> usize {
		self.callers.lock().unwrap().len()
	}
}

/// Caller-side handle of the in-process transport. Captures the target
/// endpoint's generation at creation; every call re-validates against the
/// registry and the proxy becomes permanently invalid when the endpoint is
/// gone or has been replaced, the same failure mode as a lost socket
/// connection. There is no implicit recovery.
pub struct LocalProxy {
	factory: Arc<ProxyFactory>,
	info: NodeInfo,
	generation: u64,
	valid: AtomicBool,
	used: AtomicBool
}

impl LocalProxy {
	pub fn connect(factory: Arc<ProxyFactory>, url: &Url) -> ComResult<Arc<Self>> {
		let endpoint = factory.registry().lookup(url).ok_or_else(|| {
			ComError::connection(format!("no endpoint bound at {}", url))
		})?;
		let info = NodeInfo {
			id: endpoint.node.info().id,
			url: url.clone()
		};
		Ok(Arc::new(LocalProxy {
			factory,
			generation: endpoint.generation,
			info,
			valid: AtomicBool::new(true),
			used: AtomicBool::new(false)
		}))
	}

	pub fn for_info(factory: Arc<ProxyFactory>, info: NodeInfo) -> ComResult<Arc<Self>> {
		let endpoint = factory.registry().lookup(&info.url).ok_or_else(|| {
			ComError::connection(format!("no endpoint bound at {}", info.url))
		})?;
		Ok(Arc::new(LocalProxy {
			factory,
			generation: endpoint.generation,
			info,
			valid: AtomicBool::new(true),
			used: AtomicBool::new(false)
		}))
	}

	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::Relaxed)
	}

	/// Re-validate before every call: the endpoint must still exist and
	/// still be the generation this proxy was created against.
	fn validate(&self) -> ComResult<Arc<LocalEndpoint>> {
		if !self.is_valid() {
			return Err(ComError::InvalidProxy(format!(
				"{} -> {}",
				self.factory.local_url(),
				self.info.url
			)));
		}
		let endpoint = match self.factory.registry().lookup(&self.info.url) {
			Some(ep) => ep,
			None => {
				self.valid.store(false, Ordering::Relaxed);
				return Err(ComError::connection(format!(
					"no endpoint bound at {}",
					self.info.url
				)));
			}
		};
		if endpoint.generation != self.generation {
			self.valid.store(false, Ordering::Relaxed);
			return Err(ComError::connection(format!(
				"endpoint at {} has been replaced",
				self.info.url
			)));
		}
		if !self.used.swap(true, Ordering::Relaxed) {
			endpoint.register_caller(self.factory.local_url().clone());
		}
		Ok(endpoint)
	}

	async fn target(&self, method: Method) -> ComResult<Arc<LocalEndpoint>> {
		let endpoint = self.validate()?;
		endpoint.lifecycle.gate(method).await?;
		Ok(endpoint)
	}

	/// Re-bind node references returned by the callee to this proxy's side.
	fn rebind(&self, refs: Vec<NodeRef>) -> ComResult<Vec<NodeRef>> {
		refs.into_iter()
			.map(|n| self.factory.create(n.info()))
			.collect()
	}
}

#[async_trait]
impl Node for LocalProxy {
	fn info(&self) -> NodeInfo {
		self.info.clone()
	}

	async fn find_successor(&self, id: Id) -> ComResult<NodeRef> {
		let endpoint = self.target(Method::FindSuccessor).await?;
		let successor = endpoint.node.find_successor(id).await?;
		self.factory.create(successor.info())
	}

	async fn notify(&self, candidate: &NodeInfo) -> ComResult<Vec<NodeRef>> {
		let endpoint = self.target(Method::Notify).await?;
		let refs = endpoint.node.notify(candidate).await?;
		self.rebind(refs)
	}

	async fn notify_and_copy_entries(&self, candidate: &NodeInfo) -> ComResult<RefsAndEntries> {
		let endpoint = self.target(Method::NotifyAndCopyEntries).await?;
		let result = endpoint.node.notify_and_copy_entries(candidate).await?;
		Ok(RefsAndEntries {
			refs: self.rebind(result.refs)?,
			entries: result.entries
		})
	}

	async fn insert_entry(&self, entry: &Entry) -> ComResult<()> {
		let endpoint = self.target(Method::InsertEntry).await?;
		endpoint.node.insert_entry(entry).await
	}

	async fn remove_entry(&self, entry: &Entry) -> ComResult<()> {
		let endpoint = self.target(Method::RemoveEntry).await?;
		endpoint.node.remove_entry(entry).await
	}

	async fn insert_replicas(&self, replicas: &HashSet<Entry>) -> ComResult<()> {
		let endpoint = self.target(Method::InsertReplicas).await?;
		endpoint.node.insert_replicas(replicas).await
	}

	async fn remove_replicas(&self, from: Id, replicas: &HashSet<Entry>) -> ComResult<()> {
		let endpoint = self.target(Method::RemoveReplicas).await?;
		endpoint.node.remove_replicas(from, replicas).await
	}

	async fn retrieve_entries(&self, id: Id) -> ComResult<HashSet<Entry>> {
		let endpoint = self.target(Method::RetrieveEntries).await?;
		endpoint.node.retrieve_entries(id).await
	}

	async fn leaves_network(&self, predecessor: &NodeInfo) -> ComResult<()> {
		let endpoint = self.target(Method::LeavesNetwork).await?;
		endpoint.node.leaves_network(predecessor).await
	}

	async fn ping(&self) -> ComResult<()> {
		let endpoint = self.target(Method::Ping).await?;
		endpoint.node.ping().await
	}
}
