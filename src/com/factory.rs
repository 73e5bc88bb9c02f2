use std::sync::Arc;
use crate::data::{Scheme, Url};
use super::error::ComResult;
use super::local::{LocalProxy, Registry};
use super::node::{NodeInfo, NodeRef};
use super::rpc::RpcProxy;
use super::socket::{ConnectionPool, SocketProxy};

/// Per-process communication state: the connection pool, the in-process
/// registry and the local node's address. Created explicitly at startup and
/// shut down explicitly; proxies of every transport are minted through it,
/// which is what lets one process mix transports.
pub struct ProxyFactory {
	local_url: Url,
	pool: Arc<ConnectionPool>,
	registry: Arc<Registry>
}

impl ProxyFactory {
	pub fn new(local_url: Url, pool: Arc<ConnectionPool>, registry: Arc<Registry>) -> Arc<Self> {
		Arc::new(ProxyFactory {
			local_url,
			pool,
			registry
		})
	}

	pub fn local_url(&self) -> &Url {
		&self.local_url
	}

	pub fn pool(&self) -> &Arc<ConnectionPool> {
		&self.pool
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	/// Rewrite a node reference received from a peer into a proxy bound to
	/// this side. Performs no I/O; socket and rpc proxies connect lazily on
	/// first use.
	pub fn create(self: &Arc<Self>, info: NodeInfo) -> ComResult<NodeRef> {
		Ok(match info.url.scheme {
			Scheme::Local => LocalProxy::for_info(self.clone(), info)?,
			Scheme::Socket => SocketProxy::for_info(self.clone(), info),
			Scheme::Rpc => RpcProxy::for_info(self.clone(), info)
		})
	}

	/// First contact with a peer whose identifier is not yet known:
	/// establishes the transport session and resolves the remote id.
	pub async fn connect(self: &Arc<Self>, url: &Url) -> ComResult<NodeRef> {
		Ok(match url.scheme {
			Scheme::Local => LocalProxy::connect(self.clone(), url)?,
			Scheme::Socket => SocketProxy::connect(self.clone(), url.clone()).await?,
			Scheme::Rpc => RpcProxy::connect(self.clone(), url.clone()).await?
		})
	}

	/// Close every outgoing connection. Part of node shutdown.
	pub async fn shutdown(&self) {
		self.pool.shut_down_all().await;
	}
}
