use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc
	}
};
use log::{debug, info};
use tokio::sync::Mutex;
use crate::com::error::ComResult;
use crate::data::Url;
use super::connection::Connection;

/// Pools one connection per ordered (local url, remote url) pair so that all
/// proxies representing the same remote peer share a single channel.
/// A connection stays in the pool exactly as long as at least one proxy is
/// registered on it; the lock is held across construction and teardown, so a
/// proxy can never attach to a connection that is being destroyed.
pub struct ConnectionPool {
	connections: Mutex<HashMap<(Url, Url), Arc<Connection>>>,
	// counter for locally unique proxy ids
	id_counter: AtomicU64
}

impl ConnectionPool {
	pub fn new() -> Arc<Self> {
		Arc::new(ConnectionPool {
			connections: Mutex::new(HashMap::new()),
			id_counter: AtomicU64::new(0)
		})
	}

	pub fn next_proxy_id(&self) -> u64 {
		self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Return the pooled connection for the pair, creating it (handshake
	/// included) if absent. Creation failures propagate and nothing is
	/// pooled. The proxy is registered as a client of the connection.
	pub async fn connection_for(
		&self,
		local: &Url,
		remote: &Url,
		proxy_id: u64
	) -> ComResult<Arc<Connection>> {
		let mut connections = self.connections.lock().await;
		let key = (local.clone(), remote.clone());
		if let Some(conn) = connections.get(&key) {
			debug!("Reusing pooled connection {} -> {} for proxy {}", local, remote, proxy_id);
			conn.register_proxy(proxy_id);
			return Ok(conn.clone());
		}
		let conn = Connection::connect(local.clone(), remote.clone(), proxy_id).await?;
		connections.insert(key, conn.clone());
		Ok(conn)
	}

	/// Remove the proxy from its connection's client set; the last release
	/// removes the connection from the pool and disconnects it.
	pub async fn release(&self, local: &Url, remote: &Url, proxy_id: u64) {
		let mut connections = self.connections.lock().await;
		let key = (local.clone(), remote.clone());
		let last = match connections.get(&key) {
			Some(conn) => conn.release_proxy(proxy_id),
			None => return
		};
		if last {
			if let Some(conn) = connections.remove(&key) {
				debug!("Last proxy released connection {} -> {}", local, remote);
				conn.disconnect().await;
			}
		}
	}

	/// Disconnect every pooled connection. Pending requests are terminated.
	/// Used at process shutdown.
	pub async fn shut_down_all(&self) {
		let mut connections = self.connections.lock().await;
		info!("Shutting down {} pooled connections", connections.len());
		for (_, conn) in connections.drain() {
			conn.disconnect().await;
		}
	}

	/// Number of currently pooled connections.
	pub async fn len(&self) -> usize {
		self.connections.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}
}
