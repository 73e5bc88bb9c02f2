use std::collections::HashSet;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use crate::data::{Entry, Id, Url};
use super::error::ComResult;

/// Serializable reference to a node: the form in which node references
/// travel across transport boundaries. The receiving side rewrites it into a
/// proxy bound to its own local address before handing it to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
	pub id: Id,
	pub url: Url
}

impl std::fmt::Display for NodeInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Node({}, {})", self.id, self.url)
	}
}

pub type NodeRef = Arc<dyn Node>;

/// References and entries handed to a new predecessor during join hand-off.
pub struct RefsAndEntries {
	pub refs: Vec<NodeRef>,
	pub entries: HashSet<Entry>
}

/// The capability set every peer exposes. Implemented by the local node and
/// by one proxy type per transport; callers must not distinguish them except
/// for error handling.
#[async_trait]
pub trait Node: Send + Sync {
	/// Identifier and address of the node this handle stands for.
	fn info(&self) -> NodeInfo;

	async fn find_successor(&self, id: Id) -> ComResult<NodeRef>;

	/// Tell the node about a candidate predecessor; returns the node's
	/// current reference list.
	async fn notify(&self, candidate: &NodeInfo) -> ComResult<Vec<NodeRef>>;

	/// Like notify, but atomically copies the entries the candidate
	/// predecessor must now own together with the reference update.
	async fn notify_and_copy_entries(&self, candidate: &NodeInfo) -> ComResult<RefsAndEntries>;

	async fn insert_entry(&self, entry: &Entry) -> ComResult<()>;

	async fn remove_entry(&self, entry: &Entry) -> ComResult<()>;

	async fn insert_replicas(&self, replicas: &HashSet<Entry>) -> ComResult<()>;

	/// Remove replicas previously inserted by the node with id `from`.
	/// An empty set means "all replicas in (from, own id]".
	async fn remove_replicas(&self, from: Id, replicas: &HashSet<Entry>) -> ComResult<()>;

	async fn retrieve_entries(&self, id: Id) -> ComResult<HashSet<Entry>>;

	/// Inform the node that its predecessor leaves the ring and which node
	/// replaces it.
	async fn leaves_network(&self, predecessor: &NodeInfo) -> ComResult<()>;

	async fn ping(&self) -> ComResult<()>;
}
