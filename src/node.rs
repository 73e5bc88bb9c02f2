use std::{
	collections::HashSet,
	sync::{Arc, Mutex, RwLock, Weak}
};
use async_trait::async_trait;
use log::{debug, info, warn};
use crate::com::{ComError, ComResult, Node, NodeInfo, NodeRef, ProxyFactory, RefsAndEntries};
use crate::data::{in_interval_open_closed, in_range, Entry, Id};
use crate::storage::EntryStore;

/// The local node: owns the entry store and the neighborhood references and
/// implements the full peer capability set. Every transport endpoint of this
/// process dispatches into one shared instance.
pub struct ChordNode {
	info: NodeInfo,
	entries: Arc<dyn EntryStore>,
	factory: Arc<ProxyFactory>,
	// also serializes entry hand-off against concurrent inserts
	predecessor: Mutex<Option<NodeRef>>,
	successors: RwLock<Vec<NodeRef>>,
	self_ref: Weak<ChordNode>
}

impl ChordNode {
	pub fn new(
		info: NodeInfo,
		entries: Arc<dyn EntryStore>,
		factory: Arc<ProxyFactory>
	) -> Arc<Self> {
		Arc::new_cyclic(|self_ref| ChordNode {
			info,
			entries,
			factory,
			predecessor: Mutex::new(None),
			successors: RwLock::new(Vec::new()),
			self_ref: self_ref.clone()
		})
	}

	fn self_ref(&self) -> NodeRef {
		// the weak ref is set in new and lives as long as &self
		self.self_ref.upgrade().unwrap()
	}

	pub fn entries(&self) -> &Arc<dyn EntryStore> {
		&self.entries
	}

	pub fn factory(&self) -> Arc<ProxyFactory> {
		self.factory.clone()
	}

	pub fn predecessor_info(&self) -> Option<NodeInfo> {
		self.predecessor.lock().unwrap().as_ref().map(|n| n.info())
	}

	pub fn successor_infos(&self) -> Vec<NodeInfo> {
		self.successors
			.read()
			.unwrap()
			.iter()
			.map(|n| n.info())
			.collect()
	}

	pub fn set_successors(&self, successors: Vec<NodeRef>) {
		*self.successors.write().unwrap() = successors;
	}

	/// Join the ring through a bootstrap peer: resolve our successor, hand
	/// over the entries we are now responsible for and link in.
	pub async fn join(&self, bootstrap: NodeRef) -> ComResult<()> {
		let successor = bootstrap.find_successor(self.info.id).await?;
		info!(
			"{}: joining ring, successor is {}",
			self.info,
			successor.info()
		);
		let RefsAndEntries { refs, entries } =
			successor.notify_and_copy_entries(&self.info).await?;
		self.entries.add_all(entries)?;
		let mut successors = vec![successor];
		for r in refs {
			if r.info() != self.info {
				successors.push(r);
			}
		}
		self.set_successors(successors);
		Ok(())
	}

	/// Leave the ring gracefully: link our predecessor to our successor and
	/// hand our entries over.
	pub async fn leave(&self) -> ComResult<()> {
		let successor = self.successors.read().unwrap().first().cloned();
		let predecessor_info = self.predecessor_info();
		if let (Some(successor), Some(predecessor_info)) = (successor, predecessor_info) {
			info!("{}: leaving ring", self.info);
			let stored: HashSet<Entry> = self
				.entries
				.entries()?
				.into_values()
				.flatten()
				.collect();
			successor.insert_replicas(&stored).await?;
			successor.leaves_network(&predecessor_info).await?;
		}
		Ok(())
	}

	/// True when this node is responsible for `id`: the id lies in
	/// (predecessor, self]. A node without a predecessor owns the whole ring.
	fn is_responsible_for(&self, id: Id, predecessor: &Option<NodeRef>) -> bool {
		match predecessor {
			Some(pred) => in_interval_open_closed(id, pred.info().id, self.info.id),
			None => true
		}
	}

	fn reference_list(&self, predecessor: &Option<NodeRef>) -> Vec<NodeRef> {
		let mut refs: Vec<NodeRef> = self.successors.read().unwrap().clone();
		if let Some(pred) = predecessor {
			refs.push(pred.clone());
		}
		refs
	}

	/// Adopt the candidate as predecessor when there is none yet or it lies
	/// strictly between the current predecessor and this node.
	fn adopt_predecessor(
		&self,
		candidate: &NodeInfo,
		predecessor: &mut Option<NodeRef>
	) -> ComResult<()> {
		let closer = match predecessor {
			Some(pred) => in_range(candidate.id, pred.info().id, self.info.id),
			None => candidate.id != self.info.id
		};
		if closer {
			debug!("{}: new predecessor {}", self.info, candidate);
			*predecessor = Some(self.factory.create(candidate.clone())?);
		}
		Ok(())
	}
}

#[async_trait]
impl Node for ChordNode {
	fn info(&self) -> NodeInfo {
		self.info.clone()
	}

	async fn find_successor(&self, id: Id) -> ComResult<NodeRef> {
		let responsible = {
			let predecessor = self.predecessor.lock().unwrap();
			self.is_responsible_for(id, &predecessor)
		};
		if responsible {
			return Ok(self.self_ref());
		}
		let successor = self.successors.read().unwrap().first().cloned();
		match successor {
			Some(successor) => successor.find_successor(id).await,
			None => Ok(self.self_ref())
		}
	}

	async fn notify(&self, candidate: &NodeInfo) -> ComResult<Vec<NodeRef>> {
		let mut predecessor = self.predecessor.lock().unwrap();
		let refs = self.reference_list(&predecessor);
		self.adopt_predecessor(candidate, &mut predecessor)?;
		Ok(refs)
	}

	async fn notify_and_copy_entries(&self, candidate: &NodeInfo) -> ComResult<RefsAndEntries> {
		// the predecessor lock makes the copy and the reference update one
		// step; inserts racing with the hand-off wait here and land in the
		// correct partition afterwards
		let mut predecessor = self.predecessor.lock().unwrap();
		let from = match predecessor.as_ref() {
			Some(pred) => pred.info().id,
			None => self.info.id
		};
		let entries = self.entries.entries_in_interval(from, candidate.id)?;
		let refs = self.reference_list(&predecessor);
		self.adopt_predecessor(candidate, &mut predecessor)?;
		Ok(RefsAndEntries { refs, entries })
	}

	async fn insert_entry(&self, entry: &Entry) -> ComResult<()> {
		let predecessor = self.predecessor.lock().unwrap();
		if !self.is_responsible_for(entry.id, &predecessor) {
			return Err(ComError::Protocol(format!(
				"{} is not responsible for id {}",
				self.info, entry.id
			)));
		}
		self.entries.add(entry.clone())?;
		Ok(())
	}

	async fn remove_entry(&self, entry: &Entry) -> ComResult<()> {
		let predecessor = self.predecessor.lock().unwrap();
		if !self.is_responsible_for(entry.id, &predecessor) {
			return Err(ComError::Protocol(format!(
				"{} is not responsible for id {}",
				self.info, entry.id
			)));
		}
		self.entries.remove(entry)?;
		Ok(())
	}

	async fn insert_replicas(&self, replicas: &HashSet<Entry>) -> ComResult<()> {
		self.entries.add_all(replicas.clone())?;
		Ok(())
	}

	async fn remove_replicas(&self, from: Id, replicas: &HashSet<Entry>) -> ComResult<()> {
		if replicas.is_empty() {
			// the sender does not know which replicas it stored here
			let stale = self.entries.entries_in_interval(from, self.info.id)?;
			self.entries.remove_all(&stale)?;
		} else {
			self.entries.remove_all(replicas)?;
		}
		Ok(())
	}

	async fn retrieve_entries(&self, id: Id) -> ComResult<HashSet<Entry>> {
		Ok(self.entries.entries_at(id)?)
	}

	async fn leaves_network(&self, predecessor: &NodeInfo) -> ComResult<()> {
		info!(
			"{}: predecessor left, replaced by {}",
			self.info, predecessor
		);
		let replacement = if predecessor.id == self.info.id {
			None
		} else {
			Some(self.factory.create(predecessor.clone())?)
		};
		*self.predecessor.lock().unwrap() = replacement;
		Ok(())
	}

	async fn ping(&self) -> ComResult<()> {
		Ok(())
	}
}

impl Drop for ChordNode {
	fn drop(&mut self) {
		if let Ok(len) = self.entries.len() {
			if len > 0 {
				warn!("{}: dropped with {} stored entries", self.info, len);
			}
		}
	}
}
