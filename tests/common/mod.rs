use std::sync::Arc;
use chord_overlay::{
	com::{ConnectionPool, NodeInfo, ProxyFactory, Registry},
	data::{Entry, Url},
	node::ChordNode,
	storage::MemoryEntries
};
use rand::Rng;

pub fn init_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

pub fn url(s: &str) -> Url {
	s.parse().unwrap()
}

/// Per-process communication state for one test participant.
pub fn factory_at(local: &str) -> Arc<ProxyFactory> {
	ProxyFactory::new(url(local), ConnectionPool::new(), Registry::new())
}

/// Node with a fixed id and an in-memory store.
pub fn node_at(factory: &Arc<ProxyFactory>, id: u64, addr: &str) -> Arc<ChordNode> {
	let info = NodeInfo {
		id,
		url: url(addr)
	};
	ChordNode::new(info, Arc::new(MemoryEntries::new()), factory.clone())
}

/// Entry with the given id and a random payload.
pub fn entry_with_id<T: Rng>(rng: &mut T, id: u64) -> Entry {
	Entry {
		id,
		value: rng.gen::<[u8; 8]>().to_vec()
	}
}
