use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Arc, RwLock}
};
use log::debug;
use crate::data::{in_interval_open_closed, Entry, Id};
use super::{EntryStore, StoreResult};

/// Thread-safe in-memory entry store. The default backend.
#[derive(Clone)]
pub struct MemoryEntries {
	data: Arc<RwLock<BTreeMap<Id, HashSet<Entry>>>>
}

impl MemoryEntries {
	pub fn new() -> Self {
		MemoryEntries {
			data: Arc::new(RwLock::new(BTreeMap::new()))
		}
	}
}

impl Default for MemoryEntries {
	fn default() -> Self {
		Self::new()
	}
}

impl EntryStore for MemoryEntries {
	fn add(&self, entry: Entry) -> StoreResult<()> {
		let mut data = self.data.write().unwrap();
		debug!("Adding entry {}", entry);
		data.entry(entry.id).or_default().insert(entry);
		Ok(())
	}

	fn add_all(&self, entries: HashSet<Entry>) -> StoreResult<()> {
		let mut data = self.data.write().unwrap();
		for entry in entries {
			data.entry(entry.id).or_default().insert(entry);
		}
		Ok(())
	}

	fn remove(&self, entry: &Entry) -> StoreResult<()> {
		let mut data = self.data.write().unwrap();
		debug!("Removing entry {}", entry);
		if let Some(set) = data.get_mut(&entry.id) {
			set.remove(entry);
			if set.is_empty() {
				data.remove(&entry.id);
			}
		}
		Ok(())
	}

	fn remove_all(&self, entries: &HashSet<Entry>) -> StoreResult<()> {
		let mut data = self.data.write().unwrap();
		for entry in entries {
			if let Some(set) = data.get_mut(&entry.id) {
				set.remove(entry);
				if set.is_empty() {
					data.remove(&entry.id);
				}
			}
		}
		Ok(())
	}

	fn entries_at(&self, id: Id) -> StoreResult<HashSet<Entry>> {
		let data = self.data.read().unwrap();
		Ok(data.get(&id).cloned().unwrap_or_default())
	}

	fn entries_in_interval(&self, from: Id, to: Id) -> StoreResult<HashSet<Entry>> {
		let data = self.data.read().unwrap();
		let mut result = HashSet::new();
		for (id, set) in data.iter() {
			if in_interval_open_closed(*id, from, to) {
				result.extend(set.iter().cloned());
			}
		}
		Ok(result)
	}

	fn entries(&self) -> StoreResult<HashMap<Id, HashSet<Entry>>> {
		let data = self.data.read().unwrap();
		Ok(data.iter().map(|(id, set)| (*id, set.clone())).collect())
	}

	fn len(&self) -> StoreResult<usize> {
		let data = self.data.read().unwrap();
		Ok(data.values().map(|set| set.len()).sum())
	}
}
