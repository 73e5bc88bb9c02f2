pub mod memory;
pub mod disk;

pub use memory::MemoryEntries;
pub use disk::DiskEntries;

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use crate::data::{Entry, Id};

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("IO error")]
	Io(#[from] std::io::Error),
	#[error("Corrupt entry file {0}")]
	Corrupt(String)
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed collection of entries backing a node. Multiple entries with the
/// same id are allowed. All mutating operations are atomic with respect to
/// concurrent point and interval reads for the same id.
pub trait EntryStore: Send + Sync {
	fn add(&self, entry: Entry) -> StoreResult<()>;

	fn add_all(&self, entries: HashSet<Entry>) -> StoreResult<()>;

	fn remove(&self, entry: &Entry) -> StoreResult<()>;

	fn remove_all(&self, entries: &HashSet<Entry>) -> StoreResult<()>;

	/// Entries stored exactly at `id`. Empty set, never an error, if none.
	fn entries_at(&self, id: Id) -> StoreResult<HashSet<Entry>>;

	/// Entries with id in (from, to]: the lower bound is excluded, the
	/// upper bound included.
	fn entries_in_interval(&self, from: Id, to: Id) -> StoreResult<HashSet<Entry>>;

	/// Read-only snapshot of everything stored.
	fn entries(&self) -> StoreResult<HashMap<Id, HashSet<Entry>>>;

	/// Number of stored entries.
	fn len(&self) -> StoreResult<usize>;

	fn is_empty(&self) -> StoreResult<bool> {
		Ok(self.len()? == 0)
	}
}
