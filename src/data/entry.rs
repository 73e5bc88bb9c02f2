use serde::{Serialize, Deserialize};
use super::ring::Id;

/// A stored (identifier, value) record. Multiple entries may share one id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
	pub id: Id,
	pub value: Vec<u8>
}

impl Entry {
	pub fn new(id: Id, value: Vec<u8>) -> Self {
		Entry { id, value }
	}
}

impl std::fmt::Display for Entry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Entry({}, {} bytes)", self.id, self.value.len())
	}
}
