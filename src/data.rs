pub mod ring;
pub mod entry;
pub mod url;

pub use ring::*;
pub use entry::*;
pub use url::*;

use std::{
	collections::hash_map::DefaultHasher,
	hash::{Hash, Hasher}
};

pub fn calculate_hash(data: &[u8]) -> Id {
	let mut hasher = DefaultHasher::new();
	data.hash(&mut hasher);
	hasher.finish()
}
