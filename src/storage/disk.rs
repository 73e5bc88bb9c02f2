use std::{
	collections::{HashMap, HashSet},
	fs,
	path::{Path, PathBuf},
	sync::Mutex
};
use log::{debug, info};
use crate::data::{id_from_hex, id_to_hex, in_interval_open_closed, Entry, Id};
use super::{EntryStore, StoreError, StoreResult};

/// Entry store keeping one file per distinct id, named by the id's
/// fixed-width hex encoding. Directory listing enumerates live ids; a
/// missing file means no entries for that id. A proof-of-concept backend,
/// not a database.
pub struct DiskEntries {
	directory: PathBuf,
	// serializes read-modify-write cycles on the files
	lock: Mutex<()>
}

impl DiskEntries {
	pub fn open(directory: impl AsRef<Path>) -> StoreResult<Self> {
		let directory = directory.as_ref().to_path_buf();
		fs::create_dir_all(&directory)?;
		info!("DiskEntries opened at {}", directory.display());
		Ok(DiskEntries {
			directory,
			lock: Mutex::new(())
		})
	}

	fn file_for(&self, id: Id) -> PathBuf {
		self.directory.join(id_to_hex(id))
	}

	fn load(&self, id: Id) -> StoreResult<HashSet<Entry>> {
		let path = self.file_for(id);
		match fs::read(&path) {
			Ok(bytes) => bincode::deserialize(&bytes)
				.map_err(|_| StoreError::Corrupt(path.display().to_string())),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
			Err(e) => Err(e.into())
		}
	}

	fn save(&self, id: Id, entries: &HashSet<Entry>) -> StoreResult<()> {
		let path = self.file_for(id);
		if entries.is_empty() {
			match fs::remove_file(&path) {
				Ok(_) => (),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
				Err(e) => return Err(e.into())
			}
			return Ok(());
		}
		let bytes = bincode::serialize(entries)
			.map_err(|_| StoreError::Corrupt(path.display().to_string()))?;
		fs::write(&path, bytes)?;
		Ok(())
	}

	fn ids(&self) -> StoreResult<Vec<Id>> {
		let mut ids = Vec::new();
		for dir_entry in fs::read_dir(&self.directory)? {
			let name = dir_entry?.file_name();
			if let Some(id) = name.to_str().and_then(id_from_hex) {
				ids.push(id);
			}
		}
		Ok(ids)
	}
}

impl EntryStore for DiskEntries {
	fn add(&self, entry: Entry) -> StoreResult<()> {
		let _guard = self.lock.lock().unwrap();
		debug!("Adding entry {} to disk", entry);
		let mut set = self.load(entry.id)?;
		let id = entry.id;
		set.insert(entry);
		self.save(id, &set)
	}

	fn add_all(&self, entries: HashSet<Entry>) -> StoreResult<()> {
		let _guard = self.lock.lock().unwrap();
		let mut by_id: HashMap<Id, HashSet<Entry>> = HashMap::new();
		for entry in entries {
			by_id.entry(entry.id).or_default().insert(entry);
		}
		for (id, added) in by_id {
			let mut set = self.load(id)?;
			set.extend(added);
			self.save(id, &set)?;
		}
		Ok(())
	}

	fn remove(&self, entry: &Entry) -> StoreResult<()> {
		let _guard = self.lock.lock().unwrap();
		let mut set = self.load(entry.id)?;
		set.remove(entry);
		self.save(entry.id, &set)
	}

	fn remove_all(&self, entries: &HashSet<Entry>) -> StoreResult<()> {
		let _guard = self.lock.lock().unwrap();
		for entry in entries {
			let mut set = self.load(entry.id)?;
			set.remove(entry);
			self.save(entry.id, &set)?;
		}
		Ok(())
	}

	fn entries_at(&self, id: Id) -> StoreResult<HashSet<Entry>> {
		let _guard = self.lock.lock().unwrap();
		self.load(id)
	}

	fn entries_in_interval(&self, from: Id, to: Id) -> StoreResult<HashSet<Entry>> {
		let _guard = self.lock.lock().unwrap();
		let mut result = HashSet::new();
		for id in self.ids()? {
			if in_interval_open_closed(id, from, to) {
				result.extend(self.load(id)?);
			}
		}
		Ok(result)
	}

	fn entries(&self) -> StoreResult<HashMap<Id, HashSet<Entry>>> {
		let _guard = self.lock.lock().unwrap();
		let mut result = HashMap::new();
		for id in self.ids()? {
			let set = self.load(id)?;
			if !set.is_empty() {
				result.insert(id, set);
			}
		}
		Ok(result)
	}

	fn len(&self) -> StoreResult<usize> {
		let _guard = self.lock.lock().unwrap();
		let mut total = 0;
		for id in self.ids()? {
			total += self.load(id)?.len();
		}
		Ok(total)
	}
}
