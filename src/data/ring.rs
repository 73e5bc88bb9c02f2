use std::mem::size_of;

/// Identifier on the modular ring.
pub type Id = u64;
// number of bits
pub const NUM_BITS: usize = size_of::<Id>() * 8;

// Strictly in range: id in (start, end)
pub fn in_range(id: Id, start: Id, end: Id) -> bool {
	if end > start {
		// (start, id, end)
		id > start && id < end
	}
	else {
		// end <= start
		// case 1: (start, id, end + MAX_VAL)
		// case 2: (start, id + MAX_VAL, end + MAX_VAL)
		id > start || id < end
	}
}

/// Interval containment with open lower and closed upper bound: id in (from, to].
/// from == to denotes the whole ring, so everything is contained.
pub fn in_interval_open_closed(id: Id, from: Id, to: Id) -> bool {
	id == to || in_range(id, from, to)
}

/// Fixed-width hex encoding of an id, used as file name by the disk store.
pub fn id_to_hex(id: Id) -> String {
	format!("{:016x}", id)
}

pub fn id_from_hex(hex: &str) -> Option<Id> {
	if hex.len() != 16 {
		return None;
	}
	Id::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_in_range() {
		assert!(in_range(5, 0, 10));
		assert!(!in_range(0, 0, 10));
		assert!(!in_range(10, 0, 10));
		// wrap-around
		assert!(in_range(1, u64::MAX - 1, 10));
		assert!(in_range(u64::MAX, u64::MAX - 1, 10));
		assert!(!in_range(u64::MAX - 1, u64::MAX - 1, 10));
		// (a, a) is the whole ring except a
		assert!(in_range(1, 5, 5));
		assert!(!in_range(5, 5, 5));
	}

	#[test]
	fn test_in_interval_open_closed() {
		assert!(!in_interval_open_closed(0, 0, 10));
		assert!(in_interval_open_closed(10, 0, 10));
		assert!(in_interval_open_closed(1, 0, 10));
		// wrap-around: (MAX-1, 2]
		assert!(in_interval_open_closed(0, u64::MAX - 1, 2));
		assert!(in_interval_open_closed(2, u64::MAX - 1, 2));
		assert!(!in_interval_open_closed(3, u64::MAX - 1, 2));
		// (a, a] is the whole ring
		assert!(in_interval_open_closed(5, 5, 5));
		assert!(in_interval_open_closed(4, 5, 5));
	}

	#[test]
	fn test_hex_round_trip() {
		for id in [0u64, 1, 0xdead_beef, u64::MAX] {
			let hex = id_to_hex(id);
			assert_eq!(hex.len(), 16);
			assert_eq!(id_from_hex(&hex), Some(id));
		}
		assert_eq!(id_from_hex("zz"), None);
		assert_eq!(id_from_hex("0"), None);
	}
}
