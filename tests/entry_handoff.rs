use std::collections::HashSet;
use chord_overlay::com::{Node, NodeInfo};
use chord_overlay::data::{in_interval_open_closed, Entry};
use rand::prelude::*;

mod common;
use common::*;

const NODE_ID: u64 = 100;
const CANDIDATE_ID: u64 = 50;

/// Entries inserted concurrently with a predecessor hand-off must never fall
/// between the two nodes: every successful insert into the handed-off
/// interval has to be visible in the copied set.
#[tokio::test]
async fn test_handoff_races_inserts_without_losing_entries() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let node = node_at(&factory, NODE_ID, "local://localhost:1/n0");

	let candidate = NodeInfo {
		id: CANDIDATE_ID,
		url: url("local://localhost:1/joiner")
	};
	// the candidate has to resolve to something for predecessor adoption
	let joiner = node_at(&factory, CANDIDATE_ID, "local://localhost:1/joiner");
	let _joiner_endpoint = chord_overlay::com::LocalEndpoint::open(
		factory.registry(),
		joiner,
		url("local://localhost:1/joiner")
	)?;

	let mut inserters = Vec::new();
	for task in 0..4u64 {
		let node = node.clone();
		inserters.push(tokio::spawn(async move {
			let mut rng = StdRng::seed_from_u64(task);
			let mut inserted = Vec::new();
			for _ in 0..100 {
				let id = rng.gen();
				let entry = entry_with_id(&mut rng, id);
				if node.insert_entry(&entry).await.is_ok() {
					inserted.push(entry);
				}
				tokio::task::yield_now().await;
			}
			inserted
		}));
	}

	let handoff = {
		let node = node.clone();
		let candidate = candidate.clone();
		tokio::spawn(async move { node.notify_and_copy_entries(&candidate).await })
	};

	let mut inserted: Vec<Entry> = Vec::new();
	for h in inserters {
		inserted.extend(h.await?);
	}
	let result = handoff.await??;
	let copied: HashSet<Entry> = result.entries;

	assert_eq!(node.predecessor_info().map(|p| p.id), Some(CANDIDATE_ID));

	// nothing inserted has vanished
	let stored: HashSet<Entry> = node
		.entries()
		.entries()?
		.into_values()
		.flatten()
		.collect();
	for entry in &inserted {
		assert!(stored.contains(entry));
	}

	// hand-off atomicity: a successful insert into (NODE_ID, CANDIDATE_ID]
	// can only have happened before the copy, so it must be in the copy
	for entry in &inserted {
		if in_interval_open_closed(entry.id, NODE_ID, CANDIDATE_ID) {
			assert!(
				copied.contains(entry),
				"entry {} fell through the hand-off",
				entry
			);
		}
	}

	// and the copy contains only entries from that interval
	for entry in &copied {
		assert!(in_interval_open_closed(entry.id, NODE_ID, CANDIDATE_ID));
	}
	Ok(())
}

/// After the hand-off the node refuses inserts it is no longer responsible
/// for.
#[tokio::test]
async fn test_node_rejects_inserts_outside_its_partition() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let node = node_at(&factory, NODE_ID, "local://localhost:1/n1");
	let joiner = node_at(&factory, CANDIDATE_ID, "local://localhost:1/joiner1");
	let _joiner_endpoint = chord_overlay::com::LocalEndpoint::open(
		factory.registry(),
		joiner.clone(),
		url("local://localhost:1/joiner1")
	)?;

	node.notify_and_copy_entries(&joiner.info()).await?;

	let mut rng = StdRng::seed_from_u64(5);
	// now owned by the joiner
	assert!(node.insert_entry(&entry_with_id(&mut rng, 20)).await.is_err());
	// still owned by the node
	node.insert_entry(&entry_with_id(&mut rng, 80)).await?;
	Ok(())
}
