use std::time::Duration;
use chord_overlay::com::{Node, RpcEndpoint, RpcProxy};
use rand::prelude::*;

mod common;
use common::*;

#[tokio::test]
async fn test_rpc_round_trips() -> anyhow::Result<()> {
	init_logger();
	let addr = "rpc://localhost:9840/n0";
	let factory = factory_at("rpc://localhost:9841/caller");
	let node = node_at(&factory, 100, addr);
	let endpoint = RpcEndpoint::new(node, url(addr))?;
	endpoint.listen().await?;
	endpoint.accept_entries()?;

	let proxy = RpcProxy::connect(factory.clone(), url(addr)).await?;
	assert_eq!(proxy.info().id, 100);
	proxy.ping().await?;

	let mut rng = StdRng::seed_from_u64(1);
	let entry = entry_with_id(&mut rng, 50);
	proxy.insert_entry(&entry).await?;
	assert!(proxy.retrieve_entries(50).await?.contains(&entry));
	proxy.remove_entry(&entry).await?;
	assert!(proxy.retrieve_entries(50).await?.is_empty());

	let successor = proxy.find_successor(7).await?;
	assert_eq!(successor.info().id, 100);

	endpoint.close().await;
	Ok(())
}

#[tokio::test]
async fn test_rpc_entry_operations_wait_for_accepting_entries() -> anyhow::Result<()> {
	init_logger();
	let addr = "rpc://localhost:9842/n0";
	let factory = factory_at("rpc://localhost:9843/caller");
	let node = node_at(&factory, 100, addr);
	let endpoint = RpcEndpoint::new(node, url(addr))?;
	endpoint.listen().await?;

	let proxy = RpcProxy::connect(factory.clone(), url(addr)).await?;
	proxy.ping().await?;

	let mut rng = StdRng::seed_from_u64(2);
	let entry = entry_with_id(&mut rng, 50);
	let blocked = {
		let proxy = proxy.clone();
		let entry = entry.clone();
		tokio::spawn(async move { proxy.insert_entry(&entry).await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!blocked.is_finished());

	endpoint.accept_entries()?;
	blocked.await??;
	endpoint.close().await;
	Ok(())
}

#[tokio::test]
async fn test_rpc_unreachable_peer_fails_and_invalidates() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("rpc://localhost:9845/caller");
	assert!(RpcProxy::connect(factory.clone(), url("rpc://localhost:9844/nobody"))
		.await
		.is_err());

	let proxy = RpcProxy::for_info(
		factory.clone(),
		chord_overlay::com::NodeInfo {
			id: 1,
			url: url("rpc://localhost:9844/nobody")
		}
	);
	assert!(proxy.ping().await.is_err());
	assert!(!proxy.is_valid());
	Ok(())
}
