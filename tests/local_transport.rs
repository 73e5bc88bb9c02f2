use std::time::Duration;
use chord_overlay::com::{ComError, LocalEndpoint, LocalProxy, Node};
use rand::prelude::*;

mod common;
use common::*;

#[tokio::test]
async fn test_local_round_trips() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let addr = "local://localhost:1/n0";
	let node = node_at(&factory, 100, addr);
	let endpoint = LocalEndpoint::open(factory.registry(), node, url(addr))?;
	endpoint.accept_entries()?;

	let proxy = LocalProxy::connect(factory.clone(), &url(addr))?;
	assert_eq!(proxy.info().id, 100);
	proxy.ping().await?;

	let mut rng = StdRng::seed_from_u64(1);
	let entry = entry_with_id(&mut rng, 50);
	proxy.insert_entry(&entry).await?;
	assert!(proxy.retrieve_entries(50).await?.contains(&entry));

	// the endpoint has seen exactly one distinct caller
	assert_eq!(endpoint.caller_count(), 1);
	endpoint.close();
	Ok(())
}

#[tokio::test]
async fn test_entry_operations_wait_for_accepting_entries() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let addr = "local://localhost:1/n1";
	let node = node_at(&factory, 100, addr);
	let endpoint = LocalEndpoint::open(factory.registry(), node, url(addr))?;

	let proxy = LocalProxy::connect(factory.clone(), &url(addr))?;
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
	endpoint.close();
	Ok(())
}

#[tokio::test]
async fn test_rebinding_invalidates_old_proxies() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let addr = "local://localhost:1/n2";
	let node = node_at(&factory, 100, addr);
	let endpoint = LocalEndpoint::open(factory.registry(), node, url(addr))?;
	endpoint.accept_entries()?;

	let proxy = LocalProxy::connect(factory.clone(), &url(addr))?;
	proxy.ping().await?;
	assert!(proxy.is_valid());

	// same address, fresh incarnation of the node
	endpoint.close();
	let node = node_at(&factory, 200, addr);
	let reborn = LocalEndpoint::open(factory.registry(), node, url(addr))?;
	reborn.accept_entries()?;
	assert!(reborn.generation() > endpoint.generation());

	// the stale proxy fails and stays failed
	assert!(proxy.ping().await.is_err());
	assert!(!proxy.is_valid());
	assert!(matches!(
		proxy.ping().await,
		Err(ComError::InvalidProxy(_))
	));

	// a fresh proxy reaches the new incarnation
	let fresh = LocalProxy::connect(factory.clone(), &url(addr))?;
	assert_eq!(fresh.info().id, 200);
	fresh.ping().await?;

	reborn.close();
	Ok(())
}

#[tokio::test]
async fn test_closed_endpoint_rejects_calls() -> anyhow::Result<()> {
	init_logger();
	let factory = factory_at("local://localhost:1/caller");
	let addr = "local://localhost:1/n3";
	let node = node_at(&factory, 100, addr);
	let endpoint = LocalEndpoint::open(factory.registry(), node, url(addr))?;
	let proxy = LocalProxy::connect(factory.clone(), &url(addr))?;

	endpoint.close();
	assert!(proxy.ping().await.is_err());
	assert!(factory.registry().lookup(&url(addr)).is_none());
	Ok(())
}
