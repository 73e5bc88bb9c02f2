use std::sync::Arc;
use std::time::Duration;
use chord_overlay::com::socket::{wire, Connection, SocketEndpoint, SocketProxy};
use chord_overlay::com::socket::wire::{Request, RequestBody, Response, ResponseBody};
use chord_overlay::com::{ComError, Method, Node};
use chord_overlay::node::ChordNode;
use rand::prelude::*;
use tokio::net::TcpListener;

mod common;
use common::*;

async fn serve_node(id: u64, addr: &str) -> anyhow::Result<(Arc<ChordNode>, Arc<SocketEndpoint>)> {
	let factory = factory_at(addr);
	let node = node_at(&factory, id, addr);
	let endpoint = SocketEndpoint::new(node.clone(), url(addr))?;
	endpoint.listen().await?;
	Ok((node, endpoint))
}

#[tokio::test]
async fn test_proxy_round_trips() -> anyhow::Result<()> {
	init_logger();
	let addr = "socket://localhost:9820/n0";
	let (_node, endpoint) = serve_node(100, addr).await?;
	endpoint.accept_entries()?;

	let factory = factory_at("socket://localhost:9821/caller");
	let proxy = SocketProxy::connect(factory.clone(), url(addr)).await?;
	assert_eq!(proxy.info().id, 100);

	proxy.ping().await?;

	let mut rng = StdRng::seed_from_u64(1);
	let entry = entry_with_id(&mut rng, 50);
	proxy.insert_entry(&entry).await?;
	let retrieved = proxy.retrieve_entries(50).await?;
	assert!(retrieved.contains(&entry));
	proxy.remove_entry(&entry).await?;
	assert!(proxy.retrieve_entries(50).await?.is_empty());

	// find_successor resolves to a proxy for the serving node
	let successor = proxy.find_successor(7).await?;
	assert_eq!(successor.info().id, 100);

	proxy.release().await;
	endpoint.close().await;
	Ok(())
}

#[tokio::test]
async fn test_proxies_share_one_pooled_connection() -> anyhow::Result<()> {
	init_logger();
	let addr = "socket://localhost:9822/n0";
	let (_node, endpoint) = serve_node(100, addr).await?;
	endpoint.accept_entries()?;

	let factory = factory_at("socket://localhost:9823/caller");
	let p1 = SocketProxy::connect(factory.clone(), url(addr)).await?;
	assert_eq!(factory.pool().len().await, 1);

	// second proxy for the same peer joins the existing connection
	let p2 = SocketProxy::for_info(factory.clone(), p1.info());
	p2.ping().await?;
	assert_eq!(factory.pool().len().await, 1);

	// the connection outlives any single proxy
	p1.release().await;
	assert_eq!(factory.pool().len().await, 1);
	p2.ping().await?;

	// the last release tears it down
	p2.release().await;
	assert!(factory.pool().is_empty().await);

	endpoint.close().await;
	Ok(())
}

#[tokio::test]
async fn test_entry_operations_wait_for_accepting_entries() -> anyhow::Result<()> {
	init_logger();
	let addr = "socket://localhost:9824/n0";
	let (_node, endpoint) = serve_node(100, addr).await?;

	let factory = factory_at("socket://localhost:9825/caller");
	let proxy = SocketProxy::connect(factory.clone(), url(addr)).await?;

	// not entry-sensitive, passes while only listening
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
	assert!(proxy.retrieve_entries(50).await?.contains(&entry));

	proxy.release().await;
	endpoint.close().await;
	Ok(())
}

#[tokio::test]
async fn test_endpoint_close_fails_parked_callers() -> anyhow::Result<()> {
	init_logger();
	let addr = "socket://localhost:9826/n0";
	let (_node, endpoint) = serve_node(100, addr).await?;

	let factory = factory_at("socket://localhost:9827/caller");
	let proxy = SocketProxy::connect(factory.clone(), url(addr)).await?;

	let mut rng = StdRng::seed_from_u64(3);
	let entry = entry_with_id(&mut rng, 50);
	let blocked = {
		let proxy = proxy.clone();
		tokio::spawn(async move { proxy.insert_entry(&entry).await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;

	endpoint.close().await;
	assert!(blocked.await?.is_err());

	// the connection is gone; the first failing call invalidates the proxy
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(proxy.ping().await.is_err());
	assert!(!proxy.is_valid());
	assert!(matches!(
		proxy.ping().await,
		Err(ComError::InvalidProxy(_))
	));
	Ok(())
}

/// Raw peer answering by hand, to control response ordering on the wire.
async fn fake_handshake(stream: &mut tokio::net::TcpStream) -> anyhow::Result<()> {
	let request: Request = wire::read_frame(stream).await?.unwrap();
	assert!(matches!(request.body, RequestBody::Connect));
	let reply = Response::success(request.correlation, Method::Connect, ResponseBody::Ack);
	wire::write_frame(stream, &reply).await?;
	Ok(())
}

#[tokio::test]
async fn test_responses_complete_out_of_send_order() -> anyhow::Result<()> {
	init_logger();
	let listener = TcpListener::bind("localhost:9828").await?;
	let server = tokio::spawn(async move {
		let (mut stream, _) = listener.accept().await.unwrap();
		fake_handshake(&mut stream).await.unwrap();
		// collect two requests, answer them in reverse order
		let first: Request = wire::read_frame(&mut stream).await.unwrap().unwrap();
		let second: Request = wire::read_frame(&mut stream).await.unwrap().unwrap();
		for request in [second, first] {
			let reply = Response::success(
				request.correlation,
				request.body.method(),
				ResponseBody::NodeId(request.correlation)
			);
			wire::write_frame(&mut stream, &reply).await.unwrap();
		}
	});

	let conn = Connection::connect(
		url("socket://localhost:9829/caller"),
		url("socket://localhost:9828/peer"),
		1
	)
	.await?;
	let c1 = conn.send(1, RequestBody::GetNodeId).await?;
	let c2 = conn.send(1, RequestBody::GetNodeId).await?;
	assert!(c2 > c1);

	// each caller gets its own response despite the reversed delivery
	let r1 = conn.wait_for_response(c1).await?;
	let r2 = conn.wait_for_response(c2).await?;
	assert!(matches!(r1.result, Ok(ResponseBody::NodeId(id)) if id == c1));
	assert!(matches!(r2.result, Ok(ResponseBody::NodeId(id)) if id == c2));

	server.await?;
	conn.disconnect().await;
	Ok(())
}

#[tokio::test]
async fn test_failed_first_contact_releases_pool_registration() -> anyhow::Result<()> {
	init_logger();
	let listener = TcpListener::bind("localhost:9832").await?;
	let server = tokio::spawn(async move {
		let (mut stream, _) = listener.accept().await.unwrap();
		fake_handshake(&mut stream).await.unwrap();
		// answer the node id query with the wrong body shape
		let request: Request = wire::read_frame(&mut stream).await.unwrap().unwrap();
		let reply = Response::success(request.correlation, request.body.method(), ResponseBody::Ack);
		wire::write_frame(&mut stream, &reply).await.unwrap();
		// keep the socket open until the client side is done with it
		let _: Option<Request> = wire::read_frame(&mut stream).await.unwrap();
	});

	let factory = factory_at("socket://localhost:9833/caller");
	let result = SocketProxy::connect(factory.clone(), url("socket://localhost:9832/peer")).await;
	assert!(result.is_err());

	// the failed connect released its registration, so nothing stays pooled
	// and later proxies cannot be kept alive by the orphan
	assert!(factory.pool().is_empty().await);
	server.await?;
	Ok(())
}

#[tokio::test]
async fn test_lost_connection_wakes_waiters() -> anyhow::Result<()> {
	init_logger();
	let listener = TcpListener::bind("localhost:9830").await?;
	let server = tokio::spawn(async move {
		let (mut stream, _) = listener.accept().await.unwrap();
		fake_handshake(&mut stream).await.unwrap();
		// swallow one request, then drop the socket without answering
		let _: Request = wire::read_frame(&mut stream).await.unwrap().unwrap();
	});

	let conn = Connection::connect(
		url("socket://localhost:9831/caller"),
		url("socket://localhost:9830/peer"),
		1
	)
	.await?;
	let correlation = conn.send(1, RequestBody::Ping).await?;
	server.await?;

	assert!(conn.wait_for_response(correlation).await.is_err());
	assert!(conn.is_disconnected());
	assert!(conn.send(1, RequestBody::Ping).await.is_err());
	Ok(())
}

#[tokio::test]
async fn test_lost_connection_wakes_every_waiter() -> anyhow::Result<()> {
	init_logger();
	let listener = TcpListener::bind("localhost:9834").await?;
	let server = tokio::spawn(async move {
		let (mut stream, _) = listener.accept().await.unwrap();
		fake_handshake(&mut stream).await.unwrap();
		// swallow all requests without answering, then drop the socket
		for _ in 0..4 {
			let _: Request = wire::read_frame(&mut stream).await.unwrap().unwrap();
		}
	});

	let conn = Connection::connect(
		url("socket://localhost:9835/caller"),
		url("socket://localhost:9834/peer"),
		1
	)
	.await?;
	let mut waiters = Vec::new();
	for _ in 0..4 {
		let correlation = conn.send(1, RequestBody::Ping).await?;
		let conn = conn.clone();
		waiters.push(tokio::spawn(async move {
			conn.wait_for_response(correlation).await
		}));
	}
	tokio::time::sleep(Duration::from_millis(50)).await;
	for w in &waiters {
		assert!(!w.is_finished());
	}

	// the remote drop must release all of them, none may hang
	server.await?;
	for w in waiters {
		assert!(w.await?.is_err());
	}
	Ok(())
}
