use std::sync::{Arc, Mutex};
use log::{debug, info, warn};
use tokio::{
	io::AsyncWriteExt,
	net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
	sync::mpsc,
	task::JoinHandle
};
use crate::com::endpoint::{EndpointState, Lifecycle, Method};
use crate::com::error::{ComError, ComResult, RemoteFault};
use crate::com::node::{NodeRef, RefsAndEntries};
use crate::data::{Scheme, Url};
use super::wire::{self, Request, RequestBody, Response, ResponseBody};

/// Callee-side dispatcher of the socket transport: answers handshakes,
/// decodes requests, gates them on the lifecycle and forwards them to the
/// local node. Each request runs in its own task, so responses on one
/// inbound connection may be written out of request order; a writer task
/// per connection serializes the frames.
pub struct SocketEndpoint {
	node: NodeRef,
	url: Url,
	lifecycle: Lifecycle,
	handle: Mutex<Option<JoinHandle<()>>>
}

impl SocketEndpoint {
	pub fn new(node: NodeRef, url: Url) -> ComResult<Arc<Self>> {
		if url.scheme != Scheme::Socket {
			return Err(ComError::Protocol(format!(
				"socket endpoint cannot serve {}",
				url
			)));
		}
		Ok(Arc::new(SocketEndpoint {
			node,
			url,
			lifecycle: Lifecycle::new(),
			handle: Mutex::new(None)
		}))
	}

	pub fn lifecycle(&self) -> &Lifecycle {
		&self.lifecycle
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Bind the listener and start accepting connections.
	pub async fn listen(self: &Arc<Self>) -> ComResult<()> {
		let listener = TcpListener::bind(self.url.socket_addr()).await?;
		self.lifecycle.advance(EndpointState::Listening)?;
		info!("{}: listening at {}", self.node.info(), self.url);
		let ep = self.clone();
		let handle = tokio::spawn(async move {
			ep.accept_loop(listener).await;
		});
		*self.handle.lock().unwrap() = Some(handle);
		Ok(())
	}

	/// Open the gate for entry-sensitive operations; releases every caller
	/// currently parked on the lifecycle.
	pub fn accept_entries(&self) -> ComResult<()> {
		self.lifecycle.advance(EndpointState::AcceptingEntries)
	}

	/// Shut down: notify every inbound connection, stop the listener and
	/// fail all future calls.
	pub async fn close(&self) {
		if self.lifecycle.advance(EndpointState::Closed).is_ok() {
			debug!("{}: endpoint closing", self.url);
		}
		let handle = self.handle.lock().unwrap().take();
		if let Some(handle) = handle {
			let _ = handle.await;
		}
	}

	async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
		loop {
			tokio::select! {
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							debug!("{}: inbound connection from {}", self.url, peer);
							let ep = self.clone();
							tokio::spawn(async move {
								ep.serve_connection(stream).await;
							});
						}
						Err(e) => {
							warn!("{}: accept failed: {}", self.url, e);
						}
					}
				}
				_ = self.lifecycle.wait_closed() => {
					debug!("{}: listener stopped", self.url);
					break;
				}
			}
		}
	}

	async fn serve_connection(self: Arc<Self>, stream: TcpStream) {
		let (mut read_half, write_half) = stream.into_split();
		// writer task serializes response frames from concurrent handlers
		let (tx, rx) = mpsc::channel::<Response>(64);
		let writer = tokio::spawn(write_loop(write_half, rx));

		loop {
			tokio::select! {
				frame = wire::read_frame::<_, Request>(&mut read_half) => {
					match frame {
						Ok(Some(request)) => {
							if !self.handle_request(request, &tx).await {
								break;
							}
						}
						Ok(None) => break,
						Err(e) => {
							// implies a version mismatch between peers
							warn!("{}: protocol failure on inbound connection: {}", self.url, e);
							break;
						}
					}
				}
				_ = self.lifecycle.wait_closed() => {
					debug!("{}: notifying client about shutdown", self.url);
					let _ = tx.send(Response::shutdown()).await;
					break;
				}
			}
		}
		drop(tx);
		let _ = writer.await;
	}

	/// Returns false when the connection should be closed.
	async fn handle_request(self: &Arc<Self>, request: Request, tx: &mpsc::Sender<Response>) -> bool {
		match request.body {
			RequestBody::Connect => {
				let response =
					Response::success(request.correlation, Method::Connect, ResponseBody::Ack);
				tx.send(response).await.is_ok()
			}
			RequestBody::Shutdown => {
				debug!("{}: client disconnected", self.url);
				false
			}
			body => {
				let ep = self.clone();
				let tx = tx.clone();
				tokio::spawn(async move {
					let response = ep.dispatch(request.correlation, body).await;
					let _ = tx.send(response).await;
				});
				true
			}
		}
	}

	async fn dispatch(&self, correlation: u64, body: RequestBody) -> Response {
		let method = body.method();
		if let Err(e) = self.lifecycle.gate(method).await {
			return Response::failure(correlation, method, RemoteFault::from(&e));
		}
		match self.invoke(body).await {
			Ok(result) => Response::success(correlation, method, result),
			Err(e) => {
				debug!("{}: {:?} failed: {}", self.url, method, e);
				Response::failure(correlation, method, RemoteFault::from(&e))
			}
		}
	}

	async fn invoke(&self, body: RequestBody) -> ComResult<ResponseBody> {
		match body {
			RequestBody::GetNodeId => Ok(ResponseBody::NodeId(self.node.info().id)),
			RequestBody::Ping => {
				self.node.ping().await?;
				Ok(ResponseBody::Ack)
			}
			RequestBody::FindSuccessor { id } => {
				let successor = self.node.find_successor(id).await?;
				Ok(ResponseBody::NodeRef(successor.info()))
			}
			RequestBody::Notify { candidate } => {
				let refs = self.node.notify(&candidate).await?;
				Ok(ResponseBody::Refs(refs.iter().map(|n| n.info()).collect()))
			}
			RequestBody::NotifyAndCopyEntries { candidate } => {
				let RefsAndEntries { refs, entries } =
					self.node.notify_and_copy_entries(&candidate).await?;
				Ok(ResponseBody::RefsAndEntries {
					refs: refs.iter().map(|n| n.info()).collect(),
					entries
				})
			}
			RequestBody::InsertEntry { entry } => {
				self.node.insert_entry(&entry).await?;
				Ok(ResponseBody::Ack)
			}
			RequestBody::RemoveEntry { entry } => {
				self.node.remove_entry(&entry).await?;
				Ok(ResponseBody::Ack)
			}
			RequestBody::InsertReplicas { replicas } => {
				self.node.insert_replicas(&replicas).await?;
				Ok(ResponseBody::Ack)
			}
			RequestBody::RemoveReplicas { from, replicas } => {
				self.node.remove_replicas(from, &replicas).await?;
				Ok(ResponseBody::Ack)
			}
			RequestBody::RetrieveEntries { id } => {
				let entries = self.node.retrieve_entries(id).await?;
				Ok(ResponseBody::Entries(entries))
			}
			RequestBody::LeavesNetwork { predecessor } => {
				self.node.leaves_network(&predecessor).await?;
				Ok(ResponseBody::Ack)
			}
			// reserved methods are handled before dispatch
			RequestBody::Connect | RequestBody::Shutdown => Err(ComError::Protocol(
				"reserved method in request body".to_string()
			))
		}
	}
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Response>) {
	while let Some(response) = rx.recv().await {
		let shutting_down = response.method == Method::Shutdown && response.correlation == 0;
		if let Err(e) = wire::write_frame(&mut write_half, &response).await {
			debug!("Write failure on inbound connection: {}", e);
			break;
		}
		if shutting_down {
			break;
		}
	}
	let _ = write_half.shutdown().await;
}
