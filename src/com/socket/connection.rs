use std::{
	collections::{HashMap, HashSet},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex
	},
	time::Duration
};
use log::{debug, info, warn};
use tokio::{
	io::AsyncWriteExt,
	net::{
		tcp::{OwnedReadHalf, OwnedWriteHalf},
		TcpStream
	},
	sync::oneshot
};
use crate::com::endpoint::Method;
use crate::com::error::{ComError, ComResult};
use crate::data::Url;
use super::wire::{self, Request, RequestBody, Response};

/// Bound on connection establishment, so a silent peer cannot hang the
/// caller. In-flight requests after the handshake are only bounded by
/// disconnection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct ConnState {
	disconnected: bool,
	/// Responses that arrived before their caller registered as a waiter.
	responses: HashMap<u64, Response>,
	/// Callers currently blocked in wait_for_response, by correlation id.
	waiters: HashMap<u64, oneshot::Sender<Response>>,
	/// Ids of the proxies registered on this connection. The connection is
	/// torn down by the pool when this becomes empty.
	proxies: HashSet<u64>
}

/// One physical duplex channel per ordered (local url, remote url) pair,
/// shared by every proxy addressing that peer. A dedicated reader task
/// matches responses to blocked callers by correlation id; requests on one
/// connection may therefore complete out of send order.
pub struct Connection {
	local_url: Url,
	remote_url: Url,
	// writes are serialized; the channel is shared by all proxies
	writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
	state: Mutex<ConnState>,
	// monotonic per-connection correlation counter
	counter: AtomicU64
}

impl Connection {
	/// Open the channel, perform the handshake within CONNECT_TIMEOUT and
	/// spawn the reader task. On failure nothing is left behind and the
	/// error propagates to the caller.
	pub async fn connect(local_url: Url, remote_url: Url, proxy_id: u64) -> ComResult<Arc<Self>> {
		info!("Opening connection {} -> {}", local_url, remote_url);
		let mut stream = TcpStream::connect(remote_url.socket_addr())
			.await
			.map_err(|e| {
				ComError::connection_io(format!("could not reach {}", remote_url), e)
			})?;

		let handshake = async {
			let request = Request {
				correlation: 0,
				body: RequestBody::Connect
			};
			wire::write_frame(&mut stream, &request).await?;
			match wire::read_frame::<_, Response>(&mut stream).await? {
				Some(r) if r.method == Method::Connect && r.result.is_ok() => Ok(()),
				Some(r) => Err(ComError::Protocol(format!(
					"unexpected handshake response: {:?}",
					r.method
				))),
				None => Err(ComError::connection(format!(
					"{} closed the channel during handshake",
					remote_url
				)))
			}
		};
		match tokio::time::timeout(CONNECT_TIMEOUT, handshake).await {
			Ok(result) => result?,
			Err(_) => {
				return Err(ComError::connection(format!(
					"handshake with {} timed out",
					remote_url
				)))
			}
		}

		let (read_half, write_half) = stream.into_split();
		let conn = Arc::new(Connection {
			local_url,
			remote_url,
			writer: tokio::sync::Mutex::new(Some(write_half)),
			state: Mutex::new(ConnState {
				disconnected: false,
				responses: HashMap::new(),
				waiters: HashMap::new(),
				proxies: HashSet::from([proxy_id])
			}),
			counter: AtomicU64::new(0)
		});
		let reader = conn.clone();
		tokio::spawn(async move {
			reader.read_loop(read_half).await;
		});
		debug!("Connection {} -> {} initialized", conn.local_url, conn.remote_url);
		Ok(conn)
	}

	pub fn local_url(&self) -> &Url {
		&self.local_url
	}

	pub fn remote_url(&self) -> &Url {
		&self.remote_url
	}

	/// Register a further proxy as client of this connection.
	/// Must only be called by the ConnectionPool.
	pub(crate) fn register_proxy(&self, proxy_id: u64) {
		let mut state = self.state.lock().unwrap();
		state.proxies.insert(proxy_id);
	}

	/// Remove a proxy from the client set; returns true when the set became
	/// empty and the connection can be destroyed.
	/// Must only be called by the ConnectionPool.
	pub(crate) fn release_proxy(&self, proxy_id: u64) -> bool {
		let mut state = self.state.lock().unwrap();
		state.proxies.remove(&proxy_id);
		state.proxies.is_empty()
	}

	pub fn proxy_count(&self) -> usize {
		self.state.lock().unwrap().proxies.len()
	}

	pub fn is_disconnected(&self) -> bool {
		self.state.lock().unwrap().disconnected
	}

	/// Send a request on behalf of a registered proxy. Returns the
	/// correlation id to pass to wait_for_response. The send side does not
	/// block on the remote peer, only on the shared write path.
	pub async fn send(&self, proxy_id: u64, body: RequestBody) -> ComResult<u64> {
		let correlation = {
			let state = self.state.lock().unwrap();
			if !state.proxies.contains(&proxy_id) {
				return Err(ComError::Protocol(format!(
					"proxy {} is not registered on connection {} -> {}",
					proxy_id, self.local_url, self.remote_url
				)));
			}
			if state.disconnected {
				return Err(ComError::connection(format!(
					"connection {} -> {} has been lost",
					self.local_url, self.remote_url
				)));
			}
			self.counter.fetch_add(1, Ordering::Relaxed) + 1
		};

		let request = Request { correlation, body };
		debug!(
			"Sending request {} ({:?}) on {} -> {}",
			correlation,
			request.body.method(),
			self.local_url,
			self.remote_url
		);
		let mut writer = self.writer.lock().await;
		match writer.as_mut() {
			Some(w) => {
				if let Err(e) = wire::write_frame(w, &request).await {
					drop(writer);
					self.connection_closed();
					return Err(e);
				}
			}
			None => {
				return Err(ComError::connection(format!(
					"connection {} -> {} has been lost",
					self.local_url, self.remote_url
				)))
			}
		}
		Ok(correlation)
	}

	/// Block until the response for `correlation` arrives or the connection
	/// is marked disconnected. A response that arrived before this call is
	/// picked up immediately; registration and delivery are atomic under the
	/// connection state lock, so a wake-up can never be missed.
	///
	/// There is deliberately no per-request timeout: a peer that stays
	/// connected but never answers keeps the caller parked, exactly like
	/// the handshake-less requests of the wire protocol demand. Callers
	/// needing an upper bound must race this future themselves.
	pub async fn wait_for_response(&self, correlation: u64) -> ComResult<Response> {
		let rx = {
			let mut state = self.state.lock().unwrap();
			if let Some(response) = state.responses.remove(&correlation) {
				return Ok(response);
			}
			if state.disconnected {
				return Err(self.lost());
			}
			let (tx, rx) = oneshot::channel();
			state.waiters.insert(correlation, tx);
			rx
		};
		debug!("Waiting for response {} on {} -> {}", correlation, self.local_url, self.remote_url);
		// the sender is dropped when the connection closes, which wakes us
		rx.await.map_err(|_| self.lost())
	}

	fn lost(&self) -> ComError {
		ComError::connection(format!(
			"connection {} -> {} has been lost",
			self.local_url, self.remote_url
		))
	}

	async fn read_loop(self: Arc<Self>, mut read_half: OwnedReadHalf) {
		loop {
			match wire::read_frame::<_, Response>(&mut read_half).await {
				Ok(Some(response)) => {
					if response.method == Method::Shutdown {
						// the other side is shutting down
						info!(
							"Remote endpoint {} shut down connection {} -> {}",
							self.remote_url, self.local_url, self.remote_url
						);
						self.connection_closed();
						break;
					}
					self.response_received(response);
				}
				Ok(None) => {
					if !self.is_disconnected() {
						warn!(
							"Channel {} -> {} closed by peer",
							self.local_url, self.remote_url
						);
					}
					self.connection_closed();
					break;
				}
				Err(e) => {
					if !self.is_disconnected() {
						warn!(
							"Read failure on {} -> {}: {}",
							self.local_url, self.remote_url, e
						);
					}
					self.connection_closed();
					break;
				}
			}
		}
	}

	fn response_received(&self, response: Response) {
		let mut state = self.state.lock().unwrap();
		debug!(
			"Response {} received on {} -> {}",
			response.correlation, self.local_url, self.remote_url
		);
		match state.waiters.remove(&response.correlation) {
			// wake up the blocked caller
			Some(waiter) => {
				let _ = waiter.send(response);
			}
			// caller has not registered yet; retain for pick-up
			None => {
				state.responses.insert(response.correlation, response);
			}
		}
	}

	/// Mark this connection broken and wake every blocked caller.
	/// Idempotent.
	fn connection_closed(&self) {
		let mut state = self.state.lock().unwrap();
		if state.disconnected {
			return;
		}
		info!("Connection {} -> {} broken down", self.local_url, self.remote_url);
		state.disconnected = true;
		state.responses.clear();
		// dropping the senders releases every waiter with a failure
		state.waiters.clear();
	}

	/// Tear this connection down: best-effort shutdown notification to the
	/// remote endpoint, then close both directions and wake any remaining
	/// waiters. Idempotent; invoked by the ConnectionPool when the last
	/// proxy releases the connection.
	pub async fn disconnect(&self) {
		let already_down = self.is_disconnected();
		let mut writer = self.writer.lock().await;
		if let Some(mut w) = writer.take() {
			if !already_down {
				debug!(
					"Sending shutdown notification on {} -> {}",
					self.local_url, self.remote_url
				);
				let request = Request {
					correlation: 0,
					body: RequestBody::Shutdown
				};
				if let Err(e) = wire::write_frame(&mut w, &request).await {
					debug!("Shutdown notification failed: {}", e);
				}
			}
			let _ = w.shutdown().await;
		}
		drop(writer);
		self.connection_closed();
	}
}
